//! Typing indicator timers. Both are driven by explicit `now` values so the
//! caller owns the clock.

use std::time::{Duration, Instant};

pub const LOCAL_TYPING_IDLE: Duration = Duration::from_secs(1);
pub const REMOTE_TYPING_QUIET: Duration = Duration::from_secs(3);

/// Turns keystrokes into `typing` signals for the server.
///
/// Every keystroke emits a signal and restarts the idle timer. When the timer
/// runs out, [`poll`](Self::poll) emits a single `false`.
#[derive(Debug)]
pub struct TypingDebouncer {
    idle: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(LOCAL_TYPING_IDLE)
    }
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    /// Returns the `isTyping` value to send for this keystroke.
    pub fn keystroke(&mut self, text: &str, now: Instant) -> bool {
        let is_typing = !text.trim().is_empty();
        self.deadline = is_typing.then(|| now + self.idle);
        is_typing
    }

    /// `Some(false)` exactly once after the idle timer fires.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(false)
            }
            _ => None,
        }
    }

    /// Sending clears typing. `Some(false)` if a stop still needs to go out.
    pub fn on_send(&mut self) -> Option<bool> {
        self.deadline.take().map(|_| false)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Counterpart typing flag that clears itself after a quiet period.
#[derive(Debug)]
pub struct RemoteTyping {
    quiet: Duration,
    until: Option<Instant>,
}

impl Default for RemoteTyping {
    fn default() -> Self {
        Self::new(REMOTE_TYPING_QUIET)
    }
}

impl RemoteTyping {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, until: None }
    }

    pub fn update(&mut self, is_typing: bool, now: Instant) {
        self.until = is_typing.then(|| now + self.quiet);
    }

    pub fn clear(&mut self) {
        self.until = None;
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }
}
