//! Local state of one open conversation.
//!
//! REST history and realtime events are merged into a single list ordered
//! by `(timestamp, id)` and deduplicated by server id. The view never talks
//! to the network; it returns what the caller should do next.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use zenzone_types::api::SendMessageRequest;
use zenzone_types::events::GatewayEvent;
use zenzone_types::models::Message;

use crate::typing::RemoteTyping;

/// What the caller should do after applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewAction {
    Nothing,
    Redraw,
    ScrollToBottom,
    /// History may be stale; fetch it again over REST.
    Refetch,
}

#[derive(Debug)]
pub struct ConversationView {
    appointment_id: Uuid,
    me: Uuid,
    counterpart: Uuid,
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
    at_bottom: bool,
    unread_count: usize,
    first_unread_index: Option<usize>,
    remote_typing: RemoteTyping,
    peer_online: bool,
    last_seen: Option<DateTime<Utc>>,
    draft: String,
    error_banner: Option<String>,
    sending: bool,
}

impl ConversationView {
    pub fn new(appointment_id: Uuid, me: Uuid, counterpart: Uuid) -> Self {
        Self {
            appointment_id,
            me,
            counterpart,
            messages: Vec::new(),
            ids: HashSet::new(),
            at_bottom: true,
            unread_count: 0,
            first_unread_index: None,
            remote_typing: RemoteTyping::default(),
            peer_online: false,
            last_seen: None,
            draft: String::new(),
            error_banner: None,
            sending: false,
        }
    }

    pub fn appointment_id(&self) -> Uuid {
        self.appointment_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn first_unread_index(&self) -> Option<usize> {
        self.first_unread_index
    }

    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn peer_online(&self) -> bool {
        self.peer_online
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn error_banner(&self) -> Option<&str> {
        self.error_banner.as_deref()
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn is_peer_typing(&self, now: Instant) -> bool {
        self.remote_typing.is_active(now)
    }

    /// Insert keeping `(timestamp, id)` order. Returns the index, or `None`
    /// when the id is already present.
    fn insert(&mut self, message: Message) -> Option<usize> {
        if !self.ids.insert(message.id) {
            return None;
        }
        let key = (message.timestamp, message.id);
        let index = self
            .messages
            .partition_point(|m| (m.timestamp, m.id) <= key);
        self.messages.insert(index, message);

        if let Some(first) = self.first_unread_index.as_mut() {
            if index <= *first {
                *first += 1;
            }
        }
        Some(index)
    }

    /// Merge a REST history fetch. History never counts as unread.
    pub fn merge_history(&mut self, history: Vec<Message>) {
        for message in history {
            if message.appointment_id == self.appointment_id {
                self.insert(message);
            }
        }
    }

    /// Apply one realtime event.
    pub fn apply(&mut self, event: GatewayEvent, now: Instant, wall: DateTime<Utc>) -> ViewAction {
        if event.appointment_id().is_some_and(|id| id != self.appointment_id) {
            return ViewAction::Nothing;
        }

        match event {
            GatewayEvent::ReceiveMessage(message) => self.receive(message, wall),
            GatewayEvent::UserTyping {
                user_id, is_typing, ..
            } if user_id == self.counterpart => {
                self.remote_typing.update(is_typing, now);
                ViewAction::Redraw
            }
            GatewayEvent::PeerOnline {
                user_id,
                online,
                timestamp,
                ..
            } if user_id.is_none_or(|id| id == self.counterpart) => {
                if self.peer_online && !online {
                    self.last_seen = Some(timestamp);
                }
                self.peer_online = online;
                ViewAction::Redraw
            }
            GatewayEvent::ReloadChat { .. } => ViewAction::Refetch,
            _ => ViewAction::Nothing,
        }
    }

    fn receive(&mut self, message: Message, wall: DateTime<Utc>) -> ViewAction {
        let own = message.sender_id == self.me;
        if !own {
            self.last_seen = Some(wall);
            self.remote_typing.clear();
        }

        let Some(index) = self.insert(message) else {
            return ViewAction::Nothing;
        };

        if self.at_bottom {
            return ViewAction::ScrollToBottom;
        }
        if !own {
            self.unread_count += 1;
            // Late arrivals can land above the current marker
            self.first_unread_index = Some(self.first_unread_index.map_or(index, |f| f.min(index)));
        }
        ViewAction::Redraw
    }

    pub fn set_at_bottom(&mut self, at_bottom: bool) {
        self.at_bottom = at_bottom;
        if at_bottom {
            self.mark_read();
        }
    }

    pub fn mark_read(&mut self) {
        self.unread_count = 0;
        self.first_unread_index = None;
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn dismiss_error(&mut self) {
        self.error_banner = None;
    }

    /// Start sending the draft. `None` when there is nothing to send or a
    /// send is already in flight.
    pub fn begin_send(&mut self) -> Option<SendMessageRequest> {
        let content = self.draft.trim();
        if content.is_empty() || self.sending {
            return None;
        }
        self.sending = true;
        self.error_banner = None;
        Some(SendMessageRequest {
            appointment_id: Some(self.appointment_id),
            recipient_id: Some(self.counterpart),
            content: content.to_string(),
            attachments: Vec::new(),
        })
    }

    pub fn send_succeeded(&mut self, message: Message) -> ViewAction {
        self.sending = false;
        self.draft.clear();
        self.insert(message);
        self.set_at_bottom(true);
        ViewAction::ScrollToBottom
    }

    /// The draft stays so the user can retry.
    pub fn send_failed(&mut self, banner: impl Into<String>) {
        self.sending = false;
        self.error_banner = Some(banner.into());
    }
}
