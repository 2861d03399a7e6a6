//! Glue between the transports and a [`ConversationView`].

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use zenzone_types::api::SendMessageRequest;
use zenzone_types::events::GatewayCommand;
use zenzone_types::models::Message;

use crate::conversation::{ConversationView, ViewAction};
use crate::error::ClientError;
use crate::realtime::RealtimeEvent;
use crate::rest::ApiClient;
use crate::typing::TypingDebouncer;

/// The REST calls a session depends on.
pub trait ChatApi {
    fn history(&self, appointment_id: Uuid) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;

    fn send(&self, req: &SendMessageRequest) -> impl Future<Output = Result<Message, ClientError>> + Send;
}

impl ChatApi for ApiClient {
    fn history(&self, appointment_id: Uuid) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send {
        self.messages(appointment_id)
    }

    fn send(&self, req: &SendMessageRequest) -> impl Future<Output = Result<Message, ClientError>> + Send {
        self.send_message(req)
    }
}

pub struct ChatSession<A> {
    api: A,
    realtime: mpsc::UnboundedSender<GatewayCommand>,
    view: ConversationView,
    typing: TypingDebouncer,
}

impl<A: ChatApi> ChatSession<A> {
    /// Fetch history and join the appointment room.
    pub async fn open(
        api: A,
        realtime: mpsc::UnboundedSender<GatewayCommand>,
        appointment_id: Uuid,
        me: Uuid,
        counterpart: Uuid,
    ) -> Result<Self, ClientError> {
        let mut session = Self {
            api,
            realtime,
            view: ConversationView::new(appointment_id, me, counterpart),
            typing: TypingDebouncer::default(),
        };
        session.refetch().await?;
        session.command(GatewayCommand::JoinRoom {
            appointment_id,
            user_id: Some(me),
        });
        session.command(GatewayCommand::PresencePing { appointment_id });
        Ok(session)
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ConversationView {
        &mut self.view
    }

    fn command(&self, command: GatewayCommand) {
        // Realtime is best effort; REST stays authoritative
        if self.realtime.send(command).is_err() {
            debug!("Realtime task gone, dropping command");
        }
    }

    pub async fn refetch(&mut self) -> Result<(), ClientError> {
        let history = self.api.history(self.view.appointment_id()).await?;
        self.view.merge_history(history);
        Ok(())
    }

    /// Draft changed in the composer.
    pub fn keystroke(&mut self, text: &str, now: Instant) {
        self.view.set_draft(text);
        let is_typing = self.typing.keystroke(text, now);
        self.command(GatewayCommand::Typing {
            appointment_id: self.view.appointment_id(),
            is_typing,
        });
    }

    /// Drive the local typing timer.
    pub fn tick(&mut self, now: Instant) {
        if let Some(is_typing) = self.typing.poll(now) {
            self.command(GatewayCommand::Typing {
                appointment_id: self.view.appointment_id(),
                is_typing,
            });
        }
    }

    /// Send the current draft. On failure the draft stays and the view shows
    /// an error banner; the error is also returned.
    pub async fn send(&mut self) -> Result<Option<Message>, ClientError> {
        let Some(req) = self.view.begin_send() else {
            return Ok(None);
        };
        if let Some(is_typing) = self.typing.on_send() {
            self.command(GatewayCommand::Typing {
                appointment_id: self.view.appointment_id(),
                is_typing,
            });
        }

        match self.api.send(&req).await {
            Ok(message) => {
                self.view.send_succeeded(message.clone());
                self.command(GatewayCommand::SendMessage(message.clone()));
                Ok(Some(message))
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                self.view.send_failed(e.user_message());
                Err(e)
            }
        }
    }

    /// Apply a realtime event, re-fetching history when it may be stale.
    pub async fn handle(&mut self, event: RealtimeEvent) -> Result<ViewAction, ClientError> {
        let action = match event {
            RealtimeEvent::Connected { reconnect: true } => ViewAction::Refetch,
            RealtimeEvent::Connected { reconnect: false } | RealtimeEvent::Disconnected => {
                ViewAction::Redraw
            }
            RealtimeEvent::Gateway(event) => self.view.apply(event, Instant::now(), Utc::now()),
        };

        if action == ViewAction::Refetch {
            self.refetch().await?;
            return Ok(ViewAction::Redraw);
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use zenzone_types::events::GatewayEvent;

    #[derive(Clone, Default)]
    struct FakeApi {
        stored: Arc<Mutex<Vec<Message>>>,
        fail_sends: bool,
    }

    impl ChatApi for FakeApi {
        fn history(&self, appointment_id: Uuid) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send {
            let stored = self.stored.lock().unwrap().clone();
            async move {
                Ok(stored
                    .into_iter()
                    .filter(|m| m.appointment_id == appointment_id)
                    .collect())
            }
        }

        fn send(&self, req: &SendMessageRequest) -> impl Future<Output = Result<Message, ClientError>> + Send {
            let result = if self.fail_sends {
                Err(ClientError::Timeout(Duration::from_secs(10)))
            } else {
                let message = Message {
                    id: Uuid::new_v4(),
                    appointment_id: req.appointment_id.unwrap(),
                    sender_id: Uuid::nil(),
                    sender_username: "amy".into(),
                    recipient_id: req.recipient_id.unwrap(),
                    recipient_username: "dr_bell".into(),
                    content: req.content.clone(),
                    attachments: vec![],
                    timestamp: Utc::now(),
                };
                self.stored.lock().unwrap().push(message.clone());
                Ok(message)
            };
            async move { result }
        }
    }

    async fn open(api: FakeApi) -> (ChatSession<FakeApi>, mpsc::UnboundedReceiver<GatewayCommand>, Uuid) {
        let (tx, rx) = mpsc::unbounded_channel();
        let appt = Uuid::new_v4();
        let session = ChatSession::open(api, tx, appt, Uuid::nil(), Uuid::new_v4())
            .await
            .unwrap();
        (session, rx, appt)
    }

    #[tokio::test]
    async fn test_open_joins_and_pings() {
        let (_session, mut rx, appt) = open(FakeApi::default()).await;
        assert!(matches!(
            rx.recv().await,
            Some(GatewayCommand::JoinRoom { appointment_id, .. }) if appointment_id == appt
        ));
        assert!(matches!(rx.recv().await, Some(GatewayCommand::PresencePing { .. })));
    }

    #[tokio::test]
    async fn test_send_echoes_stored_message() {
        let (mut session, mut rx, _) = open(FakeApi::default()).await;
        while rx.try_recv().is_ok() {}

        session.keystroke("hello", Instant::now());
        assert!(matches!(rx.recv().await, Some(GatewayCommand::Typing { is_typing: true, .. })));

        let sent = session.send().await.unwrap().unwrap();
        assert!(matches!(rx.recv().await, Some(GatewayCommand::Typing { is_typing: false, .. })));
        assert!(matches!(rx.recv().await, Some(GatewayCommand::SendMessage(m)) if m.id == sent.id));
        assert_eq!(session.view().draft(), "");
        assert_eq!(session.view().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_draft() {
        let api = FakeApi {
            fail_sends: true,
            ..Default::default()
        };
        let (mut session, _rx, _) = open(api).await;

        session.keystroke("are you there?", Instant::now());
        assert!(session.send().await.is_err());
        assert_eq!(session.view().draft(), "are you there?");
        assert!(session.view().error_banner().is_some());
        assert!(session.view().messages().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_and_reload_refetch_history() {
        let api = FakeApi::default();
        let (mut session, _rx, appt) = open(api.clone()).await;

        // A message stored while we were not listening
        let missed = Message {
            id: Uuid::new_v4(),
            appointment_id: appt,
            sender_id: Uuid::new_v4(),
            sender_username: "dr_bell".into(),
            recipient_id: Uuid::nil(),
            recipient_username: "amy".into(),
            content: "missed".into(),
            attachments: vec![],
            timestamp: Utc::now(),
        };
        api.stored.lock().unwrap().push(missed.clone());

        let action = session.handle(RealtimeEvent::Connected { reconnect: true }).await.unwrap();
        assert_eq!(action, ViewAction::Redraw);
        assert_eq!(session.view().messages(), [missed.clone()]);

        session
            .handle(RealtimeEvent::Gateway(GatewayEvent::ReloadChat { appointment_id: appt }))
            .await
            .unwrap();
        assert_eq!(session.view().messages().len(), 1);
    }
}
