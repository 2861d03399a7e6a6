use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A stored message was posted to an appointment room
    ReceiveMessage(Message),

    /// A participant started or stopped typing
    UserTyping {
        appointment_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A participant joined or left the room. `user_id` is `None` when
    /// answering a presence ping, which only reports whether anyone else is there.
    PeerOnline {
        appointment_id: Uuid,
        user_id: Option<Uuid>,
        online: bool,
        timestamp: DateTime<Utc>,
    },

    /// Peers should re-fetch history over REST
    ReloadChat { appointment_id: Uuid },

    /// A command was rejected
    Error { message: String },
}

impl GatewayEvent {
    /// Returns the appointment this event is scoped to, if any.
    pub fn appointment_id(&self) -> Option<Uuid> {
        match self {
            Self::ReceiveMessage(message) => Some(message.appointment_id),
            Self::UserTyping { appointment_id, .. } => Some(*appointment_id),
            Self::PeerOnline { appointment_id, .. } => Some(*appointment_id),
            Self::ReloadChat { appointment_id } => Some(*appointment_id),
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection (when no token came with the upgrade)
    Identify { token: String },

    /// Join the shared room of an appointment. `user_id`, when present, must
    /// match the authenticated user.
    JoinRoom {
        appointment_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    LeaveRoom { appointment_id: Uuid },

    /// Echo a message that was already persisted over REST
    SendMessage(Message),

    Typing { appointment_id: Uuid, is_typing: bool },

    /// Ask whether anyone else is currently in the room
    PresencePing { appointment_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"joinRoom","data":{{"appointmentId":"{}"}}}}"#, id);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            cmd,
            GatewayCommand::JoinRoom {
                appointment_id: id,
                user_id: None
            }
        );
    }

    #[test]
    fn test_event_wire_format() {
        let appointment_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let json = serde_json::to_value(GatewayEvent::UserTyping {
            appointment_id,
            user_id,
            is_typing: true,
        })
        .unwrap();

        assert_eq!(json["type"], "userTyping");
        assert_eq!(json["data"]["isTyping"], true);
        assert_eq!(json["data"]["appointmentId"], appointment_id.to_string());
    }
}
