use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status and an error body.
    #[error("{message} ({status}, {code})")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("realtime connection closed")]
    Closed,
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for an inline error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::Timeout(_) => "Sending timed out. Check your connection and retry.".into(),
            Self::Transport(_) | Self::WebSocket(_) | Self::Closed => {
                "Could not reach the server. Retry when you are back online.".into()
            }
            Self::Json(_) | Self::Io(_) => "Something went wrong. Please retry.".into(),
        }
    }
}
