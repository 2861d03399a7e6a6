use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use zenzone_types::api::{Classification, ErrorBody, SendMessageRequest, SentimentRequest};
use zenzone_types::models::{Appointment, Message};

use crate::error::ClientError;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin typed wrapper over the REST API.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
    send_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    pub async fn appointments(&self) -> Result<Vec<Appointment>, ClientError> {
        decode(self.get("/api/appointments").send().await?).await
    }

    pub async fn active_appointment(&self) -> Result<Appointment, ClientError> {
        decode(self.get("/api/appointments/active").send().await?).await
    }

    pub async fn messages(&self, appointment_id: Uuid) -> Result<Vec<Message>, ClientError> {
        let path = format!("/api/messages/by-appointment/{}", appointment_id);
        decode(self.get(&path).send().await?).await
    }

    pub async fn latest_message(&self, appointment_id: Uuid) -> Result<Option<Message>, ClientError> {
        let path = format!("/api/messages/last/{}", appointment_id);
        decode(self.get(&path).send().await?).await
    }

    /// POST a message, giving up after the send timeout.
    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<Message, ClientError> {
        let request = self.post("/api/messages").json(req).send();
        let response = tokio::time::timeout(self.send_timeout, request)
            .await
            .map_err(|_| ClientError::Timeout(self.send_timeout))??;
        decode(response).await
    }

    pub async fn classify(&self, text: &str) -> Result<Classification, ClientError> {
        let body = SentimentRequest {
            text: Some(text.to_string()),
        };
        decode(self.post("/api/sentiment").json(&body).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let bytes = response.bytes().await?;
    let err = match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(body) => ClientError::Http {
            status: status.as_u16(),
            code: body.code,
            message: body.error,
        },
        Err(_) => {
            warn!("Non-JSON error body for status {}", status);
            ClientError::Http {
                status: status.as_u16(),
                code: "unknown".into(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            }
        }
    };
    debug!("API error: {}", err);
    Err(err)
}
