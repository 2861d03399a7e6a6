use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AppointmentStatus, ChatSessionReport, Role, SessionMeta, SessionStats};

// -- JWT Claims --

/// JWT claims shared across zenzone-api (REST middleware) and zenzone-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub college: String,
    pub exp: usize,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// -- Appointments --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub date: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub psychiatrist_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentResponse {
    pub message: String,
    pub appointment_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: AppointmentStatus,
}

// -- Messages --

/// Attachment as submitted by a client. Every field is optional on the wire;
/// the server drops entries without a name or url and fills the rest in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentInput {
    pub name: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Required. Use `GET /api/appointments/active` to resolve it when unknown.
    pub appointment_id: Option<Uuid>,
    /// Defaults to the counterpart of the sender.
    #[serde(default)]
    pub recipient_id: Option<Uuid>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

// -- Analytics --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatSessionRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub stats: Option<SessionStats>,
    #[serde(default)]
    pub timeline: Option<Vec<String>>,
    #[serde(default)]
    pub meta: Option<SessionMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveChatSessionResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatSessionList {
    pub items: Vec<ChatSessionReport>,
}

// -- Sentiment --

#[derive(Debug, Serialize, Deserialize)]
pub struct SentimentRequest {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Concerning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrisisLevel {
    Low,
    Medium,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub sentiment: Sentiment,
    /// Lexicon polarity in [-1, 1].
    pub compound: f64,
    pub crisis_level: CrisisLevel,
    pub crisis_detected: bool,
    pub supportive_response_needed: bool,
    pub emotions: BTreeMap<String, f64>,
    pub top_emotions: Vec<String>,
}
