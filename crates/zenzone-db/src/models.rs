/// Database row types. These map directly to SQLite rows.
/// Conversions into zenzone-types models live here so handlers never parse
/// raw column strings themselves.
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use serde::de::DeserializeOwned;

use zenzone_types::models::{
    Appointment, AppointmentStatus, Attachment, ChatSessionReport, Message, Role, SessionMeta,
    SessionStats,
};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub college: String,
    pub created_at: String,
}

impl UserRow {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

/// Input for inserting a user. Registration itself lives outside this service;
/// this is used by seeding and tests.
pub struct NewUser<'a> {
    pub id: Uuid,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub college: &'a str,
}

pub struct AppointmentRow {
    pub id: String,
    pub student_id: String,
    pub student_username: String,
    pub psychiatrist_id: String,
    pub psychiatrist_username: String,
    pub college: String,
    pub requested_date: String,
    pub message: String,
    pub status: String,
}

pub struct MessageRow {
    pub id: String,
    pub appointment_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub recipient_id: String,
    pub recipient_username: String,
    pub content: String,
    pub created_at: String,
}

pub struct AttachmentRow {
    pub message_id: String,
    pub position: i64,
    pub name: String,
    pub url: String,
    pub content_type: String,
    pub size: i64,
}

pub struct NewMessage<'a> {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: &'a str,
    pub attachments: &'a [Attachment],
    pub created_at: DateTime<Utc>,
}

pub struct ChatSessionRow {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub stats: String,
    pub timeline: String,
    pub meta: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewChatSession<'a> {
    pub user_id: Uuid,
    pub session_id: &'a str,
    pub stats: &'a SessionStats,
    pub timeline: &'a [String],
    pub meta: &'a SessionMeta,
    pub saved_at: DateTime<Utc>,
}

pub(crate) fn parse_id(value: &str, column: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", column, value, e);
        Uuid::nil()
    })
}

pub(crate) fn parse_time(value: &str, column: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no timezone suffix.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", column, value, e);
            DateTime::default()
        })
}

pub(crate) fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|e| {
            warn!("Corrupt status on appointment '{}': {}", row.id, e);
            AppointmentStatus::Closed
        });
        Appointment {
            id: parse_id(&row.id, "appointment id"),
            student_id: parse_id(&row.student_id, "student_id"),
            student_username: row.student_username,
            psychiatrist_id: parse_id(&row.psychiatrist_id, "psychiatrist_id"),
            psychiatrist_username: row.psychiatrist_username,
            college: row.college,
            requested_date: parse_time(&row.requested_date, "requested_date"),
            message: row.message,
            status,
        }
    }
}

impl MessageRow {
    pub fn into_message(self, attachments: Vec<Attachment>) -> Message {
        Message {
            id: parse_id(&self.id, "message id"),
            appointment_id: parse_id(&self.appointment_id, "appointment_id"),
            sender_id: parse_id(&self.sender_id, "sender_id"),
            sender_username: self.sender_username,
            recipient_id: parse_id(&self.recipient_id, "recipient_id"),
            recipient_username: self.recipient_username,
            content: self.content,
            attachments,
            timestamp: parse_time(&self.created_at, "created_at"),
        }
    }
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            name: row.name,
            url: row.url,
            content_type: row.content_type,
            size: row.size.max(0) as u64,
        }
    }
}

fn parse_json<T: DeserializeOwned + Default>(value: &str, column: &str) -> T {
    serde_json::from_str(value).unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", column, value, e);
        T::default()
    })
}

impl From<ChatSessionRow> for ChatSessionReport {
    fn from(row: ChatSessionRow) -> Self {
        ChatSessionReport {
            id: parse_id(&row.id, "report id"),
            user_id: parse_id(&row.user_id, "user_id"),
            session_id: row.session_id,
            stats: parse_json(&row.stats, "stats"),
            timeline: parse_json(&row.timeline, "timeline"),
            meta: parse_json(&row.meta, "meta"),
            created_at: parse_time(&row.created_at, "created_at"),
            updated_at: parse_time(&row.updated_at, "updated_at"),
        }
    }
}
