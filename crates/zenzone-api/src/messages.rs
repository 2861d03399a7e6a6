use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use zenzone_db::models::NewMessage;
use zenzone_types::api::{AttachmentInput, Claims, SendMessageRequest};
use zenzone_types::models::{Attachment, Role};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{parse_id, profanity, run_blocking};

const MAX_ATTACHMENT_NAME: usize = 200;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// Sizes are stored as SQLite INTEGER.
const MAX_ATTACHMENT_SIZE: u64 = i64::MAX as u64;

/// Drop attachments without a name or url and fill in the rest.
fn normalize_attachments(inputs: Vec<AttachmentInput>) -> Vec<Attachment> {
    inputs
        .into_iter()
        .filter_map(|a| {
            let name = a.name.filter(|n| !n.is_empty())?;
            let url = a.url.filter(|u| !u.is_empty())?;
            Some(Attachment {
                name: name.chars().take(MAX_ATTACHMENT_NAME).collect(),
                url,
                content_type: a
                    .content_type
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                size: a.size.unwrap_or(0).min(MAX_ATTACHMENT_SIZE),
            })
        })
        .collect()
}

/// POST /api/messages
///
/// The realtime echo is the client's job once this returns 201.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let appointment_id = req.appointment_id.ok_or_else(|| {
        ApiError::validation("appointmentId is required (see GET /api/appointments/active)")
    })?;

    let db = state.db.clone();
    let sender_id = claims.sub;
    let role = claims.role;

    let message = run_blocking(move || {
        let access = db.authorize(sender_id, role, appointment_id)?;

        let recipient_id = match req.recipient_id {
            Some(id) if id != access.counterpart_id => {
                return Err(ApiError::forbidden("recipient is not the other participant"));
            }
            _ => access.counterpart_id,
        };

        // A block cuts the conversation both ways
        if db.is_blocked(access.psychiatrist_id(), access.student_id())? {
            let message = match role {
                Role::Student => "You cannot send messages to this psychiatrist.",
                Role::Psychiatrist => "You have blocked this student.",
            };
            return Err(ApiError::forbidden(message));
        }

        let content = profanity::mask(req.content.trim());
        let attachments = normalize_attachments(req.attachments);
        if content.is_empty() && attachments.is_empty() {
            return Err(ApiError::validation("Message content or an attachment is required"));
        }

        let id = Uuid::new_v4();
        db.insert_message(&NewMessage {
            id,
            appointment_id,
            sender_id,
            recipient_id,
            content: &content,
            attachments: &attachments,
            created_at: chrono::Utc::now(),
        })?;

        db.get_message(id)?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("message {} missing after insert", id)))
    })
    .await?;

    info!(
        "{} sent message {} in appointment {}",
        claims.username, message.id, appointment_id
    );

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/by-appointment/{id}
pub async fn list_by_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment_id = parse_id(&id, "appointment id")?;
    let db = state.db.clone();

    let messages = run_blocking(move || {
        db.authorize(claims.sub, claims.role, appointment_id)?;
        Ok(db.messages_for_appointment(appointment_id)?)
    })
    .await?;

    Ok(Json(messages))
}

/// GET /api/messages/last/{id}: latest message or `null`, for previews.
pub async fn latest_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment_id = parse_id(&id, "appointment id")?;
    let db = state.db.clone();

    let latest = run_blocking(move || {
        db.authorize(claims.sub, claims.role, appointment_id)?;
        Ok(db.latest_message(appointment_id)?)
    })
    .await?;

    Ok(Json(latest))
}

/// GET /api/messages: everything across the caller's approved appointments.
pub async fn list_my_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();

    let messages =
        run_blocking(move || Ok(db.messages_for_participant(claims.sub, claims.role)?)).await?;

    Ok(Json(messages))
}
