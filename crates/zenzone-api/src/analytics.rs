use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    response::IntoResponse,
};
use tracing::debug;

use zenzone_db::models::NewChatSession;
use zenzone_types::api::{ChatSessionList, Claims, SaveChatSessionRequest, SaveChatSessionResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{parse_id, run_blocking};

const RECENT_SESSIONS: usize = 20;
const MAX_SESSION_ID: usize = 128;

/// POST /api/analytics/chat-session: save or replace the caller's report for
/// a session id.
pub async fn save_chat_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SaveChatSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session_id = req
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("sessionId is required"))?;
    if session_id.chars().count() > MAX_SESSION_ID {
        return Err(ApiError::validation("sessionId is too long"));
    }

    let db = state.db.clone();
    let user_id = claims.sub;
    let report = run_blocking(move || {
        Ok(db.upsert_chat_session(&NewChatSession {
            user_id,
            session_id: &session_id,
            stats: &req.stats.unwrap_or_default(),
            timeline: &req.timeline.unwrap_or_default(),
            meta: &req.meta.unwrap_or_default(),
            saved_at: chrono::Utc::now(),
        })?)
    })
    .await?;

    debug!("{} saved analytics for session {}", claims.username, report.session_id);
    Ok(Json(SaveChatSessionResponse {
        message: "Saved".into(),
        id: report.id,
    }))
}

/// GET /api/analytics/chat-sessions
pub async fn list_chat_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let items = run_blocking(move || Ok(db.recent_chat_sessions(claims.sub, RECENT_SESSIONS)?)).await?;
    Ok(Json(ChatSessionList { items }))
}

/// GET /api/analytics/chat-session/{id}: someone else's report is a 404.
pub async fn get_chat_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let report_id = parse_id(&id, "report id")?;
    let db = state.db.clone();
    let report = run_blocking(move || {
        db.get_chat_session(report_id, claims.sub)?
            .ok_or_else(|| ApiError::not_found("Not found"))
    })
    .await?;
    Ok(Json(report))
}
