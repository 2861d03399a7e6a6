pub mod analytics;
pub mod appointments;
pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod profanity;
pub mod sentiment;
pub mod users;

use axum::{
    Json, Router,
    routing::{get, post},
};
use tracing::error;
use uuid::Uuid;

use zenzone_types::api::HealthResponse;

use crate::auth::AppState;
use crate::error::ApiError;

/// All REST routes. The WebSocket upgrade is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/sentiment", post(sentiment::analyze));

    let protected_routes = Router::new()
        .route(
            "/api/appointments",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route("/api/appointments/active", get(appointments::active_appointment))
        .route(
            "/api/appointments/{id}",
            get(appointments::get_appointment).put(appointments::update_status),
        )
        .route("/api/appointments/{id}/close", post(appointments::close_appointment))
        .route(
            "/api/messages",
            get(messages::list_my_messages).post(messages::send_message),
        )
        .route("/api/messages/by-appointment/{id}", get(messages::list_by_appointment))
        .route("/api/messages/last/{id}", get(messages::latest_message))
        .route("/api/users/block/{user_id}", post(users::block_user))
        .route("/api/users/unblock/{user_id}", post(users::unblock_user))
        .route("/api/analytics/chat-session", post(analytics::save_chat_session))
        .route("/api/analytics/chat-sessions", get(analytics::list_chat_sessions))
        .route("/api/analytics/chat-session/{id}", get(analytics::get_chat_session))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    public_routes.merge(protected_routes).with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("worker task failed"))
    })?
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::validation(format!("Invalid {}", what)))
}
