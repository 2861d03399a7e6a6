use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use zenzone_types::api::{Claims, StatusMessage};
use zenzone_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{parse_id, run_blocking};

/// POST /api/users/block/{user_id}
pub async fn block_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_blocked(state, user_id, claims, true).await
}

/// POST /api/users/unblock/{user_id}
pub async fn unblock_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_blocked(state, user_id, claims, false).await
}

async fn set_blocked(
    state: AppState,
    user_id: String,
    claims: Claims,
    blocked: bool,
) -> Result<Json<StatusMessage>, ApiError> {
    let target = parse_id(&user_id, "user id")?;
    if claims.role != Role::Psychiatrist {
        return Err(ApiError::forbidden("Only psychiatrists can block students"));
    }
    if target == claims.sub {
        return Err(ApiError::validation("Cannot block yourself"));
    }

    let db = state.db.clone();
    let blocker = claims.sub;
    let (changed, shared) = run_blocking(move || {
        db.get_user_by_id(target)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        let changed = if blocked {
            db.block_user(blocker, target)?
        } else {
            db.unblock_user(blocker, target)?
        };
        let shared: Vec<Uuid> = db
            .appointments_for_user(blocker)?
            .into_iter()
            .filter(|a| a.student_id == target)
            .map(|a| a.id)
            .collect();
        Ok((changed, shared))
    })
    .await?;

    let verb = if blocked { "blocked" } else { "unblocked" };
    if changed {
        info!("{} {} user {}", claims.username, verb, target);
    }
    if blocked {
        for appointment_id in shared {
            state.broker.evict_room(appointment_id).await;
        }
    }

    Ok(Json(StatusMessage {
        message: format!("User {}", verb),
    }))
}
