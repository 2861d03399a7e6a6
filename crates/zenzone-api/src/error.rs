use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use zenzone_db::GateError;
use zenzone_types::api::ErrorBody;

/// Every handler failure maps to one of these. The body is always
/// `{"error": ..., "code": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotApproved(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::NotApproved(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "auth_error",
            Self::Forbidden(_) => "forbidden",
            Self::NotApproved(_) => "not_approved",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "server_error",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Details stay in the log
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotFound => Self::not_found("Appointment not found"),
            GateError::Forbidden(msg) => Self::forbidden(msg),
            e @ GateError::NotApproved(_) => Self::NotApproved(e.to_string()),
            e @ GateError::Ambiguous(_) => Self::Conflict(e.to_string()),
            GateError::Storage(e) => Self::Internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zenzone_types::models::AppointmentStatus;

    #[test]
    fn test_gate_errors_map_onto_taxonomy() {
        let cases = [
            (GateError::NotFound, StatusCode::NOT_FOUND, "not_found"),
            (GateError::Forbidden("no"), StatusCode::FORBIDDEN, "forbidden"),
            (
                GateError::NotApproved(AppointmentStatus::Pending),
                StatusCode::FORBIDDEN,
                "not_approved",
            ),
            (GateError::Ambiguous(2), StatusCode::CONFLICT, "conflict"),
        ];
        for (gate, status, code) in cases {
            let err = ApiError::from(gate);
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = ApiError::Internal(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
