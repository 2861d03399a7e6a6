use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use zenzone_types::api::{
    Claims, CreateAppointmentRequest, CreateAppointmentResponse, StatusMessage,
    UpdateAppointmentRequest,
};
use zenzone_types::events::GatewayEvent;
use zenzone_types::models::{AppointmentStatus, Role};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{parse_id, run_blocking};

/// POST /api/appointments
pub async fn create_appointment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let message = req
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    let (Some(date), Some(message), Some(psychiatrist_id)) = (req.date, message, req.psychiatrist_id)
    else {
        return Err(ApiError::validation("date, message and psychiatristId are required"));
    };

    if claims.role != Role::Student {
        return Err(ApiError::forbidden("Only students can request appointments"));
    }

    let db = state.db.clone();
    let student_id = claims.sub;
    let college = claims.college.clone();

    let appointment_id = run_blocking(move || {
        let psychiatrist = db
            .get_user_by_id(psychiatrist_id)?
            .filter(|u| u.role() == Some(Role::Psychiatrist))
            .ok_or_else(|| ApiError::not_found("Psychiatrist not found"))?;

        let id = Uuid::new_v4();
        db.insert_appointment(id, student_id, psychiatrist_id, &college, date, &message)?;
        info!("appointment {} requested with {}", id, psychiatrist.username);
        Ok(id)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAppointmentResponse {
            message: "Appointment requested".into(),
            appointment_id,
        }),
    ))
}

/// GET /api/appointments
pub async fn list_appointments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let appointments = run_blocking(move || Ok(db.appointments_for_user(claims.sub)?)).await?;
    Ok(Json(appointments))
}

/// GET /api/appointments/active
pub async fn active_appointment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let appointment = run_blocking(move || {
        db.resolve_active_appointment(claims.sub, claims.role)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(appointment))
}

/// GET /api/appointments/{id}
pub async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment_id = parse_id(&id, "appointment id")?;
    let db = state.db.clone();
    let access = run_blocking(move || {
        db.participant_access(claims.sub, claims.role, appointment_id)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(access.appointment))
}

/// PUT /api/appointments/{id}: psychiatrist approves, rejects or resets.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateAppointmentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment_id = parse_id(&id, "appointment id")?;
    let Json(req) = payload?;

    if claims.role != Role::Psychiatrist {
        return Err(ApiError::forbidden("Only psychiatrists can update appointments"));
    }
    if req.status == AppointmentStatus::Closed {
        return Err(ApiError::validation(
            "Use POST /api/appointments/{id}/close to close an appointment",
        ));
    }

    let db = state.db.clone();
    let status = req.status;
    run_blocking(move || {
        let access = db.participant_access(claims.sub, claims.role, appointment_id)?;
        if access.appointment.status == AppointmentStatus::Closed {
            return Err(ApiError::Conflict("Appointment is closed".into()));
        }
        db.set_appointment_status(appointment_id, status)?;
        Ok(())
    })
    .await?;

    info!("{} set appointment {} to {}", claims.username, appointment_id, status);
    if status == AppointmentStatus::Approved {
        state
            .broker
            .publish(appointment_id, GatewayEvent::ReloadChat { appointment_id }, None)
            .await;
    } else {
        state.broker.evict_room(appointment_id).await;
    }

    Ok(Json(StatusMessage {
        message: format!("Appointment {}", status),
    }))
}

/// POST /api/appointments/{id}/close: either participant.
pub async fn close_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment_id = parse_id(&id, "appointment id")?;
    let db = state.db.clone();

    run_blocking(move || {
        db.participant_access(claims.sub, claims.role, appointment_id)?;
        db.set_appointment_status(appointment_id, AppointmentStatus::Closed)?;
        Ok(())
    })
    .await?;

    info!("{} closed appointment {}", claims.username, appointment_id);
    state.broker.evict_room(appointment_id).await;

    Ok(Json(StatusMessage {
        message: "Appointment closed".into(),
    }))
}
