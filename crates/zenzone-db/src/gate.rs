//! Appointment authorization gate.
//!
//! Every message read or write, and every room join, goes through
//! [`Database::authorize`]: the caller must be a participant of the
//! appointment on the side matching their role, and the appointment must be
//! approved. The gate never mutates anything.

use thiserror::Error;
use uuid::Uuid;

use zenzone_types::models::{Appointment, AppointmentStatus, Role};

use crate::Database;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("appointment not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("appointment is not approved (status: {0})")]
    NotApproved(AppointmentStatus),

    #[error("{0} approved appointments found; pass an appointment id explicitly")]
    Ambiguous(usize),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A successful gate pass.
#[derive(Debug, Clone)]
pub struct Access {
    pub appointment: Appointment,
    pub role: Role,
    pub counterpart_id: Uuid,
}

impl Access {
    pub fn student_id(&self) -> Uuid {
        self.appointment.student_id
    }

    pub fn psychiatrist_id(&self) -> Uuid {
        self.appointment.psychiatrist_id
    }
}

impl Database {
    /// Participant check only, regardless of status. Used for viewing and
    /// closing an appointment.
    pub fn participant_access(
        &self,
        user_id: Uuid,
        role: Role,
        appointment_id: Uuid,
    ) -> Result<Access, GateError> {
        let appointment = self
            .get_appointment(appointment_id)?
            .ok_or(GateError::NotFound)?;

        match appointment.side_of(user_id) {
            Some(side) if side == role => {}
            Some(_) => return Err(GateError::Forbidden("role does not match this appointment")),
            None => return Err(GateError::Forbidden("not a participant of this appointment")),
        }

        let counterpart_id = appointment
            .counterpart_of(user_id)
            .ok_or(GateError::Forbidden("not a participant of this appointment"))?;

        Ok(Access {
            appointment,
            role,
            counterpart_id,
        })
    }

    /// Full gate: participant on the matching side AND status = approved.
    pub fn authorize(
        &self,
        user_id: Uuid,
        role: Role,
        appointment_id: Uuid,
    ) -> Result<Access, GateError> {
        let access = self.participant_access(user_id, role, appointment_id)?;
        if access.appointment.status != AppointmentStatus::Approved {
            return Err(GateError::NotApproved(access.appointment.status));
        }
        Ok(access)
    }

    /// The caller's single approved appointment. More than one is an error
    /// instead of a guess.
    pub fn resolve_active_appointment(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Appointment, GateError> {
        let mut approved = self.approved_appointments_for(user_id, role)?;
        match approved.len() {
            0 => Err(GateError::NotFound),
            1 => Ok(approved.remove(0)),
            n => Err(GateError::Ambiguous(n)),
        }
    }
}
