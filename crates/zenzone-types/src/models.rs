use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Psychiatrist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Psychiatrist => "psychiatrist",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "psychiatrist" => Ok(Self::Psychiatrist),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Appointment lifecycle. Messages may only be exchanged while `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Rejected,
    Closed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown appointment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_username: String,
    pub psychiatrist_id: Uuid,
    pub psychiatrist_username: String,
    pub college: String,
    pub requested_date: DateTime<Utc>,
    pub message: String,
    pub status: AppointmentStatus,
}

impl Appointment {
    /// Which side of the appointment `user_id` is on, if any.
    pub fn side_of(&self, user_id: Uuid) -> Option<Role> {
        if user_id == self.student_id {
            Some(Role::Student)
        } else if user_id == self.psychiatrist_id {
            Some(Role::Psychiatrist)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.side_of(user_id).is_some()
    }

    /// The other participant relative to `user_id`.
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.side_of(user_id)? {
            Role::Student => Some(self.psychiatrist_id),
            Role::Psychiatrist => Some(self.student_id),
        }
    }
}

/// A stored message as returned by REST and carried by realtime events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub recipient_id: Uuid,
    pub recipient_username: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
}

/// Per-label tallies a client collected over one chat session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    #[serde(default)]
    pub sentiments: BTreeMap<String, f64>,
    #[serde(default)]
    pub intents: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_messages: Option<u64>,
}

/// A chat-session analytics report, one per (user, session id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,
    pub stats: SessionStats,
    pub timeline: Vec<String>,
    pub meta: SessionMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(student: Uuid, doctor: Uuid) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            student_id: student,
            student_username: "amy".into(),
            psychiatrist_id: doctor,
            psychiatrist_username: "dr_bell".into(),
            college: "north".into(),
            requested_date: Utc::now(),
            message: "need to talk".into(),
            status: AppointmentStatus::Approved,
        }
    }

    #[test]
    fn test_counterpart() {
        let student = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let appt = appointment(student, doctor);

        assert_eq!(appt.counterpart_of(student), Some(doctor));
        assert_eq!(appt.counterpart_of(doctor), Some(student));
        assert_eq!(appt.counterpart_of(Uuid::new_v4()), None);
        assert_eq!(appt.side_of(doctor), Some(Role::Psychiatrist));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Approved,
            AppointmentStatus::Rejected,
            AppointmentStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<AppointmentStatus>(), Ok(status));
        }
        assert!("archived".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_attachment_type_field_name() {
        let json = serde_json::to_value(Attachment {
            name: "notes.pdf".into(),
            url: "/uploads/notes.pdf".into(),
            content_type: "application/pdf".into(),
            size: 10,
        })
        .unwrap();
        assert_eq!(json["type"], "application/pdf");
    }
}
