use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use zenzone_types::models::{Appointment, AppointmentStatus, Attachment, Message, Role};

use crate::Database;
use crate::models::{
    AppointmentRow, AttachmentRow, MessageRow, NewMessage, NewUser, UserRow, format_time,
};

const APPOINTMENT_SELECT: &str = "
    SELECT a.id, a.student_id, COALESCE(s.username, 'unknown'),
           a.psychiatrist_id, COALESCE(p.username, 'unknown'),
           a.college, a.requested_date, a.message, a.status
    FROM appointments a
    LEFT JOIN users s ON s.id = a.student_id
    LEFT JOIN users p ON p.id = a.psychiatrist_id";

/// Message ids bound per attachment lookup.
const ATTACHMENT_BATCH: usize = 500;

// JOIN users twice to fetch both display names in one query
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.appointment_id,
           m.sender_id, COALESCE(su.username, 'unknown'),
           m.recipient_id, COALESCE(ru.username, 'unknown'),
           m.content, m.created_at
    FROM messages m
    LEFT JOIN users su ON su.id = m.sender_id
    LEFT JOIN users ru ON ru.id = m.recipient_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password_hash, role, college) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.password_hash,
                    user.role.as_str(),
                    user.college
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password_hash, role, college, created_at FROM users WHERE id = ?1",
                    [id.to_string()],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password_hash, role, college, created_at FROM users WHERE username = ?1",
                    [username],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns true if the pair was newly inserted.
    pub fn block_user(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO blocked_users (blocker_id, blocked_id) VALUES (?1, ?2)",
                params![blocker_id.to_string(), blocked_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Returns true if a block was removed.
    pub fn unblock_user(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
                params![blocker_id.to_string(), blocked_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn is_blocked(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
                    params![blocker_id.to_string(), blocked_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Appointments --

    pub fn insert_appointment(
        &self,
        id: Uuid,
        student_id: Uuid,
        psychiatrist_id: Uuid,
        college: &str,
        requested_date: chrono::DateTime<chrono::Utc>,
        message: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO appointments (id, student_id, psychiatrist_id, college, requested_date, message, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
                params![
                    id.to_string(),
                    student_id.to_string(),
                    psychiatrist_id.to_string(),
                    college,
                    format_time(requested_date),
                    message
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE a.id = ?1", APPOINTMENT_SELECT);
            let row = conn
                .query_row(&sql, [id.to_string()], appointment_from_row)
                .optional()?;
            Ok(row.map(Appointment::from))
        })
    }

    /// Every appointment the user takes part in, newest first.
    pub fn appointments_for_user(&self, user_id: Uuid) -> Result<Vec<Appointment>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE a.student_id = ?1 OR a.psychiatrist_id = ?1 ORDER BY a.created_at DESC, a.rowid DESC",
                APPOINTMENT_SELECT
            );
            query_appointments(conn, &sql, params![user_id.to_string()])
        })
    }

    /// Approved appointments where the user sits on the side given by `role`.
    pub fn approved_appointments_for(&self, user_id: Uuid, role: Role) -> Result<Vec<Appointment>> {
        let column = match role {
            Role::Student => "a.student_id",
            Role::Psychiatrist => "a.psychiatrist_id",
        };
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE {} = ?1 AND a.status = 'approved' ORDER BY a.created_at ASC, a.rowid ASC",
                APPOINTMENT_SELECT, column
            );
            query_appointments(conn, &sql, params![user_id.to_string()])
        })
    }

    /// Returns false if no appointment has this id.
    pub fn set_appointment_status(&self, id: Uuid, status: AppointmentStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE appointments SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Inserts the message and its attachments in one transaction.
    pub fn insert_message(&self, message: &NewMessage<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = message.id.to_string();
            tx.execute(
                "INSERT INTO messages (id, appointment_id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    message.appointment_id.to_string(),
                    message.sender_id.to_string(),
                    message.recipient_id.to_string(),
                    message.content,
                    format_time(message.created_at)
                ],
            )?;
            for (position, attachment) in message.attachments.iter().enumerate() {
                tx.execute(
                    "INSERT INTO message_attachments (message_id, position, name, url, content_type, size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        position as i64,
                        attachment.name,
                        attachment.url,
                        attachment.content_type,
                        i64::try_from(attachment.size).unwrap_or(i64::MAX)
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
            let rows = query_messages(conn, &sql, params![id.to_string()])?;
            Ok(rows.into_iter().next())
        })
    }

    /// All messages of an appointment, oldest first. Ties on the timestamp keep
    /// insertion order.
    pub fn messages_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.appointment_id = ?1 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_SELECT
            );
            query_messages(conn, &sql, params![appointment_id.to_string()])
        })
    }

    pub fn latest_message(&self, appointment_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.appointment_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1",
                MESSAGE_SELECT
            );
            let rows = query_messages(conn, &sql, params![appointment_id.to_string()])?;
            Ok(rows.into_iter().next())
        })
    }

    /// Messages across every approved appointment where the user sits on the
    /// side given by `role`, oldest first.
    pub fn messages_for_participant(&self, user_id: Uuid, role: Role) -> Result<Vec<Message>> {
        let column = match role {
            Role::Student => "student_id",
            Role::Psychiatrist => "psychiatrist_id",
        };
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.appointment_id IN
                    (SELECT id FROM appointments WHERE {} = ?1 AND status = 'approved')
                 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_SELECT, column
            );
            query_messages(conn, &sql, params![user_id.to_string()])
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: row.get(3)?,
        college: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        student_username: row.get(2)?,
        psychiatrist_id: row.get(3)?,
        psychiatrist_username: row.get(4)?,
        college: row.get(5)?,
        requested_date: row.get(6)?,
        message: row.get(7)?,
        status: row.get(8)?,
    })
}

fn query_appointments<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, appointment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(Appointment::from).collect())
}

fn query_messages<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                appointment_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row.get(3)?,
                recipient_id: row.get(4)?,
                recipient_username: row.get(5)?,
                content: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut attachments = attachments_for_messages(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let files = attachments.remove(&row.id).unwrap_or_default();
            row.into_message(files)
        })
        .collect())
}

/// Batch-fetch attachments for a set of message IDs, grouped by message and
/// kept in submission order.
fn attachments_for_messages(
    conn: &Connection,
    message_ids: &[String],
) -> Result<HashMap<String, Vec<Attachment>>> {
    let mut grouped: HashMap<String, Vec<Attachment>> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(grouped);
    }

    // One statement per batch keeps us under SQLite's bound-variable limit
    for batch in message_ids.chunks(ATTACHMENT_BATCH) {
        let placeholders: Vec<String> = (1..=batch.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT message_id, position, name, url, content_type, size FROM message_attachments
             WHERE message_id IN ({}) ORDER BY message_id, position",
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(batch.iter()), |row| {
                Ok(AttachmentRow {
                    message_id: row.get(0)?,
                    position: row.get(1)?,
                    name: row.get(2)?,
                    url: row.get(3)?,
                    content_type: row.get(4)?,
                    size: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for row in rows {
            grouped
                .entry(row.message_id.clone())
                .or_default()
                .push(Attachment::from(row));
        }
    }

    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn seed_user(db: &Database, username: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&NewUser {
            id,
            username,
            password_hash: "x",
            role,
            college: "north",
        })
        .unwrap();
        id
    }

    fn seed_pair(db: &Database) -> (Uuid, Uuid, Uuid) {
        let student = seed_user(db, "amy", Role::Student);
        let doctor = seed_user(db, "dr_bell", Role::Psychiatrist);
        let appt = Uuid::new_v4();
        db.insert_appointment(appt, student, doctor, "north", Utc::now(), "hello")
            .unwrap();
        (student, doctor, appt)
    }

    #[test]
    fn test_appointment_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let (student, doctor, appt) = seed_pair(&db);

        let loaded = db.get_appointment(appt).unwrap().unwrap();
        assert_eq!(loaded.student_id, student);
        assert_eq!(loaded.psychiatrist_id, doctor);
        assert_eq!(loaded.student_username, "amy");
        assert_eq!(loaded.status, AppointmentStatus::Pending);

        assert!(db.set_appointment_status(appt, AppointmentStatus::Approved).unwrap());
        assert!(!db.set_appointment_status(Uuid::new_v4(), AppointmentStatus::Approved).unwrap());
        assert_eq!(db.approved_appointments_for(doctor, Role::Psychiatrist).unwrap().len(), 1);
        assert!(db.approved_appointments_for(doctor, Role::Student).unwrap().is_empty());
    }

    #[test]
    fn test_messages_ordered_with_attachments() {
        let db = Database::open_in_memory().unwrap();
        let (student, doctor, appt) = seed_pair(&db);
        let now = Utc::now();

        let files = vec![Attachment {
            name: "plan.pdf".into(),
            url: "/uploads/plan.pdf".into(),
            content_type: "application/pdf".into(),
            size: 42,
        }];

        let later = Uuid::new_v4();
        db.insert_message(&NewMessage {
            id: later,
            appointment_id: appt,
            sender_id: doctor,
            recipient_id: student,
            content: "second",
            attachments: &files,
            created_at: now + Duration::seconds(1),
        })
        .unwrap();
        let earlier = Uuid::new_v4();
        db.insert_message(&NewMessage {
            id: earlier,
            appointment_id: appt,
            sender_id: student,
            recipient_id: doctor,
            content: "first",
            attachments: &[],
            created_at: now,
        })
        .unwrap();

        let messages = db.messages_for_appointment(appt).unwrap();
        assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![earlier, later]);
        assert_eq!(messages[1].attachments, files);
        assert_eq!(messages[1].sender_username, "dr_bell");

        let latest = db.latest_message(appt).unwrap().unwrap();
        assert_eq!(latest.id, later);
        assert!(db.messages_for_participant(student, Role::Student).unwrap().is_empty());
        db.set_appointment_status(appt, AppointmentStatus::Approved).unwrap();
        assert_eq!(db.messages_for_participant(student, Role::Student).unwrap().len(), 2);
        assert!(db.messages_for_participant(student, Role::Psychiatrist).unwrap().is_empty());
    }

    #[test]
    fn test_same_timestamp_keeps_both_in_insert_order() {
        let db = Database::open_in_memory().unwrap();
        let (student, doctor, appt) = seed_pair(&db);
        let now = Utc::now();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for (id, from, to) in [(a, student, doctor), (b, doctor, student)] {
            db.insert_message(&NewMessage {
                id,
                appointment_id: appt,
                sender_id: from,
                recipient_id: to,
                content: "hi",
                attachments: &[],
                created_at: now,
            })
            .unwrap();
        }

        let ids: Vec<Uuid> = db.messages_for_appointment(appt).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_block_toggle() {
        let db = Database::open_in_memory().unwrap();
        let (student, doctor, _) = seed_pair(&db);

        assert!(!db.is_blocked(doctor, student).unwrap());
        assert!(db.block_user(doctor, student).unwrap());
        assert!(!db.block_user(doctor, student).unwrap());
        assert!(db.is_blocked(doctor, student).unwrap());
        assert!(db.unblock_user(doctor, student).unwrap());
        assert!(!db.is_blocked(doctor, student).unwrap());
    }

    #[test]
    fn test_large_history_loads_every_attachment() {
        let db = Database::open_in_memory().unwrap();
        let (student, doctor, appt) = seed_pair(&db);
        db.set_appointment_status(appt, AppointmentStatus::Approved).unwrap();
        let start = Utc::now();

        // Past SQLite's default limit of 32766 bound variables
        let total = 33_000;
        for i in 0..total {
            let files = [Attachment {
                name: format!("f{}.txt", i),
                url: format!("/uploads/{}", i),
                content_type: "text/plain".into(),
                size: i as u64,
            }];
            db.insert_message(&NewMessage {
                id: Uuid::new_v4(),
                appointment_id: appt,
                sender_id: student,
                recipient_id: doctor,
                content: "",
                attachments: if i % 3 == 0 { &files[..] } else { &[] },
                created_at: start + Duration::milliseconds(i),
            })
            .unwrap();
        }

        let history = db.messages_for_appointment(appt).unwrap();
        assert_eq!(history.len(), total as usize);
        let with_files = history.iter().filter(|m| !m.attachments.is_empty()).count();
        assert_eq!(with_files, (total as usize).div_ceil(3));
        assert_eq!(history[3].attachments[0].size, 3);

        assert_eq!(db.messages_for_participant(doctor, Role::Psychiatrist).unwrap().len(), total as usize);
    }

    #[test]
    fn test_oversized_attachment_size_is_clamped() {
        let db = Database::open_in_memory().unwrap();
        let (student, doctor, appt) = seed_pair(&db);
        let id = Uuid::new_v4();
        let files = [Attachment {
            name: "huge.bin".into(),
            url: "/uploads/huge".into(),
            content_type: "application/octet-stream".into(),
            size: u64::MAX,
        }];
        db.insert_message(&NewMessage {
            id,
            appointment_id: appt,
            sender_id: student,
            recipient_id: doctor,
            content: "",
            attachments: &files,
            created_at: Utc::now(),
        })
        .unwrap();

        let stored = db.get_message(id).unwrap().unwrap();
        assert_eq!(stored.attachments[0].size, i64::MAX as u64);
    }
}
