use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            role            TEXT NOT NULL CHECK (role IN ('student', 'psychiatrist')),
            college         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS blocked_users (
            blocker_id  TEXT NOT NULL REFERENCES users(id),
            blocked_id  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (blocker_id, blocked_id)
        );

        CREATE TABLE IF NOT EXISTS appointments (
            id              TEXT PRIMARY KEY,
            student_id      TEXT NOT NULL REFERENCES users(id),
            psychiatrist_id TEXT NOT NULL REFERENCES users(id),
            college         TEXT NOT NULL,
            requested_date  TEXT NOT NULL,
            message         TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'approved', 'rejected', 'closed')),
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_appointments_student
            ON appointments(student_id, status);

        CREATE INDEX IF NOT EXISTS idx_appointments_psychiatrist
            ON appointments(psychiatrist_id, status);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            appointment_id  TEXT NOT NULL REFERENCES appointments(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            recipient_id    TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_appointment
            ON messages(appointment_id, created_at);

        CREATE TABLE IF NOT EXISTS message_attachments (
            message_id      TEXT NOT NULL REFERENCES messages(id),
            position        INTEGER NOT NULL,
            name            TEXT NOT NULL,
            url             TEXT NOT NULL,
            content_type    TEXT NOT NULL,
            size            INTEGER NOT NULL,
            PRIMARY KEY (message_id, position)
        );

        CREATE TABLE IF NOT EXISTS chat_session_analytics (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            session_id  TEXT NOT NULL,
            stats       TEXT NOT NULL DEFAULT '{}',
            timeline    TEXT NOT NULL DEFAULT '[]',
            meta        TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE (user_id, session_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_session_analytics_recent
            ON chat_session_analytics(user_id, updated_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
