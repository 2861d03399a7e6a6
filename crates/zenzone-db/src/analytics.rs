//! Chat-session analytics reports. Each user keeps at most one report per
//! client-chosen session id; saving again replaces its contents.

use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use zenzone_types::models::ChatSessionReport;

use crate::Database;
use crate::models::{ChatSessionRow, NewChatSession, format_time};

const REPORT_SELECT: &str = "
    SELECT id, user_id, session_id, stats, timeline, meta, created_at, updated_at
    FROM chat_session_analytics";

impl Database {
    /// Insert or replace the report for `(user_id, session_id)`. The row id
    /// and creation time survive a replace.
    pub fn upsert_chat_session(&self, report: &NewChatSession<'_>) -> Result<ChatSessionReport> {
        let stats = serde_json::to_string(report.stats)?;
        let timeline = serde_json::to_string(report.timeline)?;
        let meta = serde_json::to_string(report.meta)?;
        let saved_at = format_time(report.saved_at);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_session_analytics
                    (id, user_id, session_id, stats, timeline, meta, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT (user_id, session_id) DO UPDATE SET
                    stats = excluded.stats,
                    timeline = excluded.timeline,
                    meta = excluded.meta,
                    updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    report.user_id.to_string(),
                    report.session_id,
                    stats,
                    timeline,
                    meta,
                    saved_at
                ],
            )?;

            let sql = format!("{} WHERE user_id = ?1 AND session_id = ?2", REPORT_SELECT);
            let row = conn.query_row(
                &sql,
                params![report.user_id.to_string(), report.session_id],
                report_from_row,
            )?;
            Ok(row.into())
        })
    }

    /// The user's most recently saved reports, newest first.
    pub fn recent_chat_sessions(&self, user_id: Uuid, limit: usize) -> Result<Vec<ChatSessionReport>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE user_id = ?1 ORDER BY updated_at DESC, rowid DESC LIMIT ?2",
                REPORT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit as i64], report_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(ChatSessionReport::from).collect())
        })
    }

    /// One report, only if `user_id` owns it.
    pub fn get_chat_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<ChatSessionReport>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE id = ?1 AND user_id = ?2", REPORT_SELECT);
            let row = conn
                .query_row(&sql, params![id.to_string(), user_id.to_string()], report_from_row)
                .optional()?;
            Ok(row.map(ChatSessionReport::from))
        })
    }
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSessionRow> {
    Ok(ChatSessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        stats: row.get(3)?,
        timeline: row.get(4)?,
        meta: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
