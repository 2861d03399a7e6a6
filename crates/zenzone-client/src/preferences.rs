//! Per-user chat preferences kept on the client.
//!
//! Nothing here is read implicitly: load with [`Preferences::load`], mutate,
//! then persist with [`Preferences::save`].

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ClientError;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub desktop_notifications: bool,
    pub read_receipts: bool,
    pub last_seen: bool,
    pub enter_to_send: bool,
    pub message_sounds: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            desktop_notifications: true,
            read_receipts: true,
            last_seen: true,
            enter_to_send: true,
            message_sounds: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationPrefs {
    pub pinned: bool,
    pub muted: bool,
    pub archived: bool,
    pub unread: u32,
    pub last_preview: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub conversations: HashMap<Uuid, ConversationPrefs>,
    pub settings: ChatSettings,
}

impl Preferences {
    /// A missing file yields defaults. A corrupt one is an error.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn conversation(&self, appointment_id: Uuid) -> ConversationPrefs {
        self.conversations
            .get(&appointment_id)
            .cloned()
            .unwrap_or_default()
    }

    fn entry(&mut self, appointment_id: Uuid) -> &mut ConversationPrefs {
        self.conversations.entry(appointment_id).or_default()
    }

    pub fn toggle_pinned(&mut self, appointment_id: Uuid) -> bool {
        let prefs = self.entry(appointment_id);
        prefs.pinned = !prefs.pinned;
        prefs.pinned
    }

    pub fn set_muted(&mut self, appointment_id: Uuid, muted: bool) {
        self.entry(appointment_id).muted = muted;
    }

    pub fn set_archived(&mut self, appointment_id: Uuid, archived: bool) {
        self.entry(appointment_id).archived = archived;
    }

    /// Record a message seen in a conversation's sidebar entry. Returns
    /// whether a notification should be raised.
    pub fn record_message(
        &mut self,
        appointment_id: Uuid,
        content: &str,
        at: DateTime<Utc>,
        incoming: bool,
        conversation_open: bool,
    ) -> bool {
        let notifications = self.settings.desktop_notifications;
        let prefs = self.entry(appointment_id);
        prefs.last_preview = Some(content.chars().take(PREVIEW_CHARS).collect());
        if prefs.last_activity.is_none_or(|prev| at > prev) {
            prefs.last_activity = Some(at);
        }
        if incoming && !conversation_open {
            prefs.unread += 1;
        }
        incoming && !conversation_open && !prefs.muted && notifications
    }

    pub fn mark_read(&mut self, appointment_id: Uuid) {
        if let Some(prefs) = self.conversations.get_mut(&appointment_id) {
            prefs.unread = 0;
        }
    }

    /// Order conversations for the sidebar: archived hidden unless asked
    /// for, pinned first, then most recent activity.
    pub fn sidebar_order(
        &self,
        appointments: impl IntoIterator<Item = Uuid>,
        include_archived: bool,
    ) -> Vec<Uuid> {
        let mut entries: Vec<(Uuid, ConversationPrefs)> = appointments
            .into_iter()
            .map(|id| (id, self.conversation(id)))
            .filter(|(_, p)| include_archived || !p.archived)
            .collect();

        entries.sort_by(|(a_id, a), (b_id, b)| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.last_activity.cmp(&a.last_activity))
                .then(a_id.cmp(b_id))
        });

        entries.into_iter().map(|(id, _)| id).collect()
    }
}
