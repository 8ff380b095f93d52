// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{ChatStore, StoreError};

/// Validity extent of a permission grant.
///
/// `Once` is ephemeral: the caller executes immediately after the user's
/// approval and nothing is persisted.  `Session` is bound to one chat,
/// `Today` to the grant date, `Always` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    Once,
    Session,
    Today,
    Always,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::Once => "once",
            PermissionScope::Session => "session",
            PermissionScope::Today => "today",
            PermissionScope::Always => "always",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(PermissionScope::Once),
            "session" => Some(PermissionScope::Session),
            "today" => Some(PermissionScope::Today),
            "always" => Some(PermissionScope::Always),
            _ => None,
        }
    }
}

impl ChatStore {
    /// True iff an `always` grant, an unexpired `today` grant, or a `session`
    /// grant for the given chat exists.  Duplicate rows are harmless: the
    /// first hit wins.
    pub fn check_permission(
        &self,
        user_id: &str,
        action_name: &str,
        chat_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let always: i64 = conn.query_row(
            "SELECT COUNT(*) FROM permissions
             WHERE user_id = ?1 AND action_name = ?2 AND scope = 'always'",
            params![user_id, action_name],
            |row| row.get(0),
        )?;
        if always > 0 {
            return Ok(true);
        }

        let today = chrono::Local::now().date_naive().to_string();
        let today_hits: i64 = conn.query_row(
            "SELECT COUNT(*) FROM permissions
             WHERE user_id = ?1 AND action_name = ?2 AND scope = 'today'
               AND expires_at >= ?3",
            params![user_id, action_name, today],
            |row| row.get(0),
        )?;
        if today_hits > 0 {
            return Ok(true);
        }

        if let Some(chat) = chat_id {
            let session_hits: i64 = conn.query_row(
                "SELECT COUNT(*) FROM permissions
                 WHERE user_id = ?1 AND action_name = ?2 AND scope = 'session'
                   AND chat_id = ?3",
                params![user_id, action_name, chat],
                |row| row.get(0),
            )?;
            if session_hits > 0 {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Record a grant.  `Once` is a no-op; `Session` requires a chat id;
    /// `Today` stores the current date and stays valid while
    /// `expires_at >= today`.
    pub fn grant_permission(
        &self,
        user_id: &str,
        action_name: &str,
        scope: PermissionScope,
        chat_id: Option<&str>,
    ) -> Result<(), StoreError> {
        if scope == PermissionScope::Once {
            return Ok(());
        }
        let expires_at = match scope {
            PermissionScope::Today => Some(chrono::Local::now().date_naive().to_string()),
            _ => None,
        };
        let target_chat = match scope {
            PermissionScope::Session => chat_id,
            _ => None,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO permissions (user_id, action_name, scope, chat_id, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, action_name, scope.as_str(), target_chat, expires_at],
        )?;
        Ok(())
    }

    /// Remove all grants for a (user, action) pair.
    pub fn revoke_permission(&self, user_id: &str, action_name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM permissions WHERE user_id = ?1 AND action_name = ?2",
            params![user_id, action_name],
        )?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
