// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
}

/// Message role in a chat item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// One row of the strictly linear per-chat message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatItem {
    pub id: i64,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub preferred_model: Option<String>,
}

/// One raw model exchange captured for admin tooling.  Written at the
/// system, user and assistant positions of every turn; never read back by
/// the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExchange {
    pub timestamp: String,
    pub chat_id: String,
    pub user_id: Option<String>,
    pub model_config: serde_json::Value,
    pub system_prompt: String,
    pub history_context: serde_json::Value,
    pub response: RawResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub role: String,
    pub content: String,
    pub thinking: Option<String>,
}

/// SQLite-backed store for users, chats, chat items, raw logs and
/// permission grants.
///
/// The connection is guarded by a mutex; every critical section is a single
/// statement or a short transaction, so contention stays negligible.
pub struct ChatStore {
    pub(crate) conn: Mutex<Connection>,
}

impl ChatStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                preferred_model TEXT
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                title TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS chat_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                thinking TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (chat_id) REFERENCES chats(id)
            );

            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id TEXT NOT NULL,
                chat_id TEXT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                thinking TEXT,
                raw_data TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS permissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                action_name TEXT NOT NULL,
                scope TEXT NOT NULL,
                chat_id TEXT,
                granted_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                expires_at DATE
            );

            CREATE INDEX IF NOT EXISTS idx_chat_items_chat ON chat_items(chat_id);
            CREATE INDEX IF NOT EXISTS idx_history_chat ON history(chat_id);
            CREATE INDEX IF NOT EXISTS idx_permissions_lookup
                ON permissions(user_id, action_name);
            "#,
        )?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────────────

    pub fn create_user(&self, username: &str, password: &str, role: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
            params![username, hash_password(password), role],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn verify_user(&self, username: &str, password: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, username, password_hash, role, preferred_model
                 FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok((
                        UserRecord {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            role: row.get(3)?,
                            preferred_model: row.get(4)?,
                        },
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.and_then(|(user, stored_hash)| {
            if stored_hash == hash_password(password) {
                Some(user)
            } else {
                None
            }
        }))
    }

    pub fn get_user_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, username, role, preferred_model FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        role: row.get(2)?,
                        preferred_model: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_preferred_model(&self, user_id: i64, model_id: Option<&str>) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET preferred_model = ?1 WHERE id = ?2",
            params![model_id, user_id],
        )?;
        Ok(())
    }

    pub fn get_preferred_model(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let model = conn
            .query_row(
                "SELECT preferred_model FROM users WHERE id = ?1",
                [user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(model.flatten())
    }

    // ── Chats ─────────────────────────────────────────────────────────────────

    pub fn create_chat(&self, chat_id: &str, user_id: i64, title: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO chats (id, user_id, title, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![chat_id, user_id, title],
        )?;
        Ok(())
    }

    pub fn get_chats_for_user(&self, user_id: i64) -> Result<Vec<ChatSummary>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM chats
             WHERE user_id = ?1 ORDER BY updated_at DESC",
        )?;
        let chats = stmt
            .query_map([user_id], |row| {
                Ok(ChatSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    /// Owning user id as a string, or `None` for unknown (e.g. ephemeral)
    /// chat ids.
    pub fn get_chat_owner(&self, chat_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let owner = conn
            .query_row(
                "SELECT user_id FROM chats WHERE id = ?1",
                [chat_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(owner.map(|id| id.to_string()))
    }

    pub fn get_chat_title(&self, chat_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let title = conn
            .query_row("SELECT title FROM chats WHERE id = ?1", [chat_id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(title.flatten())
    }

    pub fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chats SET title = ?1 WHERE id = ?2",
            params![title, chat_id],
        )?;
        Ok(())
    }

    /// Delete a chat and cascade its items, raw logs and session-scope
    /// permission grants.
    pub fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chat_items WHERE chat_id = ?1", [chat_id])?;
        tx.execute("DELETE FROM history WHERE chat_id = ?1", [chat_id])?;
        tx.execute(
            "DELETE FROM permissions WHERE scope = 'session' AND chat_id = ?1",
            [chat_id],
        )?;
        tx.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_chat_history(&self, chat_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM chat_items WHERE chat_id = ?1", [chat_id])?;
        Ok(())
    }

    // ── Chat items ────────────────────────────────────────────────────────────

    /// Append a chat item and bump the chat's `updated_at`.  Returns the new
    /// row id, which callers keep for in-place streaming updates.
    pub fn save_chat_item(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
        thinking: Option<&str>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_items (chat_id, role, content, thinking) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, role.as_str(), content, thinking],
        )?;
        let row_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE chats SET updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            [chat_id],
        )?;
        Ok(row_id)
    }

    /// Mutate the content and/or thinking of an in-flight item.  Once a turn
    /// completes the orchestrator stops calling this and the row is frozen.
    pub fn update_chat_item(
        &self,
        item_id: i64,
        content: Option<&str>,
        thinking: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        match (content, thinking) {
            (Some(c), Some(t)) => {
                conn.execute(
                    "UPDATE chat_items SET content = ?1, thinking = ?2 WHERE id = ?3",
                    params![c, t, item_id],
                )?;
            }
            (Some(c), None) => {
                conn.execute(
                    "UPDATE chat_items SET content = ?1 WHERE id = ?2",
                    params![c, item_id],
                )?;
            }
            (None, Some(t)) => {
                conn.execute(
                    "UPDATE chat_items SET thinking = ?1 WHERE id = ?2",
                    params![t, item_id],
                )?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// All items of a chat in insertion order (row ids are monotone).
    pub fn load_chat_items(&self, chat_id: &str) -> Result<Vec<ChatItem>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, thinking, timestamp
             FROM chat_items WHERE chat_id = ?1 ORDER BY id ASC",
        )?;
        let items = stmt
            .query_map([chat_id], |row| {
                let role_str: String = row.get(2)?;
                Ok(ChatItem {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    role: Role::parse(&role_str).unwrap_or(Role::System),
                    content: row.get(3)?,
                    thinking: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn has_system_item(&self, chat_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_items WHERE chat_id = ?1 AND role = 'system'",
            [chat_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ── Raw exchange log ──────────────────────────────────────────────────────

    /// Persist the full raw interaction blob for admin tooling.
    pub fn save_raw_exchange(&self, exchange: &RawExchange) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let blob = serde_json::to_string(exchange).unwrap_or_default();
        conn.execute(
            "INSERT INTO history (parent_id, chat_id, role, content, thinking, raw_data)
             VALUES ('raw_log', ?1, ?2, ?3, ?4, ?5)",
            params![
                exchange.chat_id,
                exchange.response.role,
                exchange.response.content,
                exchange.response.thinking,
                blob
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of raw-log rows for a chat.  Used only by tests and admin
    /// tooling; the orchestrator never reads the raw log.
    pub fn count_raw_exchanges(&self, chat_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
