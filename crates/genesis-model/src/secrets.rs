// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

/// File-backed API key store (`data/secrets.json`).
///
/// Keys are re-read from disk on every lookup so a key written by another
/// process (settings UI, `genesis key set`, a second CLI) becomes visible to
/// the orchestrator's 1 Hz credential poll without any signalling.
#[derive(Debug, Clone)]
pub struct SecretStore {
    path: PathBuf,
}

impl SecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> HashMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.read_all().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: &str) -> std::io::Result<()> {
        let mut all = self.read_all();
        all.insert(name.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&all)?)
    }

    pub fn remove(&self, name: &str) -> std::io::Result<()> {
        let mut all = self.read_all();
        if all.remove(name).is_some() {
            std::fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SecretStore::new(tmp.path().join("secrets.json"));
        assert_eq!(store.get("gemini"), None);
        store.set("gemini", "sk-123").unwrap();
        assert_eq!(store.get("gemini").as_deref(), Some("sk-123"));
        store.remove("gemini").unwrap();
        assert_eq!(store.get("gemini"), None);
    }

    #[test]
    fn external_write_is_visible_without_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("secrets.json");
        let store = SecretStore::new(&path);
        // Simulate a second process dropping a key on disk.
        std::fs::write(&path, r#"{"openai": "sk-xyz"}"#).unwrap();
        assert_eq!(store.get("openai").as_deref(), Some("sk-xyz"));
    }
}
