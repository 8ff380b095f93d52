// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

/// On-disk layout of everything Genesis persists.
///
/// Two roots: `data/` holds system-wide artefacts (settings, prompts, system
/// plugins, the chat database) and `bot_data/` holds per-user and scheduler
/// state.  Both live under a single base directory so tests can point the
/// whole tree at a tempdir.
#[derive(Debug, Clone)]
pub struct DataPaths {
    base: PathBuf,
}

impl DataPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Layout rooted at the current working directory.
    pub fn from_cwd() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir().join("settings.json")
    }

    pub fn prompts_file(&self) -> PathBuf {
        self.data_dir().join("prompts.json")
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.data_dir().join("secrets.json")
    }

    pub fn db_file(&self) -> PathBuf {
        self.data_dir().join("system.db")
    }

    /// System-scope plugins: `data/plugins/<plugin_id>/`.
    pub fn system_plugins_dir(&self) -> PathBuf {
        self.data_dir().join("plugins")
    }

    /// Scratch home for actions with no resolvable owner.
    pub fn tmp_home(&self) -> PathBuf {
        self.data_dir().join("tmp")
    }

    pub fn bot_data_dir(&self) -> PathBuf {
        self.base.join("bot_data")
    }

    /// Home directory exposed to system-scope actions as `GENESIS_HOME`.
    pub fn system_home(&self) -> PathBuf {
        self.bot_data_dir().join("_system")
    }

    /// Per-user root: `bot_data/users/<user_id>/`.
    pub fn user_home(&self, user_id: &str) -> PathBuf {
        self.bot_data_dir().join("users").join(user_id)
    }

    /// User-scope plugins: `bot_data/users/<user_id>/plugins/<plugin_id>/`.
    pub fn user_plugins_dir(&self, user_id: &str) -> PathBuf {
        self.user_home(user_id).join("plugins")
    }

    /// Per-user bot identity override.
    pub fn user_bot_config_file(&self, user_id: &str) -> PathBuf {
        self.user_home(user_id).join("bot.json")
    }

    /// Scheduled task registry.
    pub fn tasks_file(&self) -> PathBuf {
        self.system_home().join("tasks").join("tasks.json")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_persistent_contract() {
        let p = DataPaths::new("/srv/genesis");
        assert_eq!(p.system_plugins_dir(), Path::new("/srv/genesis/data/plugins"));
        assert_eq!(
            p.user_plugins_dir("42"),
            Path::new("/srv/genesis/bot_data/users/42/plugins")
        );
        assert_eq!(
            p.tasks_file(),
            Path::new("/srv/genesis/bot_data/_system/tasks/tasks.json")
        );
        assert_eq!(p.user_home("42"), Path::new("/srv/genesis/bot_data/users/42"));
    }
}
