// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use crate::schema::Settings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Load settings from `settings_path`.  A missing file yields defaults so a
/// fresh checkout starts without any setup step.
pub fn load_settings(settings_path: &Path) -> Result<Settings, ConfigError> {
    if !settings_path.exists() {
        tracing::debug!(path = %settings_path.display(), "settings file missing, using defaults");
        return Ok(Settings::default());
    }
    let raw = std::fs::read_to_string(settings_path).map_err(|source| ConfigError::Io {
        path: settings_path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: settings_path.display().to_string(),
        source,
    })
}

/// Persist settings back to disk, creating parent directories as needed.
pub fn save_settings(settings_path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = settings_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let raw = serde_json::to_string_pretty(settings).expect("settings serialize");
    std::fs::write(settings_path, raw).map_err(|source| ConfigError::Io {
        path: settings_path.display().to_string(),
        source,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
