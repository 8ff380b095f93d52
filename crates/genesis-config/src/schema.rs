// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Top-level settings, persisted as `data/settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    /// Every model the operator has configured.  The entry whose `id` equals
    /// `active_model` is the system default; users may override with a
    /// preferred model of their own.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Id of the system-default model.  `None` falls back to the first entry.
    #[serde(default)]
    pub active_model: Option<String>,
    /// Default bot identity used when a user has no per-user override.
    #[serde(default)]
    pub bot: BotConfig,
}

impl Settings {
    /// Resolve a model config by id, falling back to the active model and
    /// then to the first configured model.
    pub fn resolve_model(&self, model_id: Option<&str>) -> Option<&ModelConfig> {
        let wanted = model_id.or(self.active_model.as_deref());
        if let Some(id) = wanted {
            if let Some(m) = self.models.iter().find(|m| m.id == id) {
                return Some(m);
            }
        }
        self.models.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
        }
    }
}

/// One configured model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Unique identifier referenced by `active_model` and user preferences.
    pub id: String,
    /// Provider kind: "openai_compat" | "mock".
    #[serde(rename = "type", default = "ModelConfig::default_provider")]
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Endpoint base URL for HTTP providers (e.g. a llama.cpp or vLLM server).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Secret-store key holding the API key.  `None` means no key is needed
    /// (local servers).
    #[serde(default)]
    pub api_key_name: Option<String>,
    /// Maximum tokens to request in a single completion.
    #[serde(default)]
    pub output_size: Option<u32>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Whether the model supports a separate reasoning stream.
    #[serde(default = "default_true")]
    pub supports_thinking: bool,
}

impl ModelConfig {
    fn default_provider() -> String {
        "openai_compat".to_string()
    }
}

/// Bot identity substituted into prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "BotConfig::default_name")]
    pub name: String,
    #[serde(default)]
    pub personality: String,
}

impl BotConfig {
    fn default_name() -> String {
        "Genesis AI".to_string()
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            personality: String::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_with_all_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert!(s.models.is_empty());
        assert!(s.active_model.is_none());
        assert_eq!(s.bot.name, "Genesis AI");
        assert_eq!(s.server.port, 5000);
    }

    #[test]
    fn model_config_type_field_maps_to_provider() {
        let m: ModelConfig = serde_json::from_str(
            r#"{"id": "local", "type": "openai_compat", "name": "qwen3"}"#,
        )
        .unwrap();
        assert_eq!(m.provider, "openai_compat");
        assert!(m.supports_thinking);
    }

    #[test]
    fn resolve_model_prefers_explicit_id() {
        let s: Settings = serde_json::from_str(
            r#"{
                "models": [
                    {"id": "a", "name": "model-a"},
                    {"id": "b", "name": "model-b"}
                ],
                "active_model": "a"
            }"#,
        )
        .unwrap();
        assert_eq!(s.resolve_model(Some("b")).unwrap().id, "b");
    }

    #[test]
    fn resolve_model_falls_back_to_active_then_first() {
        let s: Settings = serde_json::from_str(
            r#"{
                "models": [
                    {"id": "a", "name": "model-a"},
                    {"id": "b", "name": "model-b"}
                ],
                "active_model": "b"
            }"#,
        )
        .unwrap();
        assert_eq!(s.resolve_model(None).unwrap().id, "b");
        // Unknown id falls back to first model rather than failing the turn.
        assert_eq!(s.resolve_model(Some("nope")).unwrap().id, "a");
    }

    #[test]
    fn resolve_model_empty_list_is_none() {
        let s = Settings::default();
        assert!(s.resolve_model(None).is_none());
    }
}
