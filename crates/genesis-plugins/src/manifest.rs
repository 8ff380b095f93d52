// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_script() -> String {
    "main.py".to_string()
}

/// Parsed `manifest.json` of a plugin.
///
/// Required fields: `id`, `name`, `version`, `actions`.  Unknown fields are
/// preserved through `extra` so packing a manifest never silently drops
/// vendor extensions — and so the integrity hash covers them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub actions: Vec<ActionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Self-integrity lock written by `pack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integrity {
    pub sha256: String,
    pub signed_at: String,
}

/// One invocable action declared by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    /// Script path relative to the plugin directory.
    #[serde(default = "default_script")]
    pub script: String,
    #[serde(rename = "type", default)]
    pub kind: ActionType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger: ActionTrigger,
    /// Cache TTL in seconds for pre-request results; `<= 0` disables caching.
    #[serde(default)]
    pub cache_ttl: i64,
    /// Ordered mapping of parameter name to type hint, surfaced to the model
    /// in the system prompt.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Spawn an interpreter subprocess (per-plugin venv when the plugin
    /// ships a `requirements.txt`).
    #[default]
    Python,
    /// Spawn the script itself as an executable.
    Process,
    /// Host-native in-process handler.  Bypasses the sandbox: a crashing
    /// handler takes the host down with it.
    #[serde(rename = "python_inproc")]
    Inproc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTrigger {
    /// Invoked only when the model requests it.
    #[default]
    Manual,
    /// Runs automatically before every model request.
    PreRequest,
    /// Reserved.
    PostRequest,
}

impl PluginManifest {
    /// Structural validation over a raw JSON value, mirroring the required
    /// fields of discovery: a manifest missing any of them is skipped.
    pub fn validate_value(value: &serde_json::Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        ["id", "name", "version", "actions"]
            .iter()
            .all(|field| obj.contains_key(*field))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_manifest_parses_with_defaults() {
        let m: PluginManifest = serde_json::from_str(
            r#"{
                "id": "hello_world", "name": "Hello World", "version": "1.0.0",
                "actions": [{"name": "say_hello"}]
            }"#,
        )
        .unwrap();
        assert_eq!(m.actions[0].script, "main.py");
        assert_eq!(m.actions[0].kind, ActionType::Python);
        assert_eq!(m.actions[0].trigger, ActionTrigger::Manual);
        assert_eq!(m.actions[0].cache_ttl, 0);
    }

    #[test]
    fn action_type_aliases_round_trip() {
        let spec: ActionSpec = serde_json::from_str(
            r#"{"name": "x", "type": "python_inproc", "trigger": "pre_request"}"#,
        )
        .unwrap();
        assert_eq!(spec.kind, ActionType::Inproc);
        assert_eq!(spec.trigger, ActionTrigger::PreRequest);
        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["type"], "python_inproc");
        assert_eq!(back["trigger"], "pre_request");
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let m: PluginManifest = serde_json::from_str(
            r#"{
                "id": "p", "name": "P", "version": "1", "actions": [],
                "homepage": "https://example.org"
            }"#,
        )
        .unwrap();
        assert_eq!(m.extra["homepage"], "https://example.org");
        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back["homepage"], "https://example.org");
    }

    #[test]
    fn validate_value_requires_all_fields() {
        let ok = serde_json::json!({"id": "a", "name": "A", "version": "1", "actions": []});
        assert!(PluginManifest::validate_value(&ok));
        let missing = serde_json::json!({"id": "a", "name": "A", "actions": []});
        assert!(!PluginManifest::validate_value(&missing));
        assert!(!PluginManifest::validate_value(&serde_json::json!([1, 2])));
    }
}
