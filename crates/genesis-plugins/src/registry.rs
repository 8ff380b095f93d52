// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use genesis_config::DataPaths;

use crate::gplug::{self, GplugError};
use crate::manifest::{ActionSpec, ActionTrigger, PluginManifest};

/// Ownership class of a plugin, determining its filesystem root and the
/// effective `GENESIS_HOME` of its actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginRole {
    System,
    User,
}

/// A loaded plugin: its manifest plus on-disk location and ownership.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub manifest: PluginManifest,
    pub path: PathBuf,
    pub role: PluginRole,
}

/// Everything the executor needs to run one action.
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub plugin_id: String,
    pub role: PluginRole,
    /// Absolute plugin directory.
    pub path: PathBuf,
    /// Absolute script path.
    pub script: PathBuf,
    pub spec: ActionSpec,
}

impl ActionDef {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn trigger(&self) -> ActionTrigger {
        self.spec.trigger
    }

    pub fn cache_ttl(&self) -> i64 {
        self.spec.cache_ttl
    }
}

/// Registry of plugins discovered on disk.
///
/// Not a singleton: the orchestrator owns one instance and rescans at loop
/// boundaries so freshly installed plugins appear on the next turn.  Rescans
/// are idempotent; duplicate action names shadow by load order (last loaded
/// wins, user plugins scan after system plugins).
pub struct PluginRegistry {
    paths: DataPaths,
    actions: HashMap<String, ActionDef>,
    plugins: HashMap<String, Plugin>,
}

impl PluginRegistry {
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths,
            actions: HashMap::new(),
            plugins: HashMap::new(),
        }
    }

    /// Scan the system plugin directory and, when a user is known, that
    /// user's plugin directory.
    pub fn scan_plugins(&mut self, user_id: Option<&str>) {
        let system_dir = self.paths.system_plugins_dir();
        self.scan_dir(&system_dir, PluginRole::System);
        if let Some(uid) = user_id {
            let user_dir = self.paths.user_plugins_dir(uid);
            if user_dir.exists() {
                self.scan_dir(&user_dir, PluginRole::User);
            }
        }
    }

    fn scan_dir(&mut self, directory: &Path, role: PluginRole) {
        let Ok(entries) = std::fs::read_dir(directory) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let manifest_path = entry.path().join("manifest.json");
            if !manifest_path.exists() {
                continue;
            }
            match self.load_manifest(&manifest_path) {
                Ok(manifest) => {
                    let plugin_id = manifest.id.clone();
                    self.register_plugin(manifest, entry.path(), role);
                    info!(plugin = %plugin_id, ?role, "loaded plugin");
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping invalid manifest");
                }
            }
        }
    }

    fn load_manifest(&self, manifest_path: &Path) -> anyhow::Result<PluginManifest> {
        let raw = std::fs::read_to_string(manifest_path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        if !PluginManifest::validate_value(&value) {
            anyhow::bail!("missing required fields (id, name, version, actions)");
        }
        Ok(serde_json::from_value(value)?)
    }

    fn register_plugin(&mut self, manifest: PluginManifest, path: PathBuf, role: PluginRole) {
        let abs_path = path.canonicalize().unwrap_or(path);
        for action in &manifest.actions {
            self.actions.insert(
                action.name.clone(),
                ActionDef {
                    plugin_id: manifest.id.clone(),
                    role,
                    path: abs_path.clone(),
                    script: abs_path.join(&action.script),
                    spec: action.clone(),
                },
            );
        }
        self.plugins.insert(
            manifest.id.clone(),
            Plugin {
                manifest,
                path: abs_path,
                role,
            },
        );
    }

    pub fn get_action(&self, action_name: &str) -> Option<&ActionDef> {
        self.actions.get(action_name)
    }

    pub fn all_actions(&self) -> &HashMap<String, ActionDef> {
        &self.actions
    }

    pub fn get_plugin(&self, plugin_id: &str) -> Option<&Plugin> {
        self.plugins.get(plugin_id)
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Install a `.gplug` archive into the requested scope and register it.
    pub fn install_plugin(
        &mut self,
        gplug_path: &Path,
        user_id: Option<&str>,
        role: PluginRole,
    ) -> Result<PluginManifest, GplugError> {
        let target_dir = match role {
            PluginRole::System => self.paths.system_plugins_dir(),
            PluginRole::User => {
                let uid = user_id.ok_or_else(|| {
                    GplugError::InvalidManifest("user_id required for user-scoped plugins".into())
                })?;
                self.paths.user_plugins_dir(uid)
            }
        };
        std::fs::create_dir_all(&target_dir)?;

        let manifest = gplug::unpack_plugin(gplug_path, &target_dir, true)?;
        let plugin_path = target_dir.join(&manifest.id);
        self.register_plugin(manifest.clone(), plugin_path, role);
        info!(plugin = %manifest.id, ?role, "installed plugin");
        Ok(manifest)
    }

    /// Pack an installed plugin into a `.gplug` archive.
    pub fn pack_plugin(
        &self,
        plugin_id: &str,
        output_path: Option<&Path>,
    ) -> Result<PathBuf, GplugError> {
        let plugin = self.plugins.get(plugin_id).ok_or_else(|| {
            GplugError::InvalidManifest(format!("plugin not found: {plugin_id}"))
        })?;
        gplug::pack_plugin(&plugin.path, output_path)
    }

    /// Remove a plugin's directory and purge its actions.
    pub fn delete_plugin(&mut self, plugin_id: &str) -> bool {
        let Some(plugin) = self.plugins.remove(plugin_id) else {
            return false;
        };
        if plugin.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&plugin.path) {
                error!(plugin = %plugin_id, error = %e, "failed to remove plugin directory");
            }
        }
        self.actions.retain(|_, def| def.plugin_id != plugin_id);
        info!(plugin = %plugin_id, "deleted plugin");
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(dir: &Path, id: &str, action: &str) {
        let plugin_dir = dir.join(id);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("manifest.json"),
            serde_json::json!({
                "id": id, "name": id, "version": "1.0.0",
                "actions": [
                    {"name": action, "script": "main.sh", "type": "process",
                     "description": "test action"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(plugin_dir.join("main.sh"), "#!/bin/sh\necho '{}'\n").unwrap();
    }

    fn registry(tmp: &tempfile::TempDir) -> PluginRegistry {
        PluginRegistry::new(DataPaths::new(tmp.path()))
    }

    #[test]
    fn scan_discovers_system_plugins() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        std::fs::create_dir_all(paths.system_plugins_dir()).unwrap();
        write_plugin(&paths.system_plugins_dir(), "hello_world", "say_hello");

        let mut reg = registry(&tmp);
        reg.scan_plugins(None);
        let def = reg.get_action("say_hello").expect("action registered");
        assert_eq!(def.plugin_id, "hello_world");
        assert_eq!(def.role, PluginRole::System);
        assert!(def.script.ends_with("main.sh"));
    }

    #[test]
    fn scan_discovers_user_plugins_after_system() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        std::fs::create_dir_all(paths.system_plugins_dir()).unwrap();
        std::fs::create_dir_all(paths.user_plugins_dir("7")).unwrap();
        write_plugin(&paths.system_plugins_dir(), "sys_plug", "shared_action");
        write_plugin(&paths.user_plugins_dir("7"), "user_plug", "shared_action");

        let mut reg = registry(&tmp);
        reg.scan_plugins(Some("7"));
        // Same action name in both scopes: the later (user) scan shadows.
        let def = reg.get_action("shared_action").unwrap();
        assert_eq!(def.plugin_id, "user_plug");
        assert_eq!(def.role, PluginRole::User);
    }

    #[test]
    fn invalid_manifest_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        let bad = paths.system_plugins_dir().join("broken");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("manifest.json"), r#"{"id": "broken"}"#).unwrap();

        let mut reg = registry(&tmp);
        reg.scan_plugins(None);
        assert!(reg.get_plugin("broken").is_none());
        assert!(reg.all_actions().is_empty());
    }

    #[test]
    fn rescan_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        std::fs::create_dir_all(paths.system_plugins_dir()).unwrap();
        write_plugin(&paths.system_plugins_dir(), "p", "act");

        let mut reg = registry(&tmp);
        reg.scan_plugins(None);
        reg.scan_plugins(None);
        assert_eq!(reg.all_actions().len(), 1);
        assert_eq!(reg.plugin_ids().len(), 1);
    }

    #[test]
    fn pack_install_delete_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        std::fs::create_dir_all(paths.system_plugins_dir()).unwrap();
        write_plugin(&paths.system_plugins_dir(), "cycler", "cycle_act");

        let mut reg = registry(&tmp);
        reg.scan_plugins(None);
        let archive = reg.pack_plugin("cycler", None).unwrap();

        // Install the packed archive into a user scope.
        let manifest = reg
            .install_plugin(&archive, Some("9"), PluginRole::User)
            .unwrap();
        assert_eq!(manifest.id, "cycler");
        assert!(paths.user_plugins_dir("9").join("cycler").exists());
        // User install shadows the system copy.
        assert_eq!(reg.get_action("cycle_act").unwrap().role, PluginRole::User);

        assert!(reg.delete_plugin("cycler"));
        assert!(reg.get_action("cycle_act").is_none());
        assert!(!paths.user_plugins_dir("9").join("cycler").exists());
        assert!(!reg.delete_plugin("cycler"), "second delete is a no-op");
    }

    #[test]
    fn install_user_scope_requires_user_id() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(&tmp);
        let err = reg
            .install_plugin(Path::new("/nonexistent.gplug"), None, PluginRole::User)
            .unwrap_err();
        assert!(matches!(err, GplugError::InvalidManifest(_)));
    }
}
