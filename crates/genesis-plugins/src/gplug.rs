// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
//! `.gplug` plugin archives: ZIP files with a mandatory root `manifest.json`
//! carrying a self-integrity SHA-256 over the manifest content.
//!
//! The canonical hash is computed over the manifest JSON *without* its
//! `integrity` field, serialised with sorted keys and minimal separators
//! (serde_json's default object encoding), UTF-8, SHA-256 hex.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;
use walkdir::WalkDir;
use zip::write::FileOptions;

use crate::manifest::PluginManifest;

#[derive(Debug, thiserror::Error)]
pub enum GplugError {
    #[error("no manifest.json found in {0}")]
    MissingManifest(PathBuf),
    #[error("invalid .gplug file (not a ZIP archive): {0}")]
    NotAnArchive(PathBuf),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("integrity check failed: {0}")]
    IntegrityMismatch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Directory and file names never included in an archive.
const EXCLUDED_DIRS: [&str; 4] = ["__pycache__", ".venv", "venv", ".git"];

/// SHA-256 hex of the manifest minus its `integrity` field.
pub fn calculate_manifest_hash(manifest: &serde_json::Value) -> String {
    let mut copy = manifest.clone();
    if let Some(obj) = copy.as_object_mut() {
        obj.remove("integrity");
    }
    let canonical = serde_json::to_string(&copy).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Add (or replace) the integrity block on a manifest value.
pub fn sign_manifest(manifest: &mut serde_json::Value) {
    let sha256 = calculate_manifest_hash(manifest);
    if let Some(obj) = manifest.as_object_mut() {
        obj.insert(
            "integrity".to_string(),
            serde_json::json!({
                "sha256": sha256,
                "signed_at": chrono::Utc::now().to_rfc3339(),
            }),
        );
    }
}

/// Verify a manifest against its stored hash.
///
/// A manifest without an integrity block passes (unverified plugin); a block
/// with a missing or mismatching hash fails.
pub fn verify_manifest(manifest: &serde_json::Value) -> Result<(), GplugError> {
    let Some(block) = manifest.get("integrity") else {
        return Ok(());
    };
    let Some(stored) = block.get("sha256").and_then(|v| v.as_str()) else {
        return Err(GplugError::IntegrityMismatch(
            "integrity block missing sha256".into(),
        ));
    };
    let calculated = calculate_manifest_hash(manifest);
    if calculated == stored {
        Ok(())
    } else {
        Err(GplugError::IntegrityMismatch(format!(
            "expected {}..., got {}...",
            &stored[..16.min(stored.len())],
            &calculated[..16]
        )))
    }
}

/// Pack a plugin directory into a `.gplug` archive.
///
/// Signs the on-disk manifest first (the signature stays in the directory),
/// then zips everything except byte-code, venv and VCS artefacts.  Returns
/// the archive path, defaulting to `<parent>/<plugin_id>.gplug`.
pub fn pack_plugin(plugin_path: &Path, output_path: Option<&Path>) -> Result<PathBuf, GplugError> {
    let manifest_path = plugin_path.join("manifest.json");
    if !manifest_path.exists() {
        return Err(GplugError::MissingManifest(plugin_path.to_path_buf()));
    }

    let mut manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;
    sign_manifest(&mut manifest);
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    let output = match output_path {
        Some(p) => p.to_path_buf(),
        None => {
            let plugin_id = manifest
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    plugin_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "plugin".into())
                });
            plugin_path
                .parent()
                .unwrap_or(Path::new("."))
                .join(format!("{plugin_id}.gplug"))
        }
    };

    let file = File::create(&output)?;
    let mut zf = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(plugin_path)
        .into_iter()
        .filter_entry(|e| {
            !e.file_type().is_dir()
                || !EXCLUDED_DIRS.contains(&e.file_name().to_string_lossy().as_ref())
        })
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(".pyc") {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(plugin_path)
            .expect("entry under plugin path");
        zf.start_file(rel.to_string_lossy(), options)?;
        let mut f = File::open(entry.path())?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        zf.write_all(&buf)?;
    }
    zf.finish()?;

    info!(archive = %output.display(), "packed plugin");
    Ok(output)
}

/// Unpack a `.gplug` archive into `target_dir/<plugin_id>`.
///
/// Extraction happens into a staging directory first; integrity failures
/// leave nothing at the target path.  Returns the parsed manifest.
pub fn unpack_plugin(
    gplug_path: &Path,
    target_dir: &Path,
    verify: bool,
) -> Result<PluginManifest, GplugError> {
    if !gplug_path.exists() {
        return Err(GplugError::NotAnArchive(gplug_path.to_path_buf()));
    }
    let file = File::open(gplug_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|_| GplugError::NotAnArchive(gplug_path.to_path_buf()))?;

    let staging = tempfile::tempdir()?;
    archive.extract(staging.path())?;

    let manifest_path = staging.path().join("manifest.json");
    if !manifest_path.exists() {
        return Err(GplugError::MissingManifest(gplug_path.to_path_buf()));
    }
    let manifest_value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;
    if !PluginManifest::validate_value(&manifest_value) {
        return Err(GplugError::InvalidManifest(
            "missing required fields (id, name, version, actions)".into(),
        ));
    }
    if verify {
        verify_manifest(&manifest_value)?;
    }

    let manifest: PluginManifest = serde_json::from_value(manifest_value)?;
    let final_path = target_dir.join(&manifest.id);
    if final_path.exists() {
        std::fs::remove_dir_all(&final_path)?;
    }
    std::fs::create_dir_all(target_dir)?;
    // A rename can cross filesystems between the staging tempdir and the
    // plugin tree, so fall back to a recursive copy when it fails.
    if std::fs::rename(staging.path(), &final_path).is_err() {
        copy_dir_recursive(staging.path(), &final_path)?;
    }

    info!(plugin = %manifest.id, path = %final_path.display(), "unpacked plugin");
    Ok(manifest)
}

/// Read the manifest out of an archive without extracting it.
pub fn peek_manifest(gplug_path: &Path) -> Result<serde_json::Value, GplugError> {
    let file = File::open(gplug_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|_| GplugError::NotAnArchive(gplug_path.to_path_buf()))?;
    let mut entry = archive
        .by_name("manifest.json")
        .map_err(|_| GplugError::MissingManifest(gplug_path.to_path_buf()))?;
    let mut raw = String::new();
    entry.read_to_string(&mut raw)?;
    Ok(serde_json::from_str(&raw)?)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
