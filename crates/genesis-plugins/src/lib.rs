// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cache;
mod executor;
mod gplug;
mod inproc;
mod manifest;
mod registry;

pub use cache::ActionCache;
pub use executor::{ActionExecutor, ExecContext, ExecOutcome, ExecStatus};
pub use gplug::{
    calculate_manifest_hash, pack_plugin, peek_manifest, sign_manifest, unpack_plugin,
    verify_manifest, GplugError,
};
pub use inproc::{InprocRegistry, NativeAction};
pub use manifest::{ActionSpec, ActionTrigger, ActionType, Integrity, PluginManifest};
pub use registry::{ActionDef, Plugin, PluginRegistry, PluginRole};
