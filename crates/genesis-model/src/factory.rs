// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use tracing::info;

use genesis_config::Settings;

use crate::mock::MockProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::provider::ModelProvider;
use crate::secrets::SecretStore;

/// Resolves model ids to live provider instances.
///
/// Instances are cached per model id so repeated turns against the same
/// model reuse one HTTP client and one credential state.  Tests inject
/// scripted providers through [`ProviderFactory::register`].
pub struct ProviderFactory {
    settings: Settings,
    secrets: Arc<SecretStore>,
    cache: Mutex<HashMap<String, Arc<dyn ModelProvider>>>,
}

impl ProviderFactory {
    pub fn new(settings: Settings, secrets: Arc<SecretStore>) -> Self {
        Self {
            settings,
            secrets,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// Pre-seed the cache with a provider instance (test hook, also used for
    /// mock model entries).
    pub fn register(&self, model_id: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.cache.lock().unwrap().insert(model_id.into(), provider);
    }

    /// Resolve `model_id` (user preference), falling back to the system
    /// active model and then to the first configured model.
    pub fn resolve(&self, model_id: Option<&str>) -> anyhow::Result<Arc<dyn ModelProvider>> {
        // Registered instances take priority, keyed by explicit id or by the
        // resolved config id below.
        if let Some(id) = model_id {
            if let Some(p) = self.cache.lock().unwrap().get(id) {
                return Ok(Arc::clone(p));
            }
        }

        let cfg = self
            .settings
            .resolve_model(model_id)
            .context("no models defined in settings")?
            .clone();

        if let Some(p) = self.cache.lock().unwrap().get(&cfg.id) {
            return Ok(Arc::clone(p));
        }

        info!(model = %cfg.id, provider = %cfg.provider, "instantiating provider");
        let provider: Arc<dyn ModelProvider> = match cfg.provider.as_str() {
            "openai_compat" => Arc::new(OpenAiCompatProvider::new(cfg.clone(), &self.secrets)),
            "mock" => Arc::new(MockProvider),
            other => bail!("unsupported provider type: {other}"),
        };
        self.cache
            .lock()
            .unwrap()
            .insert(cfg.id.clone(), Arc::clone(&provider));
        Ok(provider)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
