// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::secrets::SecretStore;

/// One streamed event from a model provider.
///
/// Ordering contract: every `Thinking` event precedes any `Content` event,
/// and `ThinkingFinished` is emitted exactly once — carrying the full
/// accumulated reasoning trace — before the first `Content` chunk (or
/// immediately when thinking is disabled).  `Error` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Thinking { chunk: String },
    ThinkingFinished { thinking: String },
    Content { chunk: String },
    Error { error: String },
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

/// A message in the conversation context handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request for one streamed generation.
///
/// `system_prompt` travels out-of-band: providers must not treat it as a
/// history entry, so it can be swapped between loop iterations without
/// touching the persisted conversation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub history: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub use_thinking: bool,
    pub stop: CancellationToken,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            system_prompt: None,
            use_thinking: true,
            stop: CancellationToken::new(),
        }
    }
}

/// Reported by a provider that cannot generate until a credential arrives.
#[derive(Debug, Clone)]
pub struct MissingCredential {
    /// Secret-store key the caller should prompt for.
    pub provider: String,
    pub message: String,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider kind for status display.
    fn name(&self) -> &str;

    /// Configured model id (settings entry), used for provider caching.
    fn model_id(&self) -> &str;

    /// Opaque model configuration captured into raw exchange logs.
    fn model_cfg(&self) -> serde_json::Value;

    /// `Some` when the provider is blocked on a missing API key.  The
    /// orchestrator then emits `request_key` and polls the secret store.
    fn missing_credential(&self) -> Option<MissingCredential> {
        None
    }

    /// Re-read credentials from the secret store (called after the user
    /// supplied a key).  Default: nothing to refresh.
    fn refresh_credentials(&self, _secrets: &SecretStore) {}

    /// Open a streamed generation.  The provider must honour
    /// `req.stop` cooperatively at chunk boundaries.
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<ProviderStream>;
}
