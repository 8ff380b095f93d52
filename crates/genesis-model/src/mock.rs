// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{
    GenerationRequest, ModelProvider, ProviderEvent, ProviderStream,
};

/// Deterministic mock provider for tests.  Echoes the prompt back as the
/// answer with an empty thinking phase.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        "mock"
    }
    fn model_cfg(&self) -> serde_json::Value {
        serde_json::json!({"id": "mock", "type": "mock"})
    }

    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<ProviderStream> {
        let events = vec![
            ProviderEvent::ThinkingFinished {
                thinking: String::new(),
            },
            ProviderEvent::Content {
                chunk: format!("MOCK: {}", req.prompt),
            },
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each `generate` call pops the next event
/// script from the front of the queue, so tests can specify exact multi-loop
/// sequences — including action-request JSON — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ProviderEvent>>>>,
    /// The last `GenerationRequest` seen, for assertions on what was sent.
    pub last_request: Arc<Mutex<Option<GenerationRequest>>>,
}

impl ScriptedMockProvider {
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// event sequence emitted for that call.
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single content reply.
    pub fn always_content(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ProviderEvent::ThinkingFinished {
                thinking: String::new(),
            },
            ProviderEvent::Content {
                chunk: reply.into(),
            },
        ]])
    }

    /// Convenience: a thinking phase followed by a content reply.
    pub fn thinking_then_content(
        thinking: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        let t = thinking.into();
        Self::new(vec![vec![
            ProviderEvent::Thinking { chunk: t.clone() },
            ProviderEvent::ThinkingFinished { thinking: t },
            ProviderEvent::Content {
                chunk: reply.into(),
            },
        ]])
    }

    /// Number of scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_id(&self) -> &str {
        "scripted-mock"
    }
    fn model_cfg(&self) -> serde_json::Value {
        serde_json::json!({"id": "scripted-mock", "type": "mock"})
    }

    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<ProviderStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                vec![
                    ProviderEvent::ThinkingFinished {
                        thinking: String::new(),
                    },
                    ProviderEvent::Content {
                        chunk: "[no more scripts]".into(),
                    },
                ]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    async fn collect(p: &dyn ModelProvider, prompt: &str) -> Vec<ProviderEvent> {
        let mut stream = p.generate(GenerationRequest::new(prompt)).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn mock_echoes_prompt() {
        let events = collect(&MockProvider, "hi").await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ProviderEvent::Content { chunk } if chunk == "MOCK: hi")));
    }

    #[tokio::test]
    async fn thinking_precedes_content() {
        let p = ScriptedMockProvider::thinking_then_content("pondering", "answer");
        let events = collect(&p, "q").await;
        let think_idx = events
            .iter()
            .position(|e| matches!(e, ProviderEvent::Thinking { .. }))
            .unwrap();
        let content_idx = events
            .iter()
            .position(|e| matches!(e, ProviderEvent::Content { .. }))
            .unwrap();
        assert!(think_idx < content_idx);
    }

    #[tokio::test]
    async fn scripts_pop_in_order_then_fall_back() {
        let p = ScriptedMockProvider::new(vec![
            vec![ProviderEvent::Content { chunk: "one".into() }],
            vec![ProviderEvent::Content { chunk: "two".into() }],
        ]);
        assert!(collect(&p, "a").await.iter().any(
            |e| matches!(e, ProviderEvent::Content { chunk } if chunk == "one")
        ));
        assert!(collect(&p, "b").await.iter().any(
            |e| matches!(e, ProviderEvent::Content { chunk } if chunk == "two")
        ));
        assert!(collect(&p, "c").await.iter().any(
            |e| matches!(e, ProviderEvent::Content { chunk } if chunk.contains("no more scripts"))
        ));
    }

    #[tokio::test]
    async fn last_request_captures_system_prompt() {
        let p = ScriptedMockProvider::always_content("ok");
        let mut req = GenerationRequest::new("hello");
        req.system_prompt = Some("be terse".into());
        let mut stream = p.generate(req).await.unwrap();
        while stream.next().await.is_some() {}
        let seen = p.last_request.lock().unwrap().take().unwrap();
        assert_eq!(seen.system_prompt.as_deref(), Some("be terse"));
    }
}
