// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use genesis_config::ModelConfig;

use crate::provider::{
    ChatMessage, GenerationRequest, MissingCredential, ModelProvider, ProviderEvent,
    ProviderStream,
};
use crate::secrets::SecretStore;

const THINK_START: &str = "<think>";
const THINK_END: &str = "</think>";

/// Streaming provider for OpenAI-compatible `chat/completions` endpoints
/// (llama.cpp server, vLLM, Ollama, hosted gateways).
///
/// Thinking is surfaced two ways by real servers: a `reasoning_content`
/// delta field, or inline `<think>...</think>` tags in the content stream
/// when the server is not configured for reasoning extraction.  Both are
/// normalised into the `Thinking` / `ThinkingFinished` / `Content` contract.
pub struct OpenAiCompatProvider {
    cfg: ModelConfig,
    client: reqwest::Client,
    api_key: Mutex<Option<String>>,
}

impl OpenAiCompatProvider {
    pub fn new(cfg: ModelConfig, secrets: &SecretStore) -> Self {
        let api_key = cfg
            .api_key_name
            .as_deref()
            .and_then(|name| secrets.get(name));
        Self {
            cfg,
            client: reqwest::Client::new(),
            api_key: Mutex::new(api_key),
        }
    }

    fn endpoint(&self) -> String {
        let base = self
            .cfg
            .base_url
            .as_deref()
            .unwrap_or("http://127.0.0.1:8080/v1");
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn build_body(&self, req: &GenerationRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(sys) = &req.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        for m in &req.history {
            messages.push(serde_json::json!({"role": m.role, "content": m.content}));
        }
        // Ensure the current prompt terminates the context even when the
        // caller's history snapshot does not include it yet.
        let last_matches = req
            .history
            .last()
            .map(|m| m.role == "user" && m.content == req.prompt)
            .unwrap_or(false);
        if !last_matches {
            messages.push(serde_json::json!({"role": "user", "content": req.prompt}));
        }

        let mut body = serde_json::json!({
            "model": self.cfg.name,
            "messages": messages,
            "stream": true,
        });
        if let Some(max) = self.cfg.output_size {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(t) = self.cfg.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if !req.use_thinking && self.cfg.supports_thinking {
            body["enable_thinking"] = serde_json::json!(false);
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    fn model_id(&self) -> &str {
        &self.cfg.id
    }

    fn model_cfg(&self) -> serde_json::Value {
        serde_json::to_value(&self.cfg).unwrap_or_default()
    }

    fn missing_credential(&self) -> Option<MissingCredential> {
        let key_name = self.cfg.api_key_name.as_deref()?;
        if self.api_key.lock().unwrap().is_some() {
            return None;
        }
        Some(MissingCredential {
            provider: key_name.to_string(),
            message: format!("API key '{key_name}' missing. Please set it in Settings."),
        })
    }

    fn refresh_credentials(&self, secrets: &SecretStore) {
        if let Some(name) = self.cfg.api_key_name.as_deref() {
            *self.api_key.lock().unwrap() = secrets.get(name);
        }
    }

    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<ProviderStream> {
        let body = self.build_body(&req);
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.api_key.lock().unwrap().clone() {
            request = request.bearer_auth(key);
        }

        let (tx, rx) = mpsc::channel::<ProviderEvent>(64);
        let stop = req.stop.clone();
        let use_thinking = req.use_thinking;

        tokio::spawn(async move {
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx
                        .send(ProviderEvent::Error {
                            error: format!("request failed: {e}"),
                        })
                        .await;
                    return;
                }
            };
            if !response.status().is_success() {
                let status = response.status();
                let detail = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(ProviderEvent::Error {
                        error: format!("provider error {status}: {detail}"),
                    })
                    .await;
                return;
            }

            let mut assembler = StreamAssembler::new(use_thinking);
            let mut byte_stream = response.bytes_stream();
            let mut line_buf = String::new();

            'outer: loop {
                let chunk = tokio::select! {
                    _ = stop.cancelled() => break 'outer,
                    next = byte_stream.next() => match next {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => {
                            warn!(error = %e, "model stream error");
                            break 'outer;
                        }
                        None => break 'outer,
                    },
                };
                line_buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = line_buf.find('\n') {
                    let line: String = line_buf.drain(..=pos).collect();
                    let Some(data) = parse_sse_data(line.trim_end()) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let (reasoning, content) = match parse_delta(&data) {
                        Some(d) => d,
                        None => continue,
                    };
                    for ev in assembler.feed(reasoning.as_deref(), content.as_deref()) {
                        if tx.send(ev).await.is_err() {
                            break 'outer;
                        }
                    }
                }
            }

            for ev in assembler.finish() {
                let _ = tx.send(ev).await;
            }
            debug!("generation stream closed");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Extract the payload of an SSE `data:` line, `None` for anything else.
fn parse_sse_data(line: &str) -> Option<String> {
    line.strip_prefix("data:").map(|rest| rest.trim().to_string())
}

/// Pull `(reasoning_content, content)` out of one streamed chunk.
fn parse_delta(data: &str) -> Option<(Option<String>, Option<String>)> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let delta = value.get("choices")?.get(0)?.get("delta")?;
    let reasoning = delta
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let content = delta
        .get("content")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Some((reasoning, content))
}

/// Normalises the two thinking transports into the provider event contract.
///
/// State machine mirrors the inline-tag handling of reasoning model servers:
/// while in thinking mode, content chunks belong to the reasoning trace until
/// `</think>` arrives; a first content chunk with no tag at all means the
/// model skipped thinking and the (possibly empty) trace is flushed.
struct StreamAssembler {
    in_thinking: bool,
    inline_tags: bool,
    trace: String,
    finished_emitted: bool,
    started: bool,
}

impl StreamAssembler {
    fn new(use_thinking: bool) -> Self {
        Self {
            in_thinking: use_thinking,
            inline_tags: false,
            trace: String::new(),
            finished_emitted: !use_thinking,
            started: false,
        }
    }

    fn feed(&mut self, reasoning: Option<&str>, content: Option<&str>) -> Vec<ProviderEvent> {
        let mut events = Vec::new();

        if let Some(chunk) = reasoning {
            if !chunk.is_empty() {
                self.started = true;
                self.trace.push_str(chunk);
                events.push(ProviderEvent::Thinking {
                    chunk: chunk.to_string(),
                });
            }
        }

        if let Some(chunk) = content {
            if chunk.is_empty() {
                return events;
            }
            let mut chunk = chunk.to_string();

            if self.in_thinking {
                if !self.started && chunk.contains(THINK_START) {
                    self.inline_tags = true;
                    chunk = chunk.replacen(THINK_START, "", 1);
                }
                self.started = true;

                if self.inline_tags {
                    if let Some(end) = chunk.find(THINK_END) {
                        let (think_part, rest) = chunk.split_at(end);
                        let rest = &rest[THINK_END.len()..];
                        if !think_part.is_empty() {
                            self.trace.push_str(think_part);
                            events.push(ProviderEvent::Thinking {
                                chunk: think_part.to_string(),
                            });
                        }
                        events.extend(self.flush_thinking());
                        if !rest.is_empty() {
                            events.push(ProviderEvent::Content {
                                chunk: rest.to_string(),
                            });
                        }
                    } else if !chunk.is_empty() {
                        self.trace.push_str(&chunk);
                        events.push(ProviderEvent::Thinking { chunk });
                    }
                    return events;
                }

                // No inline tag and no reasoning channel: the model answered
                // directly, so thinking is over before it began.
                events.extend(self.flush_thinking());
                events.push(ProviderEvent::Content { chunk });
                return events;
            }

            if !self.finished_emitted {
                events.extend(self.flush_thinking());
            }
            let cleaned = chunk.replace(THINK_END, "");
            if !cleaned.is_empty() {
                events.push(ProviderEvent::Content { chunk: cleaned });
            }
        }

        events
    }

    fn flush_thinking(&mut self) -> Vec<ProviderEvent> {
        self.in_thinking = false;
        if self.finished_emitted {
            return Vec::new();
        }
        self.finished_emitted = true;
        vec![ProviderEvent::ThinkingFinished {
            thinking: self.trace.trim().to_string(),
        }]
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        if self.finished_emitted {
            return Vec::new();
        }
        self.flush_thinking()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
