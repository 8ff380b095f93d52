// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use genesis_config::{BotConfig, DataPaths, PromptLibrary, Settings};
use genesis_model::{ChatMessage, GenerationRequest, ModelProvider, ProviderEvent, ProviderFactory, SecretStore};
use genesis_plugins::{
    ActionCache, ActionDef, ActionExecutor, ActionTrigger, ExecContext, ExecOutcome,
    PluginRegistry,
};
use genesis_store::{ChatStore, RawExchange, RawResponse, Role};

use crate::events::{ActionStatus, TurnEvent};
use crate::extract::{extract_actions, extract_actions_lenient, extract_json, ActionRequest};
use crate::prompts::build_system_prompt;

/// How long to wait for a missing API key before failing the turn.
const KEY_WAIT_SECS: u64 = 60;
/// UI truncation limit for action output events.
const OUTPUT_EVENT_LIMIT: usize = 500;
/// Continuation prompt fed to the model after a batch of actions.
const CONTINUATION_PROMPT: &str = "Actions executed. Please formulate the response.";

/// Process priority hint applied for the duration of a turn (best-effort).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    fn niceness(self) -> i32 {
        match self {
            Priority::Low => 19,
            Priority::Normal => 0,
            Priority::High => -10,
        }
    }
}

/// Parameters of one `ask_stream` call.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt: String,
    pub use_thinking: bool,
    pub priority: Priority,
    pub return_json: bool,
    pub prompt_id: String,
    pub chat_id: Option<String>,
    /// Re-enter the loop from the last assistant message instead of
    /// generating — used after a permission grant.
    pub resume_action: bool,
    pub system_prompt_override: Option<String>,
    pub history_override: Option<Vec<ChatMessage>>,
    pub stop: CancellationToken,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            use_thinking: true,
            priority: Priority::Normal,
            return_json: false,
            prompt_id: "general_chat".into(),
            chat_id: None,
            resume_action: false,
            system_prompt_override: None,
            history_override: None,
            stop: CancellationToken::new(),
        }
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}

/// Collected result of a fully drained turn.
#[derive(Debug, Clone, Default)]
pub struct AskResult {
    pub thinking: String,
    pub content: String,
}

/// The turn orchestrator.
///
/// Owns every subsystem a turn touches and drives the reason–act loop:
/// stream the model, detect action requests, gate them on permissions,
/// dispatch them onto the worker pool, splice observations back, repeat up
/// to `max_loops`.  Events flow to the caller through a bounded channel;
/// persistence is interleaved so every intermediate state is recoverable.
pub struct Agent {
    settings: Settings,
    paths: DataPaths,
    store: Arc<ChatStore>,
    registry: Mutex<PluginRegistry>,
    executor: Arc<ActionExecutor>,
    cache: Arc<ActionCache>,
    providers: Arc<ProviderFactory>,
    prompts: PromptLibrary,
    max_loops: u32,
    worker_slots: Arc<Semaphore>,
    /// Latest execution id per chat, for UI-driven cancellation.
    active_executions: Mutex<HashMap<String, String>>,
}

impl Agent {
    pub fn new(settings: Settings, paths: DataPaths, store: Arc<ChatStore>) -> Self {
        let secrets = Arc::new(SecretStore::new(paths.secrets_file()));
        let providers = Arc::new(ProviderFactory::new(settings.clone(), secrets));
        let prompts = PromptLibrary::load(&paths.prompts_file());
        Self {
            registry: Mutex::new(PluginRegistry::new(paths.clone())),
            executor: Arc::new(ActionExecutor::new(paths.clone())),
            cache: Arc::new(ActionCache::new()),
            providers,
            prompts,
            max_loops: 5,
            worker_slots: Arc::new(Semaphore::new(4)),
            active_executions: Mutex::new(HashMap::new()),
            settings,
            paths,
            store,
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn providers(&self) -> &Arc<ProviderFactory> {
        &self.providers
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn cache(&self) -> &Arc<ActionCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Mutex<PluginRegistry> {
        &self.registry
    }

    /// Kill the active execution of a chat, if any.
    pub fn cancel_chat(&self, chat_id: &str) -> bool {
        let execution_id = self.active_executions.lock().unwrap().get(chat_id).cloned();
        match execution_id {
            Some(id) => self.executor.cancel(&id),
            None => false,
        }
    }

    /// Drive a full turn and collect the final thinking and content.
    pub async fn ask(&self, req: TurnRequest) -> AskResult {
        let (tx, mut rx) = mpsc::channel(64);
        let mut result = AskResult::default();
        let turn = self.ask_stream(req, tx);
        tokio::pin!(turn);
        let mut turn_done = false;
        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Some(TurnEvent::ThinkingFinished { thinking }) => result.thinking = thinking,
                    Some(TurnEvent::Stream { content }) => result.content.push_str(&content),
                    Some(TurnEvent::JsonContent { message, .. }) => result.content = message,
                    Some(_) => {}
                    None => break,
                },
                res = &mut turn, if !turn_done => {
                    if let Err(e) = res {
                        warn!(error = %e, "turn failed");
                    }
                    turn_done = true;
                }
            }
        }
        result
    }

    /// Run one turn, streaming [`TurnEvent`]s through `tx`.
    ///
    /// The emitted sequence is finite and terminates with a final answer,
    /// a `permission_required` pause, or an `error`.
    pub async fn ask_stream(
        &self,
        req: TurnRequest,
        tx: mpsc::Sender<TurnEvent>,
    ) -> anyhow::Result<()> {
        let chat_id = req
            .chat_id
            .clone()
            .unwrap_or_else(|| format!("ephemeral_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let is_ephemeral = chat_id.starts_with("ephemeral_");
        let user_id = self.store.get_chat_owner(&chat_id).unwrap_or_default();

        // Model resolution: user preference first, then the system default.
        let preferred = user_id
            .as_deref()
            .and_then(|uid| self.store.get_preferred_model(uid).ok().flatten());
        let provider = match self.providers.resolve(preferred.as_deref()) {
            Ok(p) => p,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error { error: e.to_string() }).await;
                return Ok(());
            }
        };

        // Credential gate: ask the caller for the key and poll the secret
        // store at 1 Hz for up to a minute.
        if let Some(missing) = provider.missing_credential() {
            let _ = tx
                .send(TurnEvent::RequestKey {
                    provider: missing.provider.clone(),
                    message: missing.message.clone(),
                })
                .await;
            let mut resolved = false;
            for _ in 0..KEY_WAIT_SECS {
                if req.stop.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                if self.providers.secrets().get(&missing.provider).is_some() {
                    provider.refresh_credentials(self.providers.secrets());
                    resolved = provider.missing_credential().is_none();
                    break;
                }
            }
            if !resolved {
                let _ = tx
                    .send(TurnEvent::Error {
                        error: format!("API key '{}' was not provided", missing.provider),
                    })
                    .await;
                return Ok(());
            }
        }

        let previous_nice = apply_priority(req.priority);
        let outcome = self
            .run_turn(&req, &chat_id, is_ephemeral, user_id.as_deref(), provider, &tx)
            .await;
        restore_priority(previous_nice);
        self.active_executions.lock().unwrap().remove(&chat_id);
        outcome
    }

    #[allow(clippy::too_many_lines)]
    async fn run_turn(
        &self,
        req: &TurnRequest,
        chat_id: &str,
        is_ephemeral: bool,
        user_id: Option<&str>,
        provider: Arc<dyn ModelProvider>,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> anyhow::Result<()> {
        // Placeholder assistant row, mutated in place while streaming.  The
        // user row is only written for fresh (non-resume) turns.
        let mut placeholder_id = None;
        if !is_ephemeral {
            match self.store.save_chat_item(chat_id, Role::Assistant, "", Some("")) {
                Ok(id) => placeholder_id = Some(id),
                Err(e) => warn!(error = %e, "failed to create assistant placeholder"),
            }
            if !req.prompt.is_empty() && !req.resume_action {
                if let Err(e) = self.store.save_chat_item(chat_id, Role::User, &req.prompt, None) {
                    warn!(error = %e, "failed to save user message");
                }
                self.maybe_autotitle(chat_id, &req.prompt);
            }
        }

        // Rescan at the loop boundary so freshly installed plugins are
        // visible to this turn.
        let all_actions: Vec<ActionDef> = {
            let mut registry = self.registry.lock().unwrap();
            registry.scan_plugins(user_id);
            registry.all_actions().values().cloned().collect()
        };

        let action_data = self
            .run_pre_request_actions(&all_actions, user_id, chat_id)
            .await;

        let bot = self.bot_config(user_id);
        let action_refs: Vec<&ActionDef> = all_actions.iter().collect();
        let template = match &req.system_prompt_override {
            Some(t) => t.clone(),
            None => self.prompts.get(&req.prompt_id).to_string(),
        };
        let mut system_prompt =
            build_system_prompt(&template, &bot, &action_refs, &action_data, &req.prompt);

        // The populated system prompt is persisted once per chat so the turn
        // is replayable from storage.
        if !is_ephemeral && !self.store.has_system_item(chat_id).unwrap_or(true) {
            let _ = self
                .store
                .save_chat_item(chat_id, Role::System, &system_prompt, None);
        }

        let mut loop_history: Vec<ChatMessage> = match &req.history_override {
            Some(h) => h.clone(),
            None => self.load_history(chat_id),
        };

        let mut current_prompt = req.prompt.clone();
        let mut current_loop: u32 = 0;
        let mut full_content = String::new();
        let mut accumulated_thinking = String::new();

        // Resume branch: execute the pending requests of the last assistant
        // message (both JSON and legacy bracket syntax), then fall into the
        // loop at iteration 1.  Permission was granted before resuming, so
        // the gate is not consulted again — `once` grants would otherwise
        // pause forever.
        if req.resume_action {
            let last_assistant = loop_history
                .iter()
                .rev()
                .find(|m| m.role == "assistant" && !m.content.is_empty())
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let pending = extract_actions_lenient(&last_assistant);
            if pending.is_empty() {
                current_prompt = "Observation: No actions found to resume.".into();
            } else {
                let _ = tx
                    .send(TurnEvent::Stream {
                        content: "\n\n[System] Resuming Actions...\n".into(),
                    })
                    .await;
                self.update_placeholder(placeholder_id, None, Some("[Resuming Actions...]"));
                let observations = self
                    .dispatch_actions(&pending, user_id, chat_id, is_ephemeral, tx, &req.stop)
                    .await;
                if req.stop.is_cancelled() {
                    self.update_placeholder(placeholder_id, Some(&full_content), None);
                    return Ok(());
                }
                system_prompt = build_system_prompt(
                    self.prompts.get("action_formater"),
                    &bot,
                    &action_refs,
                    &observations.join("\n"),
                    &req.prompt,
                );
                current_prompt = CONTINUATION_PROMPT.into();
                current_loop = 1;
            }
        }

        while current_loop < self.max_loops {
            if current_loop > 0 {
                let _ = tx
                    .send(TurnEvent::ActionLoop {
                        loop_: current_loop + 1,
                        max_loops: self.max_loops,
                    })
                    .await;
            }
            full_content.clear();
            accumulated_thinking.clear();

            // Raw-log the system and user positions of this iteration.
            if !is_ephemeral {
                self.write_raw_log(
                    chat_id,
                    user_id,
                    provider.as_ref(),
                    &system_prompt,
                    &[],
                    "system",
                    &system_prompt,
                    None,
                );
                self.write_raw_log(
                    chat_id,
                    user_id,
                    provider.as_ref(),
                    &system_prompt,
                    &loop_history,
                    "user",
                    &current_prompt,
                    None,
                );
            }

            let generation = GenerationRequest {
                prompt: current_prompt.clone(),
                history: loop_history.clone(),
                system_prompt: Some(system_prompt.clone()),
                use_thinking: req.use_thinking,
                stop: req.stop.clone(),
            };
            let mut stream = match provider.generate(generation).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx
                        .send(TurnEvent::Error {
                            error: format!("model generation failed: {e}"),
                        })
                        .await;
                    return Ok(());
                }
            };

            while let Some(event) = stream.next().await {
                match event {
                    ProviderEvent::Thinking { chunk } => {
                        if !chunk.is_empty() {
                            accumulated_thinking.push_str(&chunk);
                            let suffix = if current_loop > 0 {
                                "\n[Action Processing...]"
                            } else {
                                ""
                            };
                            self.update_placeholder(
                                placeholder_id,
                                None,
                                Some(&format!("{accumulated_thinking}{suffix}")),
                            );
                            let _ = tx.send(TurnEvent::Thinking { chunk }).await;
                        }
                    }
                    ProviderEvent::ThinkingFinished { thinking } => {
                        if !thinking.is_empty() {
                            accumulated_thinking = thinking.clone();
                        }
                        self.update_placeholder(placeholder_id, None, Some(&accumulated_thinking));
                        let _ = tx
                            .send(TurnEvent::ThinkingFinished {
                                thinking: accumulated_thinking.clone(),
                            })
                            .await;
                    }
                    ProviderEvent::Content { chunk } => {
                        full_content.push_str(&chunk);
                        self.update_placeholder(placeholder_id, Some(&full_content), None);
                        let _ = tx.send(TurnEvent::Stream { content: chunk }).await;
                    }
                    ProviderEvent::Error { error } => {
                        let _ = tx.send(TurnEvent::Error { error }).await;
                        return Ok(());
                    }
                }
            }

            if req.stop.is_cancelled() {
                break;
            }

            let actions = extract_actions(&full_content);
            if actions.is_empty() {
                break;
            }

            let _ = tx
                .send(TurnEvent::ActionDetected {
                    names: actions.iter().map(|a| a.name.clone()).collect(),
                })
                .await;

            // Permission gate: pause the whole turn on the first unpermitted
            // action.  State is already persisted, so the caller can grant
            // and re-invoke with `resume_action`.
            let perm_user = user_id.unwrap_or("default");
            let mut pause_on: Option<&ActionRequest> = None;
            for act in &actions {
                let permitted = self
                    .store
                    .check_permission(perm_user, &act.name, Some(chat_id))
                    .unwrap_or(false);
                if !permitted {
                    pause_on = Some(act);
                    break;
                }
            }
            if let Some(act) = pause_on {
                debug!(action = %act.name, "permission required, pausing turn");
                self.update_placeholder(placeholder_id, Some(&full_content), None);
                if !is_ephemeral {
                    self.write_raw_log(
                        chat_id,
                        user_id,
                        provider.as_ref(),
                        &system_prompt,
                        &loop_history,
                        "assistant",
                        &full_content,
                        Some(&accumulated_thinking),
                    );
                }
                let _ = tx
                    .send(TurnEvent::PermissionRequired {
                        action_name: act.name.clone(),
                        action_args: act.args.clone(),
                    })
                    .await;
                return Ok(());
            }

            self.update_placeholder(
                placeholder_id,
                None,
                Some(&format!(
                    "{accumulated_thinking}\n[Executing {} Action(s)...]",
                    actions.len()
                )),
            );
            let _ = tx
                .send(TurnEvent::Stream {
                    content: format!("\n\n[System] Executing {} actions...\n", actions.len()),
                })
                .await;

            let observations = self
                .dispatch_actions(&actions, user_id, chat_id, is_ephemeral, tx, &req.stop)
                .await;
            if req.stop.is_cancelled() {
                break;
            }

            // Second-pass template digests the observations; the head system
            // message is replaced rather than appended.
            system_prompt = build_system_prompt(
                self.prompts.get("action_formater"),
                &bot,
                &action_refs,
                &observations.join("\n"),
                &req.prompt,
            );

            if current_loop == 0 {
                let user_content = if current_prompt.is_empty() {
                    "Action Request".to_string()
                } else {
                    current_prompt.clone()
                };
                loop_history.push(ChatMessage::new("user", user_content));
            }
            loop_history.push(ChatMessage::new("assistant", full_content.clone()));
            current_prompt = CONTINUATION_PROMPT.into();
            current_loop += 1;
        }

        // Final handling: the streamed content stands, optionally re-parsed
        // into a structured payload.
        let mut final_content = full_content.clone();
        if req.return_json {
            match extract_json(&full_content) {
                Some(parsed) => {
                    let message = parsed
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| full_content.clone());
                    if let Some(title) = parsed.get("chat_title").and_then(|t| t.as_str()) {
                        if !is_ephemeral {
                            let _ = self.store.update_chat_title(chat_id, title);
                        }
                    }
                    final_content = message.clone();
                    let _ = tx.send(TurnEvent::JsonContent { message, json: parsed }).await;
                }
                None => {
                    let message = full_content.replace("<|im_end|>", "");
                    final_content = message.clone();
                    let _ = tx
                        .send(TurnEvent::JsonContent {
                            message,
                            json: Value::Null,
                        })
                        .await;
                }
            }
        }
        self.update_placeholder(placeholder_id, Some(&final_content), None);
        if !is_ephemeral {
            self.write_raw_log(
                chat_id,
                user_id,
                provider.as_ref(),
                &system_prompt,
                &loop_history,
                "assistant",
                &full_content,
                Some(&accumulated_thinking),
            );
        }

        Ok(())
    }

    /// Execute a batch of actions on the worker pool, forwarding progress
    /// and emitting one `action_output` per completion (completion order).
    /// Returns the observation strings for the next loop iteration.
    async fn dispatch_actions(
        &self,
        actions: &[ActionRequest],
        user_id: Option<&str>,
        chat_id: &str,
        is_ephemeral: bool,
        tx: &mpsc::Sender<TurnEvent>,
        stop: &CancellationToken,
    ) -> Vec<String> {
        let mut observations = Vec::new();
        let (progress_tx, mut progress_rx) = mpsc::channel::<(String, Value)>(256);
        let mut join_set: JoinSet<(String, ExecOutcome)> = JoinSet::new();
        let mut spawned = 0usize;

        for act in actions {
            let def = {
                let registry = self.registry.lock().unwrap();
                registry.get_action(&act.name).cloned()
            };
            let Some(def) = def else {
                let obs = format!("Error: Action '{}' not found.", act.name);
                let _ = tx
                    .send(TurnEvent::ActionOutput {
                        name: act.name.clone(),
                        result: ActionStatus::Error,
                        output: obs.clone(),
                        truncated: false,
                    })
                    .await;
                observations.push(format!("Action '{}' Result: {obs}", act.name));
                continue;
            };

            let ctx = ExecContext::new(user_id.map(str::to_string), Some(chat_id.to_string()));
            self.active_executions
                .lock()
                .unwrap()
                .insert(chat_id.to_string(), ctx.execution_id.clone());

            let executor = Arc::clone(&self.executor);
            let slots = Arc::clone(&self.worker_slots);
            let shared = progress_tx.clone();
            let stop = stop.clone();
            let name = act.name.clone();
            let args = act.args.clone();
            spawned += 1;

            join_set.spawn(async move {
                let _permit = tokio::select! {
                    permit = slots.acquire_owned() => permit.expect("semaphore open"),
                    _ = stop.cancelled() => {
                        return (name, ExecOutcome::cancelled(String::new()));
                    }
                };

                let (action_tx, mut action_rx) = mpsc::channel::<Value>(64);
                let exec_fut = executor.execute(&def, &args, &ctx, Some(action_tx), None);
                tokio::pin!(exec_fut);
                let mut stop_armed = true;
                let outcome = loop {
                    tokio::select! {
                        out = &mut exec_fut => break out,
                        Some(update) = action_rx.recv() => {
                            let _ = shared.send((name.clone(), update)).await;
                        }
                        _ = stop.cancelled(), if stop_armed => {
                            stop_armed = false;
                            executor.cancel(&ctx.execution_id);
                        }
                    }
                };
                // Flush progress that raced the completion so no update can
                // trail its own action_output.
                while let Ok(update) = action_rx.try_recv() {
                    let _ = shared.send((name.clone(), update)).await;
                }
                (name, outcome)
            });
        }
        drop(progress_tx);

        let mut remaining = spawned;
        while remaining > 0 {
            tokio::select! {
                Some(update) = progress_rx.recv() => {
                    self.forward_progress(update, tx).await;
                }
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    remaining -= 1;
                    let (name, outcome) = match joined {
                        Ok(pair) => pair,
                        Err(e) => {
                            observations.push(format!("Action execution panicked: {e}"));
                            continue;
                        }
                    };
                    // Drain buffered updates first to preserve ordering.
                    while let Ok(update) = progress_rx.try_recv() {
                        self.forward_progress(update, tx).await;
                    }

                    let (status, obs_text) = render_outcome(&outcome);
                    let truncated = obs_text.chars().count() > OUTPUT_EVENT_LIMIT;
                    let display: String = obs_text.chars().take(OUTPUT_EVENT_LIMIT).collect();
                    let _ = tx
                        .send(TurnEvent::ActionOutput {
                            name: name.clone(),
                            result: status,
                            output: display,
                            truncated,
                        })
                        .await;
                    if !is_ephemeral {
                        let record = format!("[Action Output: {name}] {obs_text}");
                        if let Err(e) =
                            self.store.save_chat_item(chat_id, Role::System, &record, None)
                        {
                            warn!(error = %e, "failed to persist action output");
                        }
                    }
                    observations.push(format!("Action '{name}' Result: {obs_text}"));
                }
            }
        }
        // Late stragglers from the channel buffer.
        while let Ok(update) = progress_rx.try_recv() {
            self.forward_progress(update, tx).await;
        }

        observations
    }

    async fn forward_progress(&self, update: (String, Value), tx: &mpsc::Sender<TurnEvent>) {
        let (name, data) = update;
        let _ = tx
            .send(TurnEvent::ActionUpdate {
                name: name.clone(),
                data: data.clone(),
            })
            .await;
        let _ = tx
            .send(TurnEvent::Stream {
                content: format!("[{name}] {data}\n"),
            })
            .await;
    }

    /// Run every pre-request action under stale-while-revalidate caching and
    /// aggregate the outputs, labelled by action name.
    async fn run_pre_request_actions(
        &self,
        all_actions: &[ActionDef],
        user_id: Option<&str>,
        chat_id: &str,
    ) -> String {
        let cache_user = user_id.unwrap_or("default");
        let mut sections = Vec::new();

        for def in all_actions.iter().filter(|d| d.trigger() == ActionTrigger::PreRequest) {
            let name = def.name().to_string();
            let ttl = def.cache_ttl();

            let data = if let Some(fresh) = self.cache.get(&name, cache_user, ttl) {
                Some(fresh)
            } else if let Some(stale) = self.cache.get_stale(&name, cache_user) {
                // Serve stale now, refresh in the background.
                let executor = Arc::clone(&self.executor);
                let cache = Arc::clone(&self.cache);
                let def = def.clone();
                let user = cache_user.to_string();
                let ctx = ExecContext::new(user_id.map(str::to_string), Some(chat_id.to_string()));
                tokio::spawn(async move {
                    let outcome = executor
                        .execute(&def, &serde_json::json!({}), &ctx, None, None)
                        .await;
                    if outcome.is_success() {
                        if let Some(output) = outcome.output {
                            cache.set(def.name(), &user, output, def.cache_ttl());
                        }
                    }
                });
                Some(stale)
            } else {
                let ctx = ExecContext::new(user_id.map(str::to_string), Some(chat_id.to_string()));
                let outcome = self
                    .executor
                    .execute(def, &serde_json::json!({}), &ctx, None, None)
                    .await;
                if outcome.is_success() {
                    let output = outcome.output.unwrap_or(Value::Null);
                    self.cache.set(&name, cache_user, output.clone(), ttl);
                    Some(output)
                } else {
                    warn!(action = %name, error = ?outcome.error, "pre-request action failed");
                    None
                }
            };

            if let Some(value) = data {
                sections.push(format!("### {name}\n{}", render_action_data(&value)));
            }
        }

        sections.join("\n\n")
    }

    fn bot_config(&self, user_id: Option<&str>) -> BotConfig {
        if let Some(uid) = user_id {
            let path = self.paths.user_bot_config_file(uid);
            if let Ok(raw) = std::fs::read_to_string(&path) {
                if let Ok(bot) = serde_json::from_str(&raw) {
                    return bot;
                }
                warn!(path = %path.display(), "invalid user bot config, using default");
            }
        }
        self.settings.bot.clone()
    }

    /// Chat items as provider messages: user and assistant turns plus the
    /// persisted action-output records; empty in-flight placeholders and the
    /// stored system prompt are not part of the model context (the prompt
    /// travels out-of-band).
    fn load_history(&self, chat_id: &str) -> Vec<ChatMessage> {
        let items = self.store.load_chat_items(chat_id).unwrap_or_default();
        items
            .into_iter()
            .filter(|item| !item.content.is_empty())
            .filter(|item| {
                item.role != Role::System || item.content.starts_with("[Action Output:")
            })
            .map(|item| ChatMessage::new(item.role.as_str(), item.content))
            .collect()
    }

    fn maybe_autotitle(&self, chat_id: &str, prompt: &str) {
        let Ok(Some(title)) = self.store.get_chat_title(chat_id) else {
            return;
        };
        let lowered = title.to_lowercase();
        if lowered != "new chat" && lowered != "new conversation" {
            return;
        }
        let mut text: String = prompt.chars().take(50).collect::<String>().trim().to_string();
        if prompt.chars().count() > 50 {
            text.push_str("...");
        }
        if let Err(e) = self.store.update_chat_title(chat_id, &text) {
            warn!(error = %e, "failed to auto-title chat");
        }
    }

    fn update_placeholder(&self, id: Option<i64>, content: Option<&str>, thinking: Option<&str>) {
        if let Some(id) = id {
            if let Err(e) = self.store.update_chat_item(id, content, thinking) {
                warn!(error = %e, "failed to update streaming chat item");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_raw_log(
        &self,
        chat_id: &str,
        user_id: Option<&str>,
        provider: &dyn ModelProvider,
        system_prompt: &str,
        history: &[ChatMessage],
        role: &str,
        content: &str,
        thinking: Option<&str>,
    ) {
        let exchange = RawExchange {
            timestamp: chrono::Utc::now().to_rfc3339(),
            chat_id: chat_id.to_string(),
            user_id: user_id.map(str::to_string),
            model_config: provider.model_cfg(),
            system_prompt: system_prompt.to_string(),
            history_context: serde_json::to_value(history).unwrap_or_default(),
            response: RawResponse {
                role: role.to_string(),
                content: content.to_string(),
                thinking: thinking.map(str::to_string),
            },
        };
        if let Err(e) = self.store.save_raw_exchange(&exchange) {
            warn!(error = %e, "raw history logging failed");
        }
    }
}

/// Observation text and status for one execution outcome.
fn render_outcome(outcome: &ExecOutcome) -> (ActionStatus, String) {
    if outcome.is_success() {
        let output = outcome.output.clone().unwrap_or_else(|| serde_json::json!({}));
        (ActionStatus::Success, output.to_string())
    } else if outcome.error.as_deref() == Some("cancelled") {
        (
            ActionStatus::Error,
            format!(
                "cancelled [Partial Output]: {}",
                outcome.partial_output.as_deref().unwrap_or("")
            ),
        )
    } else {
        (
            ActionStatus::Error,
            format!("Error: {}", outcome.error.as_deref().unwrap_or("Unknown Error")),
        )
    }
}

/// Pre-request output formatting: objects and arrays pretty-printed, plain
/// strings verbatim.
fn render_action_data(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

#[cfg(unix)]
fn apply_priority(priority: Priority) -> Option<i32> {
    // Best-effort niceness hint; failure is silent by design of the hint.
    unsafe {
        let current = libc::getpriority(libc::PRIO_PROCESS as _, 0);
        libc::setpriority(libc::PRIO_PROCESS as _, 0, priority.niceness());
        Some(current)
    }
}

#[cfg(not(unix))]
fn apply_priority(_priority: Priority) -> Option<i32> {
    None
}

#[cfg(unix)]
fn restore_priority(previous: Option<i32>) {
    if let Some(nice) = previous {
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS as _, 0, nice);
        }
    }
}

#[cfg(not(unix))]
fn restore_priority(_previous: Option<i32>) {}
