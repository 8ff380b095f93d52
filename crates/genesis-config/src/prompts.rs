// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;

/// Prompt template library, loaded from `data/prompts.json` — a flat JSON
/// mapping of template id to template string.
///
/// Templates may contain `[bot_name]`, `[bot_personality]`, `[user_message]`,
/// `[action_data]` and `[actions]` placeholders; substitution happens in the
/// orchestrator's prompt builder.  The special id `action_formater` is used
/// for the second pass that digests action observations into an answer.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

const DEFAULT_GENERAL_CHAT: &str = "\
You are [bot_name]. [bot_personality]\n\
\n\
You can request actions by replying with a JSON object of the form\n\
{\"actions\": [{\"name\": \"<action>\", \"parameters\": {...}}]}.\n\
Available actions:\n\
[actions]\n\
\n\
Context gathered before this request:\n\
[action_data]\n";

const DEFAULT_ACTION_FORMATER: &str = "\
You are [bot_name]. [bot_personality]\n\
The user asked: [user_message]\n\
\n\
The following actions were executed and produced these observations:\n\
[action_data]\n\
\n\
Formulate a final answer for the user from the observations. Reply with\n\
further {\"actions\": [...]} JSON only if more action calls are required.\n";

impl Default for PromptLibrary {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert("general_chat".to_string(), DEFAULT_GENERAL_CHAT.to_string());
        templates.insert("user_chat".to_string(), DEFAULT_GENERAL_CHAT.to_string());
        templates.insert(
            "action_formater".to_string(),
            DEFAULT_ACTION_FORMATER.to_string(),
        );
        Self { templates }
    }
}

impl PromptLibrary {
    /// Load templates from disk, merged over the built-in defaults so a
    /// partial prompts.json does not lose the action formatter.
    pub fn load(path: &Path) -> Self {
        let mut lib = Self::default();
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(user) => lib.templates.extend(user),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid prompts file, using defaults")
                }
            },
            Err(_) => {
                tracing::debug!(path = %path.display(), "no prompts file, using built-in templates")
            }
        }
        lib
    }

    /// Fetch a template by id, falling back to `user_chat` like the chat UI
    /// does for unknown prompt ids.
    pub fn get(&self, prompt_id: &str) -> &str {
        self.templates
            .get(prompt_id)
            .or_else(|| self.templates.get("user_chat"))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn insert(&mut self, id: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(id.into(), template.into());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
