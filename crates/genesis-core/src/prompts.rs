// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use regex::Regex;
use std::sync::OnceLock;

use genesis_config::BotConfig;
use genesis_plugins::{ActionDef, ActionTrigger};

fn leftover_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[a-z_0-9]+\]").expect("static regex"))
}

/// Render a prompt template into the system prompt for one turn.
///
/// Substitutes `[bot_name]`, `[bot_personality]`, `[user_message]`,
/// `[action_data]` and `[actions]` (pre-request actions are omitted from the
/// action list — they run automatically and the model cannot call them).
/// Any leftover lowercase `[tag]` placeholder is stripped afterwards and
/// runs of blank lines are collapsed.
pub fn build_system_prompt(
    template: &str,
    bot: &BotConfig,
    available_actions: &[&ActionDef],
    action_data: &str,
    user_message: &str,
) -> String {
    let mut text = template
        .replace("[bot_name]", &bot.name)
        .replace("[bot_personality]", &bot.personality);

    if !user_message.is_empty() {
        text = text.replace("[user_message]", user_message);
    }

    // History travels out-of-band to the provider; drop any template slot.
    text = text
        .replace("Context history: [history]", "")
        .replace("[history]", "");

    text = text.replace("[action_data]", action_data);

    let actions_text = render_actions(available_actions);
    if actions_text.is_empty() {
        text = text
            .replace("[actions]", "No actions currently available.")
            .replace("[available_actions]", "No actions currently available.");
    } else {
        text = text
            .replace("[actions]", &actions_text)
            .replace("[available_actions]", &actions_text);
    }

    let mut text = leftover_tag_re().replace_all(&text, "").into_owned();
    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }
    text.trim().to_string()
}

fn render_actions(actions: &[&ActionDef]) -> String {
    let mut out = String::new();
    for def in actions {
        if def.trigger() == ActionTrigger::PreRequest {
            continue;
        }
        let spec = &def.spec;
        out.push_str(&format!(
            "- **{}**: {}\n",
            spec.name,
            if spec.description.is_empty() {
                "No description"
            } else {
                &spec.description
            }
        ));
        if spec.parameters.is_empty() {
            out.push_str("  Parameters: None\n");
        } else {
            let params: Vec<String> = spec
                .parameters
                .iter()
                .map(|(k, v)| format!("\"{}\": <{}>", k, v.as_str().unwrap_or("any")))
                .collect();
            out.push_str(&format!("  Parameters: {{{}}}\n", params.join(", ")));
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_plugins::{ActionSpec, PluginRole};
    use std::path::PathBuf;

    fn def(name: &str, trigger: &str, params: serde_json::Value) -> ActionDef {
        let spec: ActionSpec = serde_json::from_value(serde_json::json!({
            "name": name,
            "description": format!("{name} description"),
            "trigger": trigger,
            "parameters": params,
        }))
        .unwrap();
        ActionDef {
            plugin_id: "test".into(),
            role: PluginRole::System,
            path: PathBuf::from("/tmp/test"),
            script: PathBuf::from("/tmp/test/main.py"),
            spec,
        }
    }

    fn bot() -> BotConfig {
        serde_json::from_str(r#"{"name": "Genesis AI", "personality": "helpful"}"#).unwrap()
    }

    #[test]
    fn identity_placeholders_are_substituted() {
        let out = build_system_prompt("I am [bot_name], [bot_personality].", &bot(), &[], "", "");
        assert_eq!(out, "I am Genesis AI, helpful.");
    }

    #[test]
    fn actions_are_listed_with_parameters() {
        let d = def("say_hello", "manual", serde_json::json!({"name": "string"}));
        let out = build_system_prompt("Available:\n[actions]", &bot(), &[&d], "", "");
        assert!(out.contains("- **say_hello**: say_hello description"));
        assert!(out.contains(r#"Parameters: {"name": <string>}"#));
    }

    #[test]
    fn pre_request_actions_are_hidden_from_the_model() {
        let manual = def("visible", "manual", serde_json::json!({}));
        let pre = def("hidden", "pre_request", serde_json::json!({}));
        let out = build_system_prompt("[actions]", &bot(), &[&manual, &pre], "", "");
        assert!(out.contains("visible"));
        assert!(!out.contains("hidden"));
    }

    #[test]
    fn no_actions_renders_placeholder_text() {
        let out = build_system_prompt("[actions]", &bot(), &[], "", "");
        assert_eq!(out, "No actions currently available.");
        let pre = def("p", "pre_request", serde_json::json!({}));
        let out = build_system_prompt("[actions]", &bot(), &[&pre], "", "");
        assert_eq!(out, "No actions currently available.");
    }

    #[test]
    fn action_data_and_user_message_are_injected() {
        let out = build_system_prompt(
            "Data:\n[action_data]\nAsked: [user_message]",
            &bot(),
            &[],
            "### sys_info\nCPU 5%",
            "what's my cpu?",
        );
        assert!(out.contains("### sys_info"));
        assert!(out.contains("Asked: what's my cpu?"));
    }

    #[test]
    fn leftover_tags_are_stripped_and_blank_lines_collapsed() {
        let out = build_system_prompt(
            "A [unknown_tag] B\n\n\n\nC [another_1]",
            &bot(),
            &[],
            "",
            "",
        );
        assert!(!out.contains('['));
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn empty_user_message_leaves_tag_for_stripping() {
        let out = build_system_prompt("Q: [user_message]!", &bot(), &[], "", "");
        assert_eq!(out, "Q: !");
    }

    #[test]
    fn parameterless_action_says_none() {
        let d = def("ping", "manual", serde_json::json!({}));
        let out = build_system_prompt("[actions]", &bot(), &[&d], "", "");
        assert!(out.contains("Parameters: None"));
    }
}
