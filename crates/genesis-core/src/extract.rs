// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tolerant extraction of structured data from model output.
//!
//! Model text is messy: fenced code blocks, stray prose around the object,
//! hallucinated double braces.  The pipeline tries ordered strategies and
//! returns the first parse that sticks; failures are silent (`None`), never
//! errors — the loop treats unparseable text as a plain final answer.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// One normalised action request: a name plus an argument object.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub name: String,
    pub args: Value,
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("static regex"))
}

fn brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\{[\s\S]*\})").expect("static regex"))
}

fn legacy_action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[ACTION:\s*([a-zA-Z0-9_]+)\s*,\s*(\{[\s\S]*?\})\]").expect("static regex")
    })
}

/// Extract a JSON object from arbitrary text.  First match wins:
/// 1. a ```json fenced block,
/// 2. the first regex-balanced `{...}` span,
/// 3. the whole text,
/// 4. the whole text after `{ {` / `} }` repair,
/// 5. a character walk that tries every depth-zero brace closure.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(caps) = fenced_json_re().captures(text) {
        if let Ok(v) = serde_json::from_str(&caps[1]) {
            return Some(v);
        }
    }

    if let Some(caps) = brace_re().captures(text) {
        if let Ok(v) = serde_json::from_str(&caps[1]) {
            return Some(v);
        }
    }

    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }

    if text.contains("{ {") && text.contains("} }") {
        let repaired = text.replace("{ {", "{").replace("} }", "}");
        if let Ok(v) = serde_json::from_str(&repaired) {
            return Some(v);
        }
    }

    balanced_scan(text)
}

/// Final fallback: walk the text maintaining a brace depth counter and try
/// to parse the candidate at every depth-zero close.
fn balanced_scan(text: &str) -> Option<Value> {
    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    let mut depth = 0usize;
    let mut start = None;
    for &(i, c) in &bytes {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start.unwrap()..i + c.len_utf8()];
                        if let Ok(v) = serde_json::from_str(candidate) {
                            return Some(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalise the `parameters` shape of one action entry: either a mapping
/// (used as-is, unknown keys preserved) or an ordered list of
/// `{name, value}` records folded into a mapping.
fn normalise_parameters(params: Option<&Value>) -> Value {
    match params {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::Array(list)) => {
            let mut args = serde_json::Map::new();
            for entry in list {
                if let Some(name) = entry.get("name").and_then(|n| n.as_str()) {
                    args.insert(
                        name.to_string(),
                        entry.get("value").cloned().unwrap_or(Value::String(String::new())),
                    );
                }
            }
            Value::Object(args)
        }
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// Pull action requests out of an extracted `{"actions": [...]}` object.
pub fn parse_action_requests(json: &Value) -> Vec<ActionRequest> {
    let Some(actions) = json.get("actions").and_then(|a| a.as_array()) else {
        return Vec::new();
    };
    actions
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            Some(ActionRequest {
                name,
                args: normalise_parameters(entry.get("parameters")),
            })
        })
        .collect()
}

/// Extract action requests from live model output (JSON form only).
pub fn extract_actions(text: &str) -> Vec<ActionRequest> {
    extract_json(text)
        .map(|json| parse_action_requests(&json))
        .unwrap_or_default()
}

/// Parse the legacy `[ACTION: name, {args}]` syntax found in older chat
/// histories.  Entries with unparseable argument objects are skipped.
pub fn parse_legacy_actions(text: &str) -> Vec<ActionRequest> {
    legacy_action_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let args: Value = serde_json::from_str(&caps[2]).ok()?;
            Some(ActionRequest {
                name: caps[1].to_string(),
                args,
            })
        })
        .collect()
}

/// Resume-time extraction: accept both the JSON and the legacy bracket form.
pub fn extract_actions_lenient(text: &str) -> Vec<ActionRequest> {
    let from_json = extract_actions(text);
    if !from_json.is_empty() {
        return from_json;
    }
    parse_legacy_actions(text)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── extract_json strategies ───────────────────────────────────────────────

    #[test]
    fn fenced_block_wins() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\ntrailing prose";
        assert_eq!(extract_json(text).unwrap()["a"], 1);
    }

    #[test]
    fn embedded_object_is_found() {
        let text = "The result is {\"message\": \"hi\"} as requested.";
        assert_eq!(extract_json(text).unwrap()["message"], "hi");
    }

    #[test]
    fn bare_object_parses() {
        assert_eq!(extract_json("{\"x\": [1, 2]}").unwrap()["x"][1], 2);
    }

    #[test]
    fn double_brace_hallucination_is_repaired() {
        let text = "{ { \"key\": \"value\" } }";
        assert_eq!(extract_json(text).unwrap()["key"], "value");
    }

    #[test]
    fn balanced_scan_skips_invalid_candidates() {
        // The first balanced group is not valid JSON; the second is.
        let text = "{not json} and then {\"ok\": true}";
        assert_eq!(extract_json(text).unwrap()["ok"], true);
    }

    #[test]
    fn nested_braces_are_balanced() {
        let text = "prefix {\"outer\": {\"inner\": 1}} suffix";
        assert_eq!(extract_json(text).unwrap()["outer"]["inner"], 1);
    }

    #[test]
    fn garbage_returns_none() {
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("{ broken").is_none());
    }

    // ── Action normalisation ──────────────────────────────────────────────────

    #[test]
    fn mapping_parameters_pass_through() {
        let actions = extract_actions(
            r#"{"actions": [{"name": "say_hello", "parameters": {"name": "World", "extra": 1}}]}"#,
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "say_hello");
        assert_eq!(actions[0].args["name"], "World");
        // Unknown keys are preserved.
        assert_eq!(actions[0].args["extra"], 1);
    }

    #[test]
    fn list_parameters_fold_into_mapping() {
        let actions = extract_actions(
            r#"{"actions": [{"name": "a", "parameters": [
                {"name": "p", "value": "v"}, {"name": "q"}
            ]}]}"#,
        );
        assert_eq!(actions[0].args["p"], "v");
        assert_eq!(actions[0].args["q"], "");
    }

    #[test]
    fn missing_parameters_yield_empty_args() {
        let actions = extract_actions(r#"{"actions": [{"name": "bare"}]}"#);
        assert_eq!(actions[0].args, serde_json::json!({}));
    }

    #[test]
    fn entries_without_name_are_dropped() {
        let actions = extract_actions(r#"{"actions": [{"parameters": {}}, {"name": "ok"}]}"#);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "ok");
    }

    #[test]
    fn content_without_actions_key_is_empty() {
        assert!(extract_actions(r#"{"message": "plain answer"}"#).is_empty());
        assert!(extract_actions("free text").is_empty());
    }

    // ── Legacy bracket form ───────────────────────────────────────────────────

    #[test]
    fn legacy_single_action_parses() {
        let text = r#"I will run the tool.

[ACTION: say_hello, {"name": "IntegrationTest"}]"#;
        let actions = parse_legacy_actions(text);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "say_hello");
        assert_eq!(actions[0].args["name"], "IntegrationTest");
    }

    #[test]
    fn legacy_multiple_actions_parse_in_order() {
        let text = r#"[ACTION: first, {"a": 1}] then [ACTION: second, {"b": 2}]"#;
        let actions = parse_legacy_actions(text);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "first");
        assert_eq!(actions[1].name, "second");
    }

    #[test]
    fn legacy_bad_args_are_skipped() {
        let text = "[ACTION: broken, {not json}]";
        assert!(parse_legacy_actions(text).is_empty());
    }

    #[test]
    fn lenient_prefers_json_then_falls_back() {
        let json_text = r#"{"actions": [{"name": "from_json"}]}"#;
        assert_eq!(extract_actions_lenient(json_text)[0].name, "from_json");

        let legacy_text = r#"[ACTION: from_legacy, {}]"#;
        assert_eq!(extract_actions_lenient(legacy_text)[0].name, "from_legacy");
    }
}
