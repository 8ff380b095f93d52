// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Result marker carried on `action_output` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Events emitted by the orchestrator during one turn.
///
/// This is also the wire format: each event serialises to a JSON object
/// tagged with `status`, ready for line-delimited or SSE framing.  Every
/// emitted sequence is finite and ends in exactly one of final content
/// (possibly `json_content`), `permission_required`, or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A chunk of the model's reasoning stream.
    Thinking { chunk: String },
    /// Reasoning ended; carries the full accumulated trace.
    ThinkingFinished { thinking: String },
    /// A chunk of user-visible content.
    Stream { content: String },
    /// Final structured payload when the caller requested JSON.
    JsonContent {
        message: String,
        json: serde_json::Value,
    },
    /// The model requested these actions this loop iteration.
    ActionDetected { names: Vec<String> },
    /// Entering another reason–act iteration.
    ActionLoop {
        #[serde(rename = "loop")]
        loop_: u32,
        max_loops: u32,
    },
    /// One action finished; `output` is truncated to 500 chars for the UI.
    ActionOutput {
        #[serde(rename = "action_name")]
        name: String,
        #[serde(rename = "action_status")]
        result: ActionStatus,
        output: String,
        truncated: bool,
    },
    /// Live progress forwarded from a running action.
    ActionUpdate {
        #[serde(rename = "action_name")]
        name: String,
        data: serde_json::Value,
    },
    /// The turn paused awaiting a permission grant for this action.
    PermissionRequired {
        action_name: String,
        action_args: serde_json::Value,
    },
    /// The provider is blocked on a missing API key.
    RequestKey { provider: String, message: String },
    /// Fatal turn error.
    Error { error: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialise_with_status_tag() {
        let ev = TurnEvent::Stream {
            content: "hello".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "stream");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn action_output_uses_wire_field_names() {
        let ev = TurnEvent::ActionOutput {
            name: "say_hello".into(),
            result: ActionStatus::Success,
            output: "{}".into(),
            truncated: false,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "action_output");
        assert_eq!(json["action_name"], "say_hello");
        assert_eq!(json["action_status"], "success");
    }

    #[test]
    fn action_loop_renames_loop_field() {
        let ev = TurnEvent::ActionLoop {
            loop_: 2,
            max_loops: 5,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["loop"], 2);
        assert_eq!(json["max_loops"], 5);
    }

    #[test]
    fn wire_round_trip() {
        let ev = TurnEvent::PermissionRequired {
            action_name: "rm_rf".into(),
            action_args: serde_json::json!({"path": "/"}),
        };
        let wire = serde_json::to_string(&ev).unwrap();
        let back: TurnEvent = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, ev);
    }
}
