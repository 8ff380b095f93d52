// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::executor::ExecContext;

/// A host-native handler backing a `python_inproc` manifest action.
///
/// These run inside the host process, bypassing the subprocess sandbox so
/// they can hold heavy state (models, connections) across invocations.
/// A panicking handler takes the whole host down with it — register only
/// trusted code.
#[async_trait]
pub trait NativeAction: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ExecContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Registry of in-process handlers, keyed by action name.
#[derive(Default)]
pub struct InprocRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn NativeAction>>>,
}

impl InprocRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, action: impl NativeAction + 'static) {
        self.handlers
            .write()
            .unwrap()
            .insert(action.name().to_string(), Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeAction>> {
        self.handlers.read().unwrap().get(name).cloned()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    #[async_trait]
    impl NativeAction for Doubler {
        fn name(&self) -> &str {
            "double"
        }
        async fn execute(
            &self,
            args: &serde_json::Value,
            _ctx: &ExecContext,
        ) -> anyhow::Result<serde_json::Value> {
            let n = args.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(serde_json::json!({"result": n * 2}))
        }
    }

    #[tokio::test]
    async fn registered_handler_executes() {
        let reg = InprocRegistry::new();
        reg.register(Doubler);
        let handler = reg.get("double").unwrap();
        let out = handler
            .execute(&serde_json::json!({"n": 21}), &ExecContext::anonymous())
            .await
            .unwrap();
        assert_eq!(out["result"], 42);
    }

    #[test]
    fn unknown_handler_is_none() {
        let reg = InprocRegistry::new();
        assert!(reg.get("missing").is_none());
    }
}
