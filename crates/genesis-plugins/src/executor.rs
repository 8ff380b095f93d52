// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use genesis_config::DataPaths;

use crate::inproc::InprocRegistry;
use crate::manifest::ActionType;
use crate::registry::{ActionDef, PluginRole};

/// Hard deadline for a plugin's one-time dependency install.
const DEP_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Invocation context: who is running the action and under which chat, plus
/// an execution id the caller can use to cancel the run.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub execution_id: String,
}

impl ExecContext {
    pub fn new(user_id: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            user_id,
            chat_id,
            execution_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Success,
    Error,
}

/// Result of one action execution.  Failures are values, not `Err`: the
/// orchestrator folds them into observations the model can reason about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<String>,
}

impl ExecOutcome {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            status: ExecStatus::Success,
            output: Some(output),
            error: None,
            exit_code: None,
            partial_output: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Error,
            output: None,
            error: Some(msg.into()),
            exit_code: None,
            partial_output: None,
        }
    }

    pub fn cancelled(partial: String) -> Self {
        Self {
            status: ExecStatus::Error,
            output: None,
            error: Some("cancelled".into()),
            exit_code: None,
            partial_output: Some(partial),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }
}

struct ActiveExecution {
    pid: Option<u32>,
    cancelled: Arc<AtomicBool>,
}

/// Runs plugin actions in sandboxed subprocesses.
///
/// The process boundary is the isolation primitive: each call gets a fresh
/// environment (`GENESIS_HOME`, `GENESIS_PLUGIN_PATH`, `ACTION_ARGS`), its
/// working directory set to the plugin path, args JSON on stdin, and its
/// stdout parsed as one JSON object per line.  `python_inproc` actions run
/// through the host-native [`InprocRegistry`] instead and bypass all of this.
pub struct ActionExecutor {
    paths: DataPaths,
    inproc: Arc<InprocRegistry>,
    active: Mutex<HashMap<String, ActiveExecution>>,
}

impl ActionExecutor {
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths,
            inproc: Arc::new(InprocRegistry::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn inproc(&self) -> &Arc<InprocRegistry> {
        &self.inproc
    }

    /// Kill the process tree of an active execution.  Returns false when the
    /// execution id is unknown (already finished or never started).
    pub fn cancel(&self, execution_id: &str) -> bool {
        let active = self.active.lock().unwrap();
        let Some(entry) = active.get(execution_id) else {
            return false;
        };
        entry.cancelled.store(true, Ordering::SeqCst);
        if let Some(pid) = entry.pid {
            kill_process_group(pid);
        }
        true
    }

    /// Execute one action.  `progress` receives every `progress`/`match`
    /// object the child prints; `deadline` expires into cancellation.
    pub async fn execute(
        &self,
        def: &ActionDef,
        args: &serde_json::Value,
        ctx: &ExecContext,
        progress: Option<mpsc::Sender<serde_json::Value>>,
        deadline: Option<Duration>,
    ) -> ExecOutcome {
        info!(action = %def.name(), kind = ?def.spec.kind, "executing action");

        let genesis_home = self.resolve_home(def.role, ctx.user_id.as_deref());
        if let Err(e) = std::fs::create_dir_all(&genesis_home) {
            return ExecOutcome::error(format!("failed to create GENESIS_HOME: {e}"));
        }
        let args_json = args.to_string();

        match def.spec.kind {
            ActionType::Inproc => self.execute_inproc(def, args, ctx).await,
            ActionType::Python => {
                let python = self
                    .ensure_plugin_env(&def.path)
                    .await
                    .unwrap_or_else(|| PathBuf::from("python3"));
                let mut cmd = Command::new(python);
                cmd.arg(&def.script);
                self.run_subprocess(cmd, def, &genesis_home, &args_json, ctx, progress, deadline)
                    .await
            }
            ActionType::Process => {
                let cmd = Command::new(&def.script);
                self.run_subprocess(cmd, def, &genesis_home, &args_json, ctx, progress, deadline)
                    .await
            }
        }
    }

    fn resolve_home(&self, role: PluginRole, user_id: Option<&str>) -> PathBuf {
        match (role, user_id) {
            (PluginRole::System, _) => self.paths.system_home(),
            (PluginRole::User, Some(uid)) => self.paths.user_home(uid),
            (PluginRole::User, None) => self.paths.tmp_home(),
        }
    }

    async fn execute_inproc(
        &self,
        def: &ActionDef,
        args: &serde_json::Value,
        ctx: &ExecContext,
    ) -> ExecOutcome {
        let Some(handler) = self.inproc.get(def.name()) else {
            return ExecOutcome::error(format!(
                "no in-process handler registered for action '{}'",
                def.name()
            ));
        };
        match handler.execute(args, ctx).await {
            Ok(output) => ExecOutcome::success(unwrap_output(output)),
            Err(e) => ExecOutcome::error(format!("in-process execution failed: {e}")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_subprocess(
        &self,
        mut cmd: Command,
        def: &ActionDef,
        genesis_home: &Path,
        args_json: &str,
        ctx: &ExecContext,
        progress: Option<mpsc::Sender<serde_json::Value>>,
        deadline: Option<Duration>,
    ) -> ExecOutcome {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&def.path)
            .env("GENESIS_HOME", genesis_home)
            .env("GENESIS_PLUGIN_PATH", &def.path)
            .env("ACTION_ARGS", args_json)
            .kill_on_drop(true);
        // setsid() puts the child in its own process group so cancellation
        // can kill the whole tree, not just the direct child.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ExecOutcome::error(format!("spawn error: {e}")),
        };
        let pid = child.id();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.lock().unwrap().insert(
            ctx.execution_id.clone(),
            ActiveExecution {
                pid,
                cancelled: Arc::clone(&cancelled),
            },
        );

        let stdout_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let outcome = match deadline {
            Some(limit) => {
                let timed = tokio::time::timeout(
                    limit,
                    drive_child(&mut child, args_json, &progress, &stdout_lines),
                )
                .await;
                match timed {
                    Ok(result) => result,
                    Err(_) => {
                        cancelled.store(true, Ordering::SeqCst);
                        if let Some(pid) = pid {
                            kill_process_group(pid);
                        }
                        let _ = child.wait().await;
                        Err("deadline".to_string())
                    }
                }
            }
            None => drive_child(&mut child, args_json, &progress, &stdout_lines).await,
        };
        self.active.lock().unwrap().remove(&ctx.execution_id);

        let full_stdout = stdout_lines.lock().unwrap().join("");
        if cancelled.load(Ordering::SeqCst) {
            return ExecOutcome::cancelled(full_stdout);
        }

        match outcome {
            Ok((stderr_output, exit_status)) => {
                let code = exit_status.code();
                if exit_status.success() {
                    let lines = stdout_lines.lock().unwrap();
                    let result = select_result(&lines, &full_stdout);
                    ExecOutcome::success(unwrap_output(result))
                } else {
                    let error = if stderr_output.trim().is_empty() {
                        "Unknown Error".to_string()
                    } else {
                        stderr_output
                    };
                    ExecOutcome {
                        status: ExecStatus::Error,
                        output: None,
                        error: Some(error),
                        exit_code: code,
                        partial_output: if full_stdout.is_empty() {
                            None
                        } else {
                            Some(full_stdout)
                        },
                    }
                }
            }
            Err(e) => ExecOutcome::error(e),
        }
    }

    /// When the plugin ships `requirements.txt`, ensure an isolated
    /// interpreter under `<plugin>/.venv` with the dependencies installed,
    /// marked complete with a `.deps_installed` sentinel.  Returns `None`
    /// (fall back to the ambient interpreter) on any setup failure.
    async fn ensure_plugin_env(&self, plugin_path: &Path) -> Option<PathBuf> {
        let requirements = plugin_path.join("requirements.txt");
        if !requirements.exists() {
            return None;
        }
        let venv = plugin_path.join(".venv");
        let python = if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        };
        let marker = venv.join(".deps_installed");

        if !python.exists() {
            info!(path = %plugin_path.display(), "creating plugin venv");
            let created = Command::new("python3")
                .args(["-m", "venv"])
                .arg(&venv)
                .output()
                .await;
            match created {
                Ok(out) if out.status.success() => {}
                Ok(out) => {
                    warn!(
                        stderr = %String::from_utf8_lossy(&out.stderr),
                        "failed to create plugin venv"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "failed to create plugin venv");
                    return None;
                }
            }
        }

        if !marker.exists() {
            info!(path = %plugin_path.display(), "installing plugin dependencies");
            let install = Command::new(&python)
                .args(["-m", "pip", "install", "-q", "-r"])
                .arg(&requirements)
                .output();
            match tokio::time::timeout(DEP_INSTALL_TIMEOUT, install).await {
                Ok(Ok(out)) if out.status.success() => {
                    if let Err(e) = std::fs::write(&marker, "installed") {
                        warn!(error = %e, "failed to write deps sentinel");
                    }
                }
                Ok(Ok(out)) => {
                    warn!(
                        stderr = %String::from_utf8_lossy(&out.stderr),
                        "dependency install failed"
                    );
                    return None;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "dependency install failed");
                    return None;
                }
                Err(_) => {
                    warn!("dependency install timed out");
                    return None;
                }
            }
        }

        Some(python)
    }
}

/// Feed stdin, stream stdout line-by-line (forwarding progress objects), and
/// collect stderr.  Returns `(stderr, exit_status)`.
async fn drive_child(
    child: &mut tokio::process::Child,
    args_json: &str,
    progress: &Option<mpsc::Sender<serde_json::Value>>,
    stdout_lines: &Arc<Mutex<Vec<String>>>,
) -> Result<(String, std::process::ExitStatus), String> {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(args_json.as_bytes()).await;
        drop(stdin);
    }

    let stdout = child.stdout.take().ok_or("stdout not captured")?;
    let mut stderr = child.stderr.take().ok_or("stderr not captured")?;

    let mut reader = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        stdout_lines.lock().unwrap().push(format!("{line}\n"));
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
            continue;
        };
        let status = value.get("status").and_then(|s| s.as_str());
        if matches!(status, Some("progress") | Some("match")) {
            if let Some(tx) = progress {
                let _ = tx.send(value).await;
            }
        }
    }

    let mut stderr_output = String::new();
    let _ = stderr.read_to_string(&mut stderr_output).await;
    let exit_status = child.wait().await.map_err(|e| e.to_string())?;
    debug!(code = ?exit_status.code(), "plugin process exited");
    Ok((stderr_output, exit_status))
}

/// Pick the result object from the child's stdout: the last non-progress
/// JSON line wins; with no parseable line the raw stdout is the result.
fn select_result(stdout_lines: &[String], full_stdout: &str) -> serde_json::Value {
    for line in stdout_lines.iter().rev() {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if value.get("status").and_then(|s| s.as_str()) != Some("progress") {
                return value;
            }
        }
    }
    serde_json::from_str(full_stdout.trim())
        .unwrap_or_else(|_| serde_json::Value::String(full_stdout.to_string()))
}

/// `{"output": "<string>"}` unwraps to the plain string so pre-request
/// outputs are not double-wrapped on their way into the system prompt.
fn unwrap_output(value: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(obj) = &value {
        if obj.len() == 1 {
            if let Some(serde_json::Value::String(s)) = obj.get("output") {
                return serde_json::Value::String(s.clone());
            }
        }
    }
    value
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The child called setsid(), so its pid is the process group id.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ActionSpec;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    /// Write a `process`-type plugin whose action runs a shell script.
    fn script_plugin(dir: &Path, id: &str, action: &str, script_body: &str) -> ActionDef {
        let plugin_dir = dir.join(id);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let script_path = plugin_dir.join("main.sh");
        std::fs::write(&script_path, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        #[cfg(unix)]
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let spec: ActionSpec = serde_json::from_value(serde_json::json!({
            "name": action, "script": "main.sh", "type": "process"
        }))
        .unwrap();
        ActionDef {
            plugin_id: id.to_string(),
            role: PluginRole::System,
            path: plugin_dir.clone(),
            script: script_path,
            spec,
        }
    }

    fn executor(tmp: &tempfile::TempDir) -> ActionExecutor {
        ActionExecutor::new(DataPaths::new(tmp.path()))
    }

    #[tokio::test]
    async fn json_line_on_stdout_becomes_result() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            r#"echo '{"message": "hi", "count": 3}'"#,
        );
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert!(out.is_success(), "{out:?}");
        let output = out.output.unwrap();
        assert_eq!(output["message"], "hi");
        assert_eq!(output["count"], 3);
    }

    #[tokio::test]
    async fn last_non_progress_line_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            "echo '{\"status\": \"progress\", \"scanned\": 1}'\n\
             echo '{\"result\": \"first\"}'\n\
             echo '{\"status\": \"progress\", \"scanned\": 2}'\n\
             echo '{\"result\": \"final\"}'",
        );
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(out.output.unwrap()["result"], "final");
    }

    #[tokio::test]
    async fn progress_lines_are_forwarded_and_dropped_from_result() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            "echo '{\"status\": \"progress\", \"scanned\": 10}'\n\
             echo '{\"status\": \"match\", \"file\": \"a.txt\"}'\n\
             echo '{\"done\": true}'",
        );
        let (tx, mut rx) = mpsc::channel(16);
        let out = executor(&tmp)
            .execute(
                &def,
                &serde_json::json!({}),
                &ExecContext::anonymous(),
                Some(tx),
                None,
            )
            .await;
        assert_eq!(out.output.unwrap()["done"], true);

        let mut updates = Vec::new();
        while let Ok(u) = rx.try_recv() {
            updates.push(u);
        }
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0]["status"], "progress");
        assert_eq!(updates[1]["status"], "match");
    }

    #[tokio::test]
    async fn match_line_is_result_when_nothing_follows() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            r#"echo '{"status": "match", "file": "hit.txt"}'"#,
        );
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(out.output.unwrap()["file"], "hit.txt");
    }

    #[tokio::test]
    async fn unparseable_stdout_is_returned_raw() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(tmp.path(), "p", "act", "echo plain text output");
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert!(out.is_success());
        assert_eq!(
            out.output.unwrap(),
            serde_json::Value::String("plain text output\n".into())
        );
    }

    #[tokio::test]
    async fn output_wrapper_is_unwrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            r#"echo '{"output": "CPU: 12%  MEM: 40%"}'"#,
        );
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(
            out.output.unwrap(),
            serde_json::Value::String("CPU: 12%  MEM: 40%".into())
        );
    }

    #[tokio::test]
    async fn env_and_stdin_args_reach_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            "read input\n\
             printf '{\"home\": \"%s\", \"args\": %s}\\n' \"$GENESIS_HOME\" \"$input\"",
        );
        let ctx = ExecContext::new(Some("42".into()), Some("c1".into()));
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({"name": "World"}), &ctx, None, None)
            .await;
        let output = out.output.unwrap();
        // System-scope action: home is bot_data/_system regardless of user.
        assert!(output["home"].as_str().unwrap().ends_with("bot_data/_system"));
        assert_eq!(output["args"]["name"], "World");
    }

    #[tokio::test]
    async fn user_scope_home_is_per_user() {
        let tmp = tempfile::tempdir().unwrap();
        let mut def = script_plugin(tmp.path(), "p", "act", "printf '{\"home\": \"%s\"}' \"$GENESIS_HOME\"");
        def.role = PluginRole::User;
        let ctx = ExecContext::new(Some("42".into()), None);
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ctx, None, None)
            .await;
        assert!(out
            .output
            .unwrap()["home"]
            .as_str()
            .unwrap()
            .ends_with("bot_data/users/42"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_and_code() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            "echo partial\necho 'boom' >&2\nexit 3",
        );
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(out.status, ExecStatus::Error);
        assert!(out.error.unwrap().contains("boom"));
        assert_eq!(out.exit_code, Some(3));
        assert!(out.partial_output.unwrap().contains("partial"));
    }

    #[tokio::test]
    async fn silent_failure_reports_unknown_error() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(tmp.path(), "p", "act", "exit 1");
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(out.error.as_deref(), Some("Unknown Error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_child_and_preserves_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(
            tmp.path(),
            "p",
            "act",
            "echo '{\"status\": \"progress\", \"step\": 1}'\nsleep 30\necho done",
        );
        let exec = Arc::new(executor(&tmp));
        let ctx = ExecContext::anonymous();
        let execution_id = ctx.execution_id.clone();

        let exec2 = Arc::clone(&exec);
        let handle = tokio::spawn(async move {
            exec2
                .execute(&def, &serde_json::json!({}), &ctx, None, None)
                .await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(exec.cancel(&execution_id));

        let out = handle.await.unwrap();
        assert_eq!(out.status, ExecStatus::Error);
        assert_eq!(out.error.as_deref(), Some("cancelled"));
        assert!(out.partial_output.unwrap().contains("progress"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_expires_into_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let def = script_plugin(tmp.path(), "p", "act", "echo started\nsleep 30");
        let out = executor(&tmp)
            .execute(
                &def,
                &serde_json::json!({}),
                &ExecContext::anonymous(),
                None,
                Some(Duration::from_millis(300)),
            )
            .await;
        assert_eq!(out.error.as_deref(), Some("cancelled"));
        assert!(out.partial_output.unwrap().contains("started"));
    }

    #[tokio::test]
    async fn cancel_unknown_execution_is_false() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!executor(&tmp).cancel("no-such-id"));
    }

    #[tokio::test]
    async fn inproc_without_handler_is_an_error_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let mut def = script_plugin(tmp.path(), "p", "native_act", "true");
        def.spec.kind = ActionType::Inproc;
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(out.status, ExecStatus::Error);
        assert!(out.error.unwrap().contains("no in-process handler"));
    }

    #[tokio::test]
    async fn inproc_handler_runs_in_host() {
        use crate::inproc::NativeAction;

        struct Pinger;
        #[async_trait::async_trait]
        impl NativeAction for Pinger {
            fn name(&self) -> &str {
                "native_act"
            }
            async fn execute(
                &self,
                _args: &serde_json::Value,
                _ctx: &ExecContext,
            ) -> anyhow::Result<serde_json::Value> {
                Ok(serde_json::json!({"pong": true}))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(&tmp);
        exec.inproc().register(Pinger);
        let mut def = script_plugin(tmp.path(), "p", "native_act", "true");
        def.spec.kind = ActionType::Inproc;
        let out = exec
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert!(out.is_success());
        assert_eq!(out.output.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn missing_script_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut def = script_plugin(tmp.path(), "p", "act", "true");
        def.script = tmp.path().join("p").join("nonexistent.sh");
        let out = executor(&tmp)
            .execute(&def, &serde_json::json!({}), &ExecContext::anonymous(), None, None)
            .await;
        assert_eq!(out.status, ExecStatus::Error);
        assert!(out.error.unwrap().contains("spawn error"));
    }

    #[tokio::test]
    async fn no_requirements_means_no_venv() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(&tmp);
        let plugin_dir = tmp.path().join("plain");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        assert!(exec.ensure_plugin_env(&plugin_dir).await.is_none());
    }
}
