// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use genesis_config::DataPaths;
use genesis_plugins::{ActionExecutor, ExecContext, ExecOutcome, PluginRegistry};

use crate::cron::schedule_matches;

/// Interval of the scheduler tick.  One tick per wall-clock minute also
/// guarantees a matching task fires at most once in that minute.
const TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
}

/// One scheduled (or manual-only) task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Action name resolved through the plugin registry at run time.
    pub action: String,
    /// Cron-subset schedule; `None` makes the task manual-only.
    pub schedule: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub args: serde_json::Value,
    pub status: TaskStatus,
    pub last_run: Option<String>,
    pub next_run: Option<String>,
    pub created_at: String,
}

/// Persisted task registry plus the minute-tick loop.
///
/// Tasks live in a single JSON file under system storage
/// (`bot_data/_system/tasks/tasks.json`) and execute through the same
/// [`ActionExecutor`] path as interactive turns.  Tasks with an owning user
/// rescan that user's plugins before execution.
pub struct TaskScheduler {
    paths: DataPaths,
    tasks_file: PathBuf,
    tasks: Mutex<HashMap<String, Task>>,
    executor: Arc<ActionExecutor>,
}

impl TaskScheduler {
    pub fn new(paths: DataPaths, executor: Arc<ActionExecutor>) -> Self {
        let tasks_file = paths.tasks_file();
        let tasks = load_tasks(&tasks_file);
        Self {
            paths,
            tasks_file,
            tasks: Mutex::new(tasks),
            executor,
        }
    }

    pub fn create_task(
        &self,
        name: &str,
        action: &str,
        schedule: Option<&str>,
        user_id: Option<&str>,
        args: serde_json::Value,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let task = Task {
            id: id.clone(),
            name: name.to_string(),
            action: action.to_string(),
            schedule: schedule.map(str::to_string),
            user_id: user_id.map(str::to_string),
            args,
            status: TaskStatus::Active,
            last_run: None,
            next_run: None,
            created_at: chrono::Local::now().to_rfc3339(),
        };
        self.tasks.lock().unwrap().insert(id.clone(), task);
        self.save();
        info!(task = %name, id = %id, "created task");
        id
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }

    pub fn all_tasks(&self, user_id: Option<&str>) -> Vec<Task> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .values()
            .filter(|t| user_id.is_none() || t.user_id.as_deref() == user_id)
            .cloned()
            .collect()
    }

    /// Apply a mutation to a task and persist.  Returns false for unknown ids.
    pub fn update_task(&self, task_id: &str, mutate: impl FnOnce(&mut Task)) -> bool {
        let found = {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(task_id) {
                Some(task) => {
                    mutate(task);
                    true
                }
                None => false,
            }
        };
        if found {
            self.save();
        }
        found
    }

    pub fn delete_task(&self, task_id: &str) -> bool {
        let removed = self.tasks.lock().unwrap().remove(task_id).is_some();
        if removed {
            self.save();
        }
        removed
    }

    /// Run a task immediately, bypassing any schedule match.
    pub async fn run_task(&self, task_id: &str) -> ExecOutcome {
        let Some(task) = self.get_task(task_id) else {
            return ExecOutcome::error("Task not found");
        };

        // A fresh registry view so a task sees plugins installed since the
        // scheduler started; user tasks scan their owner's plugins too.
        let action_def = {
            let mut registry = PluginRegistry::new(self.paths.clone());
            registry.scan_plugins(task.user_id.as_deref());
            registry.get_action(&task.action).cloned()
        };
        let Some(def) = action_def else {
            return ExecOutcome::error(format!("Action '{}' not found", task.action));
        };

        let ctx = ExecContext::new(task.user_id.clone(), None);
        let outcome = self
            .executor
            .execute(&def, &task.args, &ctx, None, None)
            .await;

        self.update_task(task_id, |t| {
            t.last_run = Some(chrono::Local::now().to_rfc3339());
        });
        outcome
    }

    /// Run every active task whose schedule matches `now`.  Returns the ids
    /// that fired (the loop calls this once per minute; tests call it with a
    /// fixed clock).
    pub async fn tick_at(&self, now: chrono::NaiveDateTime) -> Vec<String> {
        let due: Vec<String> = {
            let tasks = self.tasks.lock().unwrap();
            tasks
                .values()
                .filter(|t| t.status == TaskStatus::Active)
                .filter(|t| {
                    t.schedule
                        .as_deref()
                        .map(|s| schedule_matches(s, now))
                        .unwrap_or(false)
                })
                .map(|t| t.id.clone())
                .collect()
        };
        for id in &due {
            let name = self.get_task(id).map(|t| t.name).unwrap_or_default();
            info!(task = %name, id = %id, "scheduled run");
            let outcome = self.run_task(id).await;
            if !outcome.is_success() {
                warn!(task = %name, error = ?outcome.error, "scheduled task failed");
            }
        }
        due
    }

    /// Spawn the background loop.  Wakes every 60 seconds until `stop` fires.
    pub fn start(self: Arc<Self>, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            info!("task scheduler started");
            loop {
                let _ = scheduler.tick_at(chrono::Local::now().naive_local()).await;
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(TICK) => {}
                }
            }
            info!("task scheduler stopped");
        })
    }

    fn save(&self) {
        let tasks = self.tasks.lock().unwrap();
        if let Some(parent) = self.tasks_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&*tasks) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.tasks_file, raw) {
                    warn!(error = %e, "failed to persist tasks");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize tasks"),
        }
    }
}

fn load_tasks(tasks_file: &PathBuf) -> HashMap<String, Task> {
    match std::fs::read_to_string(tasks_file) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "invalid tasks file, starting empty");
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn at(hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn install_marker_plugin(paths: &DataPaths) {
        let plugin_dir = paths.system_plugins_dir().join("marker");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("manifest.json"),
            serde_json::json!({
                "id": "marker", "name": "Marker", "version": "1.0.0",
                "actions": [{"name": "leave_marker", "script": "main.sh", "type": "process"}]
            })
            .to_string(),
        )
        .unwrap();
        let script = plugin_dir.join("main.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho run >> \"$GENESIS_PLUGIN_PATH/fired.txt\"\necho '{\"fired\": true}'\n",
        )
        .unwrap();
        #[cfg(unix)]
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn scheduler(tmp: &tempfile::TempDir) -> TaskScheduler {
        let paths = DataPaths::new(tmp.path());
        let executor = Arc::new(ActionExecutor::new(paths.clone()));
        TaskScheduler::new(paths, executor)
    }

    #[test]
    fn tasks_persist_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let id = {
            let s = scheduler(&tmp);
            s.create_task(
                "nightly",
                "leave_marker",
                Some("0 3 * * *"),
                Some("7"),
                serde_json::json!({}),
            )
        };
        let s2 = scheduler(&tmp);
        let task = s2.get_task(&id).expect("task survives restart");
        assert_eq!(task.name, "nightly");
        assert_eq!(task.schedule.as_deref(), Some("0 3 * * *"));
        assert_eq!(task.status, TaskStatus::Active);
    }

    #[test]
    fn update_and_delete_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let s = scheduler(&tmp);
        let id = s.create_task("t", "a", None, None, serde_json::json!({}));
        assert!(s.update_task(&id, |t| t.status = TaskStatus::Paused));
        assert_eq!(s.get_task(&id).unwrap().status, TaskStatus::Paused);
        assert!(s.delete_task(&id));
        assert!(s.get_task(&id).is_none());
        assert!(!s.update_task(&id, |_| {}));
    }

    #[test]
    fn all_tasks_filters_by_user() {
        let tmp = tempfile::tempdir().unwrap();
        let s = scheduler(&tmp);
        s.create_task("mine", "a", None, Some("1"), serde_json::json!({}));
        s.create_task("theirs", "a", None, Some("2"), serde_json::json!({}));
        assert_eq!(s.all_tasks(Some("1")).len(), 1);
        assert_eq!(s.all_tasks(None).len(), 2);
    }

    #[tokio::test]
    async fn cron_tick_fires_once_at_the_matching_minute() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        install_marker_plugin(&paths);
        let s = scheduler(&tmp);
        // Created at 12:02 with a 5-minute schedule.
        let id = s.create_task(
            "every5",
            "leave_marker",
            Some("*/5 * * * *"),
            None,
            serde_json::json!({}),
        );

        assert!(s.tick_at(at(12, 3)).await.is_empty());
        assert!(s.tick_at(at(12, 4)).await.is_empty());
        let fired = s.tick_at(at(12, 5)).await;
        assert_eq!(fired, vec![id.clone()]);

        let marks = std::fs::read_to_string(
            paths.system_plugins_dir().join("marker").join("fired.txt"),
        )
        .unwrap();
        assert_eq!(marks.lines().count(), 1, "exactly one fire at 12:05");
        assert!(s.get_task(&id).unwrap().last_run.is_some());
    }

    #[tokio::test]
    async fn paused_and_manual_tasks_never_fire_on_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        install_marker_plugin(&paths);
        let s = scheduler(&tmp);
        let paused = s.create_task(
            "paused",
            "leave_marker",
            Some("* * * * *"),
            None,
            serde_json::json!({}),
        );
        s.update_task(&paused, |t| t.status = TaskStatus::Paused);
        s.create_task("manual", "leave_marker", None, None, serde_json::json!({}));

        assert!(s.tick_at(at(12, 0)).await.is_empty());
    }

    #[tokio::test]
    async fn manual_run_bypasses_schedule() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        install_marker_plugin(&paths);
        let s = scheduler(&tmp);
        let id = s.create_task("manual", "leave_marker", None, None, serde_json::json!({}));

        let outcome = s.run_task(&id).await;
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(outcome.output.unwrap()["fired"], true);
        assert!(s.get_task(&id).unwrap().last_run.is_some());
    }

    #[tokio::test]
    async fn unknown_task_and_action_are_error_outcomes() {
        let tmp = tempfile::tempdir().unwrap();
        let s = scheduler(&tmp);
        let outcome = s.run_task("nope").await;
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().contains("Task not found"));

        let id = s.create_task("ghost", "missing_action", None, None, serde_json::json!({}));
        let outcome = s.run_task(&id).await;
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().contains("not found"));
    }
}
