// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, KeyCommands, PluginCommands, TaskCommands};
use genesis_config::DataPaths;
use genesis_core::{Agent, TurnEvent, TurnRequest};
use genesis_model::SecretStore;
use genesis_plugins::{ActionExecutor, PluginRegistry, PluginRole};
use genesis_scheduler::TaskScheduler;
use genesis_store::{ChatStore, PermissionScope, UserRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = match &cli.base_dir {
        Some(dir) => DataPaths::new(dir.clone()),
        None => DataPaths::from_cwd(),
    };

    if let Some(cmd) = &cli.command {
        return run_subcommand(cmd, &paths).await;
    }

    let settings =
        genesis_config::load_settings(&paths.settings_file()).context("loading settings")?;
    let store = Arc::new(ChatStore::open(&paths.db_file()).context("opening chat store")?);
    let agent = Arc::new(Agent::new(settings, paths.clone(), store));

    // Background scheduler reuses the agent's executor.
    let scheduler = Arc::new(TaskScheduler::new(
        paths.clone(),
        Arc::clone(agent.executor()),
    ));
    let shutdown = CancellationToken::new();
    let scheduler_handle = Arc::clone(&scheduler).start(shutdown.clone());

    let result = if let Some(message) = &cli.message {
        let mut req = TurnRequest::new(message.clone());
        req.use_thinking = cli.think;
        req.chat_id = cli.chat.clone();
        let _ = run_turn(&agent, req, cli.think).await;
        println!();
        Ok(())
    } else {
        repl(&agent, cli.think).await
    };

    shutdown.cancel();
    let _ = scheduler_handle.await;
    result
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_subcommand(cmd: &Commands, paths: &DataPaths) -> anyhow::Result<()> {
    match cmd {
        Commands::Plugin { command } => match command {
            PluginCommands::Pack { dir, output } => {
                let archive = genesis_plugins::pack_plugin(dir, output.as_deref())?;
                println!("packed: {}", archive.display());
                Ok(())
            }
            PluginCommands::Install { file, user } => {
                let mut registry = PluginRegistry::new(paths.clone());
                let role = if user.is_some() {
                    PluginRole::User
                } else {
                    PluginRole::System
                };
                let manifest = registry.install_plugin(file, user.as_deref(), role)?;
                println!("installed: {} v{}", manifest.id, manifest.version);
                Ok(())
            }
            PluginCommands::List => {
                let mut registry = PluginRegistry::new(paths.clone());
                registry.scan_plugins(None);
                for id in registry.plugin_ids() {
                    let plugin = registry.get_plugin(&id).expect("just listed");
                    println!("{} v{}", plugin.manifest.id, plugin.manifest.version);
                    for action in &plugin.manifest.actions {
                        println!("  {} ({:?})", action.name, action.trigger);
                    }
                }
                Ok(())
            }
        },
        Commands::Key { command } => {
            let secrets = SecretStore::new(paths.secrets_file());
            match command {
                KeyCommands::Set { name, value } => {
                    secrets.set(name, value)?;
                    println!("stored key '{name}'");
                }
                KeyCommands::Remove { name } => {
                    secrets.remove(name)?;
                    println!("removed key '{name}'");
                }
            }
            Ok(())
        }
        Commands::Task { command } => {
            let executor = Arc::new(ActionExecutor::new(paths.clone()));
            let scheduler = TaskScheduler::new(paths.clone(), executor);
            match command {
                TaskCommands::List => {
                    for task in scheduler.all_tasks(None) {
                        println!(
                            "{}  {}  action={}  schedule={}  last_run={}",
                            task.id,
                            task.name,
                            task.action,
                            task.schedule.as_deref().unwrap_or("manual"),
                            task.last_run.as_deref().unwrap_or("never"),
                        );
                    }
                }
                TaskCommands::Create {
                    name,
                    action,
                    schedule,
                    user,
                    args,
                } => {
                    let args: serde_json::Value =
                        serde_json::from_str(args).context("parsing --args")?;
                    let id = scheduler.create_task(
                        name,
                        action,
                        schedule.as_deref(),
                        user.as_deref(),
                        args,
                    );
                    println!("created task {id}");
                }
                TaskCommands::Run { id } => {
                    let outcome = scheduler.run_task(id).await;
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                TaskCommands::Delete { id } => {
                    if scheduler.delete_task(id) {
                        println!("deleted task {id}");
                    } else {
                        println!("no such task: {id}");
                    }
                }
            }
            Ok(())
        }
    }
}

/// Drive one turn, printing events as they stream.  Returns the pending
/// permission request when the turn paused on one.
async fn run_turn(
    agent: &Agent,
    req: TurnRequest,
    show_thinking: bool,
) -> Option<(String, serde_json::Value)> {
    let (tx, mut rx) = mpsc::channel(64);
    let turn = agent.ask_stream(req, tx);
    tokio::pin!(turn);
    let mut turn_done = false;
    let mut pending_permission = None;
    let mut in_thinking = false;

    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => print_event(ev, show_thinking, &mut in_thinking, &mut pending_permission),
                None => break,
            },
            res = &mut turn, if !turn_done => {
                if let Err(e) = res {
                    eprintln!("turn failed: {e}");
                }
                turn_done = true;
            }
        }
    }
    pending_permission
}

fn print_event(
    ev: TurnEvent,
    show_thinking: bool,
    in_thinking: &mut bool,
    pending_permission: &mut Option<(String, serde_json::Value)>,
) {
    match ev {
        TurnEvent::Thinking { chunk } => {
            if show_thinking {
                if !*in_thinking {
                    print!("(thinking) ");
                    *in_thinking = true;
                }
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }
        }
        TurnEvent::ThinkingFinished { .. } => {
            if *in_thinking {
                println!();
                *in_thinking = false;
            }
        }
        TurnEvent::Stream { content } => {
            print!("{content}");
            let _ = std::io::stdout().flush();
        }
        TurnEvent::JsonContent { message, .. } => {
            println!("\n{message}");
        }
        TurnEvent::ActionDetected { names } => {
            println!("\n[actions requested: {}]", names.join(", "));
        }
        TurnEvent::ActionLoop { loop_, max_loops } => {
            println!("[loop {loop_}/{max_loops}]");
        }
        TurnEvent::ActionOutput { name, result, output, truncated } => {
            let marker = if truncated { " (truncated)" } else { "" };
            println!("[{name}: {result:?}{marker}] {output}");
        }
        TurnEvent::ActionUpdate { .. } => {
            // Progress already arrives as labelled stream lines.
        }
        TurnEvent::PermissionRequired { action_name, action_args } => {
            *pending_permission = Some((action_name, action_args));
        }
        TurnEvent::RequestKey { provider, message } => {
            println!("\n{message}");
            println!("store it with: genesis key set {provider} <value>");
        }
        TurnEvent::Error { error } => {
            eprintln!("\nerror: {error}");
        }
    }
}

struct ReplState {
    user: Option<UserRecord>,
    pending_username: Option<String>,
    chat_id: Option<String>,
    think: bool,
}

async fn repl(agent: &Arc<Agent>, think: bool) -> anyhow::Result<()> {
    println!("genesis — type /user <name> then /pass <password> to log in, /exit to quit");
    let mut state = ReplState {
        user: None,
        pending_username: None,
        chat_id: None,
        think,
    };

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(Ok(line)) = lines.next() else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" {
            break;
        }
        handle_line(agent, &mut state, &line).await;
    }
    Ok(())
}

async fn handle_line(agent: &Arc<Agent>, state: &mut ReplState, line: &str) {
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    match command {
        "/user" => {
            state.pending_username = Some(rest.to_string());
            println!("now enter /pass <password>");
        }
        "/pass" => {
            let Some(username) = state.pending_username.clone() else {
                println!("set /user first");
                return;
            };
            let store = agent.store();
            match store.verify_user(&username, rest) {
                Ok(Some(user)) => {
                    println!("logged in as {}", user.username);
                    state.user = Some(user);
                }
                Ok(None) => {
                    if store.get_user_by_name(&username).ok().flatten().is_none() {
                        match store.create_user(&username, rest, "user") {
                            Ok(id) => {
                                println!("created new user {username}");
                                state.user = Some(UserRecord {
                                    id,
                                    username,
                                    role: "user".into(),
                                    preferred_model: None,
                                });
                            }
                            Err(e) => println!("could not create user: {e}"),
                        }
                    } else {
                        println!("invalid credentials");
                    }
                }
                Err(e) => println!("login failed: {e}"),
            }
        }
        "/chats" => {
            let Some(user) = &state.user else {
                println!("log in first");
                return;
            };
            match agent.store().get_chats_for_user(user.id) {
                Ok(chats) => {
                    for chat in chats {
                        println!(
                            "{}  {}  (updated {})",
                            chat.id,
                            chat.title.as_deref().unwrap_or("untitled"),
                            chat.updated_at
                        );
                    }
                }
                Err(e) => println!("failed to list chats: {e}"),
            }
        }
        "/chat" => {
            state.chat_id = Some(rest.to_string());
            println!("attached to chat {rest}");
        }
        "/new" => {
            let Some(user) = &state.user else {
                println!("log in first");
                return;
            };
            let chat_id = new_chat_id();
            let title = if rest.is_empty() { "New Chat" } else { rest };
            match agent.store().create_chat(&chat_id, user.id, title) {
                Ok(()) => {
                    println!("created chat {chat_id}");
                    state.chat_id = Some(chat_id);
                }
                Err(e) => println!("failed to create chat: {e}"),
            }
        }
        "/clear" => {
            if let Some(chat) = &state.chat_id {
                match agent.store().clear_chat_history(chat) {
                    Ok(()) => println!("cleared"),
                    Err(e) => println!("failed to clear: {e}"),
                }
            } else {
                println!("no chat attached");
            }
        }
        "/think" => {
            state.think = rest == "on";
            println!("thinking {}", if state.think { "on" } else { "off" });
        }
        "/message" => {
            // One-shot against an ephemeral chat.
            let mut req = TurnRequest::new(rest);
            req.use_thinking = state.think;
            let _ = run_turn(agent, req, state.think).await;
            println!();
        }
        _ if command.starts_with('/') => {
            println!("unknown command: {command}");
        }
        _ => {
            if state.user.is_none() {
                println!("log in first (/user, /pass)");
                return;
            }
            submit_prompt(agent, state, line).await;
        }
    }
}

async fn submit_prompt(agent: &Arc<Agent>, state: &mut ReplState, prompt: &str) {
    let chat_id = match &state.chat_id {
        Some(id) => id.clone(),
        None => {
            let id = new_chat_id();
            let user = state.user.as_ref().expect("checked by caller");
            if let Err(e) = agent.store().create_chat(&id, user.id, "New Chat") {
                println!("failed to create chat: {e}");
                return;
            }
            state.chat_id = Some(id.clone());
            id
        }
    };

    let mut req = TurnRequest::new(prompt).with_chat(chat_id.clone());
    req.use_thinking = state.think;
    let mut pending = run_turn(agent, req, state.think).await;

    // Permission prompt loop: grant and resume until the turn completes.
    while let Some((action_name, args)) = pending.take() {
        println!("\naction '{action_name}' wants to run with args {args}");
        print!("allow? [o]nce / [s]ession / [t]oday / [a]lways / [d]eny: ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return;
        }
        let scope = match answer.trim() {
            "o" | "once" => Some(PermissionScope::Once),
            "s" | "session" => Some(PermissionScope::Session),
            "t" | "today" => Some(PermissionScope::Today),
            "a" | "always" => Some(PermissionScope::Always),
            _ => None,
        };
        let Some(scope) = scope else {
            println!("denied");
            return;
        };
        let user = state.user.as_ref().expect("checked by caller");
        if scope != PermissionScope::Once {
            if let Err(e) = agent.store().grant_permission(
                &user.id.to_string(),
                &action_name,
                scope,
                Some(&chat_id),
            ) {
                println!("failed to grant: {e}");
                return;
            }
        }
        let mut resume = TurnRequest::new("").with_chat(chat_id.clone());
        resume.resume_action = true;
        resume.use_thinking = state.think;
        pending = run_turn(agent, resume, state.think).await;
    }
    println!();
}

/// Short chat id in the 8-hex style of ephemeral ids.
fn new_chat_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
