// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "genesis", about = "A self-hosted AI agent with sandboxed plugin actions")]
pub struct Cli {
    /// Base directory holding data/ and bot_data/ (defaults to the cwd).
    #[arg(long, env = "GENESIS_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// One-shot mode: run a single prompt and exit.
    #[arg(long)]
    pub message: Option<String>,

    /// Chat to attach to in one-shot mode.
    #[arg(long)]
    pub chat: Option<String>,

    /// Stream the model's reasoning as well as the answer.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub think: bool,

    /// Verbose tracing to stderr (RUST_LOG overrides the level).
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plugin packaging and installation.
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// API key management for model providers.
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Scheduled task management.
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum PluginCommands {
    /// Pack a plugin directory into a signed .gplug archive.
    Pack {
        /// Plugin directory containing manifest.json.
        dir: PathBuf,
        /// Output archive path (defaults next to the plugin directory).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Install a .gplug archive.
    Install {
        /// Path to the .gplug archive.
        file: PathBuf,
        /// Install into a user scope instead of the system scope.
        #[arg(long)]
        user: Option<String>,
    },
    /// List installed plugins and their actions.
    List,
}

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Store an API key in the secret store.
    Set { name: String, value: String },
    /// Remove an API key.
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// List all tasks.
    List,
    /// Create a task (omit --schedule for manual-only).
    Create {
        name: String,
        action: String,
        #[arg(long)]
        schedule: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// JSON argument object passed to the action.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Run a task immediately, bypassing its schedule.
    Run { id: String },
    /// Delete a task.
    Delete { id: String },
}
