// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ARGUS Event Router CLI
//!
//! The `argus` binary runs the event-router daemon and talks to a running
//! daemon over its line-delimited JSON protocol.
//!
//! ## Commands
//!
//! - `argus daemon start [--restore <checkpoint_id>]` - Run the router daemon
//! - `argus rules list|add|remove` - Manage transformer rules
//! - `argus observe` / `argus query` - Live and retrospective observation
//! - `argus checkpoint create|list|delete` - Checkpoint administration
//! - `argus emit` - Dispatch an event from the command line
//! - `argus status` - Daemon status

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;
mod commands;

use commands::{CheckpointCommand, DaemonCommand, ObserveArgs, QueryArgs, RulesCommand};

/// ARGUS Event Router - route, transform, and observe agent events
#[derive(Parser)]
#[command(name = "argus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ARGUS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Daemon host for client commands
    #[arg(long, global = true, env = "ARGUS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Daemon port for client commands
    #[arg(long, global = true, env = "ARGUS_PORT", default_value = "7700")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ARGUS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the daemon lifecycle
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Manage transformer rules on a running daemon
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Subscribe to a target's events and stream deliveries
    Observe(ObserveArgs),

    /// Query the event log retrospectively
    Query(QueryArgs),

    /// Checkpoint administration
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },

    /// Dispatch a single event
    Emit(commands::EmitArgs),

    /// Notify the router that an agent terminated
    Terminated {
        /// Agent id whose observer-side subscriptions should be removed
        agent_id: String,
    },

    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .context("invalid log level")?,
        )
        .init();

    match cli.command {
        Commands::Daemon { command } => {
            commands::daemon::handle(command, cli.config.as_deref()).await
        }
        Commands::Rules { command } => {
            commands::rules::handle(command, &cli.host, cli.port).await
        }
        Commands::Observe(args) => {
            commands::observation::observe(args, &cli.host, cli.port).await
        }
        Commands::Query(args) => commands::observation::query(args, &cli.host, cli.port).await,
        Commands::Checkpoint { command } => {
            commands::checkpoint::handle(command, cli.config.as_deref(), &cli.host, cli.port).await
        }
        Commands::Emit(args) => commands::observation::emit(args, &cli.host, cli.port).await,
        Commands::Terminated { agent_id } => {
            commands::observation::terminated(&agent_id, &cli.host, cli.port).await
        }
        Commands::Status => commands::daemon::status(&cli.host, cli.port).await,
    }
}
