// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Checkpoint administration.
//!
//! `create` goes through the running daemon so the snapshot is taken under
//! its locks; `list` and `delete` operate on the durable store directly and
//! work whether or not a daemon is up. Restore is part of `daemon start
//! --restore`, never a live request.

use crate::client::RouterClient;
use anyhow::{Context, Result};
use argus_core::{CheckpointId, CheckpointStore, RouterConfigManifest};
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;
use std::path::Path;

#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// Snapshot routing rules and subscriptions on the running daemon
    Create {
        /// Why this checkpoint is being taken (recorded with it)
        #[arg(long)]
        reason: String,
    },

    /// List checkpoints in the durable store
    List,

    /// Delete a stored checkpoint
    Delete { checkpoint_id: String },
}

pub async fn handle(
    command: CheckpointCommand,
    config_path: Option<&Path>,
    host: &str,
    port: u16,
) -> Result<()> {
    match command {
        CheckpointCommand::Create { reason } => {
            let mut client = RouterClient::connect(host, port).await?;
            let data = client
                .request("checkpoint:create", json!({ "reason": reason }))
                .await?;
            println!(
                "{} checkpoint {}",
                "created".green().bold(),
                data["checkpoint_id"]
            );
        }
        CheckpointCommand::List => {
            let store = open_store(config_path)?;
            let summaries = store.list()?;
            println!("{} checkpoint(s)", summaries.len());
            for summary in summaries {
                println!(
                    "  {}  {}  {}",
                    summary.checkpoint_id,
                    summary.timestamp.to_rfc3339().dimmed(),
                    summary.reason
                );
            }
        }
        CheckpointCommand::Delete { checkpoint_id } => {
            let id: CheckpointId = checkpoint_id.parse().context("invalid checkpoint id")?;
            let store = open_store(config_path)?;
            if store.delete(&id)? {
                println!("{} checkpoint {id}", "deleted".green().bold());
            } else {
                println!("{} no checkpoint {id}", "noop".yellow());
            }
        }
    }
    Ok(())
}

fn open_store(config_path: Option<&Path>) -> Result<CheckpointStore> {
    let config = RouterConfigManifest::discover(config_path).context("failed to load configuration")?;
    Ok(CheckpointStore::new(config.checkpoint.dir))
}
