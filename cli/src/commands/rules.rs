// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::client::RouterClient;
use anyhow::{Context, Result};
use argus_core::TransformerRule;
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum RulesCommand {
    /// List rules on the running daemon
    List {
        /// Only rules with this exact source pattern
        #[arg(long)]
        source_pattern: Option<String>,
    },

    /// Add a rule from a YAML definition file
    Add {
        /// Path to a YAML file containing one TransformerRule
        file: PathBuf,
    },

    /// Remove a rule by name
    Remove { name: String },
}

pub async fn handle(command: RulesCommand, host: &str, port: u16) -> Result<()> {
    let mut client = RouterClient::connect(host, port).await?;
    match command {
        RulesCommand::List { source_pattern } => {
            let data = client
                .request("routing:query_rules", json!({ "source_pattern": source_pattern }))
                .await?;
            let rules = data["rules"].as_array().cloned().unwrap_or_default();
            println!("{} rule(s)", data["count"]);
            for rule in rules {
                println!(
                    "  {}  {} {} {}{}",
                    rule["name"].as_str().unwrap_or("?").bold(),
                    rule["source_pattern"].as_str().unwrap_or("?"),
                    "->".dimmed(),
                    rule["target_event"].as_str().unwrap_or("?"),
                    if rule["async_dispatch"].as_bool().unwrap_or(false) {
                        " (async)".dimmed().to_string()
                    } else {
                        String::new()
                    }
                );
            }
        }
        RulesCommand::Add { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let rule: TransformerRule = serde_yaml::from_str(&raw)
                .with_context(|| format!("invalid rule definition in {}", file.display()))?;
            let data = client
                .request("routing:add_rule", serde_json::to_value(&rule)?)
                .await?;
            println!("{} rule '{}'", "added".green().bold(), data["name"]);
        }
        RulesCommand::Remove { name } => {
            let data = client
                .request("routing:remove_rule", json!({ "name": name }))
                .await?;
            if data["removed"].as_bool().unwrap_or(false) {
                println!("{} rule '{name}'", "removed".green().bold());
            } else {
                println!("{} no rule named '{name}'", "noop".yellow());
            }
        }
    }
    Ok(())
}
