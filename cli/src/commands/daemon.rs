// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon lifecycle: build the engine stack from configuration and serve
//! the wire protocol until shutdown.

use crate::client::RouterClient;
use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use argus_core::infrastructure::rule_loader;
use argus_core::presentation::api::RouterApi;
use argus_core::presentation::server::RouterServer;
use argus_core::{
    ChannelTransport, CheckpointId, CheckpointService, CheckpointStore, Dispatcher, EventLog,
    ObservationSettings, RouterConfigManifest, SubscriptionManager,
};

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the router daemon in the foreground
    Start {
        /// Restore routing rules and subscriptions from a checkpoint before
        /// accepting events (the administrative stop-load-start path)
        #[arg(long, value_name = "CHECKPOINT_ID")]
        restore: Option<String>,
    },
}

pub async fn handle(command: DaemonCommand, config_path: Option<&Path>) -> Result<()> {
    match command {
        DaemonCommand::Start { restore } => start(config_path, restore.as_deref()).await,
    }
}

async fn start(config_path: Option<&Path>, restore: Option<&str>) -> Result<()> {
    let config = RouterConfigManifest::discover(config_path).context("failed to load configuration")?;

    if let Some(port) = config
        .observability
        .as_ref()
        .and_then(|observability| observability.metrics_port)
    {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([127, 0, 0, 1], port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port, "metrics exporter listening");
    }

    let mut event_log = EventLog::new(config.event_log.max_entries);
    if let Some(path) = &config.event_log.path {
        event_log = event_log
            .with_sink(path)
            .with_context(|| format!("failed to open event log sink {}", path.display()))?;
    }
    let event_log = Arc::new(event_log);

    let transport = Arc::new(ChannelTransport::new());
    let observation = SubscriptionManager::new(
        ObservationSettings::from_config(&config),
        transport.clone(),
        event_log.clone(),
    );
    let dispatcher = Dispatcher::new(&config.routing, observation.clone(), event_log.clone());

    if let Some(rules_file) = &config.routing.rules_file {
        let rules = rule_loader::load_rules(rules_file)?;
        dispatcher
            .load_rules(rules)
            .context("startup rules rejected")?;
    }

    let checkpoints = Arc::new(CheckpointService::new(
        Arc::new(CheckpointStore::new(config.checkpoint.dir.clone())),
        dispatcher.clone(),
        observation.clone(),
    ));

    if let Some(raw) = restore {
        let id: CheckpointId = raw.parse().context("invalid checkpoint id")?;
        let report = checkpoints.restore(&id)?;
        info!(
            rules = report.rules,
            subscriptions = report.subscriptions,
            "restored from checkpoint before serving"
        );
    }

    let listener = TcpListener::bind((config.network.host.as_str(), config.network.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind to {}:{}",
                config.network.host, config.network.port
            )
        })?;

    let api = Arc::new(RouterApi::new(dispatcher, observation, checkpoints));
    RouterServer::new(api, transport).serve(listener).await
}

pub async fn status(host: &str, port: u16) -> Result<()> {
    let mut client = RouterClient::connect(host, port).await?;
    let status = client.request("daemon:status", json!({})).await?;
    println!("{}", "daemon running".green().bold());
    println!(
        "  uptime: {}s  rules: {}  subscriptions: {}",
        status["uptime_seconds"], status["rules"], status["subscriptions"]
    );
    Ok(())
}
