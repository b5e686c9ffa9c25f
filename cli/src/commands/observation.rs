// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Observation commands: live subscribe-and-stream, retrospective query,
//! event emission, and the agent-termination hook.

use crate::client::RouterClient;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};

#[derive(Args)]
pub struct ObserveArgs {
    /// Observer actor id to register as
    #[arg(long)]
    pub observer: String,

    /// Target actor id to watch, or "*" for every target
    #[arg(long, default_value = "*")]
    pub target: String,

    /// Event name patterns (repeatable)
    #[arg(long = "event", required = true)]
    pub events: Vec<String>,

    /// Rate limit: maximum deliveries per window
    #[arg(long)]
    pub max_events: Option<u32>,

    /// Rate limit window in seconds
    #[arg(long, default_value = "60")]
    pub window_seconds: u64,

    /// Delivery filter condition, e.g. "severity >= 5"
    #[arg(long)]
    pub condition: Option<String>,
}

#[derive(Args)]
pub struct QueryArgs {
    /// Target actor id, or "*" for every target
    #[arg(long, default_value = "*")]
    pub target: String,

    /// Event name patterns (repeatable)
    #[arg(long = "event")]
    pub events: Vec<String>,

    /// Only events at or after this RFC 3339 timestamp
    #[arg(long)]
    pub since: Option<String>,

    /// Maximum number of events returned
    #[arg(long, default_value = "50")]
    pub limit: usize,
}

#[derive(Args)]
pub struct EmitArgs {
    /// Event name (domain:action)
    pub event: String,

    /// JSON payload
    #[arg(long, default_value = "{}")]
    pub data: String,

    /// Originating actor id recorded in the event context
    #[arg(long)]
    pub originator: Option<String>,
}

pub async fn observe(args: ObserveArgs, host: &str, port: u16) -> Result<()> {
    let mut client = RouterClient::connect(host, port).await?;

    client
        .request("observation:attach", json!({ "observer": &args.observer }))
        .await?;

    let mut filter = serde_json::Map::new();
    if let Some(max_events) = args.max_events {
        filter.insert(
            "rate_limit".into(),
            json!({ "max_events": max_events, "window_seconds": args.window_seconds }),
        );
    }
    if let Some(condition) = &args.condition {
        filter.insert("condition".into(), json!(condition));
    }

    let data = client
        .request(
            "observation:subscribe",
            json!({
                "observer": &args.observer,
                "target": &args.target,
                "events": &args.events,
                "filter": filter,
            }),
        )
        .await?;
    println!(
        "{} subscription {}",
        "observing".green().bold(),
        data["subscription_id"]
    );

    while let Some(message) = client.next_message().await? {
        if message["event"] == json!("observation:event") {
            let event = &message["data"]["event"];
            println!(
                "{} {} {}",
                event["timestamp"].as_str().unwrap_or("").dimmed(),
                event["name"].as_str().unwrap_or("?").bold(),
                event["data"]
            );
        }
    }
    Ok(())
}

pub async fn query(args: QueryArgs, host: &str, port: u16) -> Result<()> {
    let mut client = RouterClient::connect(host, port).await?;
    let data = client
        .request(
            "observation:query",
            json!({
                "target": args.target,
                "events": args.events,
                "since": args.since,
                "limit": args.limit,
            }),
        )
        .await?;
    let events = data["events"].as_array().cloned().unwrap_or_default();
    println!("{} event(s)", data["count"]);
    for event in events {
        println!(
            "  {} {} {}",
            event["timestamp"].as_str().unwrap_or("").dimmed(),
            event["name"].as_str().unwrap_or("?").bold(),
            event["data"]
        );
    }
    Ok(())
}

pub async fn emit(args: EmitArgs, host: &str, port: u16) -> Result<()> {
    let payload: Value =
        serde_json::from_str(&args.data).context("--data must be a JSON object")?;
    let mut client = RouterClient::connect(host, port).await?;

    let mut request = json!({ "event": args.event, "data": payload });
    if let Some(originator) = &args.originator {
        request["context"] = json!({ "originator": originator });
    }
    let line = serde_json::to_string(&request)?;
    // Emission carries an optional context, so it bypasses the plain
    // request helper.
    client.send_raw(&line).await?;
    let response = client
        .next_message()
        .await?
        .context("connection closed before response")?;
    if response["status"] == json!("success") {
        println!("{} {}", "dispatched".green().bold(), args.event);
        Ok(())
    } else {
        anyhow::bail!(
            "daemon error: {}",
            response["error"].as_str().unwrap_or("unknown error")
        );
    }
}

pub async fn terminated(agent_id: &str, host: &str, port: u16) -> Result<()> {
    let mut client = RouterClient::connect(host, port).await?;
    let data = client
        .request("agent:terminated", json!({ "agent_id": agent_id }))
        .await?;
    println!(
        "{} {} subscription(s) removed",
        "terminated".green().bold(),
        data["subscriptions_removed"]
    );
    Ok(())
}
