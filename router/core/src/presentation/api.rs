// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Request/response surface of the daemon.
//!
//! Every inbound line is `{event, data}`; every reply is
//! `{status: "success"|"error", data?, error?}`. Names in the reserved
//! control domains (`observation`, `routing`, `checkpoint`, `daemon`,
//! `agent`) are administrative operations; any other well-formed event name
//! is a worker emission handed to the dispatcher. Malformed administrative
//! input yields a structured error with no partial side effects.

use crate::application::checkpoint_service::CheckpointService;
use crate::application::dispatcher::Dispatcher;
use crate::application::observation::SubscriptionManager;
use crate::domain::actor::ActorId;
use crate::domain::event::{Event, EventContext, EventName, EventPattern};
use crate::domain::routing::TransformerRule;
use crate::domain::subscription::{SubscriptionFilter, SubscriptionId, TargetSelector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRequest {
    pub event: String,

    #[serde(default)]
    pub data: Value,

    /// Optional correlation context attached by the emitting worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EventContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouterResponse {
    pub fn success(data: Value) -> Self {
        Self {
            status: "success".into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    observer: ActorId,
    target: TargetSelector,
    events: Vec<String>,
    #[serde(default)]
    filter: SubscriptionFilter,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    observer: Option<ActorId>,
}

#[derive(Debug, Deserialize)]
struct UnsubscribeParams {
    subscription_id: SubscriptionId,
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    target: TargetSelector,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RemoveRuleParams {
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryRulesParams {
    #[serde(default)]
    source_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateCheckpointParams {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct TerminatedParams {
    agent_id: ActorId,
}

pub struct RouterApi {
    dispatcher: Dispatcher,
    observation: SubscriptionManager,
    checkpoints: Arc<CheckpointService>,
    started_at: Instant,
}

impl RouterApi {
    pub fn new(
        dispatcher: Dispatcher,
        observation: SubscriptionManager,
        checkpoints: Arc<CheckpointService>,
    ) -> Self {
        Self {
            dispatcher,
            observation,
            checkpoints,
            started_at: Instant::now(),
        }
    }

    pub async fn handle(&self, request: RouterRequest) -> RouterResponse {
        match request.event.as_str() {
            "observation:subscribe" => self.subscribe(request.data),
            "observation:list" => self.list(request.data),
            "observation:unsubscribe" => self.unsubscribe(request.data),
            "observation:query" => self.query(request.data),
            "routing:add_rule" => self.add_rule(request.data),
            "routing:remove_rule" => self.remove_rule(request.data),
            "routing:query_rules" => self.query_rules(request.data),
            "checkpoint:create" => self.create_checkpoint(request.data),
            "agent:terminated" => self.agent_terminated(request.data),
            "daemon:status" => self.status(),
            name if is_control_domain(name) => {
                RouterResponse::error(format!("unknown operation '{name}'"))
            }
            _ => self.ingest(request).await,
        }
    }

    /// Worker emission: anything outside the control domains is dispatched
    /// as an event.
    async fn ingest(&self, request: RouterRequest) -> RouterResponse {
        let name = match EventName::parse(&request.event) {
            Ok(name) => name,
            Err(err) => return RouterResponse::error(err.to_string()),
        };
        let data = match request.data {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            _ => return RouterResponse::error("event data must be an object"),
        };
        let context = request.context.unwrap_or_default();
        self.dispatcher.dispatch(Event::new(name, data, context)).await;
        RouterResponse::success(json!({ "dispatched": true }))
    }

    fn subscribe(&self, data: Value) -> RouterResponse {
        let params: SubscribeParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let mut patterns = Vec::with_capacity(params.events.len());
        for raw in &params.events {
            match EventPattern::parse(raw) {
                Ok(pattern) => patterns.push(pattern),
                Err(err) => return RouterResponse::error(err.to_string()),
            }
        }
        match self
            .observation
            .subscribe(params.observer, params.target, patterns, params.filter)
        {
            Ok(id) => RouterResponse::success(json!({ "subscription_id": id })),
            Err(err) => RouterResponse::error(err.to_string()),
        }
    }

    fn list(&self, data: Value) -> RouterResponse {
        let params: ListParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let subscriptions = self.observation.list(params.observer.as_ref());
        RouterResponse::success(json!({
            "count": subscriptions.len(),
            "subscriptions": subscriptions,
        }))
    }

    fn unsubscribe(&self, data: Value) -> RouterResponse {
        let params: UnsubscribeParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let removed = self.observation.unsubscribe(&params.subscription_id);
        RouterResponse::success(json!({ "removed": removed }))
    }

    fn query(&self, data: Value) -> RouterResponse {
        let params: QueryParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let mut patterns = Vec::with_capacity(params.events.len());
        for raw in &params.events {
            match EventPattern::parse(raw) {
                Ok(pattern) => patterns.push(pattern),
                Err(err) => return RouterResponse::error(err.to_string()),
            }
        }
        let events = self.observation.query(
            params.target,
            patterns,
            params.since,
            params.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        );
        RouterResponse::success(json!({ "count": events.len(), "events": events }))
    }

    fn add_rule(&self, data: Value) -> RouterResponse {
        let rule: TransformerRule = match parse(data) {
            Ok(rule) => rule,
            Err(response) => return response,
        };
        let name = rule.name.clone();
        match self.dispatcher.add_rule(rule) {
            Ok(()) => RouterResponse::success(json!({ "name": name })),
            Err(err) => RouterResponse::error(err.to_string()),
        }
    }

    fn remove_rule(&self, data: Value) -> RouterResponse {
        let params: RemoveRuleParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let removed = self.dispatcher.remove_rule(&params.name);
        RouterResponse::success(json!({ "removed": removed }))
    }

    fn query_rules(&self, data: Value) -> RouterResponse {
        let params: QueryRulesParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let rules = self.dispatcher.query_rules(params.source_pattern.as_deref());
        RouterResponse::success(json!({ "count": rules.len(), "rules": rules }))
    }

    fn create_checkpoint(&self, data: Value) -> RouterResponse {
        let params: CreateCheckpointParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        match self.checkpoints.create(&params.reason) {
            Ok(id) => RouterResponse::success(json!({ "checkpoint_id": id })),
            Err(err) => RouterResponse::error(err.to_string()),
        }
    }

    fn agent_terminated(&self, data: Value) -> RouterResponse {
        let params: TerminatedParams = match parse(data) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let removed = self.observation.on_actor_terminated(&params.agent_id);
        RouterResponse::success(json!({ "subscriptions_removed": removed }))
    }

    fn status(&self) -> RouterResponse {
        RouterResponse::success(json!({
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "subscriptions": self.observation.count(),
            "rules": self.dispatcher.rule_count(),
        }))
    }
}

fn is_control_domain(name: &str) -> bool {
    matches!(
        name.split(':').next(),
        Some("observation" | "routing" | "checkpoint" | "daemon" | "agent")
    )
}

fn parse<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, RouterResponse> {
    serde_json::from_value(data)
        .map_err(|err| RouterResponse::error(format!("invalid request data: {err}")))
}
