// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use argus_core::domain::config::RoutingConfig;
use argus_core::{
    ActorId, ChannelTransport, ConditionPolicy, Dispatcher, Event, EventContext, EventLog,
    EventName, EventPattern, EventQuery, Mapping, ObservationSettings, SubscriptionManager,
    TargetSelector, TransformerRule,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn routing_config(max_hops: u32) -> RoutingConfig {
    RoutingConfig {
        max_hops,
        condition_policy: ConditionPolicy::FailOpen,
        rules_file: None,
    }
}

fn harness(max_hops: u32) -> (Dispatcher, Arc<EventLog>) {
    let event_log = Arc::new(EventLog::new(1000));
    let observation = SubscriptionManager::new(
        ObservationSettings::default(),
        Arc::new(ChannelTransport::new()),
        event_log.clone(),
    );
    let dispatcher = Dispatcher::new(&routing_config(max_hops), observation, event_log.clone());
    (dispatcher, event_log)
}

fn rule(name: &str, source: &str, target: &str) -> TransformerRule {
    TransformerRule {
        name: name.into(),
        source_pattern: EventPattern::parse(source).unwrap(),
        target_event: EventName::parse(target).unwrap(),
        mapping: Mapping::Passthrough,
        condition: None,
        async_dispatch: false,
        delay: None,
        priority: 0,
    }
}

fn event(name: &str, data: Value) -> Event {
    Event::new(
        EventName::parse(name).unwrap(),
        data.as_object().cloned().unwrap_or_default(),
        EventContext::for_originator(ActorId::new("agent-b")),
    )
}

fn logged(event_log: &EventLog, pattern: &str) -> Vec<Event> {
    event_log.query(&EventQuery {
        target: TargetSelector::Any,
        patterns: vec![EventPattern::parse(pattern).unwrap()],
        since: None,
        limit: 1000,
    })
}

#[tokio::test]
async fn test_conditional_pass_through_routing() {
    let (dispatcher, event_log) = harness(8);
    let mut route = rule("route-success", "completion:internal_result", "completion:result");
    route.condition = Some("status == 'success'".into());
    dispatcher.add_rule(route).unwrap();

    dispatcher
        .dispatch(event("completion:internal_result", json!({"status": "success", "foo": 1})))
        .await;

    let derived = logged(&event_log, "completion:result");
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].data["status"], json!("success"));
    assert_eq!(derived[0].data["foo"], json!(1));
    assert_eq!(derived[0].context.hops, 1);

    dispatcher
        .dispatch(event("completion:internal_result", json!({"status": "error"})))
        .await;
    assert_eq!(logged(&event_log, "completion:result").len(), 1);
}

#[tokio::test]
async fn test_multi_way_routing_fires_all_satisfying_rules() {
    let (dispatcher, event_log) = harness(8);
    for (name, status, target) in [
        ("on-success", "success", "followup:succeeded"),
        ("on-error", "error", "followup:failed"),
        ("on-cancelled", "cancelled", "followup:cancelled"),
    ] {
        let mut r = rule(name, "task:finished", target);
        r.condition = Some(format!("status == '{status}'"));
        dispatcher.add_rule(r).unwrap();
    }
    // An unconditional audit rule on the same source also fires: fan-out,
    // not first-match-wins.
    dispatcher
        .add_rule(rule("audit", "task:finished", "audit:recorded"))
        .unwrap();

    dispatcher
        .dispatch(event("task:finished", json!({"status": "error"})))
        .await;

    assert_eq!(logged(&event_log, "followup:failed").len(), 1);
    assert_eq!(logged(&event_log, "audit:recorded").len(), 1);
    assert_eq!(logged(&event_log, "followup:succeeded").len(), 0);
    assert_eq!(logged(&event_log, "followup:cancelled").len(), 0);
}

#[tokio::test]
async fn test_broadcast_mapping_envelope() {
    let (dispatcher, event_log) = harness(8);
    let mut fields = BTreeMap::new();
    fields.insert("payload".to_string(), json!("{{data}}"));
    fields.insert("source".to_string(), json!("{{meta.source_event}}"));
    fields.insert("origin".to_string(), json!("{{context.originator}}"));
    let mut broadcast = rule("broadcast", "task:*", "monitor:update");
    broadcast.mapping = Mapping::Fields(fields);
    dispatcher.add_rule(broadcast).unwrap();

    dispatcher
        .dispatch(event("task:started", json!({"id": 7})))
        .await;

    let derived = logged(&event_log, "monitor:update");
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].data["payload"], json!({"id": 7}));
    assert_eq!(derived[0].data["source"], json!("task:started"));
    assert_eq!(derived[0].data["origin"], json!("agent-b"));
}

#[tokio::test]
async fn test_error_routing_gated_by_severity() {
    let (dispatcher, event_log) = harness(8);
    let mut errors = rule("route-errors", "*:error", "errors:raised");
    errors.condition = Some("severity >= 5".into());
    dispatcher.add_rule(errors).unwrap();

    dispatcher
        .dispatch(event("worker:error", json!({"severity": 7})))
        .await;
    dispatcher
        .dispatch(event("worker:error", json!({"severity": 2})))
        .await;

    assert_eq!(logged(&event_log, "errors:raised").len(), 1);
}

#[tokio::test]
async fn test_async_and_delayed_emission() {
    let (dispatcher, event_log) = harness(8);
    let mut cleanup = rule("cleanup", "task:finished", "task:cleanup");
    cleanup.async_dispatch = true;
    cleanup.delay = Some(Duration::from_millis(50));
    dispatcher.add_rule(cleanup).unwrap();

    dispatcher
        .dispatch(event("task:finished", json!({"id": 1})))
        .await;

    // Dispatch returned before the delayed emission fired.
    assert_eq!(logged(&event_log, "task:cleanup").len(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(logged(&event_log, "task:cleanup").len(), 1);
}

#[tokio::test]
async fn test_hop_guard_bounds_rule_chains() {
    let (dispatcher, event_log) = harness(3);
    dispatcher.add_rule(rule("ping", "loop:ping", "loop:pong")).unwrap();
    dispatcher.add_rule(rule("pong", "loop:pong", "loop:ping")).unwrap();

    dispatcher.dispatch(event("loop:ping", json!({}))).await;

    // hops 0..=3 are dispatched, hop 4 is dropped: four logged events total.
    let chained = logged(&event_log, "loop:*");
    assert_eq!(chained.len(), 4);
    assert!(chained.iter().all(|e| e.context.hops <= 3));
}

#[tokio::test]
async fn test_state_mutation_update_rule() {
    let (dispatcher, event_log) = harness(8);
    let mut fields = BTreeMap::new();
    fields.insert("agent".to_string(), json!("{{context.originator}}"));
    fields.insert("state".to_string(), json!("{{data.state}}"));
    let mut update = rule("state-update", "agent:state_changed", "registry:update");
    update.mapping = Mapping::Fields(fields);
    dispatcher.add_rule(update).unwrap();

    dispatcher
        .dispatch(event("agent:state_changed", json!({"state": "idle"})))
        .await;

    let derived = logged(&event_log, "registry:update");
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].data["state"], json!("idle"));
}

#[tokio::test]
async fn test_rule_management_round_trip() {
    let (dispatcher, _) = harness(8);
    dispatcher.add_rule(rule("a", "x:one", "sink:a")).unwrap();
    dispatcher.add_rule(rule("b", "x:two", "sink:b")).unwrap();

    assert_eq!(dispatcher.query_rules(None).len(), 2);
    assert_eq!(dispatcher.query_rules(Some("x:one")).len(), 1);

    assert!(dispatcher.remove_rule("a"));
    assert!(!dispatcher.remove_rule("a"));
    assert_eq!(dispatcher.query_rules(None).len(), 1);

    // Duplicate names are rejected as configuration errors.
    assert!(dispatcher.add_rule(rule("b", "x:three", "sink:c")).is_err());
}

#[tokio::test]
async fn test_events_reach_subscription_manager_and_log() {
    let (dispatcher, event_log) = harness(8);
    for i in 0..5 {
        dispatcher
            .dispatch(event("test:event", json!({"seq": i})))
            .await;
    }
    let all = logged(&event_log, "test:*");
    assert_eq!(all.len(), 5);
    // Newest first.
    assert_eq!(all[0].data["seq"], json!(4));
}

#[tokio::test]
async fn test_malformed_condition_fails_open_by_default() {
    let (dispatcher, event_log) = harness(8);
    let mut broken = rule("broken", "test:event", "sink:opened");
    broken.condition = Some("status == ".into());
    dispatcher.add_rule(broken).unwrap();

    dispatcher.dispatch(event("test:event", json!({}))).await;
    assert_eq!(logged(&event_log, "sink:opened").len(), 1);
}

#[tokio::test]
async fn test_malformed_condition_fail_closed_policy() {
    let event_log = Arc::new(EventLog::new(1000));
    let observation = SubscriptionManager::new(
        ObservationSettings::default(),
        Arc::new(ChannelTransport::new()),
        event_log.clone(),
    );
    let config = RoutingConfig {
        max_hops: 8,
        condition_policy: ConditionPolicy::FailClosed,
        rules_file: None,
    };
    let dispatcher = Dispatcher::new(&config, observation, event_log.clone());

    let mut broken = rule("broken", "test:event", "sink:closed");
    broken.condition = Some("status == ".into());
    dispatcher.add_rule(broken).unwrap();

    dispatcher.dispatch(event("test:event", json!({}))).await;
    assert_eq!(logged(&event_log, "sink:closed").len(), 0);
}
