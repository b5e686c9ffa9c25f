// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Grammar-level coverage of the condition evaluator through the public API:
//! every syntactically valid expression terminates with a boolean against
//! any payload, and malformed input only ever produces an error (or the
//! configured policy verdict), never a panic.

use argus_core::{evaluate, evaluate_with_policy, ConditionPolicy, EventData};
use serde_json::json;

fn payload(value: serde_json::Value) -> EventData {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_valid_expressions_total_over_varied_payloads() {
    let expressions = [
        "status == 'success'",
        "status != 'success'",
        "severity > 5 and severity <= 9",
        "status in ['success', 'error'] or retries >= 3",
        "not done",
        "result.inner.value == none",
        "name.startswith('agent') and name.endswith('-1')",
        "tags.contains('urgent')",
        "tags.length() > 0",
        "(a or b) and not (c and d)",
        "x not in [1, 2, 3]",
        "true and not false",
        "none == none",
        "1 < 2 and 2 < 'x'",
    ];
    let payloads = [
        json!({}),
        json!({"status": "success", "severity": 7, "retries": 0}),
        json!({"status": 42, "severity": "high", "done": true}),
        json!({"name": "agent-1", "tags": ["urgent"], "result": {"inner": {}}}),
        json!({"a": 1, "b": 0, "c": "", "d": [], "x": 2}),
        json!({"status": null, "tags": null, "name": null}),
    ];

    for expr in &expressions {
        for p in &payloads {
            let result = evaluate(expr, &payload(p.clone()), &EventData::new());
            assert!(
                result.is_ok(),
                "expression {expr:?} failed on payload {p}: {result:?}"
            );
        }
    }
}

#[test]
fn test_scenario_gating_matches_routing_semantics() {
    let success = payload(json!({"status": "success", "foo": 1}));
    let failure = payload(json!({"status": "error", "foo": 1}));
    let empty = EventData::new();

    assert!(evaluate("status == 'success'", &success, &empty).unwrap());
    assert!(!evaluate("status == 'success'", &failure, &empty).unwrap());
}

#[test]
fn test_context_fallback_after_data() {
    let mut context = EventData::new();
    context.insert("originator".into(), json!("agent-9"));
    context.insert("hops".into(), json!(2));

    assert!(evaluate("originator == 'agent-9'", &EventData::new(), &context).unwrap());
    assert!(evaluate("hops < 8", &EventData::new(), &context).unwrap());

    // An identifier present in data wins over context.
    let mut data = EventData::new();
    data.insert("hops".into(), json!(99));
    assert!(!evaluate("hops < 8", &data, &context).unwrap());
}

#[test]
fn test_malformed_expressions_error_without_panicking() {
    let malformed = [
        "status ==",
        "and status",
        "status === 'x'",
        "(status",
        "[1, 2",
        "status == 'open",
        "status.exec('payload')",
        "",
        "in in in",
    ];
    for expr in &malformed {
        assert!(
            evaluate(expr, &EventData::new(), &EventData::new()).is_err(),
            "expected syntax error for {expr:?}"
        );
    }
}

#[test]
fn test_policy_applies_only_to_malformed_input() {
    let data = EventData::new();
    let context = EventData::new();

    for expr in ["status ==", "status.exec('x')"] {
        assert!(evaluate_with_policy(expr, &data, &context, ConditionPolicy::FailOpen));
        assert!(!evaluate_with_policy(expr, &data, &context, ConditionPolicy::FailClosed));
    }

    // A well-formed false stays false under either policy.
    for policy in [ConditionPolicy::FailOpen, ConditionPolicy::FailClosed] {
        assert!(!evaluate_with_policy("1 == 2", &data, &context, policy));
    }
}
