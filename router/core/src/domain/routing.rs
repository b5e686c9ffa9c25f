// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Declarative transformer rules and the routing table that owns them.
//!
//! A rule turns one matched source event into one derived target event. All
//! matching, condition-satisfying rules fire — fan-out, not first-match-wins
//! — ordered by priority with declaration order breaking ties.

use crate::domain::event::{EventName, EventPattern};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("invalid rule definition '{rule}': {reason}")]
    InvalidDefinition { rule: String, reason: String },

    #[error("a rule named '{0}' already exists")]
    DuplicateName(String),
}

/// How a rule builds the target event's payload from the source event.
///
/// `Passthrough` copies the entire source payload. `Fields` builds the
/// payload entry by entry: string values that are a single `{{path}}`
/// reference copy the referenced JSON value verbatim, any other string is
/// rendered as a Handlebars template against `{data, context, meta}`, and
/// non-string values are taken literally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mapping {
    #[default]
    Passthrough,
    Fields(BTreeMap<String, Value>),
}

/// A declarative routing rule: match `source_pattern`, gate on `condition`,
/// emit `target_event` with a payload built from `mapping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerRule {
    pub name: String,

    pub source_pattern: EventPattern,

    pub target_event: EventName,

    #[serde(default)]
    pub mapping: Mapping,

    /// Condition expression gating the rule; absent means always fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// When true the derived event is queued for independent processing
    /// instead of being dispatched inline before `dispatch` returns.
    #[serde(default)]
    pub async_dispatch: bool,

    /// Delay before an asynchronous emission, for delayed-cleanup rules.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,

    /// Higher priority fires first. Ties keep declaration order.
    #[serde(default)]
    pub priority: i32,
}

impl TransformerRule {
    fn validate(&self) -> Result<(), RoutingError> {
        if self.name.trim().is_empty() {
            return Err(RoutingError::InvalidDefinition {
                rule: "<unnamed>".into(),
                reason: "rule name must not be empty".into(),
            });
        }
        if let Some(delay) = self.delay {
            if delay.is_zero() {
                return Err(RoutingError::InvalidDefinition {
                    rule: self.name.clone(),
                    reason: "delay must be positive".into(),
                });
            }
            if !self.async_dispatch {
                return Err(RoutingError::InvalidDefinition {
                    rule: self.name.clone(),
                    reason: "delay requires async_dispatch: true".into(),
                });
            }
        }
        // A rule whose target matches its own source pattern re-triggers
        // itself on every hop; reject the trivial self-cycle outright.
        if self.source_pattern.matches(&self.target_event) && !self.async_dispatch {
            return Err(RoutingError::InvalidDefinition {
                rule: self.name.clone(),
                reason: format!(
                    "target '{}' matches the rule's own source pattern",
                    self.target_event
                ),
            });
        }
        Ok(())
    }
}

/// The live transformer-rule table.
///
/// Rules keep declaration order; `matching` sorts by priority with the
/// declaration index as the stable tie-breaker. The table itself is not
/// synchronized — the dispatcher owns it behind a lock.
#[derive(Debug, Default, Clone)]
pub struct RoutingTable {
    rules: Vec<TransformerRule>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a rule. Bad definitions are rejected here, at
    /// load/add time, never silently accepted.
    pub fn add(&mut self, rule: TransformerRule) -> Result<(), RoutingError> {
        rule.validate()?;
        if self.rules.iter().any(|existing| existing.name == rule.name) {
            return Err(RoutingError::DuplicateName(rule.name));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Removes the rule with the given name. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.name != name);
        self.rules.len() != before
    }

    /// All rules whose source pattern matches the event name, priority order.
    pub fn matching(&self, name: &EventName) -> Vec<TransformerRule> {
        let mut matched: Vec<(usize, &TransformerRule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.source_pattern.matches(name))
            .collect();
        matched.sort_by_key(|(index, rule)| (std::cmp::Reverse(rule.priority), *index));
        matched.into_iter().map(|(_, rule)| rule.clone()).collect()
    }

    /// Rules filtered by an optional source-pattern string, declaration order.
    pub fn query(&self, source_pattern: Option<&str>) -> Vec<TransformerRule> {
        self.rules
            .iter()
            .filter(|rule| {
                source_pattern
                    .map(|pattern| rule.source_pattern.as_str() == pattern)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Declaration-ordered copy of the table, as checkpointed.
    pub fn snapshot(&self) -> Vec<TransformerRule> {
        self.rules.clone()
    }

    /// Replaces the whole table, validating every rule first. On error the
    /// table is left untouched.
    pub fn replace(&mut self, rules: Vec<TransformerRule>) -> Result<(), RoutingError> {
        let mut staged = RoutingTable::new();
        for rule in rules {
            staged.add(rule)?;
        }
        *self = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_add_and_match() {
        let mut table = RoutingTable::new();
        table.add(rule("fan", "completion:*", "monitor:update")).unwrap();
        table.add(rule("exact", "completion:internal_result", "completion:result")).unwrap();
        table.add(rule("other", "task:*", "monitor:update")).unwrap();

        let matched = table.matching(&EventName::parse("completion:internal_result").unwrap());
        assert_eq!(matched.len(), 2);
        let names: Vec<_> = matched.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fan", "exact"]);
    }

    #[test]
    fn test_priority_order_with_declaration_tie_break() {
        let mut table = RoutingTable::new();
        let mut low = rule("low", "test:*", "sink:low");
        low.priority = 1;
        let mut high = rule("high", "test:*", "sink:high");
        high.priority = 10;
        let tie = rule("tie", "test:*", "sink:tie");
        table.add(low).unwrap();
        table.add(high).unwrap();
        table.add(tie).unwrap();

        let names: Vec<String> = table
            .matching(&EventName::parse("test:event").unwrap())
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["high", "low", "tie"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = RoutingTable::new();
        table.add(rule("a", "test:*", "sink:a")).unwrap();
        assert!(matches!(
            table.add(rule("a", "other:*", "sink:b")),
            Err(RoutingError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let mut table = RoutingTable::new();

        let unnamed = rule("  ", "test:*", "sink:a");
        assert!(table.add(unnamed).is_err());

        let mut zero_delay = rule("zero", "test:*", "sink:a");
        zero_delay.async_dispatch = true;
        zero_delay.delay = Some(Duration::ZERO);
        assert!(table.add(zero_delay).is_err());

        let mut sync_delay = rule("sync-delay", "test:*", "sink:a");
        sync_delay.delay = Some(Duration::from_secs(5));
        assert!(table.add(sync_delay).is_err());

        let self_cycle = rule("cycle", "loop:*", "loop:again");
        assert!(table.add(self_cycle).is_err());

        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_self_matching_target_allowed_when_async() {
        // Asynchronous re-emission is legitimate (periodic rules); the hop
        // guard bounds it at dispatch time.
        let mut table = RoutingTable::new();
        let mut periodic = rule("tick", "timer:*", "timer:tick");
        periodic.async_dispatch = true;
        periodic.delay = Some(Duration::from_secs(60));
        table.add(periodic).unwrap();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = RoutingTable::new();
        table.add(rule("a", "test:*", "sink:a")).unwrap();
        assert!(table.remove("a"));
        assert!(!table.remove("a"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_replace_keeps_table_on_error() {
        let mut table = RoutingTable::new();
        table.add(rule("keep", "test:*", "sink:a")).unwrap();
        let bad = vec![rule("x", "test:*", "sink:a"), rule("x", "test:*", "sink:b")];
        assert!(table.replace(bad).is_err());
        assert_eq!(table.query(None).len(), 1);
        assert_eq!(table.query(None)[0].name, "keep");
    }

    #[test]
    fn test_rule_yaml_round_trip() {
        let yaml = r#"
name: route-success
source_pattern: "completion:internal_result"
target_event: "completion:result"
condition: "status == 'success'"
mapping: passthrough
priority: 5
"#;
        let rule: TransformerRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.name, "route-success");
        assert!(!rule.async_dispatch);
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.mapping, Mapping::Passthrough);

        let mapped = r#"
name: broadcast
source_pattern: "*:*"
target_event: "monitor:event"
async_dispatch: true
mapping:
  fields:
    source: "{{meta.source_event}}"
    payload: "{{data}}"
"#;
        let rule: TransformerRule = serde_yaml::from_str(mapped).unwrap();
        assert!(matches!(rule.mapping, Mapping::Fields(_)));
    }
}
