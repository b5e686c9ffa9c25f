// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dispatcher - the single entry point for every event.
//!
//! For each dispatched event the dispatcher appends to the event log,
//! consults the routing table for matching transformer rules, and forwards
//! the event to the subscription manager. Derived events from synchronous
//! rules are dispatched inline (before `dispatch` returns) via a worklist;
//! asynchronous rules are queued for independent processing, with an
//! optional delay for delayed-cleanup rules.
//!
//! Every derived event carries `hops + 1`; chains past `max_hops` are
//! dropped, which bounds rule sets that re-trigger each other.

use crate::domain::condition::{evaluate_with_policy, ConditionPolicy};
use crate::domain::config::RoutingConfig;
use crate::domain::event::Event;
use crate::domain::routing::{RoutingError, RoutingTable, TransformerRule};
use crate::application::observation::SubscriptionManager;
use crate::infrastructure::event_log::EventLog;
use crate::infrastructure::template::MappingEngine;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct AsyncEmission {
    event: Event,
    delay: Option<Duration>,
}

struct DispatcherInner {
    routing: RwLock<RoutingTable>,
    observation: SubscriptionManager,
    event_log: Arc<EventLog>,
    mapping: MappingEngine,
    policy: ConditionPolicy,
    max_hops: u32,
    async_tx: mpsc::UnboundedSender<AsyncEmission>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Builds the dispatcher and starts its asynchronous-emission worker.
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &RoutingConfig,
        observation: SubscriptionManager,
        event_log: Arc<EventLog>,
    ) -> Self {
        let (async_tx, async_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                routing: RwLock::new(RoutingTable::new()),
                observation,
                event_log,
                mapping: MappingEngine::new(),
                policy: config.condition_policy,
                max_hops: config.max_hops,
                async_tx,
            }),
        };
        spawn_async_emitter(dispatcher.clone(), async_rx);
        dispatcher
    }

    /// Dispatches an event and, inline, every synchronous derivation chained
    /// from it. Producers are isolated from downstream failures: this never
    /// errors.
    pub async fn dispatch(&self, event: Event) {
        let mut pending = VecDeque::new();
        pending.push_back(event);

        while let Some(event) = pending.pop_front() {
            if event.context.hops > self.inner.max_hops {
                warn!(
                    event = %event.name,
                    hops = event.context.hops,
                    max_hops = self.inner.max_hops,
                    "routing chain exceeded max hops, dropping"
                );
                metrics::counter!("argus_deliveries_dropped_total", "reason" => "max_hops")
                    .increment(1);
                continue;
            }

            metrics::counter!("argus_events_dispatched_total").increment(1);
            self.inner.event_log.append(&event);

            // Consistent snapshot: the rules matched here are the rules for
            // this event's whole processing, regardless of concurrent
            // add/remove calls.
            let rules = self.inner.routing.read().matching(&event.name);
            let context_map = event.context.to_map();

            for rule in rules {
                if let Some(condition) = &rule.condition {
                    if !evaluate_with_policy(
                        condition,
                        &event.data,
                        &context_map,
                        self.inner.policy,
                    ) {
                        continue;
                    }
                }
                metrics::counter!("argus_rules_fired_total").increment(1);
                debug!(rule = %rule.name, source = %event.name, target = %rule.target_event, "rule fired");

                let data = self.inner.mapping.resolve(&rule.mapping, &event);
                let derived = Event::new(rule.target_event.clone(), data, event.context.derived());

                if rule.async_dispatch {
                    let _ = self.inner.async_tx.send(AsyncEmission {
                        event: derived,
                        delay: rule.delay,
                    });
                } else {
                    pending.push_back(derived);
                }
            }

            self.inner.observation.on_event(&event);
        }
    }

    /// Adds a rule at runtime. The rule does not retroactively apply to
    /// events already past the matching stage.
    pub fn add_rule(&self, rule: TransformerRule) -> Result<(), RoutingError> {
        self.inner.routing.write().add(rule)
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.inner.routing.write().remove(name)
    }

    pub fn query_rules(&self, source_pattern: Option<&str>) -> Vec<TransformerRule> {
        self.inner.routing.read().query(source_pattern)
    }

    /// Loads the startup rule set; any invalid definition fails the load.
    pub fn load_rules(&self, rules: Vec<TransformerRule>) -> Result<(), RoutingError> {
        let mut table = self.inner.routing.write();
        for rule in rules {
            table.add(rule)?;
        }
        Ok(())
    }

    /// Copy of the rule table under the write lock, so the snapshot cannot
    /// interleave with a dispatching event's matching stage.
    pub fn export_rules(&self) -> Vec<TransformerRule> {
        self.inner.routing.write().snapshot()
    }

    /// Replaces the rule table from a checkpoint. On error the live table is
    /// untouched.
    pub fn import_rules(&self, rules: Vec<TransformerRule>) -> Result<(), RoutingError> {
        self.inner.routing.write().replace(rules)
    }

    pub fn rule_count(&self) -> usize {
        self.inner.routing.read().len()
    }
}

/// Drains queued asynchronous emissions, honoring per-rule delays without
/// holding up later emissions.
fn spawn_async_emitter(
    dispatcher: Dispatcher,
    mut rx: mpsc::UnboundedReceiver<AsyncEmission>,
) {
    tokio::spawn(async move {
        while let Some(emission) = rx.recv().await {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if let Some(delay) = emission.delay {
                    tokio::time::sleep(delay).await;
                }
                dispatcher.dispatch(emission.event).await;
            });
        }
    });
}
