// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Subscription Manager
//!
//! Owns observer subscriptions, their per-subscription rate limiters and
//! circuit breakers, and the asynchronous delivery workers. State here is
//! ephemeral by default: a plain process restart starts with an empty table,
//! and only explicit checkpoint restore repopulates it.
//!
//! Delivery path per inbound event, per matching subscription:
//! 1. filter condition (under the configured policy),
//! 2. rate-limit window — overflow is a silent, metriced drop,
//! 3. circuit breaker — `Open` skips delivery, an elapsed cool-down admits
//!    the single half-open probe,
//! 4. bounded delivery queue — overflow drops the oldest entry.
//!
//! The producer never blocks on an observer; actual delivery happens on the
//! subscription's worker task, one ordered queue per subscription so a
//! `(target, observer)` pair sees events in emission order.

use crate::domain::actor::ActorId;
use crate::domain::condition::{evaluate_with_policy, ConditionPolicy};
use crate::domain::config::RouterConfig;
use crate::domain::event::{Event, EventPattern};
use crate::domain::subscription::{
    CircuitBreaker, RateLimitWindow, Subscription, SubscriptionFilter, SubscriptionId,
    TargetSelector,
};
use crate::infrastructure::delivery::{DeliveryQueue, EventDelivery, ObserverTransport};
use crate::infrastructure::event_log::{EventLog, EventQuery};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Runtime knobs for the manager, sourced from the router configuration.
#[derive(Debug, Clone)]
pub struct ObservationSettings {
    pub queue_capacity: usize,
    pub delivery_timeout: Duration,
    pub failure_threshold: u32,
    pub cool_down: Duration,
    pub default_rate_limit: Option<crate::domain::subscription::RateLimit>,
    pub condition_policy: ConditionPolicy,
}

impl ObservationSettings {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            queue_capacity: config.observation.queue_capacity,
            delivery_timeout: config.observation.delivery_timeout,
            failure_threshold: config.observation.breaker.failure_threshold,
            cool_down: config.observation.breaker.cool_down,
            default_rate_limit: config.observation.default_rate_limit,
            condition_policy: config.routing.condition_policy,
        }
    }
}

impl Default for ObservationSettings {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

struct SubscriptionRuntime {
    queue: Arc<DeliveryQueue>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    window: Option<Mutex<RateLimitWindow>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    table: RwLock<Vec<Subscription>>,
    runtime: DashMap<SubscriptionId, Arc<SubscriptionRuntime>>,
    transport: Arc<dyn ObserverTransport>,
    event_log: Arc<EventLog>,
    settings: ObservationSettings,
}

#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(
        settings: ObservationSettings,
        transport: Arc<dyn ObserverTransport>,
        event_log: Arc<EventLog>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                table: RwLock::new(Vec::new()),
                runtime: DashMap::new(),
                transport,
                event_log,
                settings,
            }),
        }
    }

    /// Registers an observer against a target's event stream.
    pub fn subscribe(
        &self,
        observer: ActorId,
        target: TargetSelector,
        event_patterns: Vec<EventPattern>,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionId, ObservationError> {
        if event_patterns.is_empty() {
            return Err(ObservationError::InvalidPattern(
                "at least one event pattern is required".into(),
            ));
        }
        let subscription = Subscription {
            subscription_id: SubscriptionId::new(),
            observer_id: observer,
            target_id: target,
            event_patterns,
            filter,
            created_at: Utc::now(),
        };
        let id = subscription.subscription_id;
        {
            let mut table = self.inner.table.write();
            self.start_runtime(&subscription);
            table.push(subscription);
        }
        debug!(subscription_id = %id, "subscription created");
        Ok(id)
    }

    /// Subscriptions, optionally filtered by observer, in creation order.
    pub fn list(&self, observer: Option<&ActorId>) -> Vec<Subscription> {
        self.inner
            .table
            .read()
            .iter()
            .filter(|sub| observer.map(|o| &sub.observer_id == o).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Removes a subscription and cancels its in-flight deliveries.
    /// Idempotent: an unknown id is a no-op returning false.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = {
            let mut table = self.inner.table.write();
            let before = table.len();
            table.retain(|sub| sub.subscription_id != *id);
            table.len() != before
        };
        if removed {
            self.stop_runtime(id);
            debug!(subscription_id = %id, "subscription removed");
        }
        removed
    }

    /// Observer-side termination cleanup: removes every subscription whose
    /// `observer_id` matches. Target-side subscriptions are deliberately
    /// left alive so retrospective queries keep working for observers that
    /// outlive their targets.
    pub fn on_actor_terminated(&self, actor: &ActorId) -> usize {
        let removed: Vec<SubscriptionId> = {
            let mut table = self.inner.table.write();
            let ids: Vec<SubscriptionId> = table
                .iter()
                .filter(|sub| &sub.observer_id == actor)
                .map(|sub| sub.subscription_id)
                .collect();
            table.retain(|sub| &sub.observer_id != actor);
            ids
        };
        for id in &removed {
            self.stop_runtime(id);
        }
        removed.len()
    }

    /// Fans a dispatched event out to every matching subscription's delivery
    /// queue. Never blocks on and never errors toward the producer.
    pub fn on_event(&self, event: &Event) {
        let matching: Vec<(SubscriptionId, Option<String>)> = {
            let table = self.inner.table.read();
            table
                .iter()
                .filter(|sub| sub.matches(event))
                .map(|sub| (sub.subscription_id, sub.filter.condition.clone()))
                .collect()
        };

        let context_map = event.context.to_map();
        for (id, condition) in matching {
            if let Some(condition) = &condition {
                if !evaluate_with_policy(
                    condition,
                    &event.data,
                    &context_map,
                    self.inner.settings.condition_policy,
                ) {
                    continue;
                }
            }
            let Some(runtime) = self.inner.runtime.get(&id).map(|r| r.value().clone()) else {
                continue;
            };

            if let Some(window) = &runtime.window {
                if !window.lock().try_admit(Instant::now()) {
                    metrics::counter!("argus_deliveries_dropped_total", "reason" => "rate_limited")
                        .increment(1);
                    continue;
                }
            }

            if !runtime.breaker.lock().admit(Instant::now()) {
                metrics::counter!("argus_deliveries_dropped_total", "reason" => "circuit_open")
                    .increment(1);
                continue;
            }

            if runtime.queue.push(event.clone()).is_some() {
                metrics::counter!("argus_deliveries_dropped_total", "reason" => "queue_overflow")
                    .increment(1);
                warn!(subscription_id = %id, "delivery queue overflow, oldest entry dropped");
            }
        }
    }

    /// Retrospective query against the event log, independent of live
    /// subscriptions.
    pub fn query(
        &self,
        target: TargetSelector,
        patterns: Vec<EventPattern>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<Event> {
        self.inner.event_log.query(&EventQuery {
            target,
            patterns,
            since,
            limit,
        })
    }

    /// Creation-ordered copy of the table, as checkpointed.
    pub fn export(&self) -> Vec<Subscription> {
        self.inner.table.write().clone()
    }

    /// Replaces the whole table with checkpointed records, verbatim —
    /// including subscription ids. Breakers, windows, and queues start fresh.
    pub fn import(&self, subscriptions: Vec<Subscription>) {
        let mut table = self.inner.table.write();
        let existing: Vec<SubscriptionId> =
            table.iter().map(|sub| sub.subscription_id).collect();
        for id in &existing {
            self.stop_runtime(id);
        }
        table.clear();
        for subscription in subscriptions {
            self.start_runtime(&subscription);
            table.push(subscription);
        }
    }

    pub fn count(&self) -> usize {
        self.inner.table.read().len()
    }

    fn start_runtime(&self, subscription: &Subscription) {
        let settings = &self.inner.settings;
        let rate_limit = subscription
            .filter
            .rate_limit
            .or(settings.default_rate_limit);
        let runtime = Arc::new(SubscriptionRuntime {
            queue: Arc::new(DeliveryQueue::new(settings.queue_capacity)),
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                settings.failure_threshold,
                settings.cool_down,
            ))),
            window: rate_limit.map(|limit| Mutex::new(RateLimitWindow::new(limit))),
            worker: Mutex::new(None),
        });
        let handle = spawn_delivery_worker(
            subscription.subscription_id,
            subscription.observer_id.clone(),
            runtime.queue.clone(),
            runtime.breaker.clone(),
            self.inner.transport.clone(),
            settings.delivery_timeout,
        );
        *runtime.worker.lock() = Some(handle);
        self.inner.runtime.insert(subscription.subscription_id, runtime);
    }

    fn stop_runtime(&self, id: &SubscriptionId) {
        if let Some((_, runtime)) = self.inner.runtime.remove(id) {
            if let Some(handle) = runtime.worker.lock().take() {
                handle.abort();
            }
        }
    }
}

/// One ordered worker per subscription. Pops queued events and attempts
/// delivery with a timeout; outcomes feed the circuit breaker.
fn spawn_delivery_worker(
    subscription_id: SubscriptionId,
    observer: ActorId,
    queue: Arc<DeliveryQueue>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    transport: Arc<dyn ObserverTransport>,
    delivery_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            while let Some(event) = queue.pop() {
                let delivery = EventDelivery {
                    subscription_id,
                    event,
                };
                let attempt =
                    tokio::time::timeout(delivery_timeout, transport.deliver(&observer, &delivery))
                        .await;
                match attempt {
                    Ok(Ok(())) => {
                        breaker.lock().record_success();
                        metrics::counter!("argus_deliveries_total").increment(1);
                    }
                    Ok(Err(err)) => {
                        warn!(subscription_id = %subscription_id, observer = %observer, error = %err, "delivery failed");
                        breaker.lock().record_failure(Instant::now());
                    }
                    Err(_) => {
                        warn!(subscription_id = %subscription_id, observer = %observer, "delivery timed out");
                        breaker.lock().record_failure(Instant::now());
                    }
                }
            }
            queue.wait().await;
        }
    })
}
