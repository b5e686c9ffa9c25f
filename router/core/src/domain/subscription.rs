// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Observer subscriptions and their per-subscription resilience state.
//!
//! The subscription record is the one piece of state that survives
//! checkpoint/restore byte-identically. The circuit breaker and rate-limit
//! window are runtime-only: they start fresh on every process start and
//! after every restore.

use crate::domain::actor::ActorId;
use crate::domain::event::{Event, EventPattern};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubscriptionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The actor a subscription watches: a specific agent or every agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetSelector {
    Any,
    Actor(ActorId),
}

impl TargetSelector {
    pub fn matches(&self, originator: Option<&ActorId>) -> bool {
        match self {
            TargetSelector::Any => true,
            TargetSelector::Actor(target) => originator == Some(target),
        }
    }
}

impl From<String> for TargetSelector {
    fn from(s: String) -> Self {
        if s == "*" {
            TargetSelector::Any
        } else {
            TargetSelector::Actor(ActorId(s))
        }
    }
}

impl From<TargetSelector> for String {
    fn from(selector: TargetSelector) -> Self {
        match selector {
            TargetSelector::Any => "*".to_string(),
            TargetSelector::Actor(id) => id.0,
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::Any => f.write_str("*"),
            TargetSelector::Actor(id) => id.fmt(f),
        }
    }
}

/// Delivery ceiling: at most `max_events` deliveries within any rolling
/// window of `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_events: u32,
    pub window_seconds: u64,
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Optional per-subscription delivery filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// An observer's registration against a target's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub observer_id: ActorId,
    pub target_id: TargetSelector,
    pub event_patterns: Vec<EventPattern>,
    #[serde(default)]
    pub filter: SubscriptionFilter,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Target and name-pattern match. The filter condition is applied
    /// separately by the subscription manager under its condition policy.
    pub fn matches(&self, event: &Event) -> bool {
        self.target_id.matches(event.originator())
            && self
                .event_patterns
                .iter()
                .any(|pattern| pattern.matches(&event.name))
    }
}

// ── Rate-limit window ─────────────────────────────────────────────────────

/// Rolling log of delivery instants. Admission prunes entries older than the
/// window, then admits only while the window holds fewer than `max_events`.
#[derive(Debug)]
pub struct RateLimitWindow {
    limit: RateLimit,
    hits: VecDeque<Instant>,
}

impl RateLimitWindow {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: VecDeque::with_capacity(limit.max_events as usize),
        }
    }

    pub fn try_admit(&mut self, now: Instant) -> bool {
        let window = self.limit.window();
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() < self.limit.max_events as usize {
            self.hits.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn in_window(&self) -> usize {
        self.hits.len()
    }
}

// ── Circuit breaker ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-subscription circuit breaker.
///
/// `Closed --(threshold consecutive failures)--> Open --(cool-down)-->
/// HalfOpen --(success)--> Closed`; a failed probe returns to `Open` and
/// restarts the cool-down. Exactly one probe is admitted while `HalfOpen`.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cool_down: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_dispatched: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cool_down,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_dispatched: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a delivery may proceed now. Transitions `Open -> HalfOpen`
    /// once the cool-down has elapsed and admits the single probe.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.cool_down)
                    .unwrap_or(true);
                if elapsed {
                    self.state = BreakerState::HalfOpen;
                    self.probe_dispatched = true;
                    metrics::counter!("argus_circuit_transitions_total", "state" => "half_open")
                        .increment(1);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_dispatched {
                    false
                } else {
                    self.probe_dispatched = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            metrics::counter!("argus_circuit_transitions_total", "state" => "closed").increment(1);
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_dispatched = false;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let tripped = match self.state {
            BreakerState::Closed => self.consecutive_failures >= self.failure_threshold,
            // A failed probe reopens immediately and restarts the cool-down.
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        };
        if tripped {
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            self.probe_dispatched = false;
            metrics::counter!("argus_circuit_transitions_total", "state" => "open").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventContext, EventData, EventName};

    fn event(name: &str, originator: Option<&str>) -> Event {
        let context = match originator {
            Some(id) => EventContext::for_originator(ActorId::new(id)),
            None => EventContext::default(),
        };
        Event::new(EventName::parse(name).unwrap(), EventData::new(), context)
    }

    fn subscription(target: TargetSelector, patterns: &[&str]) -> Subscription {
        Subscription {
            subscription_id: SubscriptionId::new(),
            observer_id: ActorId::new("observer-a"),
            target_id: target,
            event_patterns: patterns
                .iter()
                .map(|p| EventPattern::parse(p).unwrap())
                .collect(),
            filter: SubscriptionFilter::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_subscription_matching() {
        let sub = subscription(
            TargetSelector::Actor(ActorId::new("agent-b")),
            &["test:*"],
        );
        assert!(sub.matches(&event("test:event", Some("agent-b"))));
        assert!(!sub.matches(&event("other:event", Some("agent-b"))));
        assert!(!sub.matches(&event("test:event", Some("agent-c"))));
        assert!(!sub.matches(&event("test:event", None)));

        let wildcard = subscription(TargetSelector::Any, &["*:*"]);
        assert!(wildcard.matches(&event("test:event", Some("anyone"))));
        assert!(wildcard.matches(&event("test:event", None)));
    }

    #[test]
    fn test_target_selector_serde() {
        let any: TargetSelector = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(any, TargetSelector::Any);
        let actor: TargetSelector = serde_json::from_str("\"agent-1\"").unwrap();
        assert_eq!(actor, TargetSelector::Actor(ActorId::new("agent-1")));
        assert_eq!(serde_json::to_string(&TargetSelector::Any).unwrap(), "\"*\"");
    }

    #[test]
    fn test_rate_limit_window_rolling() {
        let mut window = RateLimitWindow::new(RateLimit {
            max_events: 3,
            window_seconds: 60,
        });
        let start = Instant::now();
        assert!(window.try_admit(start));
        assert!(window.try_admit(start + Duration::from_secs(1)));
        assert!(window.try_admit(start + Duration::from_secs(2)));
        // Window full.
        assert!(!window.try_admit(start + Duration::from_secs(30)));
        assert_eq!(window.in_window(), 3);
        // First hit expires at +60s; one slot frees up.
        assert!(window.try_admit(start + Duration::from_secs(61)));
        assert!(!window.try_admit(start + Duration::from_secs(61)));
    }

    #[test]
    fn test_breaker_opens_after_exact_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let now = Instant::now();
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.admit(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_breaker_half_open_single_probe() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let start = Instant::now();
        breaker.record_failure(start);
        assert_eq!(breaker.state(), BreakerState::Open);

        // Cool-down elapsed: exactly one probe admitted.
        assert!(breaker.admit(start + Duration::from_secs(10)));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.admit(start + Duration::from_secs(10)));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_failed_probe_restarts_cool_down() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let start = Instant::now();
        breaker.record_failure(start);
        assert!(breaker.admit(start + Duration::from_secs(10)));
        breaker.record_failure(start + Duration::from_secs(11));
        assert_eq!(breaker.state(), BreakerState::Open);
        // Cool-down restarted from the probe failure.
        assert!(!breaker.admit(start + Duration::from_secs(15)));
        assert!(breaker.admit(start + Duration::from_secs(21)));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let now = Instant::now();
        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_subscription_serde_round_trip_is_stable() {
        let sub = Subscription {
            subscription_id: SubscriptionId::new(),
            observer_id: ActorId::new("observer-a"),
            target_id: TargetSelector::Actor(ActorId::new("agent-b")),
            event_patterns: vec![EventPattern::parse("test:*").unwrap()],
            filter: SubscriptionFilter {
                rate_limit: Some(RateLimit {
                    max_events: 10,
                    window_seconds: 60,
                }),
                condition: Some("severity >= 3".into()),
            },
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&sub).unwrap();
        let restored: Subscription = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sub);
        // Byte-identical re-serialization backs the restore invariant.
        assert_eq!(serde_json::to_string(&restored).unwrap(), json);
    }
}
