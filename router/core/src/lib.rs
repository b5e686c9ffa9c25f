// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! ARGUS router core
//!
//! Event routing and observation engine for the ARGUS daemon: the condition
//! evaluator, the transformer-rule dispatcher, the subscription manager with
//! rate limiting and circuit breaking, and the event log + checkpoint store.
//!
//! # Architecture
//!
//! - **domain** - events, conditions, rules, subscriptions, checkpoints
//! - **application** - dispatcher, subscription manager, checkpoint service
//! - **infrastructure** - event log, checkpoint store, delivery transport
//! - **presentation** - NDJSON-over-TCP wire protocol

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use application::checkpoint_service::{CheckpointService, RestoreReport};
pub use application::dispatcher::Dispatcher;
pub use application::observation::{ObservationError, ObservationSettings, SubscriptionManager};
pub use domain::actor::ActorId;
pub use domain::checkpoint::{Checkpoint, CheckpointId, RouterSnapshot};
pub use domain::condition::{evaluate, evaluate_with_policy, ConditionError, ConditionPolicy};
pub use domain::config::{RouterConfig, RouterConfigManifest};
pub use domain::event::{Event, EventContext, EventData, EventName, EventPattern};
pub use domain::routing::{Mapping, RoutingError, RoutingTable, TransformerRule};
pub use domain::subscription::{
    BreakerState, CircuitBreaker, RateLimit, RateLimitWindow, Subscription, SubscriptionFilter,
    SubscriptionId, TargetSelector,
};
pub use infrastructure::checkpoint_store::{CheckpointStore, CheckpointStoreError};
pub use infrastructure::delivery::{
    ChannelTransport, DeliveryError, EventDelivery, ObserverTransport,
};
pub use infrastructure::event_log::{EventLog, EventQuery};
