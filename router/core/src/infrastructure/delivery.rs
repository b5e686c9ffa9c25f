// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Observer delivery transport and the bounded per-subscription queue.
//!
//! The transport is the seam between the subscription manager and whatever
//! carries events to an observer. The daemon binds connected NDJSON clients
//! through [`ChannelTransport`]; tests plug in their own implementations.

use crate::domain::actor::ActorId;
use crate::domain::event::Event;
use crate::domain::subscription::SubscriptionId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// A single delivery handed to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDelivery {
    pub subscription_id: SubscriptionId,
    pub event: Event,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("observer '{0}' has no attached delivery channel")]
    NotAttached(ActorId),

    #[error("delivery channel for observer '{0}' is closed")]
    ChannelClosed(ActorId),
}

/// Carries one delivery to one observer. Implementations must not block
/// indefinitely; the subscription manager wraps every call in a timeout and
/// treats timeouts as failures.
#[async_trait]
pub trait ObserverTransport: Send + Sync {
    async fn deliver(&self, observer: &ActorId, delivery: &EventDelivery)
        -> Result<(), DeliveryError>;
}

/// In-process transport: observers attach an mpsc channel (the daemon does
/// this when a connection sends `observation:attach`), deliveries are pushed
/// into it. An observer with no attached channel fails delivery, which feeds
/// its subscriptions' circuit breakers.
#[derive(Default)]
pub struct ChannelTransport {
    channels: DashMap<ActorId, mpsc::Sender<EventDelivery>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a delivery channel for an observer, replacing any previous one.
    pub fn attach(&self, observer: ActorId, capacity: usize) -> mpsc::Receiver<EventDelivery> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.channels.insert(observer, tx);
        rx
    }

    pub fn detach(&self, observer: &ActorId) {
        self.channels.remove(observer);
    }

    pub fn is_attached(&self, observer: &ActorId) -> bool {
        self.channels.contains_key(observer)
    }
}

#[async_trait]
impl ObserverTransport for ChannelTransport {
    async fn deliver(
        &self,
        observer: &ActorId,
        delivery: &EventDelivery,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .channels
            .get(observer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeliveryError::NotAttached(observer.clone()))?;
        sender
            .send(delivery.clone())
            .await
            .map_err(|_| DeliveryError::ChannelClosed(observer.clone()))
    }
}

/// Bounded FIFO feeding a subscription's delivery worker.
///
/// On overflow the oldest entry is dropped and returned so the caller can
/// account for it; pushing never blocks the producer.
pub struct DeliveryQueue {
    capacity: usize,
    items: Mutex<VecDeque<Event>>,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueues an event, returning the evicted oldest entry on overflow.
    pub fn push(&self, event: Event) -> Option<Event> {
        let dropped = {
            let mut items = self.items.lock();
            let dropped = if items.len() == self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(event);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    pub fn pop(&self) -> Option<Event> {
        self.items.lock().pop_front()
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
