// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::routing::TransformerRule;
use crate::domain::subscription::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CheckpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The state captured by a checkpoint: the routing table and subscription
/// records. The event log is deliberately excluded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterSnapshot {
    pub routing_rules: Vec<TransformerRule>,
    pub subscriptions: Vec<Subscription>,
}

/// An explicitly created, durable snapshot of otherwise ephemeral state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub snapshot: RouterSnapshot,
}

impl Checkpoint {
    pub fn new(reason: impl Into<String>, snapshot: RouterSnapshot) -> Self {
        Self {
            checkpoint_id: CheckpointId::new(),
            timestamp: Utc::now(),
            reason: reason.into(),
            snapshot,
        }
    }
}
