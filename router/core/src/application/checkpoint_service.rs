// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Checkpoint create/restore orchestration.
//!
//! Create serializes the routing table and subscription records to the
//! durable store; restore is the distinct administrative stop-load-start
//! path that rehydrates both verbatim, subscription ids included. Both
//! paths take the tables' write locks, so they cannot interleave with live
//! dispatch, and a storage failure leaves the in-memory tables untouched.

use crate::application::dispatcher::Dispatcher;
use crate::application::observation::SubscriptionManager;
use crate::domain::checkpoint::{Checkpoint, CheckpointId, RouterSnapshot};
use crate::infrastructure::checkpoint_store::{CheckpointStore, CheckpointStoreError};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// What a restore brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub rules: usize,
    pub subscriptions: usize,
}

pub struct CheckpointService {
    store: Arc<CheckpointStore>,
    dispatcher: Dispatcher,
    observation: SubscriptionManager,
}

impl CheckpointService {
    pub fn new(
        store: Arc<CheckpointStore>,
        dispatcher: Dispatcher,
        observation: SubscriptionManager,
    ) -> Self {
        Self {
            store,
            dispatcher,
            observation,
        }
    }

    /// Snapshots routing rules + subscriptions and persists them. A storage
    /// error surfaces to the caller; nothing in memory changes either way.
    pub fn create(&self, reason: &str) -> Result<CheckpointId, CheckpointStoreError> {
        let snapshot = RouterSnapshot {
            routing_rules: self.dispatcher.export_rules(),
            subscriptions: self.observation.export(),
        };
        let checkpoint = Checkpoint::new(reason, snapshot);
        self.store.save(&checkpoint)?;
        metrics::counter!("argus_checkpoints_total").increment(1);
        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            rules = checkpoint.snapshot.routing_rules.len(),
            subscriptions = checkpoint.snapshot.subscriptions.len(),
            reason,
            "checkpoint created"
        );
        Ok(checkpoint.checkpoint_id)
    }

    /// Rehydrates the tables from a stored checkpoint. Rules are staged and
    /// validated before the live table is replaced, so a corrupt checkpoint
    /// cannot leave a half-restored table behind.
    pub fn restore(&self, id: &CheckpointId) -> Result<RestoreReport> {
        let checkpoint = self
            .store
            .load(id)
            .with_context(|| format!("failed to load checkpoint {id}"))?;
        let report = RestoreReport {
            rules: checkpoint.snapshot.routing_rules.len(),
            subscriptions: checkpoint.snapshot.subscriptions.len(),
        };
        self.dispatcher
            .import_rules(checkpoint.snapshot.routing_rules)
            .context("checkpoint contains invalid routing rules")?;
        self.observation.import(checkpoint.snapshot.subscriptions);
        info!(
            checkpoint_id = %id,
            rules = report.rules,
            subscriptions = report.subscriptions,
            "checkpoint restored"
        );
        Ok(report)
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }
}
