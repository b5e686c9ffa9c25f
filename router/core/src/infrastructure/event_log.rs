// Event Log - append-only history of dispatched events
//
// Backs retrospective observation:query calls, so observation works even
// when no subscription existed at the time an event fired. Bounded by a
// retention policy; an optional JSONL sink keeps a durable trail.

use crate::domain::event::{Event, EventPattern};
use crate::domain::subscription::TargetSelector;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Query over the event log. `patterns` empty means every name.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub target: TargetSelector,
    pub patterns: Vec<EventPattern>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

pub struct EventLog {
    max_entries: usize,
    entries: RwLock<VecDeque<Event>>,
    sink: Option<Mutex<File>>,
}

impl EventLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: RwLock::new(VecDeque::with_capacity(max_entries.min(1024))),
            sink: None,
        }
    }

    /// Attaches a JSONL sink appending every event. Opened once; write
    /// failures are logged and do not affect the in-memory log.
    pub fn with_sink(mut self, path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.sink = Some(Mutex::new(file));
        Ok(self)
    }

    pub fn append(&self, event: &Event) {
        {
            let mut entries = self.entries.write();
            if entries.len() == self.max_entries {
                entries.pop_front();
            }
            entries.push_back(event.clone());
        }
        if let Some(sink) = &self.sink {
            match serde_json::to_string(event) {
                Ok(line) => {
                    let mut file = sink.lock();
                    if let Err(err) = writeln!(file, "{line}") {
                        warn!(error = %err, "event log sink write failed");
                    }
                }
                Err(err) => warn!(error = %err, "event log serialization failed"),
            }
        }
    }

    /// Matching events, newest first, capped at `limit`.
    pub fn query(&self, query: &EventQuery) -> Vec<Event> {
        let entries = self.entries.read();
        entries
            .iter()
            .rev()
            .filter(|event| query.target.matches(event.originator()))
            .filter(|event| {
                query.patterns.is_empty()
                    || query.patterns.iter().any(|p| p.matches(&event.name))
            })
            .filter(|event| query.since.map(|since| event.timestamp >= since).unwrap_or(true))
            .take(query.limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
