// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event model for the routing engine.
//!
//! Every occurrence flowing through the router is an [`Event`]: a two-part
//! namespaced name (`domain:action`), an ordered data payload, a timestamp,
//! and a correlation context. Events are immutable once dispatched; derived
//! events are new values with a bumped hop count.

use crate::domain::actor::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Payload map type. `serde_json` is built with `preserve_order`, so field
/// order survives dispatch and checkpointing.
pub type EventData = Map<String, Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventNameError {
    #[error("event name '{0}' is not of the form 'domain:action'")]
    Malformed(String),

    #[error("event pattern '{0}' is not a valid 'domain:action' glob")]
    MalformedPattern(String),
}

fn name_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]+:[a-z0-9_-]+$").expect("static regex"))
}

fn pattern_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_*-]+:[a-z0-9_*-]+$").expect("static regex")
    })
}

/// Validated two-part event name, e.g. `completion:result`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName(String);

impl EventName {
    pub fn parse(name: &str) -> Result<Self, EventNameError> {
        if name_regex().is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(EventNameError::Malformed(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace segment before the colon.
    pub fn domain(&self) -> &str {
        self.0.split_once(':').map(|(d, _)| d).unwrap_or(&self.0)
    }

    /// The action segment after the colon.
    pub fn action(&self) -> &str {
        self.0.split_once(':').map(|(_, a)| a).unwrap_or("")
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventName {
    type Err = EventNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EventName {
    type Error = EventNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> Self {
        name.0
    }
}

/// Glob over the two namespaced segments of an event name.
///
/// Each segment is matched independently: it is either exact, the single
/// wildcard `*`, or contains one `*` splitting it into a required prefix and
/// suffix (`comp*`, `*_result`). `test:*` and `*:error` are the common forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventPattern(String);

impl EventPattern {
    pub fn parse(pattern: &str) -> Result<Self, EventNameError> {
        if !pattern_regex().is_match(pattern) {
            return Err(EventNameError::MalformedPattern(pattern.to_string()));
        }
        // At most one wildcard per segment keeps matching linear.
        for segment in pattern.splitn(2, ':') {
            if segment.matches('*').count() > 1 {
                return Err(EventNameError::MalformedPattern(pattern.to_string()));
            }
        }
        Ok(Self(pattern.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, name: &EventName) -> bool {
        let (pat_domain, pat_action) = self.0.split_once(':').expect("validated pattern");
        segment_matches(pat_domain, name.domain()) && segment_matches(pat_action, name.action())
    }

    /// True for the `*:*` pattern, which matches every event.
    pub fn is_catch_all(&self) -> bool {
        self.0 == "*:*"
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == segment,
        Some((prefix, suffix)) => {
            segment.len() >= prefix.len() + suffix.len()
                && segment.starts_with(prefix)
                && segment.ends_with(suffix)
        }
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventPattern {
    type Err = EventNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EventPattern {
    type Error = EventNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EventPattern> for String {
    fn from(pattern: EventPattern) -> Self {
        pattern.0
    }
}

/// Correlation context carried by every event.
///
/// `hops` counts how many routing derivations produced this event; the
/// dispatcher refuses chains past its configured bound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// Actor that originally emitted the event (the observation "target").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator: Option<ActorId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub hops: u32,
}

impl EventContext {
    pub fn for_originator(originator: ActorId) -> Self {
        Self {
            originator: Some(originator),
            ..Self::default()
        }
    }

    /// Context for an event derived from this one by a routing rule.
    pub fn derived(&self) -> Self {
        Self {
            hops: self.hops + 1,
            ..self.clone()
        }
    }

    /// JSON view used by condition evaluation and mapping templates.
    pub fn to_map(&self) -> EventData {
        let mut map = Map::new();
        if let Some(originator) = &self.originator {
            map.insert("originator".into(), Value::String(originator.0.clone()));
        }
        if let Some(orchestration_id) = &self.orchestration_id {
            map.insert(
                "orchestration_id".into(),
                Value::String(orchestration_id.clone()),
            );
        }
        if let Some(request_id) = &self.request_id {
            map.insert("request_id".into(), Value::String(request_id.clone()));
        }
        map.insert("hops".into(), Value::from(self.hops));
        map
    }
}

/// A named, timestamped occurrence with a data payload and correlation
/// context. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,

    #[serde(default)]
    pub data: EventData,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub context: EventContext,
}

impl Event {
    pub fn new(name: EventName, data: EventData, context: EventContext) -> Self {
        Self {
            name,
            data,
            timestamp: Utc::now(),
            context,
        }
    }

    /// Actor this event is attributed to, if any.
    pub fn originator(&self) -> Option<&ActorId> {
        self.context.originator.as_ref()
    }
}
