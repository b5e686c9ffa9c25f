// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mapping Template Engine
//!
//! Resolves a rule's mapping into the derived event's payload, using
//! Handlebars for placeholder substitution.
//!
//! # Render context
//!
//! - `data` - the source event's payload
//! - `context` - the source event's correlation context
//! - `meta.timestamp` - dispatch time (RFC 3339)
//! - `meta.source_event` - the source event's name
//!
//! A field value that is exactly one `{{path}}` reference copies the
//! referenced JSON value verbatim (numbers stay numbers, objects stay
//! objects); any other string renders to a string through Handlebars.

use crate::domain::event::{Event, EventData};
use crate::domain::routing::Mapping;
use chrono::Utc;
use handlebars::Handlebars;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::warn;

pub struct MappingEngine {
    registry: Handlebars<'static>,
}

impl Default for MappingEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn single_ref_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^\{\{\s*([A-Za-z0-9_.]+)\s*\}\}$").expect("static regex")
    })
}

impl MappingEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        // Unknown placeholders render empty instead of erroring, consistent
        // with unresolved identifiers reading as none in conditions.
        registry.set_strict_mode(false);
        Self { registry }
    }

    /// Builds the derived event's payload from the source event.
    pub fn resolve(&self, mapping: &Mapping, source: &Event) -> EventData {
        match mapping {
            Mapping::Passthrough => source.data.clone(),
            Mapping::Fields(fields) => {
                let scope = self.render_scope(source);
                let mut payload = Map::new();
                for (key, template) in fields {
                    payload.insert(key.clone(), self.resolve_value(template, &scope));
                }
                payload
            }
        }
    }

    fn render_scope(&self, source: &Event) -> Value {
        json!({
            "data": Value::Object(source.data.clone()),
            "context": Value::Object(source.context.to_map()),
            "meta": {
                "timestamp": Utc::now().to_rfc3339(),
                "source_event": source.name.as_str(),
            },
        })
    }

    fn resolve_value(&self, template: &Value, scope: &Value) -> Value {
        let Value::String(text) = template else {
            // Non-string mapping values are literal payload entries.
            return template.clone();
        };
        if let Some(captures) = single_ref_regex().captures(text) {
            return lookup(scope, &captures[1]);
        }
        match self.registry.render_template(text, scope) {
            Ok(rendered) => Value::String(rendered),
            Err(err) => {
                warn!(template = %text, error = %err, "mapping template render failed");
                Value::Null
            }
        }
    }
}

fn lookup(scope: &Value, path: &str) -> Value {
    let mut current = scope;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}
