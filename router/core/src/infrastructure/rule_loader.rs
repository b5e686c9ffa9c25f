// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Startup loading of the declarative RoutingRules manifest.
//!
//! Rules are configuration, not code: operators declare them in a
//! Kubernetes-style YAML manifest referenced by `routing.rules_file`.
//! Invalid definitions abort startup; they are never silently accepted.

use crate::domain::config::ManifestMetadata;
use crate::domain::routing::{RoutingTable, TransformerRule};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRulesManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: RoutingRulesSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRulesSpec {
    #[serde(default)]
    pub rules: Vec<TransformerRule>,
}

/// Parses and validates a RoutingRules manifest, returning the declared
/// rules in declaration order.
pub fn load_rules(path: &Path) -> Result<Vec<TransformerRule>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    let manifest: RoutingRulesManifest = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse rules file {}", path.display()))?;

    if manifest.kind != "RoutingRules" {
        bail!(
            "rules file {}: unsupported kind '{}' (expected RoutingRules)",
            path.display(),
            manifest.kind
        );
    }

    // Stage through a table so duplicate names and bad definitions are
    // caught with the same validation the runtime add path uses.
    let mut staged = RoutingTable::new();
    for rule in &manifest.spec.rules {
        staged
            .add(rule.clone())
            .with_context(|| format!("rules file {}", path.display()))?;
    }

    info!(
        rules = manifest.spec.rules.len(),
        manifest = %manifest.metadata.name,
        "loaded routing rules"
    );
    Ok(manifest.spec.rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_manifest() {
        let file = write_manifest(
            r#"
apiVersion: 100monkeys.ai/v1
kind: RoutingRules
metadata:
  name: default-rules
spec:
  rules:
    - name: route-success
      source_pattern: "completion:internal_result"
      target_event: "completion:result"
      condition: "status == 'success'"
    - name: route-errors
      source_pattern: "*:error"
      target_event: "errors:raised"
      async_dispatch: true
      priority: 10
"#,
        );
        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "route-success");
        assert_eq!(rules[1].priority, 10);
    }

    #[test]
    fn test_load_rejects_wrong_kind() {
        let file = write_manifest(
            r#"
apiVersion: 100monkeys.ai/v1
kind: RouterConfig
metadata:
  name: oops
spec:
  rules: []
"#,
        );
        assert!(load_rules(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_duplicate_rule_names() {
        let file = write_manifest(
            r#"
apiVersion: 100monkeys.ai/v1
kind: RoutingRules
metadata:
  name: dupes
spec:
  rules:
    - name: same
      source_pattern: "a:*"
      target_event: "sink:a"
    - name: same
      source_pattern: "b:*"
      target_event: "sink:b"
"#,
        );
        assert!(load_rules(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_malformed_pattern() {
        let file = write_manifest(
            r#"
apiVersion: 100monkeys.ai/v1
kind: RoutingRules
metadata:
  name: bad
spec:
  rules:
    - name: broken
      source_pattern: "no-colon"
      target_event: "sink:a"
"#,
        );
        assert!(load_rules(file.path()).is_err());
    }
}
