//! Per node-type fan-out configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use autotree_types::{AttackTreeError, Result, SURFACE_GOAL};

/// What a node of some type decomposes into, and roughly how many.
///
/// The count range is only a hint in the generation prompt; the expander
/// accepts whatever the completion service returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    pub child_type: String,
    #[serde(alias = "min")]
    pub min_count: u32,
    #[serde(alias = "max")]
    pub max_count: u32,
}

impl ChildSpec {
    pub fn new(child_type: impl Into<String>, min_count: u32, max_count: u32) -> Self {
        Self {
            child_type: child_type.into(),
            min_count,
            max_count,
        }
    }
}

/// Immutable lookup from `node_type` to [`ChildSpec`].
///
/// Types without an entry do not expand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildGenerationPolicy {
    entries: BTreeMap<String, ChildSpec>,
}

impl ChildGenerationPolicy {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// surface_goal → attack_vector → method → technique → technique.
    pub fn automotive() -> Self {
        Self::empty()
            .with_entry(SURFACE_GOAL, ChildSpec::new("attack_vector", 4, 7))
            .with_entry("attack_vector", ChildSpec::new("method", 2, 4))
            .with_entry("method", ChildSpec::new("technique", 2, 4))
            .with_entry("technique", ChildSpec::new("technique", 1, 3))
    }

    pub fn with_entry(mut self, node_type: impl Into<String>, spec: ChildSpec) -> Self {
        self.entries.insert(node_type.into(), spec);
        self
    }

    pub fn lookup(&self, node_type: &str) -> Option<&ChildSpec> {
        self.entries.get(node_type)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a JSON object of `node_type -> {child_type, min_count, max_count}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(json)
            .map_err(|e| AttackTreeError::ConfigError(format!("invalid policy: {e}")))?;
        policy.check()?;
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AttackTreeError::ConfigError(format!("cannot read policy {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    fn check(&self) -> Result<()> {
        for (node_type, spec) in &self.entries {
            if spec.min_count > spec.max_count {
                return Err(AttackTreeError::ConfigError(format!(
                    "policy entry '{node_type}': min_count {} exceeds max_count {}",
                    spec.min_count, spec.max_count
                )));
            }
        }
        Ok(())
    }
}

impl Default for ChildGenerationPolicy {
    fn default() -> Self {
        Self::automotive()
    }
}
