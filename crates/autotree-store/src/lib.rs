//! Attack-tree persistence.
//!
//! Trees are stored whole, keyed by their surface goal, with creation and
//! update timestamps. Saving under an existing goal replaces the tree and
//! keeps the original creation time.

mod memory;
mod sqlite;

pub use memory::MemoryTreeStore;
pub use sqlite::SqliteTreeStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autotree_types::{AttackNode, AttackTreeError, Result};

/// Deepest level a stored tree may reach.
///
/// Each level nests two JSON containers and the reader stops at 128, so
/// anything much deeper would save but never load again.
pub const MAX_STORED_LEVEL: u32 = 60;

/// Checks run on every write: consistent atomic state and a readable depth.
fn check_storable(tree: &AttackNode) -> Result<()> {
    tree.check_invariants()?;
    let depth = tree.max_level();
    if depth > MAX_STORED_LEVEL {
        return Err(AttackTreeError::StoreError(format!(
            "tree reaches level {depth}, deeper than the storable maximum {MAX_STORED_LEVEL}"
        )));
    }
    Ok(())
}

/// A saved tree and its timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTree {
    pub surface_goal: String,
    pub tree: AttackNode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document store keyed by surface goal.
///
/// Implementations reject trees whose atomic/cvss state is inconsistent,
/// both on write and on read, and refuse to write trees deeper than
/// [`MAX_STORED_LEVEL`].
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn get(&self, surface_goal: &str) -> Result<Option<StoredTree>>;

    /// Insert or replace the whole tree stored under `surface_goal`.
    async fn put(&self, surface_goal: &str, tree: &AttackNode) -> Result<()>;

    /// All stored surface goals, ascending.
    async fn list_goals(&self) -> Result<Vec<String>>;
}
