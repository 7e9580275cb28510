use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use autotree_types::{AttackNode, Result};

use crate::{check_storable, StoredTree, TreeStore};

/// In-process [`TreeStore`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTreeStore {
    trees: RwLock<HashMap<String, StoredTree>>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn get(&self, surface_goal: &str) -> Result<Option<StoredTree>> {
        let trees = self.trees.read().await;
        match trees.get(surface_goal) {
            Some(stored) => {
                stored.tree.check_invariants()?;
                Ok(Some(stored.clone()))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, surface_goal: &str, tree: &AttackNode) -> Result<()> {
        check_storable(tree)?;
        let now = Utc::now();
        let mut trees = self.trees.write().await;
        let created_at = trees
            .get(surface_goal)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        trees.insert(
            surface_goal.to_string(),
            StoredTree {
                surface_goal: surface_goal.to_string(),
                tree: tree.clone(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn list_goals(&self) -> Result<Vec<String>> {
        let mut goals: Vec<String> = self.trees.read().await.keys().cloned().collect();
        goals.sort();
        Ok(goals)
    }
}
