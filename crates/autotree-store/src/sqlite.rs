use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use autotree_types::{AttackNode, AttackTreeError, Result};

use crate::{check_storable, StoredTree, TreeStore};

fn store_err(e: sqlx::Error) -> AttackTreeError {
    AttackTreeError::StoreError(e.to_string())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AttackTreeError::StoreError(format!("bad timestamp '{value}': {e}")))
}

/// SQLite-backed [`TreeStore`].
///
/// One row per surface goal; the tree is stored as its JSON document.
#[derive(Debug, Clone)]
pub struct SqliteTreeStore {
    pool: SqlitePool,
}

impl SqliteTreeStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(store_err)?;
        tracing::debug!(path = %path.display(), "Opened tree store");
        Self::with_pool(pool).await
    }

    /// Private in-memory database, gone when the store is dropped.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(store_err)?;
        // Each connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(store_err)?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attack_trees (
                surface_goal TEXT NOT NULL PRIMARY KEY,
                tree         TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(store_err)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TreeStore for SqliteTreeStore {
    async fn get(&self, surface_goal: &str) -> Result<Option<StoredTree>> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            r#"
            SELECT surface_goal, tree, created_at, updated_at
            FROM attack_trees
            WHERE surface_goal = ?
            "#,
        )
        .bind(surface_goal)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some((surface_goal, tree, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let tree: AttackNode = serde_json::from_str(&tree)?;
        tree.check_invariants()?;
        Ok(Some(StoredTree {
            surface_goal,
            tree,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    async fn put(&self, surface_goal: &str, tree: &AttackNode) -> Result<()> {
        check_storable(tree)?;
        let json = serde_json::to_string(tree)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO attack_trees (surface_goal, tree, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(surface_goal) DO UPDATE
            SET tree = excluded.tree, updated_at = excluded.updated_at
            "#,
        )
        .bind(surface_goal)
        .bind(&json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        tracing::info!(
            goal = %surface_goal,
            nodes = tree.node_count(),
            bytes = json.len(),
            "Saved attack tree"
        );
        Ok(())
    }

    async fn list_goals(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT surface_goal
            FROM attack_trees
            ORDER BY surface_goal ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(|(goal,)| goal).collect())
    }
}
