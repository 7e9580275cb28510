//! Environment-driven settings for the `autotree` binary.

use std::path::PathBuf;

use autotree_llm::{LlmClient, OpenAiCompatAdapter};
use autotree_types::{AttackTreeError, Result};

pub const DEFAULT_DB_PATH: &str = "attack_trees.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub db_path: PathBuf,
}

impl Config {
    /// Read `GROQ_API_KEY`, `AUTOTREE_BASE_URL`, `AUTOTREE_MODEL` and
    /// `AUTOTREE_DB`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: get("GROQ_API_KEY"),
            base_url: get("AUTOTREE_BASE_URL"),
            model: get("AUTOTREE_MODEL"),
            db_path: get("AUTOTREE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
        }
    }

    pub fn with_db_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.db_path = path;
        }
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if model.is_some() {
            self.model = model;
        }
        self
    }

    /// Completion client for generation. Fails without an API key.
    pub fn completion_client(&self) -> Result<LlmClient> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| AttackTreeError::ConfigError("GROQ_API_KEY not set".into()))?;

        let mut adapter = OpenAiCompatAdapter::new(api_key);
        if let Some(url) = &self.base_url {
            adapter = adapter.with_base_url(url.clone());
        }
        if let Some(model) = &self.model {
            adapter = adapter.with_model(model.clone());
        }
        Ok(LlmClient::new(adapter))
    }
}
