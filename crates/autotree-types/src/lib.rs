//! Shared types for the autotree attack-tree generator.
//!
//! This crate provides the foundational types used across all other autotree crates:
//! - `AttackTreeError` — unified error taxonomy
//! - `AttackNode` — a node of the attack tree
//! - `CvssMetrics` / `CvssV3` — risk metrics and the derived base score

mod cvss;
mod node;

pub use cvss::*;
pub use node::*;

/// Unified error type for all autotree subsystems.
#[derive(Debug, thiserror::Error)]
pub enum AttackTreeError {
    // === Completion Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Completion failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: usize, last_error: String },

    // === Configuration ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === Tree Errors ===
    #[error("Invariant violated on node '{node}': {message}")]
    InvariantViolation { node: String, message: String },

    // === Persistence ===
    #[error("Store error: {0}")]
    StoreError(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl AttackTreeError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttackTreeError::RateLimited { .. }
                | AttackTreeError::RequestTimeout { .. }
                | AttackTreeError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent: retrying or continuing the
    /// current tree cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AttackTreeError::AuthError { .. }
                | AttackTreeError::ConfigError(_)
                | AttackTreeError::InvariantViolation { .. }
                | AttackTreeError::RetriesExhausted { .. }
        )
    }

    /// Suggested wait before the next attempt, when the provider sent one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AttackTreeError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, AttackTreeError>`.
pub type Result<T> = std::result::Result<T, AttackTreeError>;
