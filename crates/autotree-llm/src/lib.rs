//! Text-completion client used to generate attack-tree candidates.
//!
//! Provides the `CompletionService` trait consumed by the tree expander, a
//! `ProviderAdapter` trait with an OpenAI-compatible chat adapter (Groq by
//! default), an explicit `RetryPolicy`, and `LlmClient`, which ties a
//! provider, the retry policy and a middleware chain together.

mod client;
mod completion;
mod openai_compat;
mod provider;
mod retry;
mod types;

pub use client::*;
pub use completion::CompletionService;
pub use openai_compat::OpenAiCompatAdapter;
pub use provider::*;
pub use retry::{execute_with_retry, BackoffPolicy, RetryPolicy};
pub use types::*;
