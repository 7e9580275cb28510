use async_trait::async_trait;

use autotree_types::Result;

/// Opaque text-completion service.
///
/// Implementations are expected to return a numbered list, one goal per line,
/// but callers must tolerate anything.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, system_instruction: &str) -> Result<String>;
}
