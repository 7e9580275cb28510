use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use autotree_types::Result;

use crate::{
    execute_with_retry, CompletionService, DynProvider, Message, OpenAiCompatAdapter,
    ProviderAdapter, Request, Response, RetryPolicy,
};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTrackingMiddleware
// ---------------------------------------------------------------------------

/// Accumulates token usage. Clones share the same counters.
#[derive(Clone, Default)]
pub struct UsageTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// A single provider behind a retry policy and a middleware chain.
pub struct LlmClient {
    provider: DynProvider,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    seed: Option<u64>,
    retry: RetryPolicy,
    middleware: Vec<Box<dyn Middleware>>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Sampling defaults favour repeatable output: temperature 0.2, seed 42.
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        let model = provider.default_model().to_string();
        Self {
            provider: DynProvider::new(provider),
            model,
            temperature: Some(0.2),
            max_tokens: Some(600),
            seed: Some(42),
            retry: RetryPolicy::default(),
            middleware: Vec::new(),
        }
    }

    /// Groq-backed client from `GROQ_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(OpenAiCompatAdapter::from_env()?))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn build_request(&self, prompt: &str, system_instruction: &str) -> Request {
        Request {
            model: self.model.clone(),
            messages: vec![Message::system(system_instruction), Message::user(prompt)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            seed: self.seed,
        }
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, prompt: &str, system_instruction: &str) -> Result<String> {
        let mut request = self.build_request(prompt, system_instruction);
        for m in &self.middleware {
            m.before(&mut request);
        }

        let provider = &self.provider;
        let req = &request;
        let mut response =
            execute_with_retry(move || provider.complete(req), &self.retry, provider.name())
                .await?;

        for m in &self.middleware {
            m.after(&request, &mut response);
        }

        Ok(response.text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
