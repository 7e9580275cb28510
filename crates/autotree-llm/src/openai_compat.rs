use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::{FinishReason, ProviderAdapter, Request, Response, Usage};
use autotree_types::{AttackTreeError, Result};

const GROQ_BASE_URL: &str = "https://api.groq.com/openai";
const GROQ_MODEL: &str = "llama-3.1-8b-instant";

// ---------------------------------------------------------------------------
// OpenAiCompatAdapter
// ---------------------------------------------------------------------------

/// Adapter for `/v1/chat/completions` endpoints (Groq, OpenAI and compatible).
#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    api_key: String,
    client: reqwest::Client,
    name: String,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OpenAiCompatAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            name: "groq".to_string(),
            base_url: GROQ_BASE_URL.to_string(),
            default_model: GROQ_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from `GROQ_API_KEY`. A missing key is a configuration error.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AttackTreeError::ConfigError("GROQ_API_KEY not set".into()))?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_name(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }

        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Response> {
        let id = body["id"].as_str().unwrap_or("").to_string();
        let model = body["model"].as_str().unwrap_or("").to_string();

        let choice = body["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| AttackTreeError::ProviderError {
                provider: self.name.clone(),
                status: 200,
                message: "Response contained no choices".into(),
                retryable: false,
            })?;

        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("stop") => FinishReason::EndTurn,
            Some("length") => FinishReason::MaxTokens,
            _ => FinishReason::Other,
        };

        let usage_obj = &body["usage"];
        let input_tokens = usage_obj["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = usage_obj["completion_tokens"].as_u64().unwrap_or(0);
        let total_tokens = usage_obj["total_tokens"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens);

        Ok(Response {
            id,
            text,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens,
            },
            model,
            finish_reason,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> AttackTreeError {
        if e.is_timeout() {
            AttackTreeError::RequestTimeout {
                provider: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AttackTreeError::ProviderError {
                provider: self.name.clone(),
                status: 0,
                message: e.to_string(),
                retryable: true,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after_header: Option<u64>,
    body: &str,
) -> AttackTreeError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => AttackTreeError::RateLimited {
            provider: provider.into(),
            retry_after_ms: retry_after_header.unwrap_or_else(|| retry_after_from_body(body)),
        },
        401 | 403 => AttackTreeError::AuthError {
            provider: provider.into(),
        },
        500..=599 => AttackTreeError::ProviderError {
            provider: provider.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => AttackTreeError::ProviderError {
            provider: provider.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

/// Seconds to milliseconds; negative, NaN and infinite hints are dropped.
fn hint_millis(secs: f64) -> Option<u64> {
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0) as u64)
}

fn retry_after_from_body(body: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["retry_after"].as_f64())
        .and_then(hint_millis)
        .unwrap_or(1000)
}

fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(hint_millis)
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn complete(&self, request: &Request) -> Result<Response> {
        let body = self.build_request_body(request);

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let retry_after = retry_after_header(resp.headers());
        let response_body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(map_error(&self.name, status, retry_after, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| AttackTreeError::ProviderError {
                provider: self.name.clone(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: false,
            })?;

        self.parse_response(json)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
