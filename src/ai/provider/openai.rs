//! OpenAI Chat Completions Provider
//!
//! Metered premium summarizer. Each call is charged by token, so the chain
//! reserves [`SummaryProvider::usage_estimate`] with the usage governor
//! before invoking it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SummaryProvider, http_client};
use crate::ai::quota::{UsageDelta, estimate_tokens};
use crate::config::PremiumConfig;
use crate::constants::provider as provider_constants;
use crate::types::{ErrorCategory, ErrorClassifier, ProviderError, Result};

const PROVIDER_NAME: &str = "openai";

const SYSTEM_PROMPT: &str = "You are a concise summarizer. \
    Produce a short summary (100-200 words) with a 2-3 sentence TL;DR.";

/// OpenAI API Provider with secure API key handling
pub struct OpenAiProvider {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    max_tokens_per_request: usize,
    usd_per_1k_tokens: f64,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: &PremiumConfig, api_key: SecretString) -> Result<Self> {
        Ok(Self {
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_tokens_per_request: config.max_tokens_per_request,
            usd_per_1k_tokens: config.usd_per_1k_tokens,
            client: http_client(config.timeout())?,
        })
    }

    /// Input clipped to the per-request token budget
    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        let max_chars = self
            .max_tokens_per_request
            .saturating_mul(provider_constants::CHARS_PER_TOKEN);
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => {
                warn!(
                    provider = PROVIDER_NAME,
                    max_tokens = self.max_tokens_per_request,
                    "Text exceeds max tokens per request, truncating"
                );
                &text[..idx]
            }
            None => text,
        }
    }

    fn build_request(&self, content: &str) -> ChatCompletionRequest<'_> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: content.to_string(),
                },
            ],
            max_tokens: self.max_output_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl SummaryProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn version(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, text: &str) -> std::result::Result<String, ProviderError> {
        let content = self.truncate(text);
        let request = self.build_request(content);
        let url = format!("{}/chat/completions", self.api_base);

        debug!(provider = PROVIDER_NAME, model = %self.model, "Sending request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, PROVIDER_NAME))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("OpenAI API error ({}): {}", status, body),
                PROVIDER_NAME,
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, PROVIDER_NAME))?;

        body.into_summary().ok_or_else(|| {
            ProviderError::with_provider(
                ErrorCategory::ParseError,
                "No content in OpenAI response",
                PROVIDER_NAME,
            )
        })
    }

    fn usage_estimate(&self, text: &str) -> Option<UsageDelta> {
        let tokens = estimate_tokens(self.truncate(text)) + u64::from(self.max_output_tokens);
        let usd = tokens as f64 * self.usd_per_1k_tokens / 1000.0;
        Some(UsageDelta::new(tokens, 1, usd))
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    /// Legacy completions shape
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    fn into_summary(self) -> Option<String> {
        let choice = self.choices.into_iter().next()?;
        choice
            .message
            .and_then(|m| m.content)
            .or(choice.text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
