//! Hugging Face Inference API Provider
//!
//! Hosted summarization model (`facebook/bart-large-cnn` by default). Not
//! metered by the usage governor; guarded by a breaker and retry policy in
//! the chain instead.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SummaryProvider, http_client};
use crate::config::SecondaryConfig;
use crate::types::{ErrorCategory, ErrorClassifier, ProviderError, Result};

const PROVIDER_NAME: &str = "huggingface";

pub struct HuggingFaceProvider {
    api_token: SecretString,
    endpoint: String,
    model: String,
    max_length: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for HuggingFaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceProvider")
            .field("api_token", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("max_length", &self.max_length)
            .finish()
    }
}

impl HuggingFaceProvider {
    pub fn new(config: &SecondaryConfig, api_token: SecretString) -> Result<Self> {
        Ok(Self {
            api_token,
            endpoint: format!(
                "{}/{}",
                config.api_base.trim_end_matches('/'),
                config.model.trim_start_matches('/')
            ),
            model: config.model.clone(),
            max_length: config.max_length,
            client: http_client(config.timeout())?,
        })
    }
}

#[async_trait]
impl SummaryProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn version(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, text: &str) -> std::result::Result<String, ProviderError> {
        let request = InferenceRequest {
            inputs: text,
            parameters: InferenceParameters {
                max_length: self.max_length,
            },
        };

        debug!(provider = PROVIDER_NAME, endpoint = %self.endpoint, "Sending request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, PROVIDER_NAME))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("HF API error ({}): {}", status, body),
                PROVIDER_NAME,
            ));
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, PROVIDER_NAME))?;

        body.into_summary().ok_or_else(|| {
            ProviderError::with_provider(
                ErrorCategory::ParseError,
                "Unknown HF response format",
                PROVIDER_NAME,
            )
        })
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_length: u32,
}

#[derive(Debug, Deserialize)]
struct SummaryText {
    summary_text: Option<String>,
}

/// The inference API answers in any of three shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    List(Vec<SummaryText>),
    Single(SummaryText),
    Bare(String),
}

impl InferenceResponse {
    fn into_summary(self) -> Option<String> {
        let text = match self {
            Self::List(items) => items.into_iter().next()?.summary_text?,
            Self::Single(item) => item.summary_text?,
            Self::Bare(text) => text,
        };
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Option<String> {
        serde_json::from_str::<InferenceResponse>(json)
            .ok()?
            .into_summary()
    }

    #[test]
    fn test_parse_response_shapes() {
        assert_eq!(
            parse(r#"[{"summary_text":"Bitcoin rallied."}]"#).as_deref(),
            Some("Bitcoin rallied.")
        );
        assert_eq!(
            parse(r#"{"summary_text":"Volume surged."}"#).as_deref(),
            Some("Volume surged.")
        );
        assert_eq!(parse(r#""Analysts cautious.""#).as_deref(), Some("Analysts cautious."));
    }

    #[test]
    fn test_parse_unknown_shapes() {
        assert!(parse(r#"[]"#).is_none());
        assert!(parse(r#"{"error":"Model is currently loading"}"#).is_none());
        assert!(parse(r#"[{"summary_text":"   "}]"#).is_none());
    }

    #[test]
    fn test_endpoint_and_request_shape() {
        let config = SecondaryConfig {
            api_base: "https://example.test/models/".to_string(),
            ..Default::default()
        };
        let provider = HuggingFaceProvider::new(&config, SecretString::from("hf_x")).unwrap();
        assert_eq!(
            provider.endpoint,
            "https://example.test/models/facebook/bart-large-cnn"
        );
        assert!(provider.usage_estimate("text").is_none());

        let request = InferenceRequest {
            inputs: "Bitcoin rallied.",
            parameters: InferenceParameters { max_length: 150 },
        };
        let json = serde_json::to_value(request).unwrap();
        assert_eq!(json["inputs"], "Bitcoin rallied.");
        assert_eq!(json["parameters"]["max_length"], 150);
    }
}
