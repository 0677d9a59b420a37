//! Local extractive summarizer.
//!
//! Terminal link of the fallback chain: it runs in-process and never fails.
//! Sentences are ranked by length and the longest few are kept.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::SummaryProvider;
use crate::constants::provider as provider_constants;
use crate::types::ProviderError;

pub const PROVIDER_NAME: &str = "local-extractive";
const PROVIDER_VERSION: &str = "1";

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]?").expect("sentence regex"));

#[derive(Debug, Clone)]
pub struct ExtractiveProvider {
    max_sentences: usize,
}

impl Default for ExtractiveProvider {
    fn default() -> Self {
        Self::new(provider_constants::EXTRACTIVE_MAX_SENTENCES)
    }
}

impl ExtractiveProvider {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    /// Pick the longest sentences, longest first. Ties keep input order.
    ///
    /// Non-empty input always yields a non-empty summary.
    pub fn summarize_text(&self, text: &str) -> String {
        let flattened = text.replace(['\r', '\n'], " ");

        let mut sentences: Vec<&str> = SENTENCE
            .find_iter(&flattened)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .collect();

        if sentences.is_empty() {
            return text.trim().to_string();
        }

        sentences.sort_by_key(|s| std::cmp::Reverse(s.chars().count()));
        sentences.truncate(self.max_sentences);
        sentences.join(" ")
    }
}

#[async_trait]
impl SummaryProvider for ExtractiveProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn version(&self) -> &str {
        PROVIDER_VERSION
    }

    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        Ok(self.summarize_text(text))
    }
}
