//! Article records and summarization results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scraped news-style record awaiting a summary.
///
/// Records are never mutated by the pipeline. Wire format is camelCase and
/// accepts `asset` as an alias for `sourceAsset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    #[serde(alias = "asset", default)]
    pub source_asset: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
    pub fn new(source_asset: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_asset: source_asset.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Text handed to summarizers: body text, else title, else link.
    pub fn summarizable_text(&self) -> &str {
        [self.text.as_deref(), Some(self.title.as_str()), self.link.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }
}

/// An input record with its summary and provenance attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    #[serde(flatten)]
    pub record: ArticleRecord,
    pub summary: String,
    pub provider_name: String,
    pub provider_version: String,
    pub from_cache: bool,
}
