//! Enrichment of new items through pluggable providers
//!
//! An `EnrichmentPipeline` runs an ordered list of `EnrichmentStep`s over
//! every new item. Each step asks the first provider that supports its
//! capability and stores the outcome on the item under the step name. A
//! failing step is recorded and the pipeline moves on.
//!
//! # Components
//!
//! - `EnrichmentProvider`: the provider seam
//! - `EnrichmentPipeline`: ordering, retry, timeout and rate limiting
//! - `LlmProvider`: OpenAI-compatible chat completions
//! - `KeywordClassifier`: local category tagging

mod classifier;
mod llm;
mod pipeline;

use crate::config::EnrichmentConfig;
use crate::model::{CrawlItem, ErrorKind};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use classifier::KeywordClassifier;
pub use llm::{LlmConfig, LlmProvider};
pub use pipeline::{EnrichmentPipeline, EnrichmentReport, RetryPolicy};

/// What a step asks a provider to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Translate,
    Summarize,
    ExtractKeywords,
    CustomPrompt,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Translate => "translate",
            Self::Summarize => "summarize",
            Self::ExtractKeywords => "extract_keywords",
            Self::CustomPrompt => "custom_prompt",
        };
        write!(f, "{}", name)
    }
}

/// Which item text a step works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    Title,
    Summary,
    #[default]
    TitleAndSummary,
}

impl TargetField {
    /// Extracts the target text from an item
    pub fn text(&self, item: &CrawlItem) -> String {
        match self {
            Self::Title => item.title.clone(),
            Self::Summary => item.summary_text().to_string(),
            Self::TitleAndSummary => {
                let summary = item.summary_text();
                if summary.is_empty() {
                    item.title.clone()
                } else {
                    format!("{}\n\n{}", item.title, summary)
                }
            }
        }
    }
}

/// One configured enrichment step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentStep {
    /// Key under which the result is stored on the item
    pub name: String,

    pub capability: Capability,

    #[serde(default)]
    pub target: TargetField,

    /// Provider-specific options such as `target_language` or `prompt`
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl EnrichmentStep {
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        Self {
            name: name.into(),
            capability,
            target: TargetField::default(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: TargetField) -> Self {
        self.target = target;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A value produced by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnrichmentValue {
    Text(String),
    List(Vec<String>),
}

impl fmt::Display for EnrichmentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::List(values) => write!(f, "{}", values.join(", ")),
        }
    }
}

/// The stored outcome of one step on one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentResult {
    Ok {
        value: EnrichmentValue,
    },
    Failed {
        error_kind: ErrorKind,
        reason: FailureReason,
        detail: String,
    },
}

impl EnrichmentResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn value(&self) -> Option<&EnrichmentValue> {
        match self {
            Self::Ok { value } => Some(value),
            Self::Failed { .. } => None,
        }
    }

    /// Builds the failure record for a provider error
    pub fn from_error(error: &ProviderError) -> Self {
        Self::Failed {
            error_kind: ErrorKind::EnrichmentFailure,
            reason: error.reason(),
            detail: error.to_string(),
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Provider,
    Timeout,
    Quota,
    Unavailable,
}

/// Errors returned by enrichment providers
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider quota exhausted: {0}")]
    Quota(String),

    #[error("no provider available for {0}")]
    Unavailable(Capability),
}

impl ProviderError {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Provider(_) => FailureReason::Provider,
            Self::Timeout(_) => FailureReason::Timeout,
            Self::Quota(_) => FailureReason::Quota,
            Self::Unavailable(_) => FailureReason::Unavailable,
        }
    }

    /// Quota and availability failures will not clear up on an immediate retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Timeout(_))
    }
}

/// A service that can enrich items
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Applies one step to one item
    async fn apply(
        &self,
        step: &EnrichmentStep,
        item: &CrawlItem,
    ) -> Result<EnrichmentValue, ProviderError>;

    fn supports(&self, capability: Capability) -> bool;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Builds the pipeline described by the enrichment configuration
///
/// The keyword classifier is registered when categories are configured and
/// the LLM provider when an endpoint is configured.
pub fn build_pipeline(config: &EnrichmentConfig, client: Client) -> EnrichmentPipeline {
    let mut pipeline = EnrichmentPipeline::new(config.steps.clone())
        .with_retry(RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        })
        .with_timeout(Duration::from_secs(config.timeout_secs))
        .with_min_interval(Duration::from_millis(config.min_interval_ms));

    if !config.categories.is_empty() {
        pipeline = pipeline.with_provider(Arc::new(KeywordClassifier::new(&config.categories)));
    }
    if let Some(llm) = &config.llm {
        pipeline = pipeline.with_provider(Arc::new(LlmProvider::new(llm.clone(), client)));
    }

    pipeline
}
