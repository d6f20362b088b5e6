use super::{Capability, EnrichmentProvider, EnrichmentStep, EnrichmentValue, ProviderError};
use crate::model::CrawlItem;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Maps items to configured categories by keyword
///
/// Each category owns a keyword list. A keyword matches on word boundaries,
/// case-insensitively, either against a keyword the item already matched
/// (`extra.matched_keywords`) or against the step's target text.
pub struct KeywordClassifier {
    /// Lowercased keyword to the first category that lists it
    exact: HashMap<String, String>,
    patterns: Vec<(String, Regex)>,
}

impl KeywordClassifier {
    pub fn new(categories: &BTreeMap<String, Vec<String>>) -> Self {
        let mut exact = HashMap::new();
        let mut patterns = Vec::new();

        for (category, keywords) in categories {
            for keyword in keywords {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    continue;
                }
                exact
                    .entry(keyword.clone())
                    .or_insert_with(|| category.clone());

                match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&keyword))) {
                    Ok(re) => patterns.push((category.clone(), re)),
                    Err(e) => warn!("Skipping keyword '{}' for '{}': {}", keyword, category, e),
                }
            }
        }

        Self { exact, patterns }
    }

    /// Category of a single keyword, exact match first
    pub fn classify_keyword(&self, keyword: &str) -> Option<&str> {
        let keyword = keyword.trim().to_lowercase();
        if let Some(category) = self.exact.get(&keyword) {
            return Some(category);
        }
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(&keyword))
            .map(|(category, _)| category.as_str())
    }

    /// All categories matching the item's keywords or the given text
    pub fn classify(&self, item: &CrawlItem, text: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();

        if let Some(matched) = item.extra.get("matched_keywords").and_then(|v| v.as_array()) {
            for keyword in matched.iter().filter_map(|k| k.as_str()) {
                if let Some(category) = self.classify_keyword(keyword) {
                    found.insert(category.to_string());
                }
            }
        }

        for (category, re) in &self.patterns {
            if re.is_match(text) {
                found.insert(category.clone());
            }
        }

        found
    }
}

#[async_trait]
impl EnrichmentProvider for KeywordClassifier {
    /// Returns the matched categories, or the step's `fallback` option when
    /// nothing matched
    async fn apply(
        &self,
        step: &EnrichmentStep,
        item: &CrawlItem,
    ) -> Result<EnrichmentValue, ProviderError> {
        let mut categories: Vec<String> = self
            .classify(item, &step.target.text(item))
            .into_iter()
            .collect();
        if categories.is_empty() {
            if let Some(fallback) = step.option("fallback") {
                categories.push(fallback.to_string());
            }
        }
        Ok(EnrichmentValue::List(categories))
    }

    fn supports(&self, capability: Capability) -> bool {
        capability == Capability::ExtractKeywords
    }

    fn name(&self) -> &'static str {
        "keyword-classifier"
    }
}
