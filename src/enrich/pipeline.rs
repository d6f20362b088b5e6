use super::{
    EnrichmentProvider, EnrichmentResult, EnrichmentStep, EnrichmentValue, ProviderError,
};
use crate::model::{CrawlItem, SiteDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry behaviour for failing provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Counts of step outcomes across one `process` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs configured enrichment steps over new items
pub struct EnrichmentPipeline {
    steps: Vec<EnrichmentStep>,
    providers: Vec<Arc<dyn EnrichmentProvider>>,
    retry: RetryPolicy,
    timeout: Duration,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl EnrichmentPipeline {
    pub fn new(steps: Vec<EnrichmentStep>) -> Self {
        Self {
            steps,
            providers: Vec::new(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            min_interval: Duration::ZERO,
            last_call: Mutex::new(None),
        }
    }

    /// A pipeline with no steps; `process` leaves items untouched
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_provider(mut self, provider: Arc<dyn EnrichmentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum spacing between provider calls across all sites
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Steps that apply to a site, in configured order
    ///
    /// A site without an `enrichment` list gets every step; an explicit list
    /// selects steps by name and an empty list disables enrichment.
    pub fn steps_for<'a>(&'a self, site: &SiteDescriptor) -> Vec<&'a EnrichmentStep> {
        match &site.enrichment {
            None => self.steps.iter().collect(),
            Some(names) => self
                .steps
                .iter()
                .filter(|step| names.iter().any(|n| n == &step.name))
                .collect(),
        }
    }

    /// Enriches items in place
    ///
    /// Every applicable step runs on every item, and each item ends up with
    /// one entry per step: either the value or a failure record. Failures
    /// never abort the batch.
    ///
    /// # Arguments
    ///
    /// * `site` - Site the items came from; selects the steps
    /// * `items` - New items, enriched in place
    ///
    /// # Returns
    ///
    /// Counts of succeeded and failed steps
    pub async fn process(&self, site: &SiteDescriptor, items: &mut [CrawlItem]) -> EnrichmentReport {
        let steps = self.steps_for(site);
        let mut report = EnrichmentReport::default();
        if steps.is_empty() || items.is_empty() {
            return report;
        }

        debug!(
            "[{}] Enriching {} items with {} steps",
            site.name,
            items.len(),
            steps.len()
        );

        for item in items.iter_mut() {
            for step in &steps {
                let result = match self.run_step(step, item).await {
                    Ok(value) => {
                        report.succeeded += 1;
                        EnrichmentResult::Ok { value }
                    }
                    Err(e) => {
                        warn!(
                            "[{}] Enrichment step '{}' failed for {}: {}",
                            site.name, step.name, item.identity_key, e
                        );
                        report.failed += 1;
                        EnrichmentResult::from_error(&e)
                    }
                };
                item.enrichment.insert(step.name.clone(), result);
            }
        }

        report
    }

    fn provider_for(&self, step: &EnrichmentStep) -> Option<&Arc<dyn EnrichmentProvider>> {
        self.providers.iter().find(|p| p.supports(step.capability))
    }

    async fn run_step(
        &self,
        step: &EnrichmentStep,
        item: &CrawlItem,
    ) -> Result<EnrichmentValue, ProviderError> {
        let provider = self
            .provider_for(step)
            .ok_or(ProviderError::Unavailable(step.capability))?;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.wait_for_slot().await;

            let result = match tokio::time::timeout(self.timeout, provider.apply(step, item)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        provider.name(),
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleeps until `min_interval` has passed since the previous call
    async fn wait_for_slot(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}
