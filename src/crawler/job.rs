//! One end-to-end crawl of one site
//!
//! A job runs `fetch -> keyword filter -> rule filters -> dedup -> enrich ->
//! append -> persist seen set` and always returns a `CrawlOutcome`. Errors in
//! any stage end the job; nothing here panics or touches other sites.

use crate::crawler::dedup::deduplicate;
use crate::crawler::fetcher::{FetchError, FetcherRegistry};
use crate::crawler::filter::{apply_keyword_filter, apply_rules};
use crate::enrich::EnrichmentPipeline;
use crate::model::{CrawlItem, CrawlOutcome, ErrorKind, SiteDescriptor};
use crate::output::ItemSink;
use crate::state::RetentionPolicy;
use crate::storage::StateStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared dependencies of every crawl job
#[derive(Clone)]
pub struct JobContext {
    pub fetchers: FetcherRegistry,
    pub store: Arc<dyn StateStore>,
    pub sink: Arc<dyn ItemSink>,
    pub enrichment: Arc<EnrichmentPipeline>,
    /// Immediate retries after a retryable fetch failure
    pub fetch_retries: u32,
    pub retry_delay: Duration,
    pub retention: RetentionPolicy,
}

impl JobContext {
    pub fn new(
        fetchers: FetcherRegistry,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn ItemSink>,
    ) -> Self {
        Self {
            fetchers,
            store,
            sink,
            enrichment: Arc::new(EnrichmentPipeline::disabled()),
            fetch_retries: 0,
            retry_delay: Duration::ZERO,
            retention: RetentionPolicy::keep_all(),
        }
    }

    pub fn with_enrichment(mut self, enrichment: Arc<EnrichmentPipeline>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_fetch_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.fetch_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

/// A crawl of one site, bound to the descriptor it was dispatched with
#[derive(Debug, Clone)]
pub struct CrawlJob {
    site: Arc<SiteDescriptor>,
}

impl CrawlJob {
    pub fn new(site: Arc<SiteDescriptor>) -> Self {
        Self { site }
    }

    pub fn site(&self) -> &SiteDescriptor {
        &self.site
    }

    pub fn site_name(&self) -> &str {
        &self.site.name
    }

    /// Runs the job to completion
    ///
    /// # Arguments
    ///
    /// * `ctx` - Fetchers, state store, sink and enrichment shared by all jobs
    ///
    /// # Returns
    ///
    /// The outcome; `success` is false when fetching, appending or persisting
    /// failed. The seen set is only persisted after a successful append.
    pub async fn execute(self, ctx: &JobContext) -> CrawlOutcome {
        let site = self.site.as_ref();
        let started_at = Utc::now();
        info!("[{}] Crawl started ({})", site.name, site.source_url);

        let (fetched, attempts) = match self.fetch_with_retries(ctx).await {
            Ok(result) => result,
            Err((e, attempts)) => {
                warn!("[{}] Fetch failed after {} attempts: {}", site.name, attempts, e);
                return CrawlOutcome::failed(&site.name, started_at, e.kind(), e.to_string())
                    .with_attempts(attempts);
            }
        };
        let fetched_count = fetched.len();
        debug!("[{}] Fetched {} items", site.name, fetched_count);

        let now = Utc::now();
        let candidates = self.filter(fetched, now);

        let seen = match ctx.store.load_seen_set(&site.name) {
            Ok(seen) => seen,
            Err(e) => {
                return CrawlOutcome::failed(
                    &site.name,
                    started_at,
                    ErrorKind::StorageFailure,
                    format!("loading seen set: {}", e),
                )
                .with_attempts(attempts)
                .with_fetched_count(fetched_count);
            }
        };
        let (mut new_items, mut updated_seen) = deduplicate(&site.name, &seen, candidates, now);

        // Pruned after dedup so keys the source still lists are never forgotten
        let pruned = updated_seen.prune(now, &ctx.retention);
        if pruned > 0 {
            debug!("[{}] Pruned {} expired seen keys", site.name, pruned);
        }

        if !new_items.is_empty() {
            let report = ctx.enrichment.process(site, &mut new_items).await;
            if report.failed > 0 {
                warn!(
                    "[{}] {} enrichment steps failed, {} succeeded",
                    site.name, report.failed, report.succeeded
                );
            }

            if let Err(e) = ctx.sink.append(&site.name, &new_items, started_at.date_naive()) {
                warn!("[{}] Writing items failed, seen set not updated: {}", site.name, e);
                return CrawlOutcome::failed(
                    &site.name,
                    started_at,
                    ErrorKind::StorageFailure,
                    e.to_string(),
                )
                .with_attempts(attempts)
                .with_fetched_count(fetched_count);
            }
        }

        if let Err(e) = ctx.store.save_seen_set(&site.name, &updated_seen) {
            return CrawlOutcome::failed(
                &site.name,
                started_at,
                ErrorKind::StorageFailure,
                format!("saving seen set: {}", e),
            )
            .with_attempts(attempts)
            .with_fetched_count(fetched_count);
        }

        info!(
            "[{}] Crawl finished: {} fetched, {} new",
            site.name,
            fetched_count,
            new_items.len()
        );
        CrawlOutcome::succeeded(&site.name, started_at, new_items.len(), fetched_count, attempts)
    }

    fn filter(&self, items: Vec<CrawlItem>, now: DateTime<Utc>) -> Vec<CrawlItem> {
        let before = items.len();
        let items = apply_keyword_filter(items, &self.site.keywords);
        let items = apply_rules(items, &self.site.filters, now);
        if items.len() < before {
            debug!(
                "[{}] Filters kept {} of {} items",
                self.site.name,
                items.len(),
                before
            );
        }
        items
    }

    /// Fetches with bounded immediate retries, returning the attempt count
    async fn fetch_with_retries(
        &self,
        ctx: &JobContext,
    ) -> Result<(Vec<CrawlItem>, u32), (FetchError, u32)> {
        let site = self.site.as_ref();
        let fetcher = ctx.fetchers.get(site.kind).ok_or_else(|| {
            (
                FetchError::parse(
                    &site.source_url,
                    format!("no fetcher registered for kind '{}'", site.kind),
                ),
                0,
            )
        })?;

        let max_attempts = ctx.fetch_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match fetcher.fetch(site).await {
                Ok(items) => return Ok((items, attempt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "[{}] {} attempt {}/{} failed: {}. Retrying in {:?}",
                        site.name,
                        fetcher.name(),
                        attempt,
                        max_attempts,
                        e,
                        ctx.retry_delay
                    );
                    tokio::time::sleep(ctx.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}
