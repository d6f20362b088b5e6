//! Scheduler for dispatching due sites to a bounded worker pool
//!
//! This module handles:
//! - The per-site `Idle -> Due -> Running -> Idle` state machine
//! - Cadence checks on a fixed interval (no busy polling)
//! - A bounded work queue feeding `max_workers` workers
//! - Persisting `last_crawl_time` and outcomes as jobs complete
//! - Hot reload of the site set from a snapshot source
//! - Graceful shutdown: queued jobs are cancelled, running jobs finish

use crate::config::SchedulerConfig;
use crate::crawler::job::{CrawlJob, JobContext};
use crate::model::{CrawlOutcome, ErrorKind, SiteDescriptor};
use crate::state::SiteState;
use crate::CrawlerError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Tuning for the control loop and worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// How often the control loop looks for due sites
    pub check_interval: Duration,

    /// Maximum number of crawl jobs executing at once
    pub max_workers: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            max_workers: 5,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.check_interval_secs),
            max_workers: config.max_workers,
        }
    }
}

/// Polled once per tick; `Some` replaces the whole site set
pub type SnapshotSource = Box<dyn FnMut() -> Option<Vec<SiteDescriptor>> + Send>;

/// Scheduler-side record of one configured site
#[derive(Debug)]
struct SiteEntry {
    descriptor: Arc<SiteDescriptor>,
    state: SiteState,

    /// Dropped from the configuration while a job was running; removed on completion
    retired: bool,
}

impl SiteEntry {
    fn new(descriptor: SiteDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            state: SiteState::Idle,
            retired: false,
        }
    }
}

/// Bounded queue plus the workers draining it
struct WorkerPool {
    queue: Option<mpsc::Sender<CrawlJob>>,
    completions: mpsc::UnboundedReceiver<CrawlOutcome>,
    cancel: watch::Sender<bool>,
    workers: JoinSet<()>,

    /// Dispatched jobs whose outcome has not come back yet
    in_flight: usize,
}

impl WorkerPool {
    fn start(max_workers: usize, ctx: Arc<JobContext>) -> Self {
        let max_workers = max_workers.max(1);
        let (queue_tx, queue_rx) = mpsc::channel::<CrawlJob>(max_workers);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut workers = JoinSet::new();
        for id in 0..max_workers {
            workers.spawn(worker_loop(
                id,
                queue_rx.clone(),
                ctx.clone(),
                done_tx.clone(),
                cancel_rx.clone(),
            ));
        }

        Self {
            queue: Some(queue_tx),
            completions: done_rx,
            cancel: cancel_tx,
            workers,
            in_flight: 0,
        }
    }

    /// Hands a job to the queue if there is room
    ///
    /// Returns the job back when the queue is full or closed.
    fn try_dispatch(&mut self, job: CrawlJob) -> Result<(), CrawlJob> {
        let Some(queue) = &self.queue else {
            return Err(job);
        };
        match queue.try_reserve() {
            Ok(permit) => {
                permit.send(job);
                self.in_flight += 1;
                Ok(())
            }
            Err(_) => Err(job),
        }
    }

    fn has_capacity(&self) -> bool {
        self.queue.as_ref().is_some_and(|q| q.capacity() > 0)
    }

    async fn next_completion(&mut self) -> Option<CrawlOutcome> {
        let outcome = self.completions.recv().await?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(outcome)
    }

    /// Stops accepting work; queued jobs come back as cancelled outcomes
    fn close(&mut self) {
        let _ = self.cancel.send(true);
        self.queue = None;
    }

    async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<CrawlJob>>>,
    ctx: Arc<JobContext>,
    completions: mpsc::UnboundedSender<CrawlOutcome>,
    cancel: watch::Receiver<bool>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let outcome = if *cancel.borrow() {
            debug!("Worker {} dropping queued job for {}", id, job.site_name());
            CrawlOutcome::failed(
                job.site_name(),
                Utc::now(),
                ErrorKind::Cancelled,
                "scheduler shut down before the job started",
            )
        } else {
            trace!("Worker {} running {}", id, job.site_name());
            run_isolated(job, ctx.clone()).await
        };

        if completions.send(outcome).is_err() {
            break;
        }
    }
    trace!("Worker {} exiting", id);
}

/// Runs a job on its own task so a panic becomes an `Internal` outcome
async fn run_isolated(job: CrawlJob, ctx: Arc<JobContext>) -> CrawlOutcome {
    let site_name = job.site_name().to_string();
    let started_at = Utc::now();
    match tokio::spawn(async move { job.execute(&ctx).await }).await {
        Ok(outcome) => outcome,
        Err(e) => CrawlOutcome::failed(
            site_name,
            started_at,
            ErrorKind::Internal,
            format!("crawl job aborted: {}", e),
        ),
    }
}

enum Event {
    Shutdown,
    Tick,
    Completed(CrawlOutcome),
}

/// Owns every site's scheduling state and drives crawl jobs
pub struct Scheduler {
    sites: BTreeMap<String, SiteEntry>,
    ctx: Arc<JobContext>,
    options: SchedulerOptions,
    snapshot_source: Option<SnapshotSource>,
}

impl Scheduler {
    /// Creates a scheduler with every site Idle
    ///
    /// # Arguments
    ///
    /// * `sites` - Validated descriptors; later duplicates of a name are ignored
    /// * `ctx` - Dependencies shared by all crawl jobs
    /// * `options` - Check interval and worker count
    pub fn new(sites: Vec<SiteDescriptor>, ctx: JobContext, options: SchedulerOptions) -> Self {
        let mut entries = BTreeMap::new();
        for site in sites {
            if entries.contains_key(&site.name) {
                warn!("Ignoring duplicate site '{}'", site.name);
                continue;
            }
            entries.insert(site.name.clone(), SiteEntry::new(site));
        }

        Self {
            sites: entries,
            ctx: Arc::new(ctx),
            options,
            snapshot_source: None,
        }
    }

    pub fn with_snapshot_source(mut self, source: SnapshotSource) -> Self {
        self.snapshot_source = Some(source);
        self
    }

    /// Loads persisted `last_crawl_time`s so cadence survives restarts
    ///
    /// A time already set on a descriptor wins over the stored one.
    pub fn restore_state(&mut self) -> Result<usize, CrawlerError> {
        let times = self.ctx.store.load_last_crawl_times()?;
        let mut restored = 0;
        for (name, entry) in self.sites.iter_mut() {
            if entry.descriptor.last_crawl_time.is_some() {
                continue;
            }
            if let Some(at) = times.get(name) {
                Arc::make_mut(&mut entry.descriptor).last_crawl_time = Some(*at);
                restored += 1;
            }
        }
        debug!("Restored last crawl time for {} sites", restored);
        Ok(restored)
    }

    pub fn site_names(&self) -> Vec<&str> {
        self.sites.keys().map(String::as_str).collect()
    }

    pub fn site_state(&self, name: &str) -> Option<SiteState> {
        self.sites.get(name).map(|e| e.state)
    }

    pub fn descriptor(&self, name: &str) -> Option<&SiteDescriptor> {
        self.sites.get(name).map(|e| e.descriptor.as_ref())
    }

    /// Names of Idle sites whose cadence has elapsed at `now`
    pub fn due_sites(&self, now: DateTime<Utc>) -> Vec<String> {
        self.sites
            .iter()
            .filter(|(_, e)| e.state == SiteState::Idle && !e.retired && e.descriptor.is_due(now))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn set_state(&mut self, name: &str, next: SiteState) -> Result<(), CrawlerError> {
        let entry = self
            .sites
            .get_mut(name)
            .ok_or_else(|| CrawlerError::UnknownSite(name.to_string()))?;
        entry.state = entry.state.transition(name, next)?;
        trace!("[{}] -> {}", name, entry.state);
        Ok(())
    }

    /// Moves due sites (or, when forced, every enabled Idle site) to Due
    fn mark_due(&mut self, now: DateTime<Utc>, force: bool) -> usize {
        let names: Vec<String> = if force {
            self.sites
                .iter()
                .filter(|(_, e)| e.state == SiteState::Idle && !e.retired && e.descriptor.enabled)
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            self.due_sites(now)
        };

        for name in &names {
            if let Err(e) = self.set_state(name, SiteState::Due) {
                error!("{}", e);
            }
        }
        names.len()
    }

    /// Dispatches Due sites in name order until the queue is full
    fn dispatch_due(&mut self, pool: &mut WorkerPool) -> usize {
        let due: Vec<String> = self
            .sites
            .iter()
            .filter(|(_, e)| e.state == SiteState::Due)
            .map(|(name, _)| name.clone())
            .collect();

        let mut dispatched = 0;
        for name in due {
            if !pool.has_capacity() {
                trace!("Work queue full, {} stays due", name);
                break;
            }
            let Some(entry) = self.sites.get(&name) else {
                continue;
            };
            let job = CrawlJob::new(entry.descriptor.clone());
            if pool.try_dispatch(job).is_err() {
                break;
            }
            if let Err(e) = self.set_state(&name, SiteState::Running) {
                error!("{}", e);
            }
            debug!("[{}] Dispatched", name);
            dispatched += 1;
        }
        dispatched
    }

    /// Returns every Due site to Idle
    fn release_due(&mut self) {
        let due: Vec<String> = self
            .sites
            .iter()
            .filter(|(_, e)| e.state == SiteState::Due)
            .map(|(name, _)| name.clone())
            .collect();
        for name in due {
            if let Err(e) = self.set_state(&name, SiteState::Idle) {
                error!("{}", e);
            }
        }
    }

    /// Applies a finished or cancelled job's outcome
    fn handle_completion(&mut self, outcome: &CrawlOutcome) {
        let name = outcome.site_name.as_str();
        let cancelled = outcome.error_kind == Some(ErrorKind::Cancelled);

        if let Err(e) = self.set_state(name, SiteState::Idle) {
            error!("{}", e);
        }

        if cancelled {
            info!("[{}] Cancelled before starting", name);
        } else {
            if let Some(entry) = self.sites.get_mut(name) {
                Arc::make_mut(&mut entry.descriptor).last_crawl_time = Some(outcome.finished_at);
            }
            if let Err(e) = self.ctx.store.save_last_crawl_time(name, outcome.finished_at) {
                warn!("[{}] Could not persist last crawl time: {}", name, e);
            }
            if let Err(e) = self.ctx.store.record_outcome(outcome) {
                warn!("[{}] Could not record outcome: {}", name, e);
            }
            log_outcome(outcome);
        }

        if self.sites.get(name).is_some_and(|e| e.retired) {
            debug!("[{}] Removed after its last job", name);
            self.sites.remove(name);
        }
    }

    /// Replaces the site set, carrying state over by name
    ///
    /// Sites that are running keep their in-flight job; sites that vanished
    /// are removed once idle. A site that is Due but now disabled goes back
    /// to Idle.
    pub fn apply_snapshot(&mut self, snapshot: Vec<SiteDescriptor>) {
        let persisted: HashMap<String, DateTime<Utc>> = match self.ctx.store.load_last_crawl_times() {
            Ok(times) => times,
            Err(e) => {
                warn!("Could not load persisted crawl times: {}", e);
                HashMap::new()
            }
        };

        let mut next: BTreeMap<String, SiteEntry> = BTreeMap::new();
        for mut site in snapshot {
            if next.contains_key(&site.name) {
                warn!("Ignoring duplicate site '{}' in reloaded rules", site.name);
                continue;
            }
            match self.sites.remove(&site.name) {
                Some(old) => {
                    site.last_crawl_time = old.descriptor.last_crawl_time;
                    let mut state = old.state;
                    if state == SiteState::Due && !site.enabled {
                        state = SiteState::Idle;
                    }
                    next.insert(
                        site.name.clone(),
                        SiteEntry {
                            descriptor: Arc::new(site),
                            state,
                            retired: false,
                        },
                    );
                }
                None => {
                    if site.last_crawl_time.is_none() {
                        site.last_crawl_time = persisted.get(&site.name).copied();
                    }
                    info!("[{}] Added by rules reload", site.name);
                    next.insert(site.name.clone(), SiteEntry::new(site));
                }
            }
        }

        for (name, mut old) in std::mem::take(&mut self.sites) {
            if old.state.is_running() {
                old.retired = true;
                next.insert(name, old);
            } else {
                info!("[{}] Removed by rules reload", name);
            }
        }

        self.sites = next;
    }

    fn poll_snapshot(&mut self) {
        let snapshot = match self.snapshot_source.as_mut() {
            Some(source) => source(),
            None => None,
        };
        if let Some(sites) = snapshot {
            info!("Reloaded {} site definitions", sites.len());
            self.apply_snapshot(sites);
        }
    }

    /// Runs one scheduling round to completion
    ///
    /// Every due site (every enabled site when `force` is set) is crawled
    /// once, at most `max_workers` at a time.
    ///
    /// # Returns
    ///
    /// The outcomes, in completion order
    pub async fn run_once(&mut self, force: bool) -> Vec<CrawlOutcome> {
        let marked = self.mark_due(Utc::now(), force);
        let mut outcomes = Vec::with_capacity(marked);
        if marked == 0 {
            info!("No sites due");
            return outcomes;
        }

        let mut pool = WorkerPool::start(self.options.max_workers, self.ctx.clone());
        self.dispatch_due(&mut pool);

        while pool.in_flight > 0 {
            let Some(outcome) = pool.next_completion().await else {
                break;
            };
            self.handle_completion(&outcome);
            outcomes.push(outcome);
            self.dispatch_due(&mut pool);
        }

        pool.close();
        pool.join().await;
        outcomes
    }

    /// Crawls one named site immediately, ignoring cadence and `enabled`
    pub async fn run_site(&mut self, name: &str) -> Result<CrawlOutcome, CrawlerError> {
        self.set_state(name, SiteState::Due)?;
        self.set_state(name, SiteState::Running)?;

        let descriptor = self
            .sites
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| CrawlerError::UnknownSite(name.to_string()))?;

        let outcome = run_isolated(CrawlJob::new(descriptor), self.ctx.clone()).await;
        self.handle_completion(&outcome);
        Ok(outcome)
    }

    /// Runs the control loop until `shutdown` resolves
    ///
    /// On shutdown no new jobs are dispatched, queued jobs are cancelled,
    /// running jobs finish and every completion is applied before returning.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduler started: {} sites, {} workers, checking every {:?}",
            self.sites.len(),
            self.options.max_workers,
            self.options.check_interval
        );

        let mut pool = WorkerPool::start(self.options.max_workers, self.ctx.clone());
        let mut ticker = tokio::time::interval(self.options.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                _ = ticker.tick() => Event::Tick,
                Some(outcome) = pool.next_completion() => Event::Completed(outcome),
            };

            match event {
                Event::Shutdown => break,
                Event::Tick => {
                    self.poll_snapshot();
                    let marked = self.mark_due(Utc::now(), false);
                    if marked > 0 {
                        debug!("{} sites became due", marked);
                    }
                    self.dispatch_due(&mut pool);
                }
                Event::Completed(outcome) => {
                    self.handle_completion(&outcome);
                    self.dispatch_due(&mut pool);
                }
            }
        }

        info!(
            "Shutting down: waiting for {} dispatched jobs",
            pool.in_flight
        );
        pool.close();
        self.release_due();

        while pool.in_flight > 0 {
            let Some(outcome) = pool.next_completion().await else {
                break;
            };
            self.handle_completion(&outcome);
        }

        pool.join().await;
        info!("Scheduler stopped");
    }
}

fn log_outcome(outcome: &CrawlOutcome) {
    let secs = outcome.duration().num_milliseconds() as f64 / 1000.0;
    if outcome.success {
        info!(
            "[{}] Done in {:.1}s: {} new of {} fetched",
            outcome.site_name, secs, outcome.new_item_count, outcome.fetched_count
        );
    } else {
        warn!(
            "[{}] Failed in {:.1}s ({}): {}",
            outcome.site_name,
            secs,
            outcome
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_default(),
            outcome.error_detail.as_deref().unwrap_or("")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::{Fetch, FetchError, FetcherRegistry};
    use crate::model::{CrawlItem, SiteKind};
    use crate::output::{ItemSink, OutputResult};
    use crate::storage::{SqliteStore, StateStore};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps, then returns one item per call; tracks concurrency
    #[derive(Default)]
    struct SlowFetcher {
        delay_ms: u64,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Fetch for SlowFetcher {
        async fn fetch(&self, site: &SiteDescriptor) -> Result<Vec<CrawlItem>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![CrawlItem::new(
                format!("{}-{}", site.name, call),
                "t",
                "https://example.com",
            )])
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct NullSink;

    impl ItemSink for NullSink {
        fn append(&self, _: &str, _: &[CrawlItem], _: NaiveDate) -> OutputResult<()> {
            Ok(())
        }
    }

    fn site(name: &str) -> SiteDescriptor {
        SiteDescriptor::new(name, format!("https://{}.example.com/feed", name), SiteKind::Feed)
    }

    fn scheduler(
        sites: Vec<SiteDescriptor>,
        fetcher: Arc<SlowFetcher>,
        max_workers: usize,
    ) -> (Scheduler, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = JobContext::new(
            FetcherRegistry::new().with(SiteKind::Feed, fetcher),
            store.clone(),
            Arc::new(NullSink),
        );
        let options = SchedulerOptions {
            check_interval: Duration::from_millis(10),
            max_workers,
        };
        (Scheduler::new(sites, ctx, options), store)
    }

    #[test]
    fn test_cadence_boundary() {
        let now = Utc::now();
        let fresh = site("fresh").with_last_crawl_time(now - ChronoDuration::minutes(119));
        let stale = site("stale").with_last_crawl_time(now - ChronoDuration::minutes(121));
        let never = site("never");
        let mut disabled = site("disabled");
        disabled.enabled = false;

        let (s, _) = scheduler(
            vec![fresh, stale, never, disabled],
            Arc::new(SlowFetcher::default()),
            2,
        );
        assert_eq!(s.due_sites(now), vec!["never", "stale"]);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let (mut s, _) = scheduler(vec![site("a")], Arc::new(SlowFetcher::default()), 1);
        assert!(matches!(
            s.set_state("a", SiteState::Running),
            Err(CrawlerError::State(_))
        ));
        assert!(matches!(
            s.set_state("missing", SiteState::Due),
            Err(CrawlerError::UnknownSite(_))
        ));
    }

    #[test]
    fn test_restore_state() {
        let (mut s, store) = scheduler(vec![site("a"), site("b")], Arc::new(SlowFetcher::default()), 1);
        let at = Utc::now() - ChronoDuration::minutes(5);
        store.save_last_crawl_time("a", at).unwrap();

        assert_eq!(s.restore_state().unwrap(), 1);
        assert_eq!(s.descriptor("a").unwrap().last_crawl_time, Some(at));
        assert_eq!(s.due_sites(Utc::now()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_run_once_updates_cadence() {
        let fetcher = Arc::new(SlowFetcher::default());
        let (mut s, store) = scheduler(vec![site("a"), site("b")], fetcher.clone(), 2);

        let outcomes = s.run_once(false).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(s.site_state("a"), Some(SiteState::Idle));

        let finished_a = outcomes.iter().find(|o| o.site_name == "a").unwrap().finished_at;
        assert_eq!(s.descriptor("a").unwrap().last_crawl_time, Some(finished_a));
        assert_eq!(store.load_last_crawl_times().unwrap()["a"], finished_a);
        assert_eq!(store.recent_outcomes("a", 5).unwrap().len(), 1);

        // Nothing is due right after a crawl
        assert!(s.run_once(false).await.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        // Forcing ignores cadence
        assert_eq!(s.run_once(true).await.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_bound() {
        let fetcher = Arc::new(SlowFetcher {
            delay_ms: 30,
            ..Default::default()
        });
        let sites = (0..6).map(|i| site(&format!("s{}", i))).collect();
        let (mut s, _) = scheduler(sites, fetcher.clone(), 2);

        let outcomes = s.run_once(false).await;
        assert_eq!(outcomes.len(), 6);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_disabled_sites_never_run() {
        let mut off = site("off");
        off.enabled = false;
        let fetcher = Arc::new(SlowFetcher::default());
        let (mut s, _) = scheduler(vec![off], fetcher.clone(), 1);

        assert!(s.run_once(true).await.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_site() {
        let fetcher = Arc::new(SlowFetcher::default());
        let (mut s, _) = scheduler(vec![site("a")], fetcher, 1);

        let outcome = s.run_site("a").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.new_item_count, 1);
        assert!(matches!(
            s.run_site("zzz").await,
            Err(CrawlerError::UnknownSite(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_jobs() {
        let fetcher = Arc::new(SlowFetcher {
            delay_ms: 200,
            ..Default::default()
        });
        let (mut s, _) = scheduler(vec![site("a"), site("b"), site("c")], fetcher.clone(), 1);

        s.run_until(tokio::time::sleep(Duration::from_millis(50))).await;

        let calls = fetcher.calls.load(Ordering::SeqCst);
        assert!(calls >= 1 && calls < 3);
        let crawled = ["a", "b", "c"]
            .iter()
            .filter(|n| s.descriptor(n).unwrap().last_crawl_time.is_some())
            .count();
        assert_eq!(crawled, calls);
        for name in ["a", "b", "c"] {
            assert_eq!(s.site_state(name), Some(SiteState::Idle));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_site_not_redispatched_when_cadence_elapses() {
        // Each fetch outlasts the one-minute cadence by far
        let fetcher = Arc::new(SlowFetcher {
            delay_ms: 150_000,
            ..Default::default()
        });
        let overdue = site("a")
            .with_cadence(1)
            .with_last_crawl_time(Utc::now() - ChronoDuration::minutes(2));
        let (mut s, _) = scheduler(vec![overdue], fetcher.clone(), 4);
        s.options.check_interval = Duration::from_secs(10);

        s.run_until(tokio::time::sleep(Duration::from_secs(600))).await;

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.site_state("a"), Some(SiteState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_due_site_runs_one_job_at_a_time() {
        let fetcher = Arc::new(SlowFetcher {
            delay_ms: 150_000,
            ..Default::default()
        });
        let (mut s, store) = scheduler(vec![site("a").with_cadence(0)], fetcher.clone(), 4);
        s.options.check_interval = Duration::from_secs(10);

        s.run_until(tokio::time::sleep(Duration::from_secs(600))).await;

        let calls = fetcher.calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "expected repeated crawls, got {}", calls);
        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
        assert_eq!(store.recent_outcomes("a", 10).unwrap().len(), calls);
    }

    #[test]
    fn test_snapshot_carries_state() {
        let at = Utc::now() - ChronoDuration::minutes(10);
        let (mut s, _) = scheduler(
            vec![site("keep").with_last_crawl_time(at), site("gone"), site("busy")],
            Arc::new(SlowFetcher::default()),
            1,
        );
        s.set_state("busy", SiteState::Due).unwrap();
        s.set_state("busy", SiteState::Running).unwrap();

        let mut changed = site("keep").with_cadence(5);
        changed.keywords = vec!["agent".to_string()];
        s.apply_snapshot(vec![changed, site("new")]);

        let keep = s.descriptor("keep").unwrap();
        assert_eq!(keep.cadence_minutes, 5);
        assert_eq!(keep.last_crawl_time, Some(at));
        assert!(s.descriptor("gone").is_none());
        assert!(s.descriptor("new").is_some());

        // Still running, so kept until its job completes
        assert_eq!(s.site_state("busy"), Some(SiteState::Running));
        assert!(!s.due_sites(Utc::now()).contains(&"busy".to_string()));

        let outcome = CrawlOutcome::succeeded("busy", Utc::now(), 0, 0, 1);
        s.handle_completion(&outcome);
        assert!(s.descriptor("busy").is_none());
    }
}
