//! Org-Crawler main entry point
//!
//! This is the command-line interface for the Org-Crawler feed harvester.

use anyhow::{bail, Context};
use clap::Parser;
use org_crawler::config::{compute_rules_hash, load_config_with_hash, load_sites, Config};
use org_crawler::crawler::{build_http_client, FetcherRegistry, JobContext, Scheduler, SchedulerOptions};
use org_crawler::enrich::build_pipeline;
use org_crawler::model::SiteDescriptor;
use org_crawler::output::{load_statistics, print_statistics, FileSink};
use org_crawler::storage::open_store;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Org-Crawler: a scheduled feed and site harvester
///
/// Org-Crawler polls RSS/Atom feeds and selector-scraped sites on a per-site
/// cadence, keeps only new items, optionally enriches them, and writes them
/// into date-partitioned JSON and org-mode files.
#[derive(Parser, Debug)]
#[command(name = "org-crawler")]
#[command(version)]
#[command(about = "A scheduled feed and site harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run one scheduling round and exit instead of running continuously
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    once: bool,

    /// Crawl only this site, immediately, and exit
    #[arg(long, value_name = "NAME", conflicts_with_all = ["dry_run", "stats"])]
    site: Option<String>,

    /// With --once, crawl every enabled site regardless of cadence
    #[arg(long, requires = "once")]
    force: bool,

    /// Validate config and rules and show what would be crawled
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show per-site statistics from the state database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let rules_dir = resolve_rules_dir(&cli.config, &config);

    if cli.stats {
        return handle_stats(&config);
    }

    let sites = load_sites(&rules_dir, &config)
        .with_context(|| format!("loading rules from {}", rules_dir.display()))?;

    if cli.dry_run {
        handle_dry_run(&config, &rules_dir, &sites);
        return Ok(());
    }

    let mut scheduler = build_scheduler(&config, sites)?;
    scheduler.restore_state()?;

    if let Some(name) = &cli.site {
        let outcome = scheduler.run_site(name).await?;
        if !outcome.success {
            bail!(
                "crawl of '{}' failed: {}",
                name,
                outcome.error_detail.unwrap_or_default()
            );
        }
    } else if cli.once {
        let outcomes = scheduler.run_once(cli.force).await;
        let failed = outcomes.iter().filter(|o| !o.success).count();
        tracing::info!(
            "Round finished: {} crawls, {} failed, {} new items",
            outcomes.len(),
            failed,
            outcomes.iter().map(|o| o.new_item_count).sum::<usize>()
        );
    } else {
        let mut scheduler = scheduler.with_snapshot_source(rules_snapshot_source(config, rules_dir));
        scheduler.run_until(shutdown_signal()).await;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("org_crawler=info,warn"),
            1 => EnvFilter::new("org_crawler=debug,info"),
            2 => EnvFilter::new("org_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Relative rules directories are resolved against the config file's directory
fn resolve_rules_dir(config_path: &Path, config: &Config) -> PathBuf {
    let dir = PathBuf::from(&config.sources.rules_dir);
    if dir.is_absolute() {
        return dir;
    }
    config_path
        .parent()
        .map(|parent| parent.join(&dir))
        .unwrap_or(dir)
}

fn build_scheduler(config: &Config, sites: Vec<SiteDescriptor>) -> anyhow::Result<Scheduler> {
    let client = build_http_client(&config.user_agent, &config.http)
        .context("building HTTP client")?;

    let store = open_store(Path::new(&config.storage.database_path))
        .with_context(|| format!("opening {}", config.storage.database_path))?;
    let sink = FileSink::new(&config.storage.base_path, config.storage.output_format);
    let enrichment = build_pipeline(&config.enrichment, client.clone());

    let ctx = JobContext::new(FetcherRegistry::standard(client), Arc::new(store), Arc::new(sink))
        .with_enrichment(Arc::new(enrichment))
        .with_fetch_retries(
            config.http.fetch_retries,
            Duration::from_secs(config.http.retry_delay_secs),
        )
        .with_retention(config.storage.retention_policy());

    Ok(Scheduler::new(
        sites,
        ctx,
        SchedulerOptions::from(&config.scheduler),
    ))
}

/// Reloads the rules directory whenever its content hash changes
fn rules_snapshot_source(
    config: Config,
    rules_dir: PathBuf,
) -> Box<dyn FnMut() -> Option<Vec<SiteDescriptor>> + Send> {
    let mut last_hash = compute_rules_hash(&rules_dir).ok();

    Box::new(move || {
        let hash = match compute_rules_hash(&rules_dir) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!("Could not hash rules directory: {}", e);
                return None;
            }
        };
        if last_hash.as_deref() == Some(hash.as_str()) {
            return None;
        }

        match load_sites(&rules_dir, &config) {
            Ok(sites) => {
                last_hash = Some(hash);
                Some(sites)
            }
            Err(e) => {
                tracing::warn!("Ignoring rules change, reload failed: {}", e);
                last_hash = Some(hash);
                None
            }
        }
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, finishing running crawls"),
        Err(e) => {
            tracing::error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, rules_dir: &Path, sites: &[SiteDescriptor]) {
    println!("=== Org-Crawler Dry Run ===\n");

    println!("Scheduler:");
    println!("  Check interval: {}s", config.scheduler.check_interval_secs);
    println!("  Max workers: {}", config.scheduler.max_workers);
    println!(
        "  Default cadence: {} minutes",
        config.scheduler.default_cadence_minutes
    );

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);

    println!("\nStorage:");
    println!("  Output: {} ({:?})", config.storage.base_path, config.storage.output_format);
    println!("  Database: {}", config.storage.database_path);

    if !config.enrichment.steps.is_empty() {
        println!("\nEnrichment steps ({}):", config.enrichment.steps.len());
        for step in &config.enrichment.steps {
            println!("  - {} ({})", step.name, step.capability);
        }
    }

    println!("\nSites from {} ({}):", rules_dir.display(), sites.len());
    for site in sites {
        let status = if site.enabled { "" } else { " [disabled]" };
        println!(
            "  - {} [{}] every {} min{}",
            site.name, site.kind, site.cadence_minutes, status
        );
        println!("    {}", site.source_url);
        if !site.keywords.is_empty() {
            println!("    keywords: {}", site.keywords.join(", "));
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would schedule {} enabled sites",
        sites.iter().filter(|s| s.enabled).count()
    );
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_store(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}
