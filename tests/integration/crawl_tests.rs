//! Integration tests for the crawler
//!
//! These tests use wiremock to serve feeds and listing pages and run whole
//! crawl jobs through the scheduler, the SQLite state store and the file sink.

use chrono::{Duration, Utc};
use org_crawler::config::{load_sites, Config};
use org_crawler::crawler::{FetcherRegistry, JobContext, Scheduler, SchedulerOptions};
use org_crawler::model::{ErrorKind, SiteDescriptor, SiteKind};
use org_crawler::output::{FileSink, OutputFormat};
use org_crawler::storage::{SqliteStore, StateStore};
use org_crawler::ConfigError;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds an RSS document from `(guid, title, pubDate)` triples
fn rss(entries: &[(&str, &str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(guid, title, date)| {
            format!(
                "<item><title>{title}</title><link>https://example.com/{guid}</link>\
                 <guid>{guid}</guid><pubDate>{date}</pubDate>\
                 <description>About {title}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test</title>{}</channel></rss>"#,
        items
    )
}

/// Builds an arXiv-style RSS item
fn arxiv_item(id: &str, title: &str) -> String {
    format!(
        r#"<item>
      <title>{title}</title>
      <link>https://arxiv.org/abs/{id}</link>
      <description>arXiv:{id}v1 Announce Type: new
Abstract: A study of {title}.</description>
      <guid isPermaLink="false">oai:arXiv.org:{id}v1</guid>
      <category>cs.AI</category>
      <pubDate>Wed, 12 Nov 2025 00:00:00 -0500</pubDate>
      <dc:creator>Alice Smith, Bob Jones</dc:creator>
    </item>"#
    )
}

fn arxiv_feed(items: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel><title>cs.AI updates on arXiv.org</title>{}</channel>
</rss>"#,
        items.join("\n")
    )
}

async fn mount_body(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

/// Everything one test needs: a store it can inspect and a scheduler over it
struct Harness {
    dir: TempDir,
    output: std::path::PathBuf,
    store: Arc<SqliteStore>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let output = dir.path().join("output");
        let store = Arc::new(SqliteStore::open_in_memory().expect("Failed to open store"));
        Self {
            dir,
            output,
            store,
        }
    }

    fn sink(&self) -> FileSink {
        FileSink::new(&self.output, OutputFormat::Both)
    }

    fn scheduler(&self, sites: Vec<SiteDescriptor>, max_workers: usize) -> Scheduler {
        self.scheduler_with_sink(sites, max_workers, self.sink())
    }

    fn scheduler_with_sink(
        &self,
        sites: Vec<SiteDescriptor>,
        max_workers: usize,
        sink: FileSink,
    ) -> Scheduler {
        let ctx = JobContext::new(
            FetcherRegistry::standard(reqwest::Client::new()),
            self.store.clone(),
            Arc::new(sink),
        );
        let options = SchedulerOptions {
            max_workers,
            ..SchedulerOptions::default()
        };
        Scheduler::new(sites, ctx, options)
    }

    fn seen_count(&self, site: &str) -> usize {
        self.store
            .load_seen_set(site)
            .expect("Failed to load seen set")
            .len()
    }
}

#[tokio::test]
async fn test_feed_with_bad_date_keeps_every_entry() {
    let mock_server = MockServer::start().await;
    let body = rss(&[
        ("a1", "First", "Mon, 10 Nov 2025 08:00:00 GMT"),
        ("a2", "Second", "Mon, 10 Nov 2025 09:00:00 GMT"),
        ("a3", "Third", "2025-11-10T10:00:00Z"),
        ("a4", "Fourth", "Tue, 11 Nov 2025 08:00:00 +0100"),
        ("a5", "Fifth", "Wed, 12 Nov 2025 08:00:00 -0500"),
        ("a6", "Sixth", "sometime last week"),
    ]);
    mount_body(&mock_server, "/feed.xml", body).await;

    let harness = Harness::new();
    let site = SiteDescriptor::new(
        "blog",
        format!("{}/feed.xml", mock_server.uri()),
        SiteKind::Feed,
    );
    let mut scheduler = harness.scheduler(vec![site], 2);

    let outcome = scheduler.run_site("blog").await.expect("Known site");
    assert!(outcome.success, "crawl failed: {:?}", outcome.error_detail);
    assert_eq!(outcome.fetched_count, 6);
    assert_eq!(outcome.new_item_count, 6);
    assert_eq!(harness.seen_count("blog"), 6);

    let today = outcome.started_at.date_naive();
    let doc = harness
        .sink()
        .load_items("blog", today)
        .expect("Failed to read items")
        .expect("items.json should exist");
    assert_eq!(doc.items_count, 6);

    let undated = doc
        .items
        .iter()
        .find(|i| i.identity_key == "a6")
        .expect("Undated entry kept");
    assert!(undated.published_time.is_none());
    assert_eq!(
        doc.items.iter().filter(|i| i.published_time.is_some()).count(),
        5
    );

    let org = std::fs::read_to_string(
        harness
            .output
            .join("blog")
            .join(today.format("%Y-%m-%d").to_string())
            .join("items.org"),
    )
    .expect("items.org should exist");
    assert_eq!(org.matches(":ID: ").count(), 6);
}

#[tokio::test]
async fn test_arxiv_feed_only_delivers_new_papers() {
    let mock_server = MockServer::start().await;
    let first: Vec<String> = ["2511.00001", "2511.00002", "2511.00003"]
        .iter()
        .map(|id| arxiv_item(id, &format!("Paper {}", id)))
        .collect();
    mount_body(&mock_server, "/rss/cs.AI", arxiv_feed(&first)).await;

    let harness = Harness::new();
    let site = SiteDescriptor::new(
        "arxiv_cs_ai",
        format!("{}/rss/cs.AI", mock_server.uri()),
        SiteKind::Feed,
    )
    .with_config("extractor", json!("arxiv"));
    let mut scheduler = harness.scheduler(vec![site], 1);

    let outcome = scheduler.run_site("arxiv_cs_ai").await.expect("Known site");
    assert!(outcome.success);
    assert_eq!(outcome.new_item_count, 3);
    assert_eq!(harness.seen_count("arxiv_cs_ai"), 3);

    // Same listing again
    let outcome = scheduler.run_site("arxiv_cs_ai").await.expect("Known site");
    assert!(outcome.success);
    assert_eq!(outcome.fetched_count, 3);
    assert_eq!(outcome.new_item_count, 0);
    assert_eq!(harness.seen_count("arxiv_cs_ai"), 3);

    // Two new papers on top of the old ones
    mock_server.reset().await;
    let mut next = first.clone();
    next.push(arxiv_item("2511.00004", "Paper four"));
    next.push(arxiv_item("2511.00005", "Paper five"));
    mount_body(&mock_server, "/rss/cs.AI", arxiv_feed(&next)).await;

    let outcome = scheduler.run_site("arxiv_cs_ai").await.expect("Known site");
    assert!(outcome.success);
    assert_eq!(outcome.fetched_count, 5);
    assert_eq!(outcome.new_item_count, 2);
    assert_eq!(harness.seen_count("arxiv_cs_ai"), 5);

    let doc = harness
        .sink()
        .load_items("arxiv_cs_ai", outcome.started_at.date_naive())
        .expect("Failed to read items")
        .expect("items.json should exist");
    assert_eq!(doc.items_count, 5);
    let paper = doc
        .items
        .iter()
        .find(|i| i.extra_str("arxiv_id") == Some("2511.00004"))
        .expect("New paper written");
    assert_eq!(paper.summary.as_deref(), Some("A study of Paper four."));
    assert_eq!(paper.authors, vec!["Alice Smith", "Bob Jones"]);

    // Two updates added items, the repeat listing did not
    let index = std::fs::read_to_string(harness.output.join("arxiv_cs_ai/index.org"))
        .expect("index.org should exist");
    assert_eq!(index.matches("* Update ").count(), 2);
    assert!(index.contains("| Paper four | Alice Smith |"));
    assert!(index.find("| Paper four |").unwrap() < index.find("| Paper 2511.00001 |").unwrap());

    let stats = harness.store.site_statistics().expect("Failed to read stats");
    let arxiv = stats
        .iter()
        .find(|s| s.site == "arxiv_cs_ai")
        .expect("Stats for the site");
    assert_eq!(arxiv.total_runs, 3);
    assert_eq!(arxiv.total_new_items, 5);
}

#[tokio::test]
async fn test_fetch_failure_leaves_seen_set_untouched() {
    let mock_server = MockServer::start().await;
    mount_body(
        &mock_server,
        "/feed.xml",
        rss(&[
            ("a1", "First", "Mon, 10 Nov 2025 08:00:00 GMT"),
            ("a2", "Second", "Mon, 10 Nov 2025 09:00:00 GMT"),
        ]),
    )
    .await;

    let harness = Harness::new();
    let site = SiteDescriptor::new(
        "blog",
        format!("{}/feed.xml", mock_server.uri()),
        SiteKind::Feed,
    );
    let mut scheduler = harness.scheduler(vec![site], 1);

    let first = scheduler.run_site("blog").await.expect("Known site");
    assert!(first.success);
    let crawled_at = scheduler
        .descriptor("blog")
        .and_then(|d| d.last_crawl_time)
        .expect("Successful crawl records its time");

    mock_server.reset().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let outcome = scheduler.run_site("blog").await.expect("Known site");
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::SourceUnreachable));
    assert_eq!(outcome.new_item_count, 0);
    assert_eq!(harness.seen_count("blog"), 2);

    let metadata = harness
        .sink()
        .load_metadata("blog")
        .expect("Failed to read metadata");
    assert_eq!(metadata.total_items, 2);

    // The attempt still counts for cadence
    let after = scheduler
        .descriptor("blog")
        .and_then(|d| d.last_crawl_time)
        .expect("Failed crawl records its time");
    assert!(after >= crawled_at);
}

#[tokio::test]
async fn test_malformed_feed_is_a_parse_failure() {
    let mock_server = MockServer::start().await;
    mount_body(
        &mock_server,
        "/feed.xml",
        "<html><body>Not a feed</body></html>".to_string(),
    )
    .await;

    let harness = Harness::new();
    let site = SiteDescriptor::new(
        "blog",
        format!("{}/feed.xml", mock_server.uri()),
        SiteKind::Feed,
    );
    let mut scheduler = harness.scheduler(vec![site], 1);

    let outcome = scheduler.run_site("blog").await.expect("Known site");
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::ParseFailure));
    assert_eq!(harness.seen_count("blog"), 0);
}

#[tokio::test]
async fn test_sink_failure_does_not_mark_items_seen() {
    let mock_server = MockServer::start().await;
    mount_body(
        &mock_server,
        "/feed.xml",
        rss(&[("a1", "First", "Mon, 10 Nov 2025 08:00:00 GMT")]),
    )
    .await;

    let harness = Harness::new();
    let blocker = harness.dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"file").expect("Failed to write blocker");

    let site = SiteDescriptor::new(
        "blog",
        format!("{}/feed.xml", mock_server.uri()),
        SiteKind::Feed,
    );
    let mut scheduler =
        harness.scheduler_with_sink(vec![site], 1, FileSink::new(&blocker, OutputFormat::Both));

    let outcome = scheduler.run_site("blog").await.expect("Known site");
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::StorageFailure));
    assert_eq!(harness.seen_count("blog"), 0);

    let recorded = harness
        .store
        .recent_outcomes("blog", 10)
        .expect("Failed to read outcomes");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].error_kind, Some(ErrorKind::StorageFailure));
}

#[tokio::test]
async fn test_each_site_crawled_once_per_round() {
    let mock_server = MockServer::start().await;
    let mut sites = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let route = format!("/{}.xml", name);
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[(name, name, "Mon, 10 Nov 2025 08:00:00 GMT")]))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
        sites.push(SiteDescriptor::new(
            name,
            format!("{}{}", mock_server.uri(), route),
            SiteKind::Feed,
        ));
    }

    let harness = Harness::new();
    let mut scheduler = harness.scheduler(sites, 2);

    let outcomes = scheduler.run_once(false).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.success));

    let mut names: Vec<_> = outcomes.iter().map(|o| o.site_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    // Nothing is due again right away
    assert!(scheduler.run_once(false).await.is_empty());

    mock_server.verify().await;
}

#[tokio::test]
async fn test_cadence_restored_from_store() {
    let mock_server = MockServer::start().await;
    for name in ["fresh", "stale"] {
        mount_body(
            &mock_server,
            &format!("/{}.xml", name),
            rss(&[(name, name, "Mon, 10 Nov 2025 08:00:00 GMT")]),
        )
        .await;
    }

    let harness = Harness::new();
    let now = Utc::now();
    harness
        .store
        .save_last_crawl_time("fresh", now - Duration::minutes(119))
        .expect("Failed to seed crawl time");
    harness
        .store
        .save_last_crawl_time("stale", now - Duration::minutes(121))
        .expect("Failed to seed crawl time");

    let sites = ["fresh", "stale"]
        .iter()
        .map(|name| {
            SiteDescriptor::new(
                *name,
                format!("{}/{}.xml", mock_server.uri(), name),
                SiteKind::Feed,
            )
            .with_cadence(120)
        })
        .collect();
    let mut scheduler = harness.scheduler(sites, 2);
    assert_eq!(scheduler.restore_state().expect("Failed to restore"), 2);

    let outcomes = scheduler.run_once(false).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].site_name, "stale");
    assert_eq!(harness.seen_count("fresh"), 0);
    assert_eq!(harness.seen_count("stale"), 1);
}

#[tokio::test]
async fn test_custom_pagination_is_bounded() {
    let mock_server = MockServer::start().await;
    for page in 1..=5 {
        let body = format!(
            r#"<html><body>
              <div class="post"><h2>Post {page}</h2><a class="more" href="/posts/{page}">read</a></div>
              <a class="next" href="/list/{next}">next</a>
            </body></html>"#,
            page = page,
            next = page + 1
        );
        let expected: u64 = if page <= 3 { 1 } else { 0 };
        Mock::given(method("GET"))
            .and(path(format!("/list/{}", page).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected)
            .mount(&mock_server)
            .await;
    }

    let harness = Harness::new();
    let site = SiteDescriptor::new(
        "listing",
        format!("{}/list/1", mock_server.uri()),
        SiteKind::Custom,
    )
    .with_config("item_selector", json!("div.post"))
    .with_config("title_selector", json!("h2"))
    .with_config("link_selector", json!("a.more"))
    .with_config("next_page_selector", json!("a.next"))
    .with_config("max_pages", json!(3));
    let mut scheduler = harness.scheduler(vec![site], 1);

    let outcome = scheduler.run_site("listing").await.expect("Known site");
    assert!(outcome.success, "crawl failed: {:?}", outcome.error_detail);
    assert_eq!(outcome.fetched_count, 3);
    assert_eq!(outcome.new_item_count, 3);

    mock_server.verify().await;
}

#[tokio::test]
async fn test_keyword_filter_applies_before_dedup() {
    let mock_server = MockServer::start().await;
    mount_body(
        &mock_server,
        "/feed.xml",
        rss(&[
            ("a1", "Agents that plan", "Mon, 10 Nov 2025 08:00:00 GMT"),
            ("a2", "Gardening tips", "Mon, 10 Nov 2025 09:00:00 GMT"),
            ("a3", "Multi-agent systems", "Mon, 10 Nov 2025 10:00:00 GMT"),
        ]),
    )
    .await;

    let harness = Harness::new();
    let site = SiteDescriptor::new(
        "blog",
        format!("{}/feed.xml", mock_server.uri()),
        SiteKind::Feed,
    )
    .with_keywords(["agent"]);
    let mut scheduler = harness.scheduler(vec![site], 1);

    let outcome = scheduler.run_site("blog").await.expect("Known site");
    assert!(outcome.success);
    assert_eq!(outcome.fetched_count, 3);
    assert_eq!(outcome.new_item_count, 2);

    // Filtered-out entries are not remembered
    let seen = harness.store.load_seen_set("blog").expect("Failed to load");
    assert!(seen.contains("a1"));
    assert!(!seen.contains("a2"));
}

fn test_config(dir: &TempDir) -> Config {
    let toml = format!(
        r#"
[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"

[storage]
base-path = "{base}/output"
database-path = "{base}/state.db"

[scheduler]
default-cadence-minutes = 90
"#,
        base = dir.path().display()
    );
    toml::from_str(&toml).expect("Test config should parse")
}

#[test]
fn test_rules_directory_loads_and_validates() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&dir);
    let rules = dir.path().join("rules");
    std::fs::create_dir(&rules).expect("Failed to create rules dir");

    std::fs::write(
        rules.join("arxiv.yaml"),
        "name: arxiv_cs_ai\nurl: https://rss.arxiv.org/rss/cs.AI\ncrawl_type: rss\nkeywords: [agent, planning]\nconfig:\n  extractor: arxiv\n",
    )
    .expect("Failed to write rule");
    std::fs::write(
        rules.join("papers.json"),
        r#"{"name": "papers", "source_url": "https://example.com/papers", "kind": "custom",
            "cadence_minutes": 30, "enabled": false,
            "kind_specific_config": {"item_selector": ".item", "title_selector": "h3", "link_selector": "a"}}"#,
    )
    .expect("Failed to write rule");
    std::fs::write(rules.join("notes.txt"), "ignored").expect("Failed to write note");

    let sites = load_sites(&rules, &config).expect("Rules should load");
    assert_eq!(sites.len(), 2);

    let arxiv = sites.iter().find(|s| s.name == "arxiv_cs_ai").expect("arxiv site");
    assert_eq!(arxiv.kind, SiteKind::Feed);
    assert_eq!(arxiv.cadence_minutes, 90);
    assert!(arxiv.enabled);
    assert_eq!(arxiv.config_str("extractor"), Some("arxiv"));

    let papers = sites.iter().find(|s| s.name == "papers").expect("papers site");
    assert_eq!(papers.kind, SiteKind::Custom);
    assert_eq!(papers.cadence_minutes, 30);
    assert!(!papers.enabled);
}

#[test]
fn test_invalid_rules_are_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&dir);

    // Custom site without selectors
    let rules = dir.path().join("incomplete");
    std::fs::create_dir(&rules).expect("Failed to create rules dir");
    std::fs::write(
        rules.join("site.yaml"),
        "name: broken\nurl: https://example.com\nkind: custom\n",
    )
    .expect("Failed to write rule");
    assert!(matches!(
        load_sites(&rules, &config),
        Err(ConfigError::Validation(_))
    ));

    // Two files with the same site name
    let rules = dir.path().join("duplicate");
    std::fs::create_dir(&rules).expect("Failed to create rules dir");
    for file in ["a.yaml", "b.yaml"] {
        std::fs::write(
            rules.join(file),
            "name: same\nurl: https://example.com/feed\nkind: feed\n",
        )
        .expect("Failed to write rule");
    }
    assert!(matches!(
        load_sites(&rules, &config),
        Err(ConfigError::DuplicateSite(name)) if name == "same"
    ));

    // Unknown enrichment step
    let rules = dir.path().join("enrichment");
    std::fs::create_dir(&rules).expect("Failed to create rules dir");
    std::fs::write(
        rules.join("site.yaml"),
        "name: blog\nurl: https://example.com/feed\nkind: feed\nenrichment: [translate]\n",
    )
    .expect("Failed to write rule");
    assert!(matches!(
        load_sites(&rules, &config),
        Err(ConfigError::Validation(_))
    ));

    // Non-HTTP source
    let rules = dir.path().join("scheme");
    std::fs::create_dir(&rules).expect("Failed to create rules dir");
    std::fs::write(
        rules.join("site.yaml"),
        "name: local\nurl: file:///etc/passwd\nkind: feed\n",
    )
    .expect("Failed to write rule");
    assert!(load_sites(&rules, &config).is_err());
}
