//! Date-partitioned file output
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/<site>/metadata.json
//! <base>/<site>/index.org
//! <base>/<site>/<YYYY-MM-DD>/items.json
//! <base>/<site>/<YYYY-MM-DD>/items.org
//! ```

use crate::model::CrawlItem;
use crate::output::org::{
    existing_ids, format_header, format_index_header, format_index_section, format_items,
    prepend_index_section,
};
use crate::output::traits::{ItemSink, OutputError, OutputFormat, OutputResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Contents of `items.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsDocument {
    pub site_name: String,
    pub crawl_time: DateTime<Utc>,
    pub items_count: usize,
    pub items: Vec<CrawlItem>,
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteMetadata {
    #[serde(default)]
    pub last_crawl_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_update_date: Option<NaiveDate>,
    /// Items appended across all partitions
    #[serde(default)]
    pub total_items: usize,
}

/// Writes new items into per-site, per-date JSON and org files
pub struct FileSink {
    base_path: PathBuf,
    format: OutputFormat,
}

/// Writes to a sibling temp file, then renames over the target
fn write_atomic(path: &Path, contents: &[u8]) -> OutputResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl FileSink {
    pub fn new(base_path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            base_path: base_path.into(),
            format,
        }
    }

    pub fn site_dir(&self, site_name: &str) -> PathBuf {
        self.base_path.join(site_name)
    }

    pub fn partition_dir(&self, site_name: &str, crawl_date: NaiveDate) -> PathBuf {
        self.site_dir(site_name)
            .join(crawl_date.format("%Y-%m-%d").to_string())
    }

    /// Loads `items.json` of a partition, if present
    pub fn load_items(&self, site_name: &str, crawl_date: NaiveDate) -> OutputResult<Option<ItemsDocument>> {
        let path = self.partition_dir(site_name, crawl_date).join("items.json");
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn load_metadata(&self, site_name: &str) -> OutputResult<SiteMetadata> {
        let path = self.site_dir(site_name).join("metadata.json");
        if !path.exists() {
            return Ok(SiteMetadata::default());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Merges items into `items.json`, returning the identity keys it added
    fn append_json(
        &self,
        dir: &Path,
        site_name: &str,
        items: &[CrawlItem],
        crawl_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> OutputResult<HashSet<String>> {
        let mut existing = self
            .load_items(site_name, crawl_date)?
            .map(|doc| doc.items)
            .unwrap_or_default();

        let mut known: HashSet<String> =
            existing.iter().map(|i| i.identity_key.clone()).collect();
        let mut added = HashSet::new();
        for item in items {
            if known.insert(item.identity_key.clone()) {
                added.insert(item.identity_key.clone());
                existing.push(item.clone());
            }
        }

        let doc = ItemsDocument {
            site_name: site_name.to_string(),
            crawl_time: now,
            items_count: existing.len(),
            items: existing,
        };
        write_atomic(&dir.join("items.json"), &serde_json::to_vec_pretty(&doc)?)?;
        Ok(added)
    }

    /// Appends org headings for items not yet in `items.org`
    fn append_org(
        &self,
        dir: &Path,
        site_name: &str,
        items: &[CrawlItem],
        crawl_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> OutputResult<HashSet<String>> {
        let path = dir.join("items.org");
        let mut contents = if path.exists() {
            fs::read_to_string(&path)?
        } else {
            format_header(site_name, crawl_date, now)
        };

        let skip = existing_ids(&contents);
        let added: HashSet<String> = items
            .iter()
            .filter(|i| !skip.contains(&i.identity_key))
            .map(|i| i.identity_key.clone())
            .collect();
        if added.is_empty() && path.exists() {
            return Ok(added);
        }

        contents.push_str(&format_items(items, &skip));
        write_atomic(&path, contents.as_bytes())?;
        Ok(added)
    }

    /// Prepends a summary table of the added items to the site's `index.org`
    fn update_index(
        &self,
        site_name: &str,
        items: &[CrawlItem],
        added: &HashSet<String>,
        crawl_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> OutputResult<()> {
        let mut listed = HashSet::new();
        let mut rows = Vec::new();
        for item in items {
            if added.contains(&item.identity_key) && listed.insert(item.identity_key.as_str()) {
                rows.push(item.clone());
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let path = self.site_dir(site_name).join("index.org");
        let index = if path.exists() {
            fs::read_to_string(&path)?
        } else {
            format_index_header(site_name, now)
        };

        let details = self
            .format
            .writes_org()
            .then(|| format!("./{}/items.org", crawl_date.format("%Y-%m-%d")));
        let section = format_index_section(now, details.as_deref(), &rows);
        write_atomic(&path, prepend_index_section(&index, &section).as_bytes())
    }

    fn update_metadata(&self, site_name: &str, added: usize, crawl_date: NaiveDate, now: DateTime<Utc>) -> OutputResult<()> {
        let mut metadata = self.load_metadata(site_name)?;
        metadata.last_crawl_time = Some(now);
        metadata.last_update_date = Some(crawl_date);
        metadata.total_items += added;

        let path = self.site_dir(site_name).join("metadata.json");
        write_atomic(&path, &serde_json::to_vec_pretty(&metadata)?)
    }
}

impl ItemSink for FileSink {
    fn append(&self, site_name: &str, items: &[CrawlItem], crawl_date: NaiveDate) -> OutputResult<()> {
        if site_name.is_empty() || site_name.contains(['/', '\\']) || site_name.starts_with('.') {
            return Err(OutputError::Write(format!(
                "site name '{}' is not usable as a directory",
                site_name
            )));
        }

        let dir = self.partition_dir(site_name, crawl_date);
        fs::create_dir_all(&dir)?;
        let now = Utc::now();

        let mut added = HashSet::new();
        if self.format.writes_json() {
            added = self.append_json(&dir, site_name, items, crawl_date, now)?;
        }
        if self.format.writes_org() {
            let org_added = self.append_org(&dir, site_name, items, crawl_date, now)?;
            if !self.format.writes_json() {
                added = org_added;
            }
        }

        self.update_metadata(site_name, added.len(), crawl_date, now)?;
        self.update_index(site_name, items, &added, crawl_date, now)?;

        debug!(
            "[{}] Wrote {} new items to {}",
            site_name,
            added.len(),
            dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 12).unwrap()
    }

    fn item(key: &str) -> CrawlItem {
        CrawlItem::new(key, format!("Title {}", key), format!("https://example.com/{}", key))
    }

    #[test]
    fn test_append_writes_both_formats() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Both);

        sink.append("blog", &[item("a"), item("b")], date()).unwrap();

        let partition = dir.path().join("blog/2025-11-12");
        assert!(partition.join("items.json").exists());
        assert!(partition.join("items.org").exists());

        let doc = sink.load_items("blog", date()).unwrap().unwrap();
        assert_eq!(doc.items_count, 2);
        assert_eq!(doc.site_name, "blog");

        let metadata = sink.load_metadata("blog").unwrap();
        assert_eq!(metadata.total_items, 2);
        assert_eq!(metadata.last_update_date, Some(date()));
        assert!(metadata.last_crawl_time.is_some());
    }

    #[test]
    fn test_append_is_idempotent_by_identity() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Both);

        sink.append("blog", &[item("a"), item("b")], date()).unwrap();
        sink.append("blog", &[item("b"), item("c")], date()).unwrap();
        sink.append("blog", &[item("c")], date()).unwrap();

        let doc = sink.load_items("blog", date()).unwrap().unwrap();
        let keys: Vec<_> = doc.items.iter().map(|i| i.identity_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let org = fs::read_to_string(dir.path().join("blog/2025-11-12/items.org")).unwrap();
        assert_eq!(org.matches(":ID: ").count(), 3);
        assert_eq!(org.matches("#+TITLE:").count(), 1);

        assert_eq!(sink.load_metadata("blog").unwrap().total_items, 3);
    }

    #[test]
    fn test_json_only() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Json);
        sink.append("blog", &[item("a")], date()).unwrap();

        let partition = dir.path().join("blog/2025-11-12");
        assert!(partition.join("items.json").exists());
        assert!(!partition.join("items.org").exists());
    }

    #[test]
    fn test_org_only_counts_items() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Org);
        sink.append("blog", &[item("a"), item("b")], date()).unwrap();
        sink.append("blog", &[item("a")], date()).unwrap();

        assert!(!dir.path().join("blog/2025-11-12/items.json").exists());
        assert_eq!(sink.load_metadata("blog").unwrap().total_items, 2);
    }

    #[test]
    fn test_separate_date_partitions() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Json);
        let next = date().succ_opt().unwrap();

        sink.append("blog", &[item("a")], date()).unwrap();
        sink.append("blog", &[item("b")], next).unwrap();

        assert_eq!(sink.load_items("blog", date()).unwrap().unwrap().items_count, 1);
        assert_eq!(sink.load_items("blog", next).unwrap().unwrap().items_count, 1);
        assert_eq!(sink.load_metadata("blog").unwrap().total_items, 2);
    }

    #[test]
    fn test_index_lists_each_update_newest_first() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Both);

        let first = item("a").with_authors(vec!["Ada", "Grace"]);
        sink.append("blog", &[first], date()).unwrap();
        sink.append("blog", &[item("a"), item("b")], date()).unwrap();
        sink.append("blog", &[item("b")], date()).unwrap();

        let index = fs::read_to_string(dir.path().join("blog/index.org")).unwrap();
        assert!(index.starts_with("#+TITLE: blog index\n"));
        assert_eq!(index.matches("#+TITLE:").count(), 1);
        assert_eq!(index.matches("* Update ").count(), 2);
        assert!(index.contains("[[./2025-11-12/items.org]"));
        assert!(index.contains("| Title a | Ada | [[https://example.com/a][view]] |"));

        let newest = index.find("| Title b | - |").unwrap();
        let oldest = index.find("| Title a | Ada |").unwrap();
        assert!(newest < oldest);
        assert_eq!(index.matches("| Title a |").count(), 1);
    }

    #[test]
    fn test_index_without_org_output_has_no_details_link() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Json);
        sink.append("blog", &[item("a")], date()).unwrap();

        let index = fs::read_to_string(dir.path().join("blog/index.org")).unwrap();
        assert!(index.contains("| Title a | - |"));
        assert!(!index.contains("Details:"));
    }

    #[test]
    fn test_rejects_path_like_site_names() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path(), OutputFormat::Both);
        assert!(sink.append("../escape", &[item("a")], date()).is_err());
    }

    #[test]
    fn test_unwritable_base_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();

        let sink = FileSink::new(&blocker, OutputFormat::Both);
        assert!(sink.append("blog", &[item("a")], date()).is_err());
    }
}
