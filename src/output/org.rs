//! Org-mode rendering of crawl items
//!
//! Each item becomes one top-level heading with a properties drawer. The
//! `:ID:` property carries the identity key, which `existing_ids` reads back
//! so appends can skip items already in a file.

use crate::enrich::EnrichmentResult;
use crate::model::{sort_newest_first, CrawlItem};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;

/// Authors listed before the rest collapse into "et al."
const MAX_AUTHORS: usize = 3;

/// Formats the file header written when an org file is created
///
/// # Arguments
///
/// * `site_name` - Site the file belongs to
/// * `crawl_date` - Date partition of the file
/// * `created_at` - When the file is first written
pub fn format_header(site_name: &str, crawl_date: NaiveDate, created_at: DateTime<Utc>) -> String {
    let date = crawl_date.format("%Y-%m-%d");
    let mut org = String::new();
    org.push_str(&format!("#+TITLE: {} - {}\n", site_name, date));
    org.push_str(&format!("#+DATE: {}\n", date));
    org.push_str("#+AUTHOR: Org Crawler\n");
    org.push_str(&format!(
        "#+CREATED: {}\n\n",
        created_at.format("%Y-%m-%d %H:%M:%S")
    ));
    org
}

/// Org headings cannot contain newlines and a leading `*` starts a new heading
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escapes body lines that org would otherwise read as headings
fn body_text(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.starts_with('*') {
                format!(",{}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_authors(authors: &[String]) -> String {
    if authors.len() > MAX_AUTHORS {
        format!("{} et al.", authors[..MAX_AUTHORS].join(", "))
    } else {
        authors.join(", ")
    }
}

/// Formats one item as an org heading
pub fn format_item(item: &CrawlItem) -> String {
    let mut org = String::new();

    org.push_str(&format!("* {}\n", single_line(&item.title)));
    org.push_str(":PROPERTIES:\n");
    org.push_str(&format!(":ID: {}\n", item.identity_key));
    org.push_str(&format!(":LINK: {}\n", item.link));
    if let Some(published) = item.published_time {
        org.push_str(&format!(
            ":PUBLISHED: {}\n",
            published.format("%Y-%m-%d %H:%M")
        ));
    }
    if !item.authors.is_empty() {
        org.push_str(&format!(":AUTHORS: {}\n", format_authors(&item.authors)));
    }
    if !item.categories.is_empty() {
        let categories: Vec<_> = item.categories.iter().map(String::as_str).collect();
        org.push_str(&format!(":CATEGORIES: {}\n", categories.join(", ")));
    }
    if let Some(arxiv_id) = item.extra_str("arxiv_id") {
        org.push_str(&format!(":ARXIV_ID: {}\n", arxiv_id));
    }
    org.push_str(":END:\n\n");

    org.push_str(&format!("[[{}][{}]]\n\n", item.link, item.link));

    let summary = item.summary_text().trim();
    if !summary.is_empty() {
        org.push_str(&body_text(summary));
        org.push_str("\n\n");
    }

    for (step, result) in &item.enrichment {
        match result {
            EnrichmentResult::Ok { value } => {
                org.push_str(&format!("** {}\n", step));
                org.push_str(&body_text(&value.to_string()));
                org.push_str("\n\n");
            }
            EnrichmentResult::Failed { detail, .. } => {
                org.push_str(&format!("** {} :failed:\n", step));
                org.push_str(&format!("# {}\n\n", single_line(detail)));
            }
        }
    }

    org
}

/// Formats items newest first, skipping identity keys in `skip`
///
/// Repeated keys within `items` are written once.
pub fn format_items(items: &[CrawlItem], skip: &HashSet<String>) -> String {
    let mut written = skip.clone();
    let mut sorted: Vec<CrawlItem> = items
        .iter()
        .filter(|item| written.insert(item.identity_key.clone()))
        .cloned()
        .collect();
    sort_newest_first(&mut sorted);

    sorted.iter().map(format_item).collect()
}

/// Identity keys of the items already in an org document
pub fn existing_ids(org: &str) -> HashSet<String> {
    org.lines()
        .filter_map(|line| line.strip_prefix(":ID: "))
        .map(|id| id.trim().to_string())
        .collect()
}

/// Header of a site's `index.org`
pub fn format_index_header(site_name: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "#+TITLE: {} index\n#+AUTHOR: Org Crawler\n#+CREATED: {}\n\n",
        site_name,
        created_at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Table cells cannot contain `|` or newlines
fn table_cell(text: &str) -> String {
    single_line(text).replace('|', "\\|")
}

/// One update section of `index.org`: a heading and a title / first author / link table
///
/// # Arguments
///
/// * `crawl_time` - When the items were written
/// * `details` - Path of the partition's `items.org`, relative to the index, if one was written
/// * `items` - Items added by this update
pub fn format_index_section(
    crawl_time: DateTime<Utc>,
    details: Option<&str>,
    items: &[CrawlItem],
) -> String {
    let mut org = format!("* Update {}\n", crawl_time.format("%Y-%m-%d %H:%M:%S"));
    if let Some(path) = details {
        org.push_str(&format!("Details: [[{}][{}]]\n", path, path));
    }
    org.push('\n');
    org.push_str("| Title | First author | Link |\n");
    org.push_str("|------+------+------|\n");
    for item in items {
        let first_author = item.authors.first().map(String::as_str).unwrap_or("-");
        org.push_str(&format!(
            "| {} | {} | [[{}][view]] |\n",
            table_cell(&item.title),
            table_cell(first_author),
            table_cell(&item.link)
        ));
    }
    org.push('\n');
    org
}

/// Inserts an update section above the previous ones, keeping the header on top
pub fn prepend_index_section(index: &str, section: &str) -> String {
    let split = if index.starts_with("* ") {
        Some(0)
    } else {
        index.find("\n* ").map(|pos| pos + 1)
    };
    match split {
        Some(pos) => format!("{}{}{}", &index[..pos], section, &index[pos..]),
        None => format!("{}{}", index, section),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{EnrichmentValue, ProviderError};
    use chrono::TimeZone;

    fn item() -> CrawlItem {
        CrawlItem::new(
            "2511.01234",
            "Scaling\nAgents",
            "https://arxiv.org/abs/2511.01234",
        )
        .with_summary("We study agents.\n* not a heading")
        .with_published(Utc.with_ymd_and_hms(2025, 11, 11, 9, 30, 0).unwrap())
        .with_authors(vec!["A", "B", "C", "D"])
    }

    #[test]
    fn test_header() {
        let header = format_header(
            "arxiv_cs_ai",
            NaiveDate::from_ymd_opt(2025, 11, 12).unwrap(),
            Utc.with_ymd_and_hms(2025, 11, 12, 8, 0, 0).unwrap(),
        );
        assert!(header.starts_with("#+TITLE: arxiv_cs_ai - 2025-11-12\n"));
        assert!(header.contains("#+CREATED: 2025-11-12 08:00:00"));
    }

    #[test]
    fn test_index_section_table() {
        let mut piped = CrawlItem::new("x", "A | B", "https://example.com/x");
        piped.authors.clear();
        let section = format_index_section(
            Utc.with_ymd_and_hms(2025, 11, 12, 8, 0, 0).unwrap(),
            Some("2025-11-12/items.org"),
            &[item(), piped],
        );
        assert!(section.starts_with("* Update 2025-11-12 08:00:00\n"));
        assert!(section.contains("Details: [[2025-11-12/items.org][2025-11-12/items.org]]"));
        assert!(section.contains(
            "| Scaling Agents | A | [[https://arxiv.org/abs/2511.01234][view]] |\n"
        ));
        assert!(section.contains("| A \\| B | - | [[https://example.com/x][view]] |\n"));
    }

    #[test]
    fn test_prepend_index_section_keeps_header_first() {
        let at = Utc.with_ymd_and_hms(2025, 11, 12, 8, 0, 0).unwrap();
        let header = format_index_header("blog", at);
        let first = prepend_index_section(&header, "* Update one\n\n");
        let second = prepend_index_section(&first, "* Update two\n\n");

        assert!(second.starts_with("#+TITLE: blog index\n"));
        let two = second.find("* Update two").unwrap();
        let one = second.find("* Update one").unwrap();
        assert!(two < one);
    }

    #[test]
    fn test_format_item() {
        let org = format_item(&item());
        assert!(org.starts_with("* Scaling Agents\n:PROPERTIES:\n:ID: 2511.01234\n"));
        assert!(org.contains(":PUBLISHED: 2025-11-11 09:30\n"));
        assert!(org.contains(":AUTHORS: A, B, C et al.\n"));
        assert!(org.contains("[[https://arxiv.org/abs/2511.01234][https://arxiv.org/abs/2511.01234]]"));
        assert!(org.contains("\n,* not a heading"));
    }

    #[test]
    fn test_enrichment_sections() {
        let mut item = item();
        item.enrichment.insert(
            "title_zh".to_string(),
            EnrichmentResult::Ok {
                value: EnrichmentValue::Text("扩展智能体".to_string()),
            },
        );
        item.enrichment.insert(
            "tldr".to_string(),
            EnrichmentResult::from_error(&ProviderError::Quota("429".to_string())),
        );
        let org = format_item(&item);
        assert!(org.contains("** title_zh\n扩展智能体\n"));
        assert!(org.contains("** tldr :failed:\n# provider quota exhausted: 429\n"));
    }

    #[test]
    fn test_format_items_sorted_and_skipped() {
        let old = CrawlItem::new("old", "Old", "https://example.com/old")
            .with_published(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let new = CrawlItem::new("new", "New", "https://example.com/new")
            .with_published(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        let dup = CrawlItem::new("dup", "Dup", "https://example.com/dup");

        let skip: HashSet<String> = ["dup".to_string()].into_iter().collect();
        let org = format_items(&[old, new, dup], &skip);

        let new_pos = org.find("* New").unwrap();
        let old_pos = org.find("* Old").unwrap();
        assert!(new_pos < old_pos);
        assert!(!org.contains("* Dup"));
        assert_eq!(existing_ids(&org).len(), 2);
    }
}
