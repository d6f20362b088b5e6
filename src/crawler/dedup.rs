//! Incremental deduplication against a site's seen set

use crate::model::CrawlItem;
use crate::state::SeenSet;
use chrono::{DateTime, Utc};
use tracing::trace;

/// Splits a candidate batch into items never delivered before
///
/// An item is new if its identity key is not in `seen` and did not occur
/// earlier in the same batch; the first occurrence wins. Every candidate
/// key, new or not, is recorded in the returned set with `last_seen = now`.
///
/// # Arguments
///
/// * `site_name` - Used in log lines
/// * `seen` - Keys delivered by earlier crawls
/// * `candidates` - Filtered fetch results, in source order
/// * `now` - Timestamp recorded for every candidate key
///
/// # Returns
///
/// The new items in input order and the updated seen set
pub fn deduplicate(
    site_name: &str,
    seen: &SeenSet,
    candidates: Vec<CrawlItem>,
    now: DateTime<Utc>,
) -> (Vec<CrawlItem>, SeenSet) {
    let mut updated = seen.clone();
    let mut new_items = Vec::new();

    for item in candidates {
        if updated.contains(&item.identity_key) {
            trace!("[{}] Already seen: {}", site_name, item.identity_key);
            updated.insert(item.identity_key.as_str(), now);
            continue;
        }
        updated.insert(item.identity_key.as_str(), now);
        new_items.push(item);
    }

    (new_items, updated)
}
