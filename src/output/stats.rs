//! Per-site statistics from the state database

use crate::storage::{SiteStatistics, StateStore, StorageResult};

/// Loads statistics for every site with recorded outcomes
pub fn load_statistics(store: &dyn StateStore) -> StorageResult<Vec<SiteStatistics>> {
    store.site_statistics()
}

/// Formats statistics as a plain-text report
///
/// # Arguments
///
/// * `stats` - Per-site statistics, in display order
pub fn format_statistics(stats: &[SiteStatistics]) -> String {
    let mut out = String::from("=== Crawl Statistics ===\n\n");

    if stats.is_empty() {
        out.push_str("No crawls recorded yet.\n");
        return out;
    }

    let total_runs: u64 = stats.iter().map(|s| s.total_runs).sum();
    let total_new: u64 = stats.iter().map(|s| s.total_new_items).sum();
    out.push_str("Overview:\n");
    out.push_str(&format!("  Sites: {}\n", stats.len()));
    out.push_str(&format!("  Crawl runs: {}\n", total_runs));
    out.push_str(&format!("  New items delivered: {}\n\n", total_new));

    for site in stats {
        out.push_str(&format!("{}:\n", site.site));
        out.push_str(&format!(
            "  Runs: {} ({} ok, {} failed, {:.1}% success)\n",
            site.total_runs,
            site.successful_runs,
            site.failed_runs,
            site.success_rate()
        ));
        out.push_str(&format!("  New items: {}\n", site.total_new_items));
        out.push_str(&format!("  Seen set size: {}\n", site.seen_items));
        match site.last_crawl_time {
            Some(at) => out.push_str(&format!(
                "  Last crawl: {}\n",
                at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            None => out.push_str("  Last crawl: never\n"),
        }
        if let Some(error) = &site.last_error {
            out.push_str(&format!("  Last error: {}\n", error));
        }
        out.push('\n');
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &[SiteStatistics]) {
    print!("{}", format_statistics(stats));
}
