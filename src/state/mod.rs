//! State module for tracking per-site crawl progress
//!
//! # Components
//!
//! - `SiteState`: the scheduler's `Idle -> Due -> Running` state machine
//! - `SeenSet`: identity keys already delivered for a site, with retention pruning

mod seen_set;
mod site_state;

use thiserror::Error;

// Re-export main types
pub use seen_set::{RetentionPolicy, SeenSet};
pub use site_state::SiteState;

/// Errors raised by the site state machine
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid transition for site '{site}': {from} -> {to}")]
    InvalidTransition {
        site: String,
        from: SiteState,
        to: SiteState,
    },

    #[error("Site not tracked by the scheduler: {0}")]
    UnknownSite(String),
}
