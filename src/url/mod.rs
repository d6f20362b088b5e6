//! URL handling module for Org-Crawler
//!
//! Links coming out of feeds and scraped pages are canonicalized before they
//! are used as identity keys, so the same article reached through slightly
//! different URLs deduplicates to one item.

mod normalize;

// Re-export main functions
pub use normalize::{canonicalize_url, identity_for_link};
