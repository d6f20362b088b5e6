//! HTML helpers shared by the feed and custom fetchers
//!
//! This module handles:
//! - Stripping markup from feed summaries
//! - Selector-based text and attribute extraction
//! - Resolving relative links against the page URL

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Parses a CSS selector, reporting the offending selector on failure
pub fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector '{}': {:?}", selector, e))
}

/// Collapses runs of whitespace into single spaces and trims the ends
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes HTML markup and decodes entities, returning clean text
///
/// # Example
///
/// ```
/// use org_crawler::crawler::strip_tags;
///
/// assert_eq!(strip_tags("<p>Deep &amp; <b>wide</b></p>"), "Deep & wide");
/// ```
pub fn strip_tags(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return clean_text(html);
    }
    let fragment = Html::parse_fragment(html);
    clean_text(&fragment.root_element().text().collect::<String>())
}

/// Returns the cleaned text content of an element
pub fn element_text(element: &ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

/// Returns the cleaned text of the first match under `element`, if non-empty
pub fn select_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| element_text(&el))
        .filter(|s| !s.is_empty())
}

/// Returns the cleaned, non-empty text of every match under `element`
pub fn select_all_text(element: &ElementRef<'_>, selector: &Selector) -> Vec<String> {
    element
        .select(selector)
        .map(|el| element_text(&el))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Returns an attribute of the first match under `element`
///
/// If `element` itself matches the selector it is used directly, so an
/// item selector that targets `<a>` elements can also serve as the link.
pub fn select_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    if selector.matches(element) {
        if let Some(value) = element.value().attr(attr) {
            return Some(value.to_string());
        }
    }
    element
        .select(selector)
        .find_map(|el| el.value().attr(attr).map(str::to_string))
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}
