use crate::UrlError;
use url::Url;

/// Tracking query parameters dropped during canonicalization
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "mc_cid", "_hsenc", "_hsmi"];

/// Canonicalizes a link so it can serve as a stable identity key
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Use `https` for both HTTP schemes
/// 3. Lowercase the host and remove a `www.` prefix
/// 4. Remove dot segments, empty segments and a trailing slash
/// 5. Remove the fragment
/// 6. Remove tracking query parameters and sort the rest
///
/// # Arguments
///
/// * `url_str` - The link to canonicalize
///
/// # Returns
///
/// * `Ok(Url)` - Canonical URL
/// * `Err(UrlError)` - Failed to parse or canonicalize the link
///
/// # Examples
///
/// ```
/// use org_crawler::url::canonicalize_url;
///
/// let url = canonicalize_url("http://WWW.Example.com/abs/2511.09563/?utm_source=rss").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/abs/2511.09563");
/// ```
pub fn canonicalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" => {
            url.set_scheme("https")
                .map_err(|_| UrlError::Malformed(format!("cannot rewrite scheme of {}", url_str)))?;
        }
        other => {
            return Err(UrlError::InvalidScheme(format!(
                "Only HTTP and HTTPS schemes are supported, got: {}",
                other
            )));
        }
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Returns the canonical form of a link as a string, if it has one
pub fn identity_for_link(link: &str) -> Option<String> {
    canonicalize_url(link).ok().map(String::from)
}

/// Removes dot segments, repeated slashes and a trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_https() {
        let result = canonicalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_remove_www_and_lowercase_host() {
        let result = canonicalize_url("https://WWW.Example.COM/Paper").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Paper");
    }

    #[test]
    fn test_trailing_slash_and_root() {
        assert_eq!(
            canonicalize_url("https://example.com/page/").unwrap().as_str(),
            "https://example.com/page"
        );
        assert_eq!(
            canonicalize_url("https://example.com").unwrap().as_str(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_remove_fragment() {
        let result = canonicalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_tracking_params_removed_and_sorted() {
        let result = canonicalize_url(
            "https://example.com/page?keep=yes&utm_medium=email&another=value&fbclid=123",
        )
        .unwrap();
        assert_eq!(
            result.as_str(),
            "https://example.com/page?another=value&keep=yes"
        );
    }

    #[test]
    fn test_only_tracking_params() {
        let result = canonicalize_url("https://example.com/page?utm_source=rss&gclid=c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_dot_segments() {
        let result = canonicalize_url("https://example.com/a/../b/./c//d").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c/d");
    }

    #[test]
    fn test_equivalent_links_share_identity() {
        assert_eq!(
            identity_for_link("http://www.example.com/paper/abc-123/?utm_source=feed"),
            identity_for_link("https://example.com/paper/abc-123#top")
        );
    }

    #[test]
    fn test_invalid_scheme() {
        let result = canonicalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(canonicalize_url("not a url").is_err());
        assert_eq!(identity_for_link(""), None);
    }
}
