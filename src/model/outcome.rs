use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy for crawl jobs and enrichment steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failure, timeout or non-2xx HTTP status
    SourceUnreachable,

    /// The fetched document could not be interpreted at all
    ParseFailure,

    /// A single entry was unusable and skipped
    EntryMalformed,

    /// An enrichment provider failed for one step of one item
    EnrichmentFailure,

    /// The state store or item sink failed
    StorageFailure,

    /// The job was queued but dropped at shutdown before it started
    Cancelled,

    /// The job panicked
    Internal,
}

impl ErrorKind {
    /// Converts the error kind to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::SourceUnreachable => "source_unreachable",
            Self::ParseFailure => "parse_failure",
            Self::EntryMalformed => "entry_malformed",
            Self::EnrichmentFailure => "enrichment_failure",
            Self::StorageFailure => "storage_failure",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Parses an error kind from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "source_unreachable" => Some(Self::SourceUnreachable),
            "parse_failure" => Some(Self::ParseFailure),
            "entry_malformed" => Some(Self::EntryMalformed),
            "enrichment_failure" => Some(Self::EnrichmentFailure),
            "storage_failure" => Some(Self::StorageFailure),
            "cancelled" => Some(Self::Cancelled),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Returns all error kinds
    pub fn all_kinds() -> Vec<Self> {
        vec![
            Self::SourceUnreachable,
            Self::ParseFailure,
            Self::EntryMalformed,
            Self::EnrichmentFailure,
            Self::StorageFailure,
            Self::Cancelled,
            Self::Internal,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// The record of one crawl job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub site_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,

    /// Items handed to the sink
    pub new_item_count: usize,

    /// Items returned by the fetcher before filtering
    pub fetched_count: usize,

    /// Fetch attempts used, zero if the job never fetched
    pub attempts: u32,

    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl CrawlOutcome {
    /// Builds a successful outcome finished now
    pub fn succeeded(
        site_name: impl Into<String>,
        started_at: DateTime<Utc>,
        new_item_count: usize,
        fetched_count: usize,
        attempts: u32,
    ) -> Self {
        Self {
            site_name: site_name.into(),
            started_at,
            finished_at: Utc::now(),
            success: true,
            new_item_count,
            fetched_count,
            attempts,
            error_kind: None,
            error_detail: None,
        }
    }

    /// Builds a failed outcome finished now
    pub fn failed(
        site_name: impl Into<String>,
        started_at: DateTime<Utc>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            site_name: site_name.into(),
            started_at,
            finished_at: Utc::now(),
            success: false,
            new_item_count: 0,
            fetched_count: 0,
            attempts: 0,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_fetched_count(mut self, fetched_count: usize) -> Self {
        self.fetched_count = fetched_count;
        self
    }

    /// Wall-clock duration of the job
    pub fn duration(&self) -> Duration {
        self.finished_at.signed_duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_db_string() {
        for kind in ErrorKind::all_kinds() {
            let db_str = kind.to_db_string();
            assert_eq!(Some(kind), ErrorKind::from_db_string(db_str));
        }
        assert_eq!(ErrorKind::from_db_string("bogus"), None);
    }

    #[test]
    fn test_serde_matches_db_string() {
        for kind in ErrorKind::all_kinds() {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_failed_outcome() {
        let started = Utc::now();
        let outcome = CrawlOutcome::failed("s", started, ErrorKind::SourceUnreachable, "503")
            .with_attempts(3);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::SourceUnreachable));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.new_item_count, 0);
        assert!(outcome.duration() >= Duration::zero());
    }

    #[test]
    fn test_succeeded_outcome() {
        let outcome = CrawlOutcome::succeeded("s", Utc::now(), 2, 10, 1);
        assert!(outcome.success);
        assert_eq!(outcome.error_kind, None);
        assert_eq!(outcome.new_item_count, 2);
        assert_eq!(outcome.fetched_count, 10);
    }
}
