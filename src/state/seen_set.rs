use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// How long identity keys stay in a site's seen set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Keys not seen within this window are dropped
    pub max_age: Option<Duration>,

    /// Upper bound on entries; the oldest `last_seen` values are evicted first
    pub max_entries: Option<usize>,
}

impl RetentionPolicy {
    pub fn new(retention_days: Option<u32>, max_entries: Option<usize>) -> Self {
        Self {
            max_age: retention_days.map(|days| Duration::days(i64::from(days))),
            max_entries,
        }
    }

    /// A policy that never prunes
    pub fn keep_all() -> Self {
        Self::default()
    }
}

/// Identity keys already delivered for one site, with when each was last seen
///
/// The set only grows during normal operation; `prune` is the single way
/// entries are removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeenSet {
    entries: HashMap<String, DateTime<Utc>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, DateTime<Utc>)>,
    {
        let mut set = Self::new();
        for (key, seen_at) in entries {
            set.insert(key, seen_at);
        }
        set
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a key as seen, keeping the later of the two timestamps
    pub fn insert(&mut self, key: impl Into<String>, seen_at: DateTime<Utc>) {
        self.entries
            .entry(key.into())
            .and_modify(|existing| {
                if seen_at > *existing {
                    *existing = seen_at;
                }
            })
            .or_insert(seen_at);
    }

    pub fn last_seen(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Applies a retention policy
    ///
    /// Keys seen at or after `now` belong to the batch just fetched and are
    /// never evicted by the entry cap, so the set may stay above
    /// `max_entries` while the source lists more items than that.
    ///
    /// # Arguments
    ///
    /// * `now` - Reference time for the age window and the current batch
    /// * `policy` - Age window and entry cap
    ///
    /// # Returns
    ///
    /// The number of entries removed
    pub fn prune(&mut self, now: DateTime<Utc>, policy: &RetentionPolicy) -> usize {
        let before = self.entries.len();

        if let Some(cutoff) = policy.max_age.and_then(|age| now.checked_sub_signed(age)) {
            self.entries.retain(|_, seen_at| *seen_at >= cutoff);
        }

        if let Some(max_entries) = policy.max_entries {
            if self.entries.len() > max_entries {
                let (current, mut older): (Vec<_>, Vec<_>) = self
                    .entries
                    .drain()
                    .partition(|(_, seen_at)| *seen_at >= now);
                // Newest first; ties broken by key so eviction is deterministic
                older.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                older.truncate(max_entries.saturating_sub(current.len()));
                self.entries = current.into_iter().chain(older).collect();
            }
        }

        before - self.entries.len()
    }
}
