//! Per-document error cache.
//!
//! After a failed poll the monitor records when the next network call is
//! allowed. Polls scheduled before that time are answered from the cache, so a
//! burst of polls against a failing server produces a single request.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCacheEntry {
    pub error_count: u32,
    pub last_error_time: Instant,
    pub next_retry_time: Instant,
}

pub struct ErrorCache {
    entries: DashMap<String, ErrorCacheEntry>,
    ttl: Duration,
}

impl ErrorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Record a failure; no network call is made for the document until
    /// `retry_after` has passed.
    pub fn record_failure(&self, document_id: &str, retry_after: Duration) -> ErrorCacheEntry {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(document_id.to_string())
            .or_insert(ErrorCacheEntry {
                error_count: 0,
                last_error_time: now,
                next_retry_time: now,
            });
        entry.error_count += 1;
        entry.last_error_time = now;
        entry.next_retry_time = now + retry_after;
        *entry
    }

    /// When the document may be polled again, if that is still in the future.
    ///
    /// Entries older than the TTL are dropped on lookup.
    pub fn retry_at(&self, document_id: &str) -> Option<Instant> {
        let now = Instant::now();
        let entry = *self.entries.get(document_id)?;

        if now.duration_since(entry.last_error_time) >= self.ttl {
            self.entries.remove(document_id);
            return None;
        }
        (now < entry.next_retry_time).then_some(entry.next_retry_time)
    }

    pub fn get(&self, document_id: &str) -> Option<ErrorCacheEntry> {
        self.entries.get(document_id).map(|entry| *entry)
    }

    pub fn clear(&self, document_id: &str) {
        self.entries.remove(document_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retry_window() {
        let cache = ErrorCache::new(Duration::from_secs(60));
        assert_eq!(cache.retry_at("doc"), None);

        let entry = cache.record_failure("doc", Duration::from_secs(4));
        assert_eq!(entry.error_count, 1);
        assert_eq!(cache.retry_at("doc"), Some(entry.next_retry_time));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.retry_at("doc"), None);
        // Still cached, just no longer blocking
        assert_eq!(cache.get("doc").unwrap().error_count, 1);

        assert_eq!(cache.record_failure("doc", Duration::from_secs(8)).error_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ErrorCache::new(Duration::from_secs(10));
        cache.record_failure("doc", Duration::from_secs(30));
        assert!(cache.retry_at("doc").is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.retry_at("doc"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_is_per_document() {
        let cache = ErrorCache::new(Duration::from_secs(10));
        cache.record_failure("a", Duration::from_secs(5));
        cache.record_failure("b", Duration::from_secs(5));

        cache.clear("a");
        assert_eq!(cache.retry_at("a"), None);
        assert!(cache.retry_at("b").is_some());
        assert_eq!(cache.len(), 1);
    }
}
