use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

/// Dedup key: the same message redelivered by the transport maps to the same
/// fingerprint, distinct messages never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub sender_id: i64,
    pub message_id: i32,
}

impl Fingerprint {
    pub fn new(sender_id: i64, message_id: i32) -> Self {
        Self {
            sender_id,
            message_id,
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.sender_id, self.message_id)
    }
}

/// In-memory record of already-forwarded messages.
///
/// Bounded twice: the LRU drops the least recently recorded fingerprint once
/// `capacity` is reached, and entries older than `retention` count as unseen
/// and are removed by [`DedupCache::sweep`].
pub struct DedupCache {
    entries: LruCache<Fingerprint, DateTime<Utc>>,
    retention: Option<Duration>,
}

impl DedupCache {
    pub fn new(capacity: NonZeroUsize, retention: Option<Duration>) -> Self {
        Self {
            entries: LruCache::new(capacity),
            retention,
        }
    }

    pub fn seen(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        match self.entries.peek(fingerprint) {
            Some(at) => !self.is_expired(*at, now),
            None => false,
        }
    }

    pub fn record(&mut self, fingerprint: Fingerprint, at: DateTime<Utc>) {
        self.entries.put(fingerprint, at);
    }

    /// Drop expired entries, returning how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|(_, at)| self.is_expired(**at, now))
            .map(|(fp, _)| *fp)
            .collect();
        for fp in &expired {
            self.entries.pop(fp);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_expired(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.retention {
            Some(retention) => now - at >= retention,
            None => false,
        }
    }
}
