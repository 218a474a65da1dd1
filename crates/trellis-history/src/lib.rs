//! # Trellis Event History
//!
//! Port for the external event-history collaborator.
//!
//! The hub records hashed events here and the rules engine issues bounded
//! queries against it when evaluating historical conditions. The real
//! store (an on-device database) lives outside the core; this crate
//! defines the contract and ships an in-memory adapter used for wiring
//! and tests.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

/// A bounded lookup against the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHistoryRequest {
    /// Hash of the event's masked payload.
    pub mask_hash: u64,
    /// Inclusive lower bound, epoch milliseconds. 0 means unbounded.
    pub from_ts: i64,
    /// Inclusive upper bound, epoch milliseconds. 0 means "now".
    pub to_ts: i64,
}

impl EventHistoryRequest {
    /// Create a request over the full retained range.
    #[must_use]
    pub fn any_time(mask_hash: u64) -> Self {
        Self {
            mask_hash,
            from_ts: 0,
            to_ts: 0,
        }
    }

    /// Effective upper bound for this request.
    #[must_use]
    pub fn effective_to(&self) -> i64 {
        if self.to_ts == 0 {
            Utc::now().timestamp_millis()
        } else {
            self.to_ts
        }
    }
}

/// Result of a history query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventHistoryResult {
    /// Number of matching occurrences in range.
    pub count: u64,
    /// Timestamp of the oldest match, 0 when none.
    pub oldest_ts: i64,
    /// Timestamp of the newest match, 0 when none.
    pub newest_ts: i64,
}

/// Contract for the event-history collaborator.
///
/// All operations are asynchronous relative to the rules engine, which
/// wraps its calls in a fixed timeout and treats failure as "no match".
#[async_trait]
pub trait EventHistoryStore: Send + Sync {
    /// Record an occurrence of a hashed event. Returns whether it was stored.
    async fn record_event(&self, mask_hash: u64, timestamp_ms: i64) -> bool;

    /// Count occurrences matching the request.
    async fn query(&self, request: EventHistoryRequest) -> EventHistoryResult;

    /// Delete occurrences of a hash in range. Returns rows deleted.
    async fn delete(&self, mask_hash: u64, from_ts: i64, to_ts: i64) -> u64;
}

/// In-memory implementation of [`EventHistoryStore`].
///
/// Backs tests and default wiring; a device build substitutes the
/// database-backed adapter.
#[derive(Default)]
pub struct InMemoryEventHistory {
    entries: Mutex<Vec<(u64, i64)>>,
}

impl InMemoryEventHistory {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded occurrences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl EventHistoryStore for InMemoryEventHistory {
    async fn record_event(&self, mask_hash: u64, timestamp_ms: i64) -> bool {
        debug!(hash = mask_hash, ts = timestamp_ms, "[EventHistory] Recorded event");
        self.entries.lock().push((mask_hash, timestamp_ms));
        true
    }

    async fn query(&self, request: EventHistoryRequest) -> EventHistoryResult {
        let to = request.effective_to();
        let entries = self.entries.lock();

        let mut result = EventHistoryResult::default();
        for &(hash, ts) in entries.iter() {
            if hash != request.mask_hash || ts < request.from_ts || ts > to {
                continue;
            }
            if result.count == 0 {
                result.oldest_ts = ts;
                result.newest_ts = ts;
            } else {
                result.oldest_ts = result.oldest_ts.min(ts);
                result.newest_ts = result.newest_ts.max(ts);
            }
            result.count += 1;
        }
        result
    }

    async fn delete(&self, mask_hash: u64, from_ts: i64, to_ts: i64) -> u64 {
        let to = if to_ts == 0 {
            Utc::now().timestamp_millis()
        } else {
            to_ts
        };
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|&(hash, ts)| hash != mask_hash || ts < from_ts || ts > to);
        (before - entries.len()) as u64
    }
}
