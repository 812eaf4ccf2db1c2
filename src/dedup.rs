//! Bounded LRU deduplication index for idempotent appends.
//!
//! Tracks recently written event IDs so that retried appends can be detected
//! and the original recorded events returned instead of writing duplicates.
//! This backs the `Any`-expected-version rule: a single-event rewrite whose
//! event ID matches any recent event of the same stream is idempotent. The
//! index uses an LRU cache keyed by event ID, so the most recently written
//! events remain dedup-eligible while older entries are evicted.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use uuid::Uuid;

use crate::types::{ProposedEvent, RecordedEvent};

/// Bounded LRU index mapping event IDs to their recorded batch.
///
/// Each entry maps one event ID to the full batch of `RecordedEvent`s that
/// were written together; keys from the same batch share a single
/// `Arc<Vec<RecordedEvent>>` allocation.
pub struct DedupIndex {
    cache: LruCache<Uuid, Arc<Vec<RecordedEvent>>>,
}

impl DedupIndex {
    /// Create a new dedup index tracking at most `capacity` event IDs.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Check whether a proposed batch repeats a previously recorded batch on
    /// the same stream.
    ///
    /// Looks up the `event_id` of the first event in `proposed`. A hit counts
    /// only when the cached batch was written to `stream_id`; the same event
    /// ID appearing on another stream is a distinct write.
    ///
    /// # Returns
    ///
    /// `Some(recorded_batch)` on a same-stream hit, `None` otherwise
    /// (including when `proposed` is empty).
    pub fn check(
        &mut self,
        stream_id: &str,
        proposed: &[ProposedEvent],
    ) -> Option<Arc<Vec<RecordedEvent>>> {
        let first = proposed.first()?;
        // get() promotes the entry in LRU order, keeping retried batches warm.
        let batch = self.cache.get(&first.event_id)?;
        if batch.first().map(|e| e.stream_id.as_str()) == Some(stream_id) {
            Some(Arc::clone(batch))
        } else {
            None
        }
    }

    /// Record a successfully written batch for future dedup checks.
    ///
    /// Creates a single `Arc<Vec<RecordedEvent>>` for the batch and inserts
    /// one cache entry per event ID, all pointing to the same allocation.
    pub fn record(&mut self, recorded: Vec<RecordedEvent>) {
        let shared = Arc::new(recorded);
        for event in shared.iter() {
            self.cache.put(event.event_id, Arc::clone(&shared));
        }
    }

    /// Seed the dedup index from recovered events during startup.
    ///
    /// Inserts each event individually (as a single-event batch) in ascending
    /// global-position order. Because `LruCache::put` marks the inserted key
    /// as most-recently-used, inserting oldest-first leaves the newest events
    /// LRU-hottest; if the log exceeds the cache capacity the oldest events
    /// fall out naturally.
    pub fn seed_from_log(&mut self, events: &[RecordedEvent]) {
        for event in events {
            let batch = Arc::new(vec![event.clone()]);
            self.cache.put(event.event_id, batch);
        }
    }
}
