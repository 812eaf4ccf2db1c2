//! Read-only handle to the in-memory event log.
//!
//! `ReadIndex` provides concurrent, read-only access to the in-memory event log
//! without going through the writer task. It wraps an `Arc<RwLock<EventLog>>`
//! and exposes read methods that acquire a read lock for the duration of the
//! operation.

use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::store::EventLog;
use crate::types::{RecordedEvent, StreamInfo};

/// Shared, read-only handle to the in-memory event log.
///
/// Holds an `Arc<RwLock<EventLog>>` and exposes read methods that acquire a
/// read lock. Multiple `ReadIndex` clones share the same underlying data --
/// cloning produces a new handle, not a copy of the data.
#[derive(Clone, Debug)]
pub struct ReadIndex {
    log: Arc<RwLock<EventLog>>,
}

impl ReadIndex {
    /// Create a new `ReadIndex` backed by the given shared event log.
    pub fn new(log: Arc<RwLock<EventLog>>) -> ReadIndex {
        ReadIndex { log }
    }

    /// Current version of a stream (zero-based), or `None` if absent.
    pub fn stream_version(&self, stream_id: &str) -> Option<u64> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        log.stream_version(stream_id)
    }

    /// Number of events in the global log.
    pub fn event_count(&self) -> u64 {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        log.events.len() as u64
    }

    /// Read events from a stream in event-number order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] if the stream does not exist.
    pub fn read_stream_forward(
        &self,
        stream_id: &str,
        from_event_number: u64,
        max_count: u64,
    ) -> Result<Vec<RecordedEvent>, Error> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        let positions = log.streams.get(stream_id).ok_or(Error::StreamNotFound {
            stream_id: stream_id.to_string(),
        })?;

        let stream_len = positions.len() as u64;
        let start = from_event_number.min(stream_len);
        let end = from_event_number.saturating_add(max_count).min(stream_len);

        Ok(positions[start as usize..end as usize]
            .iter()
            .map(|&index| log.events[index].clone())
            .collect())
    }

    /// Read events from a stream in reverse event-number order.
    ///
    /// `from_event_number = -1` starts at the stream tail. Returns the events
    /// (newest first), the event number to continue from, and whether the
    /// start of the stream was reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] if the stream does not exist.
    pub fn read_stream_backward(
        &self,
        stream_id: &str,
        from_event_number: i64,
        max_count: u64,
    ) -> Result<(Vec<RecordedEvent>, i64, bool), Error> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        let positions = log.streams.get(stream_id).ok_or(Error::StreamNotFound {
            stream_id: stream_id.to_string(),
        })?;

        let last = positions.len() as i64 - 1;
        let from = if from_event_number < 0 {
            last
        } else {
            from_event_number.min(last)
        };
        if from < 0 {
            return Ok((Vec::new(), -1, true));
        }

        let count = (max_count as i64).min(from + 1);
        let events: Vec<RecordedEvent> = (0..count)
            .map(|i| log.events[positions[(from - i) as usize]].clone())
            .collect();
        let next = from - count;
        Ok((events, next, next < 0))
    }

    /// Read events from the global log in byte-offset order, starting at the
    /// first event at or past `from_position`.
    pub fn read_all_forward(&self, from_position: u64, max_count: u64) -> Vec<RecordedEvent> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        let start = log
            .events
            .partition_point(|e| e.global_position < from_position);
        let end = start
            .saturating_add(max_count as usize)
            .min(log.events.len());
        log.events[start..end].to_vec()
    }

    /// Read events from the global log in reverse byte-offset order, starting
    /// at the last event at or before `from_position` (`-1` for the log tail).
    pub fn read_all_backward(&self, from_position: i64, max_count: u64) -> Vec<RecordedEvent> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        let end = if from_position < 0 {
            log.events.len()
        } else {
            log.events
                .partition_point(|e| e.global_position <= from_position as u64)
        };
        let start = end.saturating_sub(max_count as usize);
        log.events[start..end].iter().rev().cloned().collect()
    }

    /// Summaries of all streams, sorted by name.
    pub fn streams(&self) -> Vec<StreamInfo> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        let mut infos: Vec<StreamInfo> = log
            .streams
            .iter()
            .map(|(name, positions)| StreamInfo {
                stream_id: name.clone(),
                event_count: positions.len() as u64,
                latest_event_number: positions.len() as u64 - 1,
            })
            .collect();
        infos.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn event(stream: &str, number: u64, position: u64) -> RecordedEvent {
        RecordedEvent {
            event_id: Uuid::new_v4(),
            stream_id: stream.to_string(),
            event_number: number,
            global_position: position,
            recorded_at: 0,
            event_type: format!("{stream}-{number}"),
            metadata: Bytes::new(),
            payload: Bytes::new(),
        }
    }

    /// Build a ReadIndex over a hand-made log: a0 b0 a1 b1 a2.
    fn sample_index() -> ReadIndex {
        let events = vec![
            event("a", 0, 0),
            event("b", 0, 100),
            event("a", 1, 200),
            event("b", 1, 300),
            event("a", 2, 400),
        ];
        let mut streams: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, e) in events.iter().enumerate() {
            streams.entry(e.stream_id.clone()).or_default().push(i);
        }
        ReadIndex::new(Arc::new(RwLock::new(EventLog { events, streams })))
    }

    #[test]
    fn stream_version_reports_last_event_number() {
        let index = sample_index();
        assert_eq!(index.stream_version("a"), Some(2));
        assert_eq!(index.stream_version("b"), Some(1));
        assert_eq!(index.stream_version("ghost"), None);
    }

    #[test]
    fn forward_read_returns_stream_in_order() {
        let index = sample_index();
        let events = index.read_stream_forward("a", 0, 10).expect("read");
        let numbers: Vec<u64> = events.iter().map(|e| e.event_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn forward_read_partial_range() {
        let index = sample_index();
        let events = index.read_stream_forward("a", 1, 1).expect("read");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_number, 1);
    }

    #[test]
    fn forward_read_beyond_end_is_empty() {
        let index = sample_index();
        let events = index.read_stream_forward("a", 10, 5).expect("read");
        assert!(events.is_empty());
    }

    #[test]
    fn backward_read_from_tail() {
        let index = sample_index();
        let (events, next, end) = index.read_stream_backward("a", -1, 2).expect("read");
        let numbers: Vec<u64> = events.iter().map(|e| e.event_number).collect();
        assert_eq!(numbers, vec![2, 1]);
        assert_eq!(next, 0);
        assert!(!end);
    }

    #[test]
    fn backward_read_reaches_start() {
        let index = sample_index();
        let (events, next, end) = index.read_stream_backward("b", -1, 10).expect("read");
        let numbers: Vec<u64> = events.iter().map(|e| e.event_number).collect();
        assert_eq!(numbers, vec![1, 0]);
        assert_eq!(next, -1);
        assert!(end);
    }

    #[test]
    fn backward_read_missing_stream_fails() {
        let index = sample_index();
        let result = index.read_stream_backward("ghost", -1, 10);
        assert!(
            matches!(result, Err(Error::StreamNotFound { .. })),
            "expected StreamNotFound, got: {result:?}"
        );
    }

    #[test]
    fn read_all_forward_from_mid_log() {
        let index = sample_index();
        let events = index.read_all_forward(150, 10);
        let positions: Vec<u64> = events.iter().map(|e| e.global_position).collect();
        assert_eq!(positions, vec![200, 300, 400]);
    }

    #[test]
    fn read_all_backward_from_tail() {
        let index = sample_index();
        let events = index.read_all_backward(-1, 2);
        let positions: Vec<u64> = events.iter().map(|e| e.global_position).collect();
        assert_eq!(positions, vec![400, 300]);
    }

    #[test]
    fn streams_listing_is_sorted_with_counts() {
        let index = sample_index();
        let infos = index.streams();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].stream_id, "a");
        assert_eq!(infos[0].event_count, 3);
        assert_eq!(infos[1].stream_id, "b");
        assert_eq!(infos[1].latest_event_number, 1);
    }

    #[test]
    fn clones_share_the_same_log() {
        let index = sample_index();
        let clone = index.clone();
        assert_eq!(index.event_count(), clone.event_count());
    }
}
