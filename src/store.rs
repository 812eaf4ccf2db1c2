//! Stream layer for LogfoldDB.
//!
//! The `Store` sits on the chunk database and gives it stream semantics: an
//! in-memory index rebuilt by scanning the log at open, appends with
//! expected-version concurrency control and idempotency, multi-write
//! transactions, and ordered forward/backward reads.
//!
//! All writes go through `append()` (or a transaction commit), which validates
//! concurrency, serializes record frames into the chunk log, commits for
//! durability, then updates the in-memory index. Reads go directly to the
//! index with no disk I/O.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::codec::{self, DecodeOutcome, EpochRecord, LogRecord, RecordFlags};
use crate::db::{ChunkDb, ChunkDbConfig};
use crate::dedup::DedupIndex;
use crate::error::Error;
use crate::types::{
    ExpectedVersion, MAX_EVENT_SIZE, MAX_EVENT_TYPE_LEN, MAX_STREAM_NAME_LEN, ProposedEvent,
    RecordedEvent, StreamInfo,
};

/// Number of recent event IDs tracked for `Any`-rewrite deduplication.
const DEDUP_CAPACITY: usize = 4096;

/// Thread-safe, read-optimized view of the event log.
///
/// Holds the two in-memory index structures: the global event list in log
/// order and the per-stream index of positions into it. Wrapped in
/// `Arc<RwLock<EventLog>>` inside `Store` so that concurrent read handlers can
/// acquire a read lock while the writer task holds exclusive write access.
#[derive(Debug, Default)]
pub struct EventLog {
    /// Global event log in byte-offset order. Append-only.
    pub events: Vec<RecordedEvent>,
    /// Stream index: stream name to indices into `events`, in event-number
    /// order (`streams[s][n]` is event number `n` of stream `s`).
    pub streams: HashMap<String, Vec<usize>>,
}

impl EventLog {
    /// Current version of a stream (zero-based), or `None` if absent.
    pub fn stream_version(&self, stream_id: &str) -> Option<u64> {
        self.streams
            .get(stream_id)
            .map(|positions| positions.len() as u64 - 1)
    }
}

/// A buffered multi-write transaction.
struct Transaction {
    stream_id: String,
    expected_version: ExpectedVersion,
    events: Vec<ProposedEvent>,
}

/// How an append resolves after the concurrency check.
enum AppendDecision {
    /// Write the batch, numbering events from `next_event_number`.
    Write { next_event_number: u64 },
    /// The batch is already committed; return the original events unwritten.
    Idempotent(Vec<RecordedEvent>),
}

/// Core storage engine: the chunk database plus the stream index over it.
pub struct Store {
    db: ChunkDb,
    log: Arc<RwLock<EventLog>>,
    dedup: DedupIndex,
    /// Epoch number of this open (one greater than the last marker on disk).
    epoch_number: u64,
    transactions: HashMap<u64, Transaction>,
    next_txn_id: u64,
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

impl Store {
    /// Open the store over a chunk database directory.
    ///
    /// Validates and recovers the chunk database, rebuilds the in-memory index
    /// by scanning every chunk, drops any batch torn by a crash, seeds the
    /// dedup window, and records a fresh epoch marker for this term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptDatabase`] if the directory fails validation,
    /// [`Error::CorruptRecord`] on mid-log corruption below the durable
    /// frontier, or [`Error::Io`] on filesystem failures.
    pub fn open(config: ChunkDbConfig) -> Result<Store, Error> {
        let mut db = ChunkDb::open(config)?;

        let mut events: Vec<RecordedEvent> = Vec::new();
        let mut streams: HashMap<String, Vec<usize>> = HashMap::new();
        // Records of a batch whose closing record has not yet been seen.
        let mut pending: Vec<RecordedEvent> = Vec::new();
        let mut last_epoch_number: Option<u64> = None;

        for start in db.chunk_starts() {
            let (base, body) = db.chunk_body(start)?;
            let mut offset = 0usize;
            while offset < body.len() {
                match codec::decode_record(&body[offset..]) {
                    Ok(DecodeOutcome::Complete { value, consumed }) => {
                        match value {
                            LogRecord::Event { event, flags } => {
                                if flags.batch_begin && !pending.is_empty() {
                                    tracing::warn!(
                                        dropped = pending.len(),
                                        "dropping batch torn by an earlier crash"
                                    );
                                    pending.clear();
                                }
                                let closes_batch = flags.batch_end;
                                pending.push(event);
                                if closes_batch {
                                    for event in pending.drain(..) {
                                        let index = events.len();
                                        streams
                                            .entry(event.stream_id.clone())
                                            .or_default()
                                            .push(index);
                                        events.push(event);
                                    }
                                }
                            }
                            LogRecord::Epoch(epoch) => {
                                last_epoch_number = Some(epoch.epoch_number);
                            }
                        }
                        offset += consumed;
                    }
                    Ok(DecodeOutcome::Incomplete) => {
                        return Err(Error::CorruptRecord {
                            position: base + offset as u64,
                            detail: "truncated record below the durable frontier".to_string(),
                        });
                    }
                    Err(Error::CorruptRecord { detail, .. }) => {
                        return Err(Error::CorruptRecord {
                            position: base + offset as u64,
                            detail,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                dropped = pending.len(),
                "dropping trailing batch torn by a crash"
            );
        }

        let mut dedup = DedupIndex::new(
            NonZeroUsize::new(DEDUP_CAPACITY).expect("dedup capacity is nonzero"),
        );
        dedup.seed_from_log(&events);

        tracing::info!(
            events = events.len(),
            streams = streams.len(),
            "store index recovered"
        );
        metrics::gauge!("logfold_recovered_events").set(events.len() as f64);

        let mut store = Store {
            db,
            log: Arc::new(RwLock::new(EventLog { events, streams })),
            dedup,
            epoch_number: last_epoch_number.map(|n| n + 1).unwrap_or(0),
            transactions: HashMap::new(),
            next_txn_id: 0,
        };

        // A new open is a new term: chain an epoch marker into the log so the
        // epoch checkpoint names a real offset.
        let marker = EpochRecord {
            epoch_number: store.epoch_number,
            epoch_id: Uuid::new_v4(),
            prev_epoch_position: store.db.epoch_position(),
        };
        let offset = store.db.append(&codec::encode_epoch_record(&marker))?;
        store.db.commit()?;
        store.db.advance_epoch(offset)?;
        tracing::info!(epoch = marker.epoch_number, offset, "epoch marker written");

        Ok(store)
    }

    /// Append events to a stream with optimistic concurrency control.
    ///
    /// Validates the expected version against the current stream state,
    /// applying the idempotency rules below; validates each proposed event;
    /// serializes the batch into the chunk log; commits for durability; then
    /// updates the in-memory index.
    ///
    /// # Idempotency
    ///
    /// * A batch at `Exact(n)`/`NoStream` whose event IDs align positionally
    ///   with events already committed at numbers `n+1 ..= n+k` writes nothing
    ///   and returns the original events.
    /// * A batch at `Any` aligning with the last `k` committed events of the
    ///   stream is likewise deduplicated, as is a single event whose ID
    ///   matches any recent event of the stream.
    /// * Every other mismatch raises [`Error::WrongExpectedVersion`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongExpectedVersion`] on a non-idempotent concurrency
    /// failure, [`Error::InvalidArgument`] for a bad stream name, empty batch,
    /// or bad event type, [`Error::EventTooLarge`] for an oversized record,
    /// and [`Error::Io`] if writing fails.
    pub fn append(
        &mut self,
        stream_id: &str,
        expected_version: ExpectedVersion,
        proposed_events: Vec<ProposedEvent>,
    ) -> Result<Vec<RecordedEvent>, Error> {
        if proposed_events.is_empty() {
            return Err(Error::InvalidArgument(
                "append requires at least one event".to_string(),
            ));
        }
        self.append_internal(stream_id, expected_version, proposed_events)
    }

    /// Shared append path for direct appends and transaction commits.
    fn append_internal(
        &mut self,
        stream_id: &str,
        expected_version: ExpectedVersion,
        proposed_events: Vec<ProposedEvent>,
    ) -> Result<Vec<RecordedEvent>, Error> {
        validate_stream_name(stream_id)?;
        if proposed_events.is_empty() {
            return Ok(Vec::new());
        }

        let decision = self.decide(stream_id, expected_version, &proposed_events)?;
        let next_event_number = match decision {
            AppendDecision::Idempotent(original) => {
                tracing::debug!(
                    stream = stream_id,
                    events = original.len(),
                    "idempotent append deduplicated"
                );
                return Ok(original);
            }
            AppendDecision::Write { next_event_number } => next_event_number,
        };

        // Validate every event before any byte reaches the log, so a rejected
        // batch has no partial on-disk effect.
        let recorded_at = now_millis();
        let mut recorded = Vec::with_capacity(proposed_events.len());
        for (i, proposed) in proposed_events.iter().enumerate() {
            validate_event_type(&proposed.event_type)?;
            let event = RecordedEvent {
                event_id: proposed.event_id,
                stream_id: stream_id.to_string(),
                event_number: next_event_number + i as u64,
                global_position: 0, // assigned at write time below
                recorded_at,
                event_type: proposed.event_type.clone(),
                metadata: proposed.metadata.clone(),
                payload: proposed.payload.clone(),
            };
            let frame_len =
                codec::encode_event_record(&event, RecordFlags::STANDALONE).len();
            if frame_len > MAX_EVENT_SIZE {
                return Err(Error::EventTooLarge {
                    size: frame_len,
                    max: MAX_EVENT_SIZE,
                });
            }
            recorded.push(event);
        }

        // Write the batch. Each record's global position is the byte offset
        // the database will place it at, computed against the current tail.
        let batch_len = recorded.len();
        for (i, event) in recorded.iter_mut().enumerate() {
            let flags = RecordFlags::for_batch_position(i, batch_len);
            let probe = codec::encode_event_record(event, flags);
            event.global_position = self.db.next_append_offset(probe.len());
            let frame = codec::encode_event_record(event, flags);
            let written_at = self.db.append(&frame)?;
            debug_assert_eq!(written_at, event.global_position);
        }
        self.db.commit()?;

        // Publish to the index only after the fsync.
        {
            let mut log = self.log.write().expect("EventLog RwLock poisoned");
            for event in &recorded {
                let index = log.events.len();
                log.streams
                    .entry(event.stream_id.clone())
                    .or_default()
                    .push(index);
                log.events.push(event.clone());
            }
        }
        self.dedup.record(recorded.clone());

        metrics::counter!("logfold_events_appended_total").increment(recorded.len() as u64);
        metrics::gauge!("logfold_log_bytes").set(self.db.writer_position() as f64);

        Ok(recorded)
    }

    /// Resolve the expected-version check into a write or an idempotent hit.
    fn decide(
        &mut self,
        stream_id: &str,
        expected_version: ExpectedVersion,
        proposed: &[ProposedEvent],
    ) -> Result<AppendDecision, Error> {
        let log = Arc::clone(&self.log);
        let log = log.read().expect("EventLog RwLock poisoned");
        let positions = log.streams.get(stream_id);
        let current: i64 = positions.map(|p| p.len() as i64 - 1).unwrap_or(-1);
        let batch_len = proposed.len();

        match expected_version {
            ExpectedVersion::Any => {
                // Whole-batch rewrite of the stream tail.
                if let Some(positions) = positions
                    && positions.len() >= batch_len
                {
                    let tail = &positions[positions.len() - batch_len..];
                    let aligned = tail
                        .iter()
                        .zip(proposed)
                        .all(|(&index, p)| log.events[index].event_id == p.event_id);
                    if aligned {
                        return Ok(AppendDecision::Idempotent(
                            tail.iter().map(|&i| log.events[i].clone()).collect(),
                        ));
                    }
                }
                // Single-event rewrite matching any recent event of the stream.
                if batch_len == 1
                    && let Some(batch) = self.dedup.check(stream_id, proposed)
                {
                    return Ok(AppendDecision::Idempotent((*batch).clone()));
                }
                Ok(AppendDecision::Write {
                    next_event_number: (current + 1) as u64,
                })
            }
            ExpectedVersion::StreamExists => {
                if current < 0 {
                    return Err(Error::WrongExpectedVersion {
                        expected: "StreamExists".to_string(),
                        actual: "NoStream".to_string(),
                    });
                }
                Ok(AppendDecision::Write {
                    next_event_number: (current + 1) as u64,
                })
            }
            ExpectedVersion::NoStream | ExpectedVersion::Exact(_) => {
                let expected = expected_version.as_i64();
                if current == expected {
                    return Ok(AppendDecision::Write {
                        next_event_number: (current + 1) as u64,
                    });
                }
                if current > expected {
                    // The whole batch must already sit at numbers
                    // expected+1 ..= expected+k for the retry to be idempotent.
                    let k = batch_len as i64;
                    if current >= expected + k {
                        let positions = positions.expect("current > expected >= -1");
                        let first = (expected + 1) as usize;
                        let window = &positions[first..first + batch_len];
                        let aligned = window
                            .iter()
                            .zip(proposed)
                            .all(|(&index, p)| log.events[index].event_id == p.event_id);
                        if aligned {
                            return Ok(AppendDecision::Idempotent(
                                window.iter().map(|&i| log.events[i].clone()).collect(),
                            ));
                        }
                    }
                }
                Err(Error::WrongExpectedVersion {
                    expected: describe_expected(expected_version),
                    actual: describe_current(current),
                })
            }
        }
    }

    /// Begin a multi-write transaction against one stream.
    ///
    /// The expected version is checked at commit time, not here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a bad stream name.
    pub fn transaction_start(
        &mut self,
        stream_id: &str,
        expected_version: ExpectedVersion,
    ) -> Result<u64, Error> {
        validate_stream_name(stream_id)?;
        let txn_id = self.next_txn_id;
        self.next_txn_id += 1;
        self.transactions.insert(
            txn_id,
            Transaction {
                stream_id: stream_id.to_string(),
                expected_version,
                events: Vec::new(),
            },
        );
        tracing::debug!(txn_id, stream = stream_id, "transaction started");
        Ok(txn_id)
    }

    /// Buffer events into an open transaction. Nothing reaches the log yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionNotFound`] for an unknown id.
    pub fn transaction_write(
        &mut self,
        txn_id: u64,
        events: Vec<ProposedEvent>,
    ) -> Result<(), Error> {
        let txn = self
            .transactions
            .get_mut(&txn_id)
            .ok_or(Error::TransactionNotFound { txn_id })?;
        txn.events.extend(events);
        Ok(())
    }

    /// Commit a transaction: run the expected-version check and append all
    /// buffered events as one atomic batch.
    ///
    /// A transaction with no buffered events commits as a no-op. On any
    /// failure the transaction is consumed and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionNotFound`] for an unknown id, plus every
    /// error [`append`](Store::append) can produce.
    pub fn transaction_commit(&mut self, txn_id: u64) -> Result<Vec<RecordedEvent>, Error> {
        let txn = self
            .transactions
            .remove(&txn_id)
            .ok_or(Error::TransactionNotFound { txn_id })?;
        let result = self.append_internal(&txn.stream_id, txn.expected_version, txn.events);
        if result.is_ok() {
            tracing::debug!(txn_id, stream = %txn.stream_id, "transaction committed");
        }
        result
    }

    /// Discard an open transaction and its buffered events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionNotFound`] for an unknown id.
    pub fn transaction_rollback(&mut self, txn_id: u64) -> Result<(), Error> {
        self.transactions
            .remove(&txn_id)
            .map(|_| ())
            .ok_or(Error::TransactionNotFound { txn_id })
    }

    /// Current version of a stream (zero-based), or `None` if absent.
    pub fn stream_version(&self, stream_id: &str) -> Option<u64> {
        let log = self.log.read().expect("EventLog RwLock poisoned");
        log.stream_version(stream_id)
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
        let end = start.saturating_add(max_count as usize).min(log.events.len());
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

    /// Returns a clone of the shared `Arc<RwLock<EventLog>>` for read handles.
    pub fn log(&self) -> Arc<RwLock<EventLog>> {
        Arc::clone(&self.log)
    }

    /// Next byte offset at which the log will append.
    pub fn writer_position(&self) -> u64 {
        self.db.writer_position()
    }

    /// Epoch number of this open.
    pub fn epoch_number(&self) -> u64 {
        self.epoch_number
    }

    /// Number of chunks in the underlying database.
    pub fn chunk_count(&self) -> usize {
        self.db.chunk_count()
    }

    /// Stage a truncation of the log to `target`, applied on the next open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the target is beyond the writer.
    pub fn request_truncation(&mut self, target: u64) -> Result<(), Error> {
        self.db.request_truncation(target)
    }

    /// Flush everything and release the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a final flush fails.
    pub fn close(self) -> Result<(), Error> {
        self.db.close()
    }
}

/// Reject empty or oversized stream names.
fn validate_stream_name(stream_id: &str) -> Result<(), Error> {
    if stream_id.is_empty() {
        return Err(Error::InvalidArgument(
            "stream name must not be empty".to_string(),
        ));
    }
    if stream_id.len() > MAX_STREAM_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "stream name exceeds {MAX_STREAM_NAME_LEN} byte limit: {} bytes",
            stream_id.len()
        )));
    }
    Ok(())
}

/// Reject empty or oversized event types.
fn validate_event_type(event_type: &str) -> Result<(), Error> {
    if event_type.is_empty() {
        return Err(Error::InvalidArgument(
            "event type must not be empty".to_string(),
        ));
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(Error::InvalidArgument(format!(
            "event type exceeds {MAX_EVENT_TYPE_LEN} byte limit: {} bytes",
            event_type.len()
        )));
    }
    Ok(())
}

fn describe_expected(expected: ExpectedVersion) -> String {
    match expected {
        ExpectedVersion::Any => "Any".to_string(),
        ExpectedVersion::NoStream => "NoStream".to_string(),
        ExpectedVersion::StreamExists => "StreamExists".to_string(),
        ExpectedVersion::Exact(n) => n.to_string(),
    }
}

fn describe_current(current: i64) -> String {
    if current < 0 {
        "NoStream".to_string()
    } else {
        current.to_string()
    }
}
