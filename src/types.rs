//! Core domain types for LogfoldDB.
//!
//! This module defines the foundational data types that every other module depends on:
//! proposed events (client-submitted), recorded events (server-persisted with positions),
//! expected version semantics for optimistic concurrency, global log positions, and
//! size limit constants.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum size of a single encoded event record in bytes.
///
/// Events exceeding this limit are rejected on append. Domain events should be small,
/// structured data (typically JSON). Large artifacts belong in external storage; events
/// carry references to them.
pub const MAX_EVENT_SIZE: usize = 64 * 1024; // 64 KB

/// Maximum length of an event type tag in bytes.
pub const MAX_EVENT_TYPE_LEN: usize = 256;

/// Maximum length of a stream name in bytes.
///
/// Stream names are UTF-8 strings chosen by the client (e.g., `"order-91ac"`,
/// `"$projections-totals"`).
pub const MAX_STREAM_NAME_LEN: usize = 256;

/// An event the client wants to append to a stream.
///
/// The client assigns the `event_id` (a UUID serving as an idempotency key) and provides
/// the event type tag, metadata, and payload as opaque byte buffers. The server does not
/// interpret payload or metadata contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedEvent {
    /// Client-assigned unique ID for this event.
    pub event_id: Uuid,
    /// Event type tag (UTF-8, max 256 bytes).
    pub event_type: String,
    /// Opaque infrastructure context (correlation ID, causation ID, etc.).
    pub metadata: Bytes,
    /// Opaque domain event body.
    pub payload: Bytes,
}

/// A persisted event with server-assigned positions.
///
/// After a successful append, the server assigns a `global_position` (the byte offset of
/// the record in the transaction log) and an `event_number` (contiguous, zero-based index
/// within the stream). Both are immutable once assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Client-assigned unique ID.
    pub event_id: Uuid,
    /// Name of the stream this event belongs to.
    pub stream_id: String,
    /// Zero-based event number within the stream.
    pub event_number: u64,
    /// Byte offset of this record in the global transaction log.
    pub global_position: u64,
    /// Milliseconds since the Unix epoch at which the record was written.
    pub recorded_at: u64,
    /// Event type tag.
    pub event_type: String,
    /// Opaque metadata bytes.
    pub metadata: Bytes,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl RecordedEvent {
    /// The global log position of this record as a `(commit, prepare)` pair.
    ///
    /// On a single-node log both halves equal the record's byte offset.
    pub fn position(&self) -> Position {
        Position::at(self.global_position as i64)
    }
}

/// A totally ordered position in the global transaction log.
///
/// Carries both the commit offset and the prepare offset of a record. On a
/// single-node log the two coincide; the pair is kept so positions survive a
/// future split of prepare and commit records. Ordering compares commit
/// offsets first, then prepare offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Byte offset of the commit record.
    pub commit_position: i64,
    /// Byte offset of the prepare record.
    pub prepare_position: i64,
}

impl Position {
    /// The position before the start of the log.
    pub const START: Position = Position {
        commit_position: -1,
        prepare_position: -1,
    };

    /// A position where commit and prepare coincide at `offset`.
    pub fn at(offset: i64) -> Position {
        Position {
            commit_position: offset,
            prepare_position: offset,
        }
    }
}

/// Controls optimistic concurrency on append.
///
/// The caller specifies what state the target stream must be in for the append to
/// succeed. If the check fails (and the write is not idempotent, see
/// [`Store::append`](crate::store::Store::append)), the server rejects the append
/// with `WrongExpectedVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No concurrency check -- append succeeds regardless of stream state.
    Any,
    /// Stream must not exist (first write to a new stream).
    NoStream,
    /// Stream must exist with at least one event; its version is not checked.
    StreamExists,
    /// Stream must be at exactly this version (zero-based).
    Exact(u64),
}

impl ExpectedVersion {
    /// Wire value of the `Any` marker.
    pub const ANY: i64 = -2;
    /// Wire value of the `NoStream` marker.
    pub const NO_STREAM: i64 = -1;
    /// Wire value of the `StreamExists` marker.
    pub const STREAM_EXISTS: i64 = -4;

    /// Decode an `ExpectedVersion` from its wire integer.
    ///
    /// # Returns
    ///
    /// `None` for integers that map to no variant (e.g., `-3`).
    pub fn from_i64(raw: i64) -> Option<ExpectedVersion> {
        match raw {
            Self::ANY => Some(ExpectedVersion::Any),
            Self::NO_STREAM => Some(ExpectedVersion::NoStream),
            Self::STREAM_EXISTS => Some(ExpectedVersion::StreamExists),
            n if n >= 0 => Some(ExpectedVersion::Exact(n as u64)),
            _ => None,
        }
    }

    /// Encode this `ExpectedVersion` as its wire integer.
    pub fn as_i64(self) -> i64 {
        match self {
            ExpectedVersion::Any => Self::ANY,
            ExpectedVersion::NoStream => Self::NO_STREAM,
            ExpectedVersion::StreamExists => Self::STREAM_EXISTS,
            ExpectedVersion::Exact(n) => n as i64,
        }
    }
}

/// Summary of one stream, as returned by stream listings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Name of the stream.
    pub stream_id: String,
    /// Number of events in the stream.
    pub event_count: u64,
    /// Event number of the latest event (zero-based).
    pub latest_event_number: u64,
}

/// A message delivered to a stream subscriber.
///
/// Catch-up subscriptions interleave historical events with a single
/// `CaughtUp` marker at the seam, after which only live events follow.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// A committed event, shared across all subscribers.
    Event(Arc<RecordedEvent>),
    /// The subscription has replayed all historical events and is now live.
    CaughtUp,
}
