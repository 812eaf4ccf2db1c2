//! LogfoldDB: a chunked, log-structured event store for event sourcing and CQRS.
//!
//! Clients write ordered sequences of events into named streams; the store
//! durably appends them to a single global transaction log -- a directory of
//! fixed-size, checksummed chunk files governed by four monotonic checkpoints
//! -- and serves ordered reads per stream (forward and backward) and across
//! the entire log. On top sit explicit expected-version concurrency control
//! with defined idempotency semantics, multi-write transactions, live and
//! catch-up subscriptions, and an emitted-stream projection sink with
//! at-most-once semantics across restarts.

pub mod broker;
pub mod checkpoint;
pub mod chunk;
pub mod codec;
pub mod db;
pub(crate) mod dedup;
pub mod dispatch;
pub mod emitter;
pub mod error;
/// Prometheus metrics infrastructure for LogfoldDB.
pub mod metrics;
pub mod naming;
pub mod reader;
pub mod store;
pub mod types;
pub mod writer;

pub use broker::{Broker, subscribe_all, subscribe_stream};
pub use checkpoint::Checkpoint;
pub use chunk::{Chunk, ChunkFooter, ChunkHeader};
pub use codec::DecodeOutcome;
pub use db::{ChunkDb, ChunkDbConfig};
pub use dispatch::{
    ReadBackwardCompleted, ReadDispatcher, WriteDispatcher, WriteEventsCompleted, WriteResult,
};
pub use emitter::{
    CheckpointTag, EmittedEvent, EmittedStream, EmitterConfig, ProjectionVersion,
    spawn_emitted_stream,
};
pub use error::{CorruptionKind, Error};
pub use naming::ChunkNamingStrategy;
pub use reader::ReadIndex;
pub use store::Store;
pub use types::{
    ExpectedVersion, MAX_EVENT_SIZE, MAX_EVENT_TYPE_LEN, MAX_STREAM_NAME_LEN, Position,
    ProposedEvent, RecordedEvent, StreamInfo, SubscriptionMessage,
};
pub use writer::{WriterHandle, spawn_writer};

#[cfg(test)]
mod tests {
    // Verify that the public items are accessible at the crate root. Tests use
    // fully-qualified `crate::` paths to confirm re-exports resolve.

    #[test]
    fn reexport_proposed_event() {
        let event = crate::ProposedEvent {
            event_id: uuid::Uuid::new_v4(),
            event_type: "TestEvent".to_string(),
            metadata: bytes::Bytes::new(),
            payload: bytes::Bytes::from_static(b"{}"),
        };
        assert_eq!(event.event_type, "TestEvent");
    }

    #[test]
    fn reexport_recorded_event() {
        let event = crate::RecordedEvent {
            event_id: uuid::Uuid::new_v4(),
            stream_id: "s".to_string(),
            event_number: 0,
            global_position: 0,
            recorded_at: 0,
            event_type: "TestEvent".to_string(),
            metadata: bytes::Bytes::new(),
            payload: bytes::Bytes::new(),
        };
        assert_eq!(event.global_position, 0);
    }

    #[test]
    fn reexport_expected_version() {
        let any = crate::ExpectedVersion::Any;
        let no_stream = crate::ExpectedVersion::NoStream;
        let exact = crate::ExpectedVersion::Exact(7);

        let copy = any;
        assert_eq!(copy, crate::ExpectedVersion::Any);
        assert_eq!(no_stream, crate::ExpectedVersion::NoStream);
        assert_eq!(exact, crate::ExpectedVersion::Exact(7));
    }

    #[test]
    fn reexport_size_limits() {
        assert_eq!(crate::MAX_EVENT_SIZE, 65_536);
        assert_eq!(crate::MAX_EVENT_TYPE_LEN, 256);
        assert_eq!(crate::MAX_STREAM_NAME_LEN, 256);
    }

    #[test]
    fn reexport_error() {
        let err = crate::Error::InvalidArgument("test".into());
        assert!(err.to_string().contains("test"));
    }

    #[test]
    fn reexport_corruption_kind() {
        let err = crate::Error::corrupt(crate::CorruptionKind::ChunkNotFound, "missing");
        assert_eq!(
            err.corruption_kind(),
            Some(crate::CorruptionKind::ChunkNotFound)
        );
    }

    #[test]
    fn reexport_checkpoint_tag_ordering() {
        assert!(crate::CheckpointTag::at(1) < crate::CheckpointTag::at(2));
    }

    #[test]
    fn spawn_writer_signature_is_stable() {
        let _: fn(
            crate::Store,
            usize,
            crate::Broker,
        ) -> (
            crate::WriterHandle,
            crate::ReadIndex,
            tokio::task::JoinHandle<()>,
        ) = crate::spawn_writer;
    }

    #[test]
    fn reexport_chunk_db_config() {
        let config = crate::ChunkDbConfig::new("/tmp/db", 1024);
        assert_eq!(config.chunk_size, 1024);
    }
}
