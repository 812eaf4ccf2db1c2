//! Request-response dispatchers consumed by the emitted stream.
//!
//! The emitter never touches the store directly: it issues
//! `ReadStreamEventsBackward` and `WriteEvents` requests through these
//! handles and receives completions on its own execution context. Each
//! request carries a oneshot responder; the emitter's pump awaits one
//! completion at a time, so completions are never delivered concurrently for
//! the same emitter.
//!
//! In-process adapters bridge the handles to a [`ReadIndex`] and a
//! [`WriterHandle`]; tests substitute their own responders to script
//! arbitrary completion sequences.

use crate::error::Error;
use crate::reader::ReadIndex;
use crate::types::{ExpectedVersion, ProposedEvent, RecordedEvent};
use crate::writer::WriterHandle;

/// Completion of a backward stream read.
#[derive(Debug, Clone)]
pub struct ReadBackwardCompleted {
    /// Events in reverse event-number order (newest first).
    pub events: Vec<RecordedEvent>,
    /// Event number to continue reading from, or -1.
    pub next_event_number: i64,
    /// Whether the start of the stream was reached. A stream that does not
    /// exist reads as an empty, ended stream.
    pub is_end_of_stream: bool,
}

/// Outcome classification of a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// The batch was committed.
    Success,
    /// The expected-version check failed and the write was not idempotent.
    WrongExpectedVersion,
    /// Transient: the prepare phase timed out. Safe to republish.
    PrepareTimeout,
    /// Transient: forwarding to the writer timed out. Safe to republish.
    ForwardTimeout,
    /// Transient: the commit phase timed out. Safe to republish.
    CommitTimeout,
    /// The caller may not write to this stream.
    AccessDenied,
    /// The write was rejected for a non-retriable reason.
    InvalidTransaction,
}

impl WriteResult {
    /// Whether republishing the same batch with the same expected version is
    /// the correct reaction.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            WriteResult::PrepareTimeout | WriteResult::ForwardTimeout | WriteResult::CommitTimeout
        )
    }
}

/// Completion of a write request.
#[derive(Debug, Clone)]
pub struct WriteEventsCompleted {
    /// Outcome classification.
    pub result: WriteResult,
    /// Event number assigned to the first event of the batch; meaningful only
    /// on [`WriteResult::Success`].
    pub first_event_number: i64,
}

/// A backward-read request as seen by a dispatcher implementation.
pub struct ReadRequest {
    /// Name of the stream to read.
    pub stream_id: String,
    /// Event number to read backwards from; -1 means the stream tail.
    pub from_event_number: i64,
    /// Maximum number of events to return.
    pub max_count: u64,
    /// Completion channel.
    pub response_tx: tokio::sync::oneshot::Sender<ReadBackwardCompleted>,
}

/// A write request as seen by a dispatcher implementation.
pub struct WriteRequest {
    /// Name of the target stream.
    pub stream_id: String,
    /// Expected version in wire form (`-2` any, `-1` no stream, `n` exact).
    pub expected_version: i64,
    /// Events to append.
    pub events: Vec<ProposedEvent>,
    /// Completion channel.
    pub response_tx: tokio::sync::oneshot::Sender<WriteEventsCompleted>,
}

/// Cloneable handle for issuing backward stream reads.
#[derive(Clone)]
pub struct ReadDispatcher {
    tx: tokio::sync::mpsc::Sender<ReadRequest>,
}

impl ReadDispatcher {
    /// Create a dispatcher handle and the request receiver a responder drains.
    pub fn channel(capacity: usize) -> (ReadDispatcher, tokio::sync::mpsc::Receiver<ReadRequest>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (ReadDispatcher { tx }, rx)
    }

    /// Read a stream backwards and await the completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the responder has shut down.
    pub async fn read_backward(
        &self,
        stream_id: impl Into<String>,
        from_event_number: i64,
        max_count: u64,
    ) -> Result<ReadBackwardCompleted, Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(ReadRequest {
                stream_id: stream_id.into(),
                from_event_number,
                max_count,
                response_tx,
            })
            .await
            .map_err(|_| Error::InvalidArgument("read dispatcher closed".into()))?;
        response_rx
            .await
            .map_err(|_| Error::InvalidArgument("read dispatcher closed".into()))
    }
}

/// Cloneable handle for issuing stream writes.
#[derive(Clone)]
pub struct WriteDispatcher {
    tx: tokio::sync::mpsc::Sender<WriteRequest>,
}

impl WriteDispatcher {
    /// Create a dispatcher handle and the request receiver a responder drains.
    pub fn channel(
        capacity: usize,
    ) -> (WriteDispatcher, tokio::sync::mpsc::Receiver<WriteRequest>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (WriteDispatcher { tx }, rx)
    }

    /// Write a batch and await the completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the responder has shut down.
    pub async fn write_events(
        &self,
        stream_id: impl Into<String>,
        expected_version: i64,
        events: Vec<ProposedEvent>,
    ) -> Result<WriteEventsCompleted, Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(WriteRequest {
                stream_id: stream_id.into(),
                expected_version,
                events,
                response_tx,
            })
            .await
            .map_err(|_| Error::InvalidArgument("write dispatcher closed".into()))?;
        response_rx
            .await
            .map_err(|_| Error::InvalidArgument("write dispatcher closed".into()))
    }
}

/// Spawn a responder that serves read requests from the in-memory index.
///
/// A missing stream completes as an empty, ended read -- the emitter treats
/// that as "nothing committed yet".
pub fn spawn_read_adapter(read_index: ReadIndex, capacity: usize) -> ReadDispatcher {
    let (dispatcher, mut rx) = ReadDispatcher::channel(capacity);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let completed = match read_index.read_stream_backward(
                &request.stream_id,
                request.from_event_number,
                request.max_count,
            ) {
                Ok((events, next_event_number, is_end_of_stream)) => ReadBackwardCompleted {
                    events,
                    next_event_number,
                    is_end_of_stream,
                },
                Err(Error::StreamNotFound { .. }) => ReadBackwardCompleted {
                    events: Vec::new(),
                    next_event_number: -1,
                    is_end_of_stream: true,
                },
                Err(e) => {
                    tracing::error!(error = %e, stream = %request.stream_id, "backward read failed");
                    ReadBackwardCompleted {
                        events: Vec::new(),
                        next_event_number: -1,
                        is_end_of_stream: true,
                    }
                }
            };
            let _ = request.response_tx.send(completed);
        }
    });
    dispatcher
}

/// Spawn a responder that forwards write requests to the writer task.
pub fn spawn_write_adapter(writer: WriterHandle, capacity: usize) -> WriteDispatcher {
    let (dispatcher, mut rx) = WriteDispatcher::channel(capacity);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let Some(expected) = ExpectedVersion::from_i64(request.expected_version) else {
                let _ = request.response_tx.send(WriteEventsCompleted {
                    result: WriteResult::InvalidTransaction,
                    first_event_number: -1,
                });
                continue;
            };

            let completed = match writer
                .append(request.stream_id.clone(), expected, request.events)
                .await
            {
                Ok(recorded) => {
                    let first_own = recorded
                        .first()
                        .map(|e| e.event_number as i64)
                        .unwrap_or(-1);
                    // The dispatcher contract counts the implicit creation
                    // event historical streams open with: a write that created
                    // the stream reports the number before its own first
                    // event. Emitters add one back.
                    let first_event_number = if request.expected_version
                        == ExpectedVersion::NO_STREAM
                    {
                        first_own - 1
                    } else {
                        first_own
                    };
                    WriteEventsCompleted {
                        result: WriteResult::Success,
                        first_event_number,
                    }
                }
                Err(Error::WrongExpectedVersion { .. }) => WriteEventsCompleted {
                    result: WriteResult::WrongExpectedVersion,
                    first_event_number: -1,
                },
                Err(e) => {
                    tracing::error!(error = %e, stream = %request.stream_id, "write failed");
                    WriteEventsCompleted {
                        result: WriteResult::InvalidTransaction,
                        first_event_number: -1,
                    }
                }
            };
            let _ = request.response_tx.send(completed);
        }
    });
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::db::ChunkDbConfig;
    use crate::writer::spawn_writer;
    use bytes::Bytes;
    use uuid::Uuid;

    fn proposed(event_type: &str) -> ProposedEvent {
        ProposedEvent {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            metadata: Bytes::new(),
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[tokio::test]
    async fn scripted_read_responder_round_trip() {
        let (dispatcher, mut rx) = ReadDispatcher::channel(4);

        tokio::spawn(async move {
            let request = rx.recv().await.expect("request arrives");
            assert_eq!(request.stream_id, "s");
            assert_eq!(request.from_event_number, -1);
            let _ = request.response_tx.send(ReadBackwardCompleted {
                events: Vec::new(),
                next_event_number: -1,
                is_end_of_stream: true,
            });
        });

        let completed = dispatcher
            .read_backward("s", -1, 32)
            .await
            .expect("completion");
        assert!(completed.is_end_of_stream);
        assert!(completed.events.is_empty());
    }

    #[tokio::test]
    async fn dropped_responder_surfaces_as_error() {
        let (dispatcher, rx) = WriteDispatcher::channel(4);
        drop(rx);

        let result = dispatcher.write_events("s", -1, vec![proposed("E")]).await;
        assert!(
            matches!(result, Err(Error::InvalidArgument(_))),
            "expected InvalidArgument, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn adapters_serve_reads_and_writes_end_to_end() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = crate::store::Store::open(ChunkDbConfig::new(dir.path(), 64 * 1024))
            .expect("open store");
        let (writer, read_index, _join) = spawn_writer(store, 8, Broker::new(16));

        let write = spawn_write_adapter(writer, 8);
        let read = spawn_read_adapter(read_index, 8);

        // Missing stream reads as empty and ended.
        let empty = read.read_backward("s", -1, 32).await.expect("read");
        assert!(empty.is_end_of_stream);
        assert!(empty.events.is_empty());

        // Write two events, then read them back newest-first.
        let completed = write
            .write_events("s", ExpectedVersion::NO_STREAM, vec![proposed("A"), proposed("B")])
            .await
            .expect("write");
        assert_eq!(completed.result, WriteResult::Success);
        assert_eq!(
            completed.first_event_number, -1,
            "a stream-creating write reports the number before its own events"
        );

        let tail = read.read_backward("s", -1, 32).await.expect("read");
        assert_eq!(tail.events.len(), 2);
        assert_eq!(tail.events[0].event_number, 1);
        assert_eq!(tail.events[1].event_number, 0);
        assert!(tail.is_end_of_stream);
    }

    #[tokio::test]
    async fn write_adapter_maps_wrong_expected_version() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = crate::store::Store::open(ChunkDbConfig::new(dir.path(), 64 * 1024))
            .expect("open store");
        let (writer, _read_index, _join) = spawn_writer(store, 8, Broker::new(16));
        let write = spawn_write_adapter(writer, 8);

        write
            .write_events("s", ExpectedVersion::NO_STREAM, vec![proposed("A")])
            .await
            .expect("first write");

        let completed = write
            .write_events("s", ExpectedVersion::NO_STREAM, vec![proposed("B")])
            .await
            .expect("completion");
        assert_eq!(completed.result, WriteResult::WrongExpectedVersion);
    }

    #[test]
    fn transient_classification() {
        assert!(WriteResult::PrepareTimeout.is_transient());
        assert!(WriteResult::ForwardTimeout.is_transient());
        assert!(WriteResult::CommitTimeout.is_transient());
        assert!(!WriteResult::Success.is_transient());
        assert!(!WriteResult::WrongExpectedVersion.is_transient());
        assert!(!WriteResult::AccessDenied.is_transient());
    }
}
