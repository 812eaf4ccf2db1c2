//! Single-writer task for LogfoldDB.
//!
//! This module provides the `WriteCommand` message set and the `WriterHandle`
//! that callers use to submit writes to the writer task via a bounded
//! `tokio::mpsc` channel. The writer task owns the `Store`, processes commands
//! sequentially, and publishes committed events to the broker after fsync.

use crate::broker::Broker;
use crate::error::Error;
use crate::types::{ExpectedVersion, ProposedEvent, RecordedEvent};

/// A command for the writer task, carrying its oneshot responder.
///
/// The writer processes each command sequentially, so submission order is
/// commit order for every handle sharing the channel.
pub enum WriteCommand {
    /// Append a batch to a stream with an expected-version check.
    Append {
        /// Name of the target stream.
        stream_id: String,
        /// Optimistic concurrency check for the stream.
        expected_version: ExpectedVersion,
        /// Events the client wants to append.
        events: Vec<ProposedEvent>,
        /// Channel for sending the result back to the caller.
        response_tx: tokio::sync::oneshot::Sender<Result<Vec<RecordedEvent>, Error>>,
    },
    /// Open a transaction; the expected version is checked at commit.
    TransactionStart {
        /// Name of the target stream.
        stream_id: String,
        /// Check deferred to commit time.
        expected_version: ExpectedVersion,
        /// Channel for the transaction id.
        response_tx: tokio::sync::oneshot::Sender<Result<u64, Error>>,
    },
    /// Buffer events into an open transaction.
    TransactionWrite {
        /// Identifier from `TransactionStart`.
        txn_id: u64,
        /// Events to buffer.
        events: Vec<ProposedEvent>,
        /// Channel for the acknowledgement.
        response_tx: tokio::sync::oneshot::Sender<Result<(), Error>>,
    },
    /// Atomically commit an open transaction.
    TransactionCommit {
        /// Identifier from `TransactionStart`.
        txn_id: u64,
        /// Channel for the recorded events.
        response_tx: tokio::sync::oneshot::Sender<Result<Vec<RecordedEvent>, Error>>,
    },
    /// Discard an open transaction.
    TransactionRollback {
        /// Identifier from `TransactionStart`.
        txn_id: u64,
        /// Channel for the acknowledgement.
        response_tx: tokio::sync::oneshot::Sender<Result<(), Error>>,
    },
}

/// Cloneable handle for submitting write commands to the writer task.
///
/// Request handlers hold a `WriterHandle` and call its methods to enqueue
/// work. The writer task processes commands sequentially on the other end of
/// the bounded `tokio::mpsc` channel, ensuring serialized writes and
/// durability. The channel bound provides backpressure: callers yield
/// cooperatively when the queue is full.
#[derive(Clone)]
pub struct WriterHandle {
    tx: tokio::sync::mpsc::Sender<WriteCommand>,
}

impl WriterHandle {
    /// Create a new `WriterHandle` from the sender half of an mpsc channel.
    pub fn new(tx: tokio::sync::mpsc::Sender<WriteCommand>) -> Self {
        Self { tx }
    }

    /// Submit a command and await its typed response.
    async fn submit<T>(
        &self,
        command: WriteCommand,
        response_rx: tokio::sync::oneshot::Receiver<Result<T, Error>>,
    ) -> Result<T, Error> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::InvalidArgument("writer task closed".into()))?;
        response_rx
            .await
            .map_err(|_| Error::InvalidArgument("writer task closed".into()))?
    }

    /// Submit an append request to the writer task and await the result.
    ///
    /// # Errors
    ///
    /// - Returns the writer task's error (e.g., `WrongExpectedVersion`,
    ///   `EventTooLarge`) if the append fails.
    /// - Returns `Error::InvalidArgument("writer task closed")` if the channel
    ///   is closed.
    pub async fn append(
        &self,
        stream_id: impl Into<String>,
        expected_version: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<Vec<RecordedEvent>, Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.submit(
            WriteCommand::Append {
                stream_id: stream_id.into(),
                expected_version,
                events,
                response_tx,
            },
            response_rx,
        )
        .await
    }

    /// Open a transaction against a stream.
    ///
    /// # Errors
    ///
    /// Returns the writer task's error, or `InvalidArgument` if it shut down.
    pub async fn transaction_start(
        &self,
        stream_id: impl Into<String>,
        expected_version: ExpectedVersion,
    ) -> Result<u64, Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.submit(
            WriteCommand::TransactionStart {
                stream_id: stream_id.into(),
                expected_version,
                response_tx,
            },
            response_rx,
        )
        .await
    }

    /// Buffer events into an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id.
    pub async fn transaction_write(
        &self,
        txn_id: u64,
        events: Vec<ProposedEvent>,
    ) -> Result<(), Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.submit(
            WriteCommand::TransactionWrite {
                txn_id,
                events,
                response_tx,
            },
            response_rx,
        )
        .await
    }

    /// Commit an open transaction atomically.
    ///
    /// # Errors
    ///
    /// Returns the commit-time expected-version failure, if any.
    pub async fn transaction_commit(&self, txn_id: u64) -> Result<Vec<RecordedEvent>, Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.submit(
            WriteCommand::TransactionCommit {
                txn_id,
                response_tx,
            },
            response_rx,
        )
        .await
    }

    /// Discard an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id.
    pub async fn transaction_rollback(&self, txn_id: u64) -> Result<(), Error> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.submit(
            WriteCommand::TransactionRollback {
                txn_id,
                response_tx,
            },
            response_rx,
        )
        .await
    }

    #[cfg(test)]
    pub(crate) fn raw_sender(&self) -> &tokio::sync::mpsc::Sender<WriteCommand> {
        &self.tx
    }
}

/// Run the writer task loop.
///
/// Receives `WriteCommand`s from the bounded mpsc channel, processes each
/// against the store, and sends the result back via the command's responder.
/// On each iteration, the first command is received via a blocking `recv()`,
/// then additional pending commands are drained with `try_recv()` for
/// batching. The loop exits cleanly when all senders are dropped.
///
/// Events committed by `Append` or `TransactionCommit` are published to the
/// broker before the response is sent to the caller, so subscribers see
/// events in commit order. Failed writes publish nothing.
pub(crate) async fn run_writer(
    mut store: crate::store::Store,
    mut rx: tokio::sync::mpsc::Receiver<WriteCommand>,
    broker: Broker,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(cmd) = rx.try_recv() {
            batch.push(cmd);
        }

        for command in batch {
            match command {
                WriteCommand::Append {
                    stream_id,
                    expected_version,
                    events,
                    response_tx,
                } => {
                    let result = store.append(&stream_id, expected_version, events);
                    if let Ok(ref recorded) = result {
                        broker.publish(recorded);
                    }
                    if response_tx.send(result).is_err() {
                        tracing::warn!(
                            stream = %stream_id,
                            "writer: response receiver dropped"
                        );
                    }
                }
                WriteCommand::TransactionStart {
                    stream_id,
                    expected_version,
                    response_tx,
                } => {
                    let result = store.transaction_start(&stream_id, expected_version);
                    let _ = response_tx.send(result);
                }
                WriteCommand::TransactionWrite {
                    txn_id,
                    events,
                    response_tx,
                } => {
                    let _ = response_tx.send(store.transaction_write(txn_id, events));
                }
                WriteCommand::TransactionCommit {
                    txn_id,
                    response_tx,
                } => {
                    let result = store.transaction_commit(txn_id);
                    if let Ok(ref recorded) = result {
                        broker.publish(recorded);
                    }
                    if response_tx.send(result).is_err() {
                        tracing::warn!(txn_id, "writer: response receiver dropped");
                    }
                }
                WriteCommand::TransactionRollback {
                    txn_id,
                    response_tx,
                } => {
                    let _ = response_tx.send(store.transaction_rollback(txn_id));
                }
            }
        }
    }
    // Channel closed -- all WriterHandle senders have been dropped. Exit cleanly.
}

/// Spawn the writer task on the tokio runtime.
///
/// Clones the shared event log `Arc` from the store (for the `ReadIndex`),
/// moves the store and broker into the spawned writer task, and returns
/// `(WriterHandle, ReadIndex, JoinHandle<()>)`.
///
/// # Arguments
///
/// * `store` - The storage engine to move into the writer task.
/// * `channel_capacity` - Bound on the mpsc channel. Controls backpressure.
/// * `broker` - Broadcast broker for publishing committed events.
pub fn spawn_writer(
    store: crate::store::Store,
    channel_capacity: usize,
    broker: Broker,
) -> (
    WriterHandle,
    crate::reader::ReadIndex,
    tokio::task::JoinHandle<()>,
) {
    // Clone the Arc BEFORE moving store into the task.
    let log_arc = store.log();
    let read_index = crate::reader::ReadIndex::new(log_arc);

    let (tx, rx) = tokio::sync::mpsc::channel(channel_capacity);
    let writer_handle = WriterHandle::new(tx);

    let join_handle = tokio::spawn(run_writer(store, rx, broker));

    (writer_handle, read_index, join_handle)
}
