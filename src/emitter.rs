//! The emitted stream: a single-writer projection sink.
//!
//! An `EmittedStream` projects derived events into one target stream with
//! at-most-once semantics across restarts. Before its first write it recovers
//! prior state by reading the target stream backwards and parsing each event's
//! embedded checkpoint-tag metadata; pending emits that were already committed
//! by a previous incarnation are matched against that state and acknowledged
//! without being written again.
//!
//! The emitter is an explicit state machine: every input (`start`,
//! `emit_events`, `checkpoint`, a read completion, a write completion) returns
//! the list of [`EmitterAction`]s to perform, so each recovery transition is
//! inspectable and unit-testable. [`spawn_emitted_stream`] provides the async
//! pump that maps actions onto the dispatchers and feeds completions back in;
//! it awaits one completion at a time, so the machine is never re-entered.

use std::collections::VecDeque;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{
    ReadBackwardCompleted, ReadDispatcher, WriteDispatcher, WriteEventsCompleted, WriteResult,
};
use crate::error::Error;
use crate::types::ProposedEvent;

/// Default bound on republications of one batch after transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Events per backward read during recovery. Small enough to stop early once
/// the scan passes the earliest pending tag.
pub const RECOVERY_READ_BATCH: u64 = 32;

/// A totally ordered position in the projection's source.
///
/// Ordering compares commit positions first, then prepare positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointTag {
    /// Commit offset in the source log.
    pub commit_position: i64,
    /// Prepare offset in the source log.
    pub prepare_position: i64,
}

impl CheckpointTag {
    /// A tag where commit and prepare coincide at `offset`.
    pub fn at(offset: i64) -> CheckpointTag {
        CheckpointTag {
            commit_position: offset,
            prepare_position: offset,
        }
    }
}

/// Identity of a projection lineage: `(projection_id, epoch, version)`.
///
/// An emitted stream belongs to this projection only when the newest event's
/// metadata carries the same `projection_id` and a `version >= epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionVersion {
    /// Stable identifier of the projection.
    pub projection_id: i64,
    /// Epoch below which older emitted events are disowned.
    pub epoch: i32,
    /// Version of the projection definition that emitted the event.
    pub version: i32,
}

/// The self-describing JSON document stored as each emitted event's metadata.
///
/// Parseable independently of which projection reads it; caller-supplied
/// extra fields ride along via the flattened map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedMetadata {
    /// Stable identifier of the emitting projection.
    pub projection_id: i64,
    /// Emitting projection's epoch.
    pub epoch: i32,
    /// Emitting projection's version.
    pub version: i32,
    /// Source commit offset that caused this emit.
    pub commit_position: i64,
    /// Source prepare offset that caused this emit.
    pub prepare_position: i64,
    /// Caller-provided extra fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EmittedMetadata {
    /// The checkpoint tag embedded in this metadata.
    pub fn tag(&self) -> CheckpointTag {
        CheckpointTag {
            commit_position: self.commit_position,
            prepare_position: self.prepare_position,
        }
    }
}

/// Callback invoked with the target-stream event number once an emitted event
/// is known committed (whether written now or found during recovery).
pub type OnCommitted = Box<dyn FnOnce(i64) + Send>;

/// An event a projection wants to append downstream.
pub struct EmittedEvent {
    /// Target stream (must match the emitter's stream).
    pub stream_id: String,
    /// Idempotency key for the write.
    pub event_id: Uuid,
    /// Event type tag.
    pub event_type: String,
    /// Opaque payload.
    pub payload: Bytes,
    /// Source position that caused this emit.
    pub caused_by_tag: CheckpointTag,
    /// When set, the write is valid only if this equals the tag of the last
    /// event this emitter submitted or committed.
    pub expected_tag: Option<CheckpointTag>,
    /// Extra fields merged into the metadata document.
    pub extra_metadata: serde_json::Map<String, serde_json::Value>,
    /// Invoked with the assigned event number once committed.
    pub on_committed: Option<OnCommitted>,
}

impl std::fmt::Debug for EmittedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmittedEvent")
            .field("stream_id", &self.stream_id)
            .field("event_id", &self.event_id)
            .field("event_type", &self.event_type)
            .field("caused_by_tag", &self.caused_by_tag)
            .field("expected_tag", &self.expected_tag)
            .finish_non_exhaustive()
    }
}

impl EmittedEvent {
    /// A minimal emitted event with no expected tag, extra metadata, or
    /// completion callback.
    pub fn new(
        stream_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Bytes,
        caused_by_tag: CheckpointTag,
    ) -> EmittedEvent {
        EmittedEvent {
            stream_id: stream_id.into(),
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            caused_by_tag,
            expected_tag: None,
            extra_metadata: serde_json::Map::new(),
            on_committed: None,
        }
    }
}

/// An instruction the emitter wants carried out.
#[derive(Debug)]
pub enum EmitterAction {
    /// Issue a backward read of the target stream.
    ReadBackward {
        /// Stream to read.
        stream_id: String,
        /// Event number to read backwards from (-1 for the tail).
        from_event_number: i64,
        /// Batch size.
        max_count: u64,
    },
    /// Issue a write of the given batch.
    WriteEvents {
        /// Target stream.
        stream_id: String,
        /// Expected version in wire form.
        expected_version: i64,
        /// The batch.
        events: Vec<ProposedEvent>,
    },
    /// Another writer mutated the stream; the supervisor must restart the
    /// projection. The emitter writes nothing further.
    RestartRequested {
        /// Why the restart is needed.
        reason: String,
    },
    /// The projection has failed hard (cross-projection conflict, determinism
    /// violation, retries exhausted). The emitter writes nothing further.
    Failed {
        /// Why the projection failed.
        reason: String,
    },
    /// A requested checkpoint has completed: the queue is fully drained.
    CheckpointCompleted,
}

/// Lifecycle of the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitterState {
    Created,
    Started,
    Disposed,
}

/// The write currently awaiting its completion.
struct InflightWrite {
    events: Vec<EmittedEvent>,
    proposed: Vec<ProposedEvent>,
    expected_version: i64,
    retries_left: u32,
}

/// An already-committed event collected during recovery: its tag, type, and
/// target-stream event number.
#[derive(Debug, Clone)]
struct CommittedEntry {
    tag: CheckpointTag,
    event_type: String,
    event_number: i64,
}

/// Configuration of an [`EmittedStream`].
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Target stream name.
    pub stream_id: String,
    /// Identity of the emitting projection.
    pub projection_version: ProjectionVersion,
    /// Source position the projection starts from; the first accepted emit
    /// must carry a tag at or past it.
    pub from: CheckpointTag,
    /// Republication bound for transient write failures.
    pub max_retries: u32,
    /// Whether `checkpoint()` is permitted.
    pub checkpoints_enabled: bool,
}

impl EmitterConfig {
    /// Configuration with default retry bound and checkpoints enabled.
    pub fn new(
        stream_id: impl Into<String>,
        projection_version: ProjectionVersion,
        from: CheckpointTag,
    ) -> EmitterConfig {
        EmitterConfig {
            stream_id: stream_id.into(),
            projection_version,
            from,
            max_retries: DEFAULT_MAX_RETRIES,
            checkpoints_enabled: true,
        }
    }
}

/// Single-writer projection sink with recovery-time deduplication.
///
/// See the module documentation for the interaction model. All methods are
/// synchronous transitions returning the actions to perform.
pub struct EmittedStream {
    config: EmitterConfig,
    state: EmitterState,
    /// Terminal flag: a `Failed` or `RestartRequested` action was produced.
    halted: bool,
    checkpoint_requested: bool,
    pending: VecDeque<EmittedEvent>,
    /// Tag of the last accepted emit call.
    last_queued_tag: Option<CheckpointTag>,
    /// Metadata tag of the last write this emitter submitted or committed.
    /// `None` until recovery establishes it.
    last_submitted_or_committed: Option<CheckpointTag>,
    /// Last event number of the target stream (-1 = no stream).
    last_known_event_number: i64,
    /// Recovery has finished (the committed stack is authoritative).
    recovery_done: bool,
    /// Whether a backward read is in flight, with the stop tag.
    reading_up_to: Option<CheckpointTag>,
    /// True while the newest event of the target stream is still unseen.
    awaiting_newest: bool,
    /// Tag of the newest event this projection committed, from recovery.
    last_committed_tag: Option<CheckpointTag>,
    /// Already-committed events, oldest first, consulted while draining.
    committed_stack: VecDeque<CommittedEntry>,
    inflight: Option<InflightWrite>,
}

impl EmittedStream {
    /// Create an emitter in the `Created` state.
    pub fn new(config: EmitterConfig) -> EmittedStream {
        EmittedStream {
            config,
            state: EmitterState::Created,
            halted: false,
            checkpoint_requested: false,
            pending: VecDeque::new(),
            last_queued_tag: None,
            last_submitted_or_committed: None,
            last_known_event_number: -1,
            recovery_done: false,
            reading_up_to: None,
            awaiting_newest: true,
            last_committed_tag: None,
            committed_stack: VecDeque::new(),
            inflight: None,
        }
    }

    /// Start the emitter. Valid only from `Created` with no checkpoint
    /// pending; any queued emits begin flushing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] on a state violation.
    pub fn start(&mut self) -> Result<Vec<EmitterAction>, Error> {
        if self.state != EmitterState::Created {
            return Err(Error::InvalidOperation(format!(
                "start in state {:?}",
                self.state
            )));
        }
        if self.checkpoint_requested {
            return Err(Error::InvalidOperation(
                "start with a checkpoint pending".to_string(),
            ));
        }
        self.state = EmitterState::Started;
        Ok(self.process_pending())
    }

    /// Accept a batch of emitted events.
    ///
    /// All events must share the emitter's stream and one `caused_by_tag`
    /// strictly greater than the last accepted tag (or at/past `from` when
    /// none has been accepted). Valid in any non-disposed, non-halted state
    /// with no checkpoint pending; before `start` the batch is only queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] on a state violation or
    /// [`Error::InvalidArgument`] on a malformed batch.
    pub fn emit_events(&mut self, events: Vec<EmittedEvent>) -> Result<Vec<EmitterAction>, Error> {
        if self.state == EmitterState::Disposed {
            return Err(Error::InvalidOperation("emit after dispose".to_string()));
        }
        if self.halted {
            return Err(Error::InvalidOperation(
                "emit after failure or restart request".to_string(),
            ));
        }
        if self.checkpoint_requested {
            return Err(Error::InvalidOperation(
                "emit with a checkpoint pending".to_string(),
            ));
        }
        let Some(first) = events.first() else {
            return Err(Error::InvalidArgument(
                "emit requires at least one event".to_string(),
            ));
        };
        let tag = first.caused_by_tag;
        for event in &events {
            if event.stream_id != self.config.stream_id {
                return Err(Error::InvalidArgument(format!(
                    "emitted event targets stream {}, emitter owns {}",
                    event.stream_id, self.config.stream_id
                )));
            }
            if event.caused_by_tag != tag {
                return Err(Error::InvalidArgument(
                    "all events of one emit must share caused_by_tag".to_string(),
                ));
            }
        }
        match self.last_queued_tag {
            Some(last) if tag <= last => {
                return Err(Error::InvalidArgument(format!(
                    "caused_by_tag {tag:?} is not past the last accepted tag {last:?}"
                )));
            }
            None if tag < self.config.from => {
                return Err(Error::InvalidArgument(format!(
                    "caused_by_tag {tag:?} is before the projection start {:?}",
                    self.config.from
                )));
            }
            _ => {}
        }

        self.last_queued_tag = Some(tag);
        self.pending.extend(events);

        if self.state == EmitterState::Started && self.idle() {
            Ok(self.process_pending())
        } else {
            Ok(Vec::new())
        }
    }

    /// Request a checkpoint: completes once the queue fully drains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] unless the emitter is started,
    /// checkpoints are enabled, and none is already pending.
    pub fn checkpoint(&mut self) -> Result<Vec<EmitterAction>, Error> {
        if self.state != EmitterState::Started {
            return Err(Error::InvalidOperation(
                "checkpoint before start".to_string(),
            ));
        }
        if !self.config.checkpoints_enabled {
            return Err(Error::InvalidOperation(
                "checkpoints are disabled for this emitter".to_string(),
            ));
        }
        if self.checkpoint_requested {
            return Err(Error::InvalidOperation(
                "checkpoint already requested".to_string(),
            ));
        }
        self.checkpoint_requested = true;
        if self.pending.is_empty() && self.idle() {
            self.checkpoint_requested = false;
            return Ok(vec![EmitterAction::CheckpointCompleted]);
        }
        Ok(Vec::new())
    }

    /// Release the emitter. Pending events are dropped.
    pub fn dispose(&mut self) {
        self.state = EmitterState::Disposed;
        self.pending.clear();
        self.inflight = None;
    }

    /// Feed a backward-read completion into the recovery scan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if no read is in flight.
    pub fn handle_read_completed(
        &mut self,
        completed: ReadBackwardCompleted,
    ) -> Result<Vec<EmitterAction>, Error> {
        let Some(up_to) = self.reading_up_to else {
            return Err(Error::InvalidOperation(
                "read completion with no read in flight".to_string(),
            ));
        };
        if self.state == EmitterState::Disposed || self.halted {
            self.reading_up_to = None;
            return Ok(Vec::new());
        }

        let mut stop = false;
        for event in &completed.events {
            let newest = std::mem::take(&mut self.awaiting_newest);
            if newest {
                // The stream tail determines the expected version of the
                // first write, whoever wrote it.
                self.last_known_event_number = event.event_number as i64;
            }

            let metadata: Option<EmittedMetadata> =
                serde_json::from_slice(&event.metadata).ok();
            let Some(metadata) = metadata else {
                if newest {
                    return Ok(self.fail(format!(
                        "newest event of stream {} carries no projection metadata",
                        self.config.stream_id
                    )));
                }
                continue;
            };

            if metadata.projection_id != self.config.projection_version.projection_id {
                if newest {
                    return Ok(self.fail(format!(
                        "stream {} belongs to projection {}, not {}",
                        self.config.stream_id,
                        metadata.projection_id,
                        self.config.projection_version.projection_id
                    )));
                }
                continue;
            }
            if metadata.version < self.config.projection_version.epoch {
                // A prior epoch of this projection; disowned.
                continue;
            }

            let tag = metadata.tag();
            if newest {
                self.last_committed_tag = Some(tag);
                self.last_submitted_or_committed = Some(tag);
            }
            if tag < up_to {
                stop = true;
                break;
            }
            // Reading backwards collects newest-first; push_front leaves the
            // stack oldest-first for the drain below.
            self.committed_stack.push_front(CommittedEntry {
                tag,
                event_type: event.event_type.clone(),
                event_number: event.event_number as i64,
            });
        }

        if stop || completed.is_end_of_stream {
            self.reading_up_to = None;
            self.recovery_done = true;
            return Ok(self.process_pending());
        }

        // Keep scanning backwards.
        Ok(vec![EmitterAction::ReadBackward {
            stream_id: self.config.stream_id.clone(),
            from_event_number: completed.next_event_number,
            max_count: RECOVERY_READ_BATCH,
        }])
    }

    /// Feed a write completion into the machine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if no write is in flight.
    pub fn handle_write_completed(
        &mut self,
        completed: WriteEventsCompleted,
    ) -> Result<Vec<EmitterAction>, Error> {
        let Some(mut inflight) = self.inflight.take() else {
            return Err(Error::InvalidOperation(
                "write completion with no write in flight".to_string(),
            ));
        };
        if self.state == EmitterState::Disposed || self.halted {
            return Ok(Vec::new());
        }

        match completed.result {
            WriteResult::Success => {
                // Streams historically open with an implicit creation event at
                // number 0; a write that created the stream reports its number,
                // so our own events start one past it.
                let effective_first = if inflight.expected_version == -1 {
                    completed.first_event_number + 1
                } else {
                    completed.first_event_number
                };
                for (i, event) in inflight.events.drain(..).enumerate() {
                    if let Some(on_committed) = event.on_committed {
                        on_committed(effective_first + i as i64);
                    }
                }
                self.last_known_event_number =
                    effective_first + inflight.proposed.len() as i64 - 1;
                metrics::counter!("logfold_emitted_events_total")
                    .increment(inflight.proposed.len() as u64);
                Ok(self.process_pending())
            }
            WriteResult::WrongExpectedVersion => Ok(self.request_restart(format!(
                "expected version {} of stream {} was taken by another writer",
                inflight.expected_version, self.config.stream_id
            ))),
            result if result.is_transient() => {
                if inflight.retries_left == 0 {
                    return Ok(self.fail(format!(
                        "write to stream {} kept timing out ({result:?})",
                        self.config.stream_id
                    )));
                }
                inflight.retries_left -= 1;
                tracing::warn!(
                    stream = %self.config.stream_id,
                    retries_left = inflight.retries_left,
                    ?result,
                    "transient write failure, republishing batch"
                );
                let action = EmitterAction::WriteEvents {
                    stream_id: self.config.stream_id.clone(),
                    expected_version: inflight.expected_version,
                    events: inflight.proposed.clone(),
                };
                self.inflight = Some(inflight);
                Ok(vec![action])
            }
            other => Ok(self.fail(format!(
                "write to stream {} rejected: {other:?}",
                self.config.stream_id
            ))),
        }
    }

    /// Whether neither a read nor a write is in flight.
    fn idle(&self) -> bool {
        self.reading_up_to.is_none() && self.inflight.is_none()
    }

    /// Drive the queue: recover if needed, drain against the committed stack,
    /// then submit the next write batch.
    fn process_pending(&mut self) -> Vec<EmitterAction> {
        if self.state != EmitterState::Started || self.halted || !self.idle() {
            return Vec::new();
        }

        if self.pending.is_empty() {
            if self.checkpoint_requested {
                self.checkpoint_requested = false;
                return vec![EmitterAction::CheckpointCompleted];
            }
            return Vec::new();
        }

        if !self.recovery_done {
            let up_to = self.pending.front().expect("pending non-empty").caused_by_tag;
            self.reading_up_to = Some(up_to);
            return vec![EmitterAction::ReadBackward {
                stream_id: self.config.stream_id.clone(),
                from_event_number: -1,
                max_count: RECOVERY_READ_BATCH,
            }];
        }

        // Recovery-mode dedup: pending emits at or before the last committed
        // tag must match the committed stack exactly.
        while let Some(front) = self.pending.front() {
            let within_committed = self
                .last_committed_tag
                .is_some_and(|last| front.caused_by_tag <= last);
            if !within_committed || self.committed_stack.is_empty() {
                break;
            }
            let entry = self.committed_stack.pop_front().expect("stack non-empty");
            if front.caused_by_tag != entry.tag || front.event_type != entry.event_type {
                let detail = format!(
                    "recovery mismatch on stream {}: pending ({:?}, {}) vs committed ({:?}, {}); \
                     projection determinism has been violated",
                    self.config.stream_id,
                    front.caused_by_tag,
                    front.event_type,
                    entry.tag,
                    entry.event_type
                );
                return self.fail(detail);
            }
            let event = self.pending.pop_front().expect("front exists");
            if let Some(on_committed) = event.on_committed {
                on_committed(entry.event_number);
            }
        }

        if self.pending.is_empty() {
            if self.checkpoint_requested {
                self.checkpoint_requested = false;
                return vec![EmitterAction::CheckpointCompleted];
            }
            return Vec::new();
        }

        // Concurrency violation: a pending expected tag must equal the tag of
        // whatever this emitter last submitted or committed.
        let batch_tag = self.pending.front().expect("pending non-empty").caused_by_tag;
        if let Some(expected) = self
            .pending
            .front()
            .expect("pending non-empty")
            .expected_tag
            && Some(expected) != self.last_submitted_or_committed
        {
            return self.request_restart(format!(
                "emit expected the stream at tag {:?}, emitter knows {:?}",
                expected, self.last_submitted_or_committed
            ));
        }

        // Submit the whole run of pending events sharing the front tag.
        let batch_len = self
            .pending
            .iter()
            .take_while(|e| e.caused_by_tag == batch_tag)
            .count();
        let events: Vec<EmittedEvent> = (0..batch_len)
            .map(|_| self.pending.pop_front().expect("counted above"))
            .collect();
        let proposed: Vec<ProposedEvent> = events
            .iter()
            .map(|event| {
                let metadata = EmittedMetadata {
                    projection_id: self.config.projection_version.projection_id,
                    epoch: self.config.projection_version.epoch,
                    version: self.config.projection_version.version,
                    commit_position: event.caused_by_tag.commit_position,
                    prepare_position: event.caused_by_tag.prepare_position,
                    extra: event.extra_metadata.clone(),
                };
                ProposedEvent {
                    event_id: event.event_id,
                    event_type: event.event_type.clone(),
                    metadata: Bytes::from(
                        serde_json::to_vec(&metadata).expect("metadata serializes"),
                    ),
                    payload: event.payload.clone(),
                }
            })
            .collect();

        let expected_version = self.last_known_event_number;
        self.last_submitted_or_committed = Some(batch_tag);
        let action = EmitterAction::WriteEvents {
            stream_id: self.config.stream_id.clone(),
            expected_version,
            events: proposed.clone(),
        };
        self.inflight = Some(InflightWrite {
            events,
            proposed,
            expected_version,
            retries_left: self.config.max_retries,
        });
        vec![action]
    }

    fn fail(&mut self, reason: String) -> Vec<EmitterAction> {
        self.halted = true;
        tracing::error!(stream = %self.config.stream_id, %reason, "emitted stream failed");
        vec![EmitterAction::Failed { reason }]
    }

    fn request_restart(&mut self, reason: String) -> Vec<EmitterAction> {
        self.halted = true;
        tracing::warn!(stream = %self.config.stream_id, %reason, "emitted stream requests restart");
        vec![EmitterAction::RestartRequested { reason }]
    }

    /// Tag of the last write submitted or committed, once known.
    pub fn last_submitted_or_committed(&self) -> Option<CheckpointTag> {
        self.last_submitted_or_committed
    }

    /// Last event number of the target stream as the emitter knows it.
    pub fn last_known_event_number(&self) -> i64 {
        self.last_known_event_number
    }
}

/// A command for the emitter pump.
pub enum EmitterCommand {
    /// Transition `Created -> Started`.
    Start {
        /// Acknowledgement channel.
        ack: tokio::sync::oneshot::Sender<Result<(), Error>>,
    },
    /// Enqueue a batch of emitted events.
    Emit {
        /// The batch.
        events: Vec<EmittedEvent>,
        /// Acknowledgement channel (acceptance, not commitment).
        ack: tokio::sync::oneshot::Sender<Result<(), Error>>,
    },
    /// Request a checkpoint.
    Checkpoint {
        /// Acknowledgement channel.
        ack: tokio::sync::oneshot::Sender<Result<(), Error>>,
    },
    /// Dispose the emitter and end the pump.
    Dispose,
}

/// A supervisor-facing signal from the emitter pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitterNotification {
    /// Another writer mutated the stream; restart the projection.
    RestartRequested(String),
    /// The projection failed hard.
    Failed(String),
    /// A requested checkpoint completed.
    CheckpointCompleted,
}

/// Cloneable handle to a running emitter pump.
#[derive(Clone)]
pub struct EmitterHandle {
    tx: tokio::sync::mpsc::Sender<EmitterCommand>,
}

impl EmitterHandle {
    async fn submit(
        &self,
        command: EmitterCommand,
        ack_rx: tokio::sync::oneshot::Receiver<Result<(), Error>>,
    ) -> Result<(), Error> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::InvalidArgument("emitter pump closed".into()))?;
        ack_rx
            .await
            .map_err(|_| Error::InvalidArgument("emitter pump closed".into()))?
    }

    /// Start the emitter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] on a state violation.
    pub async fn start(&self) -> Result<(), Error> {
        let (ack, ack_rx) = tokio::sync::oneshot::channel();
        self.submit(EmitterCommand::Start { ack }, ack_rx).await
    }

    /// Enqueue a batch of emitted events. The acknowledgement confirms
    /// acceptance into the queue, not commitment.
    ///
    /// # Errors
    ///
    /// Returns the emitter's validation error, if any.
    pub async fn emit_events(&self, events: Vec<EmittedEvent>) -> Result<(), Error> {
        let (ack, ack_rx) = tokio::sync::oneshot::channel();
        self.submit(EmitterCommand::Emit { events, ack }, ack_rx)
            .await
    }

    /// Request a checkpoint; completion arrives as a notification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] on a state violation.
    pub async fn checkpoint(&self) -> Result<(), Error> {
        let (ack, ack_rx) = tokio::sync::oneshot::channel();
        self.submit(EmitterCommand::Checkpoint { ack }, ack_rx).await
    }

    /// Dispose the emitter and end the pump.
    pub async fn dispose(&self) {
        let _ = self.tx.send(EmitterCommand::Dispose).await;
    }
}

/// Spawn the async pump that drives an [`EmittedStream`] against dispatchers.
///
/// The pump executes actions sequentially and feeds completions back into the
/// machine one at a time; supervisor signals surface on the returned
/// notification channel.
pub fn spawn_emitted_stream(
    emitter: EmittedStream,
    read: ReadDispatcher,
    write: WriteDispatcher,
    capacity: usize,
) -> (
    EmitterHandle,
    tokio::sync::mpsc::Receiver<EmitterNotification>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(capacity);
    let join = tokio::spawn(run_emitter(emitter, read, write, rx, notify_tx));
    (EmitterHandle { tx }, notify_rx, join)
}

/// Pump loop: commands in, dispatcher calls out, completions fed back.
async fn run_emitter(
    mut emitter: EmittedStream,
    read: ReadDispatcher,
    write: WriteDispatcher,
    mut rx: tokio::sync::mpsc::Receiver<EmitterCommand>,
    notify_tx: tokio::sync::mpsc::Sender<EmitterNotification>,
) {
    while let Some(command) = rx.recv().await {
        let actions = match command {
            EmitterCommand::Start { ack } => {
                let result = emitter.start();
                match result {
                    Ok(actions) => {
                        let _ = ack.send(Ok(()));
                        actions
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                        continue;
                    }
                }
            }
            EmitterCommand::Emit { events, ack } => match emitter.emit_events(events) {
                Ok(actions) => {
                    let _ = ack.send(Ok(()));
                    actions
                }
                Err(e) => {
                    let _ = ack.send(Err(e));
                    continue;
                }
            },
            EmitterCommand::Checkpoint { ack } => match emitter.checkpoint() {
                Ok(actions) => {
                    let _ = ack.send(Ok(()));
                    actions
                }
                Err(e) => {
                    let _ = ack.send(Err(e));
                    continue;
                }
            },
            EmitterCommand::Dispose => {
                emitter.dispose();
                return;
            }
        };

        drive_actions(&mut emitter, &read, &write, &notify_tx, actions).await;
    }
}

/// Execute actions to quiescence, feeding each completion back into the
/// machine on this task (the emitter's single logical execution context).
async fn drive_actions(
    emitter: &mut EmittedStream,
    read: &ReadDispatcher,
    write: &WriteDispatcher,
    notify_tx: &tokio::sync::mpsc::Sender<EmitterNotification>,
    actions: Vec<EmitterAction>,
) {
    let mut queue: VecDeque<EmitterAction> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            EmitterAction::ReadBackward {
                stream_id,
                from_event_number,
                max_count,
            } => match read.read_backward(stream_id, from_event_number, max_count).await {
                Ok(completed) => match emitter.handle_read_completed(completed) {
                    Ok(more) => queue.extend(more),
                    Err(e) => {
                        tracing::error!(error = %e, "emitter rejected read completion");
                        return;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "read dispatcher unavailable");
                    let _ = notify_tx
                        .send(EmitterNotification::Failed(e.to_string()))
                        .await;
                    return;
                }
            },
            EmitterAction::WriteEvents {
                stream_id,
                expected_version,
                events,
            } => match write.write_events(stream_id, expected_version, events).await {
                Ok(completed) => match emitter.handle_write_completed(completed) {
                    Ok(more) => queue.extend(more),
                    Err(e) => {
                        tracing::error!(error = %e, "emitter rejected write completion");
                        return;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "write dispatcher unavailable");
                    let _ = notify_tx
                        .send(EmitterNotification::Failed(e.to_string()))
                        .await;
                    return;
                }
            },
            EmitterAction::RestartRequested { reason } => {
                let _ = notify_tx
                    .send(EmitterNotification::RestartRequested(reason))
                    .await;
            }
            EmitterAction::Failed { reason } => {
                let _ = notify_tx.send(EmitterNotification::Failed(reason)).await;
            }
            EmitterAction::CheckpointCompleted => {
                let _ = notify_tx
                    .send(EmitterNotification::CheckpointCompleted)
                    .await;
            }
        }
    }
}
