//! Broadcast broker for live event subscriptions.
//!
//! The `Broker` wraps a `tokio::broadcast` channel that carries
//! `Arc<RecordedEvent>` messages. The writer task publishes newly committed
//! events after fsync, and all active subscribers receive them. Using `Arc`
//! ensures that events are shared across subscribers without deep-cloning the
//! event data.
//!
//! The free functions [`subscribe_all`] and [`subscribe_stream`] build
//! catch-up-then-live subscription streams on top of the broker and a
//! [`ReadIndex`].

use std::sync::Arc;

use async_stream::stream;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::reader::ReadIndex;
use crate::types::{RecordedEvent, SubscriptionMessage};

/// Broadcast broker for pushing newly committed events to live subscribers.
///
/// The `Broker` holds the sending half of a `tokio::broadcast` channel. Each
/// call to [`publish`](Broker::publish) wraps the events in `Arc` and sends
/// them to all active receivers. Subscribers obtain a receiver via
/// [`subscribe`](Broker::subscribe).
#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<Arc<RecordedEvent>>,
}

impl Broker {
    /// Create a new broker with the given broadcast channel capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events the broadcast channel buffers
    ///   before lagging subscribers are dropped. Must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        // broadcast::channel returns (Sender, Receiver); the initial receiver
        // is discarded because subscribers obtain their own via subscribe().
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish committed events to all active subscribers.
    ///
    /// Publishing with no active subscribers is expected during startup and is
    /// not an error.
    pub fn publish(&self, events: &[RecordedEvent]) {
        for event in events {
            if self.tx.send(Arc::new(event.clone())).is_err() {
                tracing::debug!("broker publish with no active subscribers");
            }
        }
    }

    /// Obtain a new receiver of the live event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RecordedEvent>> {
        self.tx.subscribe()
    }
}

/// Number of events to read per batch during the catch-up phase.
///
/// Catch-up reads events from the in-memory index in chunks of this size
/// rather than loading the entire history at once, keeping memory bounded for
/// large catch-up ranges.
const CATCHUP_BATCH_SIZE: u64 = 500;

/// Create an async stream that replays historical events (catch-up), emits a
/// `CaughtUp` marker, then forwards live events from the broadcast channel.
///
/// The broadcast receiver is registered **before** any historical read begins,
/// preventing a race where events committed between the end of catch-up and
/// the start of live listening would be lost. Events seen in both phases are
/// deduplicated by global position.
///
/// # Arguments
///
/// * `read_index` - Shared read-only handle to the in-memory event log.
/// * `broker` - Broadcast broker for the live phase.
/// * `from_position` - Global byte offset to start the catch-up replay from.
///
/// # Errors
///
/// The stream yields `Error::InvalidArgument` and terminates if the broadcast
/// receiver lags; the consumer should re-subscribe from their last processed
/// position.
pub async fn subscribe_all(
    read_index: ReadIndex,
    broker: &Broker,
    from_position: u64,
) -> impl futures_core::Stream<Item = Result<SubscriptionMessage, Error>> {
    let mut rx = broker.subscribe();

    stream! {
        let mut cursor = from_position;
        let mut last_catchup_position: Option<u64> = None;

        loop {
            let batch = read_index.read_all_forward(cursor, CATCHUP_BATCH_SIZE);
            let batch_len = batch.len() as u64;

            for event in batch {
                last_catchup_position = Some(event.global_position);
                cursor = event.global_position + 1;
                yield Ok(SubscriptionMessage::Event(Arc::new(event)));
            }

            if batch_len < CATCHUP_BATCH_SIZE {
                break;
            }
        }

        yield Ok(SubscriptionMessage::CaughtUp);

        loop {
            match rx.recv().await {
                Ok(arc_event) => {
                    // Skip events already sent during catch-up.
                    if let Some(last_pos) = last_catchup_position
                        && arc_event.global_position <= last_pos
                    {
                        continue;
                    }
                    yield Ok(SubscriptionMessage::Event(arc_event));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    yield Err(Error::InvalidArgument(
                        "subscription lagged: re-subscribe from last checkpoint".into(),
                    ));
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return;
                }
            }
        }
    }
}

/// Create an async stream that replays one stream's history (catch-up), emits
/// a `CaughtUp` marker, then forwards live events filtered by stream name.
///
/// If the stream does not exist yet, the catch-up phase ends immediately and
/// `CaughtUp` is yielded with no preceding events; the live phase then picks
/// up the stream's first event when it is committed.
///
/// # Arguments
///
/// * `read_index` - Shared read-only handle to the in-memory event log.
/// * `broker` - Broadcast broker for the live phase.
/// * `stream_id` - Name of the stream to subscribe to.
/// * `from_event_number` - Event number to start the catch-up replay from.
///
/// # Errors
///
/// The stream yields `Error::InvalidArgument` and terminates if the broadcast
/// receiver lags.
pub async fn subscribe_stream(
    read_index: ReadIndex,
    broker: &Broker,
    stream_id: String,
    from_event_number: u64,
) -> impl futures_core::Stream<Item = Result<SubscriptionMessage, Error>> {
    let mut rx = broker.subscribe();

    stream! {
        let mut cursor = from_event_number;
        let mut last_catchup_number: Option<u64> = None;

        loop {
            match read_index.read_stream_forward(&stream_id, cursor, CATCHUP_BATCH_SIZE) {
                Ok(batch) => {
                    let batch_len = batch.len() as u64;

                    for event in batch {
                        last_catchup_number = Some(event.event_number);
                        cursor = event.event_number + 1;
                        yield Ok(SubscriptionMessage::Event(Arc::new(event)));
                    }

                    if batch_len < CATCHUP_BATCH_SIZE {
                        break;
                    }
                }
                Err(Error::StreamNotFound { .. }) => {
                    break;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        yield Ok(SubscriptionMessage::CaughtUp);

        loop {
            match rx.recv().await {
                Ok(arc_event) => {
                    if arc_event.stream_id != stream_id {
                        continue;
                    }
                    if let Some(last_number) = last_catchup_number
                        && arc_event.event_number <= last_number
                    {
                        continue;
                    }
                    yield Ok(SubscriptionMessage::Event(arc_event));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    yield Err(Error::InvalidArgument(
                        "subscription lagged: re-subscribe from last checkpoint".into(),
                    ));
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventLog;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::collections::HashMap;
    use std::sync::RwLock;
    use uuid::Uuid;

    fn make_event(stream: &str, number: u64, global_position: u64) -> RecordedEvent {
        RecordedEvent {
            event_id: Uuid::new_v4(),
            stream_id: stream.to_string(),
            event_number: number,
            global_position,
            recorded_at: 0,
            event_type: format!("Evt{global_position}"),
            metadata: Bytes::new(),
            payload: Bytes::from_static(b"{}"),
        }
    }

    fn index_of(events: Vec<RecordedEvent>) -> ReadIndex {
        let mut streams: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, e) in events.iter().enumerate() {
            streams.entry(e.stream_id.clone()).or_default().push(i);
        }
        ReadIndex::new(Arc::new(RwLock::new(EventLog { events, streams })))
    }

    #[tokio::test]
    async fn publish_three_events_received_in_order() {
        let broker = Broker::new(16);
        let mut rx = broker.subscribe();

        let events = vec![
            make_event("s", 0, 0),
            make_event("s", 1, 100),
            make_event("s", 2, 200),
        ];
        broker.publish(&events);

        for expected in [0u64, 100, 200] {
            let received = rx.recv().await.expect("should receive event");
            assert_eq!(received.global_position, expected);
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let broker = Broker::new(16);
        broker.publish(&[make_event("s", 0, 0)]);
    }

    #[tokio::test]
    async fn two_subscribers_share_the_same_allocation() {
        let broker = Broker::new(16);
        let mut rx_a = broker.subscribe();
        let mut rx_b = broker.subscribe();

        broker.publish(&[make_event("s", 0, 0)]);

        let a = rx_a.recv().await.expect("receiver a");
        let b = rx_b.recv().await.expect("receiver b");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn subscribe_all_replays_history_then_caught_up() {
        let index = index_of(vec![make_event("s", 0, 0), make_event("s", 1, 100)]);
        let broker = Broker::new(16);

        let stream = subscribe_all(index, &broker, 0).await;
        futures::pin_mut!(stream);

        let mut positions = Vec::new();
        loop {
            match stream.next().await.expect("stream open").expect("no error") {
                SubscriptionMessage::Event(e) => positions.push(e.global_position),
                SubscriptionMessage::CaughtUp => break,
            }
        }
        assert_eq!(positions, vec![0, 100]);
    }

    #[tokio::test]
    async fn subscribe_all_deduplicates_catchup_and_live_overlap() {
        let historical = vec![make_event("s", 0, 0), make_event("s", 1, 100)];
        let index = index_of(historical.clone());
        let broker = Broker::new(16);

        let stream = subscribe_all(index, &broker, 0).await;
        futures::pin_mut!(stream);

        // The second historical event is also published live (the overlap
        // window) followed by one genuinely new event.
        broker.publish(&historical[1..]);
        broker.publish(&[make_event("s", 2, 200)]);

        let mut positions = Vec::new();
        for _ in 0..4 {
            match stream.next().await.expect("stream open").expect("no error") {
                SubscriptionMessage::Event(e) => positions.push(e.global_position),
                SubscriptionMessage::CaughtUp => positions.push(u64::MAX),
            }
        }
        assert_eq!(
            positions,
            vec![0, 100, u64::MAX, 200],
            "live phase skips the event already replayed during catch-up"
        );
    }

    #[tokio::test]
    async fn subscribe_stream_filters_other_streams() {
        let index = index_of(vec![make_event("a", 0, 0), make_event("b", 0, 100)]);
        let broker = Broker::new(16);

        let stream = subscribe_stream(index, &broker, "a".to_string(), 0).await;
        futures::pin_mut!(stream);

        // Catch-up: only stream a's event, then the marker.
        match stream.next().await.expect("open").expect("ok") {
            SubscriptionMessage::Event(e) => assert_eq!(e.stream_id, "a"),
            SubscriptionMessage::CaughtUp => panic!("expected event before marker"),
        }
        assert!(matches!(
            stream.next().await.expect("open").expect("ok"),
            SubscriptionMessage::CaughtUp
        ));

        // Live: a foreign-stream event is filtered out.
        broker.publish(&[make_event("b", 1, 200), make_event("a", 1, 300)]);
        match stream.next().await.expect("open").expect("ok") {
            SubscriptionMessage::Event(e) => {
                assert_eq!(e.stream_id, "a");
                assert_eq!(e.event_number, 1);
            }
            SubscriptionMessage::CaughtUp => panic!("unexpected second marker"),
        }
    }

    #[tokio::test]
    async fn subscribe_stream_on_missing_stream_goes_straight_live() {
        let index = index_of(vec![]);
        let broker = Broker::new(16);

        let stream = subscribe_stream(index, &broker, "new".to_string(), 0).await;
        futures::pin_mut!(stream);

        assert!(matches!(
            stream.next().await.expect("open").expect("ok"),
            SubscriptionMessage::CaughtUp
        ));

        broker.publish(&[make_event("new", 0, 0)]);
        match stream.next().await.expect("open").expect("ok") {
            SubscriptionMessage::Event(e) => assert_eq!(e.event_number, 0),
            SubscriptionMessage::CaughtUp => panic!("unexpected second marker"),
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_terminates_with_error() {
        let index = index_of(vec![]);
        let broker = Broker::new(1);

        let stream = subscribe_all(index, &broker, 0).await;
        futures::pin_mut!(stream);

        assert!(matches!(
            stream.next().await.expect("open").expect("ok"),
            SubscriptionMessage::CaughtUp
        ));

        // Overflow the single-slot broadcast buffer before the stream drains.
        for i in 0..8u64 {
            broker.publish(&[make_event("s", i, i * 100)]);
        }

        // The receiver lost events; the stream must surface the lag error
        // (possibly after yielding the surviving buffered event).
        let mut saw_error = false;
        for _ in 0..3 {
            match stream.next().await {
                Some(Err(Error::InvalidArgument(msg))) => {
                    assert!(msg.contains("lagged"), "unexpected message: {msg}");
                    saw_error = true;
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("expected lag error, got: {other:?}"),
            }
        }
        assert!(saw_error, "lag error was never yielded");
    }
}
