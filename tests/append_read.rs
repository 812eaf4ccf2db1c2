//! Append semantics, idempotency, and round-trip reads through the full
//! stack: store, writer task, read index, and subscriptions.

use bytes::Bytes;
use futures::StreamExt;
use uuid::Uuid;

use logfold_db::codec::{self, RecordFlags};
use logfold_db::{
    Broker, ChunkDb, ChunkDbConfig, Error, ExpectedVersion, ProposedEvent, RecordedEvent, Store,
    SubscriptionMessage, spawn_writer, subscribe_stream,
};

fn proposed(event_type: &str) -> ProposedEvent {
    ProposedEvent {
        event_id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        metadata: Bytes::new(),
        payload: Bytes::from_static(b"{}"),
    }
}

fn open_store(dir: &std::path::Path) -> Store {
    Store::open(ChunkDbConfig::new(dir, 64 * 1024)).expect("open store")
}

#[test]
fn any_creates_the_stream_implicitly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = open_store(dir.path());

    let recorded = store
        .append("orders", ExpectedVersion::Any, vec![proposed("Placed")])
        .expect("append at Any");
    assert_eq!(recorded[0].event_number, 0);
    assert_eq!(store.stream_version("orders"), Some(0));
}

#[test]
fn duplicate_event_id_resolves_to_one_committed_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = open_store(dir.path());
    let event = proposed("Placed");

    // Twice at Any: one committed event.
    let first = store
        .append("orders", ExpectedVersion::Any, vec![event.clone()])
        .expect("first append");
    let second = store
        .append("orders", ExpectedVersion::Any, vec![event.clone()])
        .expect("retry at Any");
    assert_eq!(first, second);
    assert_eq!(store.stream_version("orders"), Some(0));

    // Rewriting with the original (non-Any) expected version: still one event.
    let third = store
        .append("orders", ExpectedVersion::NoStream, vec![event.clone()])
        .expect("retry at the original expected version");
    assert_eq!(first, third);
    assert_eq!(store.stream_version("orders"), Some(0));

    // A mismatched expected version is a real conflict.
    let result = store.append("orders", ExpectedVersion::Exact(5), vec![event]);
    assert!(
        matches!(result, Err(Error::WrongExpectedVersion { .. })),
        "expected WrongExpectedVersion, got: {result:?}"
    );
    assert_eq!(store.stream_version("orders"), Some(0));
}

#[test]
fn forward_and_backward_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = open_store(dir.path());

    let mut appended = Vec::new();
    for i in 0..7u64 {
        let expected = if i == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(i - 1)
        };
        let recorded = store
            .append("s", expected, vec![proposed(&format!("E{i}"))])
            .expect("append");
        appended.extend(recorded);
    }

    let forward = store.read_stream_forward("s", 0, u64::MAX).expect("forward");
    assert_eq!(forward, appended, "forward read returns append order");

    let (backward, next, end) = store
        .read_stream_backward("s", -1, u64::MAX)
        .expect("backward");
    let mut reversed = backward;
    reversed.reverse();
    assert_eq!(reversed, appended, "backward read is the exact reverse");
    assert_eq!(next, -1);
    assert!(end);
}

#[test]
fn committed_batches_survive_restart_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut appended = Vec::new();
    {
        let mut store = open_store(dir.path());
        for i in 0..4u64 {
            appended.extend(
                store
                    .append(
                        "s",
                        ExpectedVersion::Any,
                        vec![proposed(&format!("A{i}")), proposed(&format!("B{i}"))],
                    )
                    .expect("append"),
            );
        }
        store.close().expect("close");
    }

    let store = open_store(dir.path());
    let recovered = store.read_stream_forward("s", 0, u64::MAX).expect("read");
    assert_eq!(recovered, appended);
}

#[test]
fn torn_batch_is_invisible_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ChunkDbConfig::new(dir.path(), 64 * 1024);

    // A healthy first batch through the store.
    {
        let mut store = Store::open(config.clone()).expect("open store");
        store
            .append("s", ExpectedVersion::NoStream, vec![proposed("Committed")])
            .expect("append");
        store.close().expect("close");
    }

    // Simulate a crash mid-batch: write only the opening record of a
    // two-event batch straight into the chunk log, then "crash".
    {
        let mut db = ChunkDb::open(config.clone()).expect("open db");
        let event = RecordedEvent {
            event_id: Uuid::new_v4(),
            stream_id: "s".to_string(),
            event_number: 1,
            global_position: db.writer_position(),
            recorded_at: 0,
            event_type: "TornHalf".to_string(),
            metadata: Bytes::new(),
            payload: Bytes::new(),
        };
        let frame = codec::encode_event_record(&event, RecordFlags::for_batch_position(0, 2));
        db.append(&frame).expect("append torn record");
        db.commit().expect("commit");
        db.close().expect("close");
    }

    let mut store = Store::open(config).expect("reopen store");
    assert_eq!(
        store.stream_version("s"),
        Some(0),
        "the torn batch must not be visible"
    );

    // The stream continues as if the torn batch never happened.
    let recorded = store
        .append("s", ExpectedVersion::Exact(0), vec![proposed("Next")])
        .expect("append after torn batch");
    assert_eq!(recorded[0].event_number, 1);
}

#[test]
fn chunk_roll_preserves_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = Store::open(ChunkDbConfig::new(dir.path(), 2048)).expect("open store");

    let mut appended = Vec::new();
    for i in 0..40u64 {
        let event = ProposedEvent {
            event_id: Uuid::new_v4(),
            event_type: format!("E{i}"),
            metadata: Bytes::new(),
            payload: Bytes::from(vec![b'p'; 120]),
        };
        appended.extend(
            store
                .append("s", ExpectedVersion::Any, vec![event])
                .expect("append"),
        );
    }
    assert!(store.chunk_count() > 2, "log must span several chunks");

    let forward = store.read_stream_forward("s", 0, u64::MAX).expect("read");
    assert_eq!(forward, appended);
}

#[tokio::test]
async fn writer_task_and_subscription_deliver_exactly_once_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let broker = Broker::new(64);
    let (handle, read_index, join) = spawn_writer(store, 16, broker.clone());

    // Two historical events before the subscription starts.
    for i in 0..2u64 {
        handle
            .append("s", ExpectedVersion::Any, vec![proposed(&format!("H{i}"))])
            .await
            .expect("append");
    }

    let stream = subscribe_stream(read_index, &broker, "s".to_string(), 0).await;
    futures::pin_mut!(stream);

    // Catch-up phase delivers the history, then the marker.
    for expected in 0..2u64 {
        match stream.next().await.expect("open").expect("ok") {
            SubscriptionMessage::Event(e) => assert_eq!(e.event_number, expected),
            SubscriptionMessage::CaughtUp => panic!("marker before history"),
        }
    }
    assert!(matches!(
        stream.next().await.expect("open").expect("ok"),
        SubscriptionMessage::CaughtUp
    ));

    // Live phase delivers new events exactly once.
    for i in 2..5u64 {
        handle
            .append("s", ExpectedVersion::Any, vec![proposed(&format!("L{i}"))])
            .await
            .expect("append");
    }
    for expected in 2..5u64 {
        match stream.next().await.expect("open").expect("ok") {
            SubscriptionMessage::Event(e) => assert_eq!(e.event_number, expected),
            SubscriptionMessage::CaughtUp => panic!("unexpected second marker"),
        }
    }

    drop(handle);
    join.await.expect("writer exits cleanly");
}

#[tokio::test]
async fn transactions_are_atomic_across_the_writer_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let (handle, read_index, join) = spawn_writer(store, 16, Broker::new(16));

    let txn = handle
        .transaction_start("acct", ExpectedVersion::NoStream)
        .await
        .expect("start");
    handle
        .transaction_write(txn, vec![proposed("Debit")])
        .await
        .expect("write");
    handle
        .transaction_write(txn, vec![proposed("Credit")])
        .await
        .expect("write");
    assert_eq!(
        read_index.stream_version("acct"),
        None,
        "no partial effects before commit"
    );

    let recorded = handle.transaction_commit(txn).await.expect("commit");
    assert_eq!(recorded.len(), 2);
    assert_eq!(read_index.stream_version("acct"), Some(1));

    drop(handle);
    join.await.expect("writer exits cleanly");
}
