//! Binary codec for records in the chunked transaction log.
//!
//! This module handles serialization and deserialization of the record frames
//! stored inside chunk bodies. It is pure data transformation -- no file I/O,
//! no async, no index management.
//!
//! Each record is a length-prefixed, CRC32-checksummed binary frame. Two record
//! kinds exist: event records (client data) and epoch markers (term boundaries
//! written once per database open). Event records carry batch-boundary flags so
//! that a batch torn by a crash can be recognized and dropped during the
//! recovery scan. All multi-byte integers are little-endian.

use bytes::Bytes;
use uuid::Uuid;

use crate::error::Error;
use crate::types::RecordedEvent;

/// Record kind tag for an event record.
const RECORD_TYPE_EVENT: u8 = 0;

/// Record kind tag for an epoch marker.
const RECORD_TYPE_EPOCH: u8 = 1;

/// Flag bit: this record opens a batch.
const FLAG_BATCH_BEGIN: u8 = 0x01;

/// Flag bit: this record closes a batch.
const FLAG_BATCH_END: u8 = 0x02;

/// Size of the length prefix field in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the trailing CRC32 field in bytes.
const CRC_SIZE: usize = 4;

/// Fixed-size portion of an event record body (everything except the
/// variable-length fields): record_type(1) + flags(1) + global_position(8) +
/// recorded_at(8) + stream_id_len(2) + event_number(8) + event_id(16) +
/// event_type_len(2) + metadata_len(4) + payload_len(4) = 54.
const EVENT_FIXED_BODY_SIZE: usize = 1 + 1 + 8 + 8 + 2 + 8 + 16 + 2 + 4 + 4;

/// Body size of an epoch record: record_type(1) + epoch_number(8) +
/// epoch_id(16) + prev_epoch_position(8) = 33.
const EPOCH_BODY_SIZE: usize = 1 + 8 + 16 + 8;

/// Batch-boundary markers on an event record.
///
/// An append of k events writes the first record with `batch_begin`, the last
/// with `batch_end` (a single-event append carries both). The recovery scan
/// commits a batch to the index only once its closing record is seen, so a
/// crash mid-batch leaves no partial batch visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFlags {
    /// This record opens a batch.
    pub batch_begin: bool,
    /// This record closes a batch.
    pub batch_end: bool,
}

impl RecordFlags {
    /// Flags for a single-record batch.
    pub const STANDALONE: RecordFlags = RecordFlags {
        batch_begin: true,
        batch_end: true,
    };

    /// Flags for position `index` in a batch of `len` records.
    pub fn for_batch_position(index: usize, len: usize) -> RecordFlags {
        RecordFlags {
            batch_begin: index == 0,
            batch_end: index + 1 == len,
        }
    }

    fn encode(self) -> u8 {
        (if self.batch_begin { FLAG_BATCH_BEGIN } else { 0 })
            | (if self.batch_end { FLAG_BATCH_END } else { 0 })
    }

    fn decode(raw: u8) -> RecordFlags {
        RecordFlags {
            batch_begin: raw & FLAG_BATCH_BEGIN != 0,
            batch_end: raw & FLAG_BATCH_END != 0,
        }
    }
}

/// Result of attempting to decode a value from a byte buffer.
///
/// Distinguishes between a successfully decoded value and a buffer that does
/// not contain enough bytes to form a complete frame. A truncated trailing
/// frame is expected when scanning up to an arbitrary byte boundary, whereas a
/// checksum mismatch below the durable frontier indicates corruption.
#[derive(Debug)]
pub enum DecodeOutcome<T> {
    /// A full value was successfully decoded from the buffer.
    Complete {
        /// The decoded value.
        value: T,
        /// Total number of bytes consumed from the buffer.
        consumed: usize,
    },
    /// The buffer does not contain enough bytes to form a complete frame.
    Incomplete,
}

/// An epoch marker: a leadership/term boundary recorded in the log.
///
/// Written once per database open so the epoch checkpoint always names a real
/// log offset. `prev_epoch_position` chains markers backwards (`-1` for the
/// first epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochRecord {
    /// Monotonically increasing epoch number.
    pub epoch_number: u64,
    /// Random identity of this epoch.
    pub epoch_id: Uuid,
    /// Global offset of the previous epoch marker, or -1.
    pub prev_epoch_position: i64,
}

/// A decoded log record: either client event data or an epoch marker.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// An appended event with its batch-boundary flags.
    Event {
        /// The recorded event.
        event: RecordedEvent,
        /// Batch-boundary markers.
        flags: RecordFlags,
    },
    /// A term boundary.
    Epoch(EpochRecord),
}

/// Encode a [`RecordedEvent`] into its binary frame.
///
/// The returned buffer contains the length prefix, the record type tag, the
/// batch flags, all event fields, and a trailing CRC32. The caller can append
/// this directly to the ongoing chunk.
pub fn encode_event_record(event: &RecordedEvent, flags: RecordFlags) -> Vec<u8> {
    let sid_bytes = event.stream_id.as_bytes();
    let et_bytes = event.event_type.as_bytes();
    let body_len = EVENT_FIXED_BODY_SIZE
        + sid_bytes.len()
        + et_bytes.len()
        + event.metadata.len()
        + event.payload.len()
        + CRC_SIZE;
    let total_len = LENGTH_PREFIX_SIZE + body_len;

    let mut buf = Vec::with_capacity(total_len);

    // record_length: byte count from record_type through checksum (inclusive).
    buf.extend_from_slice(&(body_len as u32).to_le_bytes());

    // -- Begin body (CRC32 covers from here through payload) --
    buf.push(RECORD_TYPE_EVENT);
    buf.push(flags.encode());
    buf.extend_from_slice(&event.global_position.to_le_bytes());
    buf.extend_from_slice(&event.recorded_at.to_le_bytes());
    buf.extend_from_slice(&(sid_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(sid_bytes);
    buf.extend_from_slice(&event.event_number.to_le_bytes());
    buf.extend_from_slice(event.event_id.as_bytes());
    buf.extend_from_slice(&(et_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(et_bytes);
    buf.extend_from_slice(&(event.metadata.len() as u32).to_le_bytes());
    buf.extend_from_slice(&event.metadata);
    buf.extend_from_slice(&(event.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&event.payload);
    // -- End body --

    let crc = crc32fast::hash(&buf[LENGTH_PREFIX_SIZE..]);
    buf.extend_from_slice(&crc.to_le_bytes());

    buf
}

/// Encode an [`EpochRecord`] into its binary frame.
pub fn encode_epoch_record(epoch: &EpochRecord) -> Vec<u8> {
    let body_len = EPOCH_BODY_SIZE + CRC_SIZE;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body_len);

    buf.extend_from_slice(&(body_len as u32).to_le_bytes());
    buf.push(RECORD_TYPE_EPOCH);
    buf.extend_from_slice(&epoch.epoch_number.to_le_bytes());
    buf.extend_from_slice(epoch.epoch_id.as_bytes());
    buf.extend_from_slice(&epoch.prev_epoch_position.to_le_bytes());

    let crc = crc32fast::hash(&buf[LENGTH_PREFIX_SIZE..]);
    buf.extend_from_slice(&crc.to_le_bytes());

    buf
}

/// Decode a single record from the start of a byte buffer.
///
/// Handles three cases:
///
/// 1. **Complete record** -- returns [`DecodeOutcome::Complete`] with the
///    decoded record and the total number of bytes consumed.
/// 2. **Incomplete data** -- the buffer is too short to contain a full frame.
///    Returns [`DecodeOutcome::Incomplete`].
/// 3. **Corrupt data** -- the checksum does not match, the record type is
///    unknown, or a field is malformed. Returns [`Error::CorruptRecord`].
///
/// # Errors
///
/// Returns [`Error::CorruptRecord`] on CRC mismatch, unknown record type, or
/// malformed field data (e.g., invalid UTF-8 in the stream name).
pub fn decode_record(buf: &[u8]) -> Result<DecodeOutcome<LogRecord>, Error> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(DecodeOutcome::Incomplete);
    }

    let record_length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let total = LENGTH_PREFIX_SIZE + record_length;

    if buf.len() < total {
        return Ok(DecodeOutcome::Incomplete);
    }

    let body = &buf[LENGTH_PREFIX_SIZE..total];
    if body.len() < 1 + CRC_SIZE {
        return Err(Error::CorruptRecord {
            position: 0,
            detail: "record body too short for type tag and checksum".to_string(),
        });
    }

    let crc_offset = body.len() - CRC_SIZE;
    let stored_crc = u32::from_le_bytes(
        body[crc_offset..]
            .try_into()
            .expect("4 bytes for checksum"),
    );
    let computed_crc = crc32fast::hash(&body[..crc_offset]);
    if stored_crc != computed_crc {
        return Err(Error::CorruptRecord {
            position: 0,
            detail: format!(
                "CRC32 mismatch: stored {stored_crc:#010X}, computed {computed_crc:#010X}"
            ),
        });
    }

    let protected = &body[..crc_offset];
    let record = match protected[0] {
        RECORD_TYPE_EVENT => {
            let (event, flags) = decode_event_body(&protected[1..])?;
            LogRecord::Event { event, flags }
        }
        RECORD_TYPE_EPOCH => LogRecord::Epoch(decode_epoch_body(&protected[1..])?),
        other => {
            return Err(Error::CorruptRecord {
                position: 0,
                detail: format!("unknown record type tag: {other}"),
            });
        }
    };

    Ok(DecodeOutcome::Complete {
        value: record,
        consumed: total,
    })
}

/// Parse the CRC-protected body of an event record (after the type tag).
fn decode_event_body(protected: &[u8]) -> Result<(RecordedEvent, RecordFlags), Error> {
    let mut cursor = 0;

    // Helper macro: read N bytes at `cursor`, advance, or return CorruptRecord
    // if the remaining data is too short.
    macro_rules! read_bytes {
        ($n:expr) => {{
            if cursor + $n > protected.len() {
                return Err(Error::CorruptRecord {
                    position: 0,
                    detail: "unexpected end of record body".to_string(),
                });
            }
            let start = cursor;
            cursor += $n;
            &protected[start..cursor]
        }};
    }

    let flags = RecordFlags::decode(read_bytes!(1)[0]);

    let gp_bytes = read_bytes!(8);
    let global_position = u64::from_le_bytes(gp_bytes.try_into().expect("8 bytes for u64"));

    let ra_bytes = read_bytes!(8);
    let recorded_at = u64::from_le_bytes(ra_bytes.try_into().expect("8 bytes for u64"));

    let sil_bytes = read_bytes!(2);
    let stream_id_len = u16::from_le_bytes(sil_bytes.try_into().expect("2 bytes for u16")) as usize;

    let sid_bytes = read_bytes!(stream_id_len);
    let stream_id = std::str::from_utf8(sid_bytes).map_err(|e| Error::CorruptRecord {
        position: 0,
        detail: format!("invalid UTF-8 in stream name: {e}"),
    })?;

    let en_bytes = read_bytes!(8);
    let event_number = u64::from_le_bytes(en_bytes.try_into().expect("8 bytes for u64"));

    let eid_bytes = read_bytes!(16);
    let event_id = Uuid::from_bytes(eid_bytes.try_into().expect("16 bytes for UUID"));

    let etl_bytes = read_bytes!(2);
    let event_type_len =
        u16::from_le_bytes(etl_bytes.try_into().expect("2 bytes for u16")) as usize;

    let et_bytes = read_bytes!(event_type_len);
    let event_type = std::str::from_utf8(et_bytes).map_err(|e| Error::CorruptRecord {
        position: 0,
        detail: format!("invalid UTF-8 in event type: {e}"),
    })?;

    let ml_bytes = read_bytes!(4);
    let metadata_len = u32::from_le_bytes(ml_bytes.try_into().expect("4 bytes for u32")) as usize;
    let meta_bytes = read_bytes!(metadata_len);

    let pl_bytes = read_bytes!(4);
    let payload_len = u32::from_le_bytes(pl_bytes.try_into().expect("4 bytes for u32")) as usize;
    let pay_bytes = read_bytes!(payload_len);
    let _ = cursor;

    let event = RecordedEvent {
        event_id,
        stream_id: stream_id.to_string(),
        event_number,
        global_position,
        recorded_at,
        event_type: event_type.to_string(),
        metadata: Bytes::copy_from_slice(meta_bytes),
        payload: Bytes::copy_from_slice(pay_bytes),
    };
    Ok((event, flags))
}

/// Parse the CRC-protected body of an epoch record (after the type tag).
fn decode_epoch_body(protected: &[u8]) -> Result<EpochRecord, Error> {
    if protected.len() != EPOCH_BODY_SIZE - 1 {
        return Err(Error::CorruptRecord {
            position: 0,
            detail: format!(
                "epoch record body has {} bytes, expected {}",
                protected.len(),
                EPOCH_BODY_SIZE - 1
            ),
        });
    }
    let epoch_number = u64::from_le_bytes(protected[0..8].try_into().expect("8 bytes"));
    let epoch_id = Uuid::from_bytes(protected[8..24].try_into().expect("16 bytes"));
    let prev_epoch_position = i64::from_le_bytes(protected[24..32].try_into().expect("8 bytes"));
    Ok(EpochRecord {
        epoch_number,
        epoch_id,
        prev_epoch_position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a `RecordedEvent` with the given fields for test convenience.
    fn make_event(
        global_position: u64,
        event_number: u64,
        event_type: &str,
        metadata: &[u8],
        payload: &[u8],
    ) -> RecordedEvent {
        RecordedEvent {
            event_id: Uuid::new_v4(),
            stream_id: "order-7".to_string(),
            event_number,
            global_position,
            recorded_at: 1_000_000_000_000,
            event_type: event_type.to_string(),
            metadata: Bytes::copy_from_slice(metadata),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn expect_event(outcome: DecodeOutcome<LogRecord>) -> (RecordedEvent, RecordFlags, usize) {
        match outcome {
            DecodeOutcome::Complete {
                value: LogRecord::Event { event, flags },
                consumed,
            } => (event, flags, consumed),
            other => panic!("expected Complete(Event), got: {other:?}"),
        }
    }

    #[test]
    fn round_trip_non_empty_metadata_and_payload() {
        let event = make_event(0, 0, "OrderPlaced", b"meta-data", b"{\"qty\":1}");
        let buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let (decoded, flags, consumed) = expect_event(decode_record(&buf).expect("decode"));
        assert_eq!(decoded, event);
        assert_eq!(flags, RecordFlags::STANDALONE);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn round_trip_empty_metadata_and_payload() {
        let event = make_event(512, 2, "ItemRemoved", b"", b"");
        let buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let (decoded, _, consumed) = expect_event(decode_record(&buf).expect("decode"));
        assert_eq!(decoded, event);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn round_trip_max_length_event_type() {
        let event_type: String = "A".repeat(256);
        let event = make_event(10, 0, &event_type, b"m", b"p");
        let buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let (decoded, _, _) = expect_event(decode_record(&buf).expect("decode"));
        assert_eq!(decoded, event);
    }

    #[test]
    fn round_trip_binary_data_with_null_bytes() {
        let binary_data = b"\x00\xff\x00\xff";
        let event = make_event(7, 3, "BinaryEvent", binary_data, binary_data);
        let buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let (decoded, _, _) = expect_event(decode_record(&buf).expect("decode"));
        assert_eq!(decoded, event);
    }

    #[test]
    fn batch_flags_round_trip_per_position() {
        let event = make_event(0, 0, "E", b"", b"");
        for (index, len, begin, end) in [
            (0, 3, true, false),
            (1, 3, false, false),
            (2, 3, false, true),
            (0, 1, true, true),
        ] {
            let flags = RecordFlags::for_batch_position(index, len);
            assert_eq!(flags.batch_begin, begin);
            assert_eq!(flags.batch_end, end);

            let buf = encode_event_record(&event, flags);
            let (_, decoded_flags, _) = expect_event(decode_record(&buf).expect("decode"));
            assert_eq!(decoded_flags, flags);
        }
    }

    #[test]
    fn encode_determinism() {
        let event = make_event(0, 0, "Deterministic", b"meta", b"payload");
        assert_eq!(
            encode_event_record(&event, RecordFlags::STANDALONE),
            encode_event_record(&event, RecordFlags::STANDALONE)
        );
    }

    #[test]
    fn crc_mismatch_flipped_payload_bit() {
        let event = make_event(0, 0, "TestEvent", b"meta", b"payload-data");
        let mut buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let idx = buf.len() - 5; // inside payload, before checksum
        buf[idx] ^= 0x01;
        let result = decode_record(&buf);
        assert!(
            matches!(result, Err(Error::CorruptRecord { .. })),
            "expected CorruptRecord, got: {result:?}"
        );
    }

    #[test]
    fn crc_mismatch_flipped_checksum_bit() {
        let event = make_event(0, 0, "TestEvent", b"meta", b"payload");
        let mut buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        let result = decode_record(&buf);
        assert!(
            matches!(result, Err(Error::CorruptRecord { .. })),
            "expected CorruptRecord, got: {result:?}"
        );
    }

    #[test]
    fn incomplete_2_byte_buffer() {
        let result = decode_record(&[0x00, 0x01]).expect("should not error");
        assert!(
            matches!(result, DecodeOutcome::Incomplete),
            "expected Incomplete, got: {result:?}"
        );
    }

    #[test]
    fn incomplete_large_length_small_buffer() {
        // First 4 bytes encode record_length = 1000, but total buffer is only 10 bytes.
        let mut buf = [0u8; 10];
        buf[0..4].copy_from_slice(&1000u32.to_le_bytes());
        let result = decode_record(&buf).expect("should not error");
        assert!(
            matches!(result, DecodeOutcome::Incomplete),
            "expected Incomplete, got: {result:?}"
        );
    }

    #[test]
    fn extra_trailing_bytes_consumed_correctly() {
        let event = make_event(0, 0, "TestEvent", b"meta", b"payload");
        let mut buf = encode_event_record(&event, RecordFlags::STANDALONE);
        let expected_consumed = buf.len();
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let (_, _, consumed) = expect_event(decode_record(&buf).expect("decode"));
        assert_eq!(
            consumed, expected_consumed,
            "consumed should equal encoded record length, not total buffer"
        );
    }

    #[test]
    fn three_records_sequential_decode() {
        let events: Vec<RecordedEvent> = (0..3)
            .map(|i| {
                make_event(
                    i * 100,
                    i,
                    &format!("Event{i}"),
                    format!("meta{i}").as_bytes(),
                    format!("payload{i}").as_bytes(),
                )
            })
            .collect();

        let mut combined = Vec::new();
        for (i, event) in events.iter().enumerate() {
            combined.extend_from_slice(&encode_event_record(
                event,
                RecordFlags::for_batch_position(i, events.len()),
            ));
        }

        let mut offset = 0;
        for (i, expected) in events.iter().enumerate() {
            let (decoded, _, consumed) = expect_event(
                decode_record(&combined[offset..])
                    .unwrap_or_else(|e| panic!("decode {i} should succeed: {e}")),
            );
            assert_eq!(&decoded, expected, "event {i} fields mismatch");
            offset += consumed;
        }
        assert_eq!(offset, combined.len());
    }

    #[test]
    fn field_boundary_correctness() {
        let known_pos: u64 = 0xABCD_EF01_2345_6789;
        let event = make_event(known_pos, 0, "BoundaryTest", b"m", b"p");
        let buf = encode_event_record(&event, RecordFlags::STANDALONE);

        // record type at byte 4, flags at byte 5, global_position at bytes 6..14.
        assert_eq!(buf[4], RECORD_TYPE_EVENT);
        assert_eq!(buf[5], FLAG_BATCH_BEGIN | FLAG_BATCH_END);
        assert_eq!(
            &buf[6..14],
            &known_pos.to_le_bytes(),
            "global_position at bytes 6..14"
        );

        // record_length covers everything after itself.
        let record_length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(record_length, (buf.len() - 4) as u32);

        // Last 4 bytes are the CRC32 over the body.
        let stored_crc = u32::from_le_bytes(buf[buf.len() - 4..].try_into().unwrap());
        let expected_crc = crc32fast::hash(&buf[4..buf.len() - 4]);
        assert_eq!(stored_crc, expected_crc);
    }

    #[test]
    fn invalid_utf8_stream_name_returns_corrupt() {
        let event = RecordedEvent {
            event_id: Uuid::new_v4(),
            stream_id: "ab".to_string(),
            event_number: 0,
            global_position: 0,
            recorded_at: 0,
            event_type: "E".to_string(),
            metadata: Bytes::new(),
            payload: Bytes::new(),
        };
        let mut buf = encode_event_record(&event, RecordFlags::STANDALONE);

        // Stream name bytes start after: prefix(4) + type(1) + flags(1) +
        // global_position(8) + recorded_at(8) + stream_id_len(2) = offset 24.
        let sid_offset = 4 + 1 + 1 + 8 + 8 + 2;
        buf[sid_offset] = 0xFF;
        buf[sid_offset + 1] = 0xFE;

        // Recompute the CRC32 so the checksum is valid but the UTF-8 is not.
        let crc_offset = buf.len() - 4;
        let new_crc = crc32fast::hash(&buf[4..crc_offset]);
        buf[crc_offset..].copy_from_slice(&new_crc.to_le_bytes());

        let result = decode_record(&buf);
        assert!(
            matches!(result, Err(Error::CorruptRecord { .. })),
            "expected CorruptRecord for invalid UTF-8, got: {result:?}"
        );
    }

    #[test]
    fn unknown_record_type_returns_corrupt() {
        let event = make_event(0, 0, "E", b"", b"");
        let mut buf = encode_event_record(&event, RecordFlags::STANDALONE);
        buf[4] = 0x7F; // unknown tag

        let crc_offset = buf.len() - 4;
        let new_crc = crc32fast::hash(&buf[4..crc_offset]);
        buf[crc_offset..].copy_from_slice(&new_crc.to_le_bytes());

        let result = decode_record(&buf);
        assert!(
            matches!(result, Err(Error::CorruptRecord { .. })),
            "expected CorruptRecord for unknown type, got: {result:?}"
        );
    }

    #[test]
    fn epoch_record_round_trip() {
        let epoch = EpochRecord {
            epoch_number: 3,
            epoch_id: Uuid::new_v4(),
            prev_epoch_position: 2048,
        };
        let buf = encode_epoch_record(&epoch);
        match decode_record(&buf).expect("decode") {
            DecodeOutcome::Complete {
                value: LogRecord::Epoch(decoded),
                consumed,
            } => {
                assert_eq!(decoded, epoch);
                assert_eq!(consumed, buf.len());
            }
            other => panic!("expected Complete(Epoch), got: {other:?}"),
        }
    }

    #[test]
    fn first_epoch_record_has_negative_prev_position() {
        let epoch = EpochRecord {
            epoch_number: 0,
            epoch_id: Uuid::new_v4(),
            prev_epoch_position: -1,
        };
        let buf = encode_epoch_record(&epoch);
        match decode_record(&buf).expect("decode") {
            DecodeOutcome::Complete {
                value: LogRecord::Epoch(decoded),
                ..
            } => assert_eq!(decoded.prev_epoch_position, -1),
            other => panic!("expected Complete(Epoch), got: {other:?}"),
        }
    }

    #[test]
    fn epoch_record_has_fixed_size() {
        let epoch = EpochRecord {
            epoch_number: 1,
            epoch_id: Uuid::new_v4(),
            prev_epoch_position: 0,
        };
        let buf = encode_epoch_record(&epoch);
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + EPOCH_BODY_SIZE + CRC_SIZE);
    }

    #[test]
    fn event_fixed_body_size_is_54() {
        assert_eq!(EVENT_FIXED_BODY_SIZE, 54);
    }
}
