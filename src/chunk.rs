//! A single chunk file of the transaction log.
//!
//! On disk a chunk is `[header | body | footer]`. The header and footer are each
//! 128 bytes; the body holds raw record bytes. An *ongoing* chunk (the unique
//! tail of the log) has its body fully pre-allocated and carries no footer; a
//! *completed* chunk is truncated to its actual data size and sealed with a
//! footer containing a CRC32 over header + body. All integers are little-endian.
//!
//! Completed chunk file length is exactly `128 + actual_data_size + 128`.
//! Ongoing chunk file length is `128 + chunk_size`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{CorruptionKind, Error};

/// Size of the fixed chunk header region in bytes.
pub const CHUNK_HEADER_SIZE: usize = 128;

/// Size of the fixed chunk footer region in bytes.
pub const CHUNK_FOOTER_SIZE: usize = 128;

/// Current chunk file format version.
const CHUNK_FORMAT_VERSION: u8 = 1;

/// Fixed header at byte 0 of every chunk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// On-disk format version.
    pub format_version: u8,
    /// Declared body capacity in bytes.
    pub chunk_size: u32,
    /// First chunk number this file covers.
    pub chunk_start_number: u32,
    /// Last chunk number this file covers (`>= chunk_start_number`; greater
    /// than start only for scavenged, merged chunks).
    pub chunk_end_number: u32,
    /// Whether this file is the product of a scavenge.
    pub is_scavenged: bool,
    /// Random identity of this physical file.
    pub chunk_id: Uuid,
}

impl ChunkHeader {
    /// Serialize the header into its fixed 128-byte representation.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        buf[0] = self.format_version;
        buf[1..5].copy_from_slice(&(self.chunk_size as i32).to_le_bytes());
        buf[5..9].copy_from_slice(&(self.chunk_start_number as i32).to_le_bytes());
        buf[9..13].copy_from_slice(&(self.chunk_end_number as i32).to_le_bytes());
        buf[13] = self.is_scavenged as u8;
        buf[14..30].copy_from_slice(self.chunk_id.as_bytes());
        buf
    }

    /// Parse a header from the first 128 bytes of a chunk file.
    ///
    /// # Errors
    ///
    /// Returns `CorruptDatabase(BadChunkInDatabase)` if the buffer is too
    /// short, the format version is unknown, a size field is negative, or
    /// `chunk_end_number < chunk_start_number`.
    pub fn decode(buf: &[u8]) -> Result<ChunkHeader, Error> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("file too short for chunk header: {} bytes", buf.len()),
            ));
        }
        let format_version = buf[0];
        if format_version != CHUNK_FORMAT_VERSION {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("unsupported chunk format version: {format_version}"),
            ));
        }
        let chunk_size = i32::from_le_bytes(buf[1..5].try_into().expect("4 bytes"));
        let start = i32::from_le_bytes(buf[5..9].try_into().expect("4 bytes"));
        let end = i32::from_le_bytes(buf[9..13].try_into().expect("4 bytes"));
        if chunk_size <= 0 || start < 0 || end < 0 {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("negative size or chunk number in header: size={chunk_size} start={start} end={end}"),
            ));
        }
        if end < start {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("chunk end number {end} below start number {start}"),
            ));
        }
        let chunk_id = Uuid::from_bytes(buf[14..30].try_into().expect("16 bytes"));
        Ok(ChunkHeader {
            format_version,
            chunk_size: chunk_size as u32,
            chunk_start_number: start as u32,
            chunk_end_number: end as u32,
            is_scavenged: buf[13] != 0,
            chunk_id,
        })
    }
}

/// Fixed footer occupying the last 128 bytes of a completed chunk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFooter {
    /// Whether the chunk was sealed. Always true for a parsed footer of a
    /// completed chunk; the flag exists so an ongoing tail is distinguishable.
    pub is_completed: bool,
    /// Whether a position map follows the body (scavenged chunks).
    pub is_map_present: bool,
    /// Logical bytes of record data in the body.
    pub actual_data_size: u32,
    /// Physical bytes of the body region on disk.
    pub physical_data_size: u32,
    /// Size of the position map in bytes (zero when no map is present).
    pub map_size: u32,
    /// CRC32 over header bytes + body bytes.
    pub checksum: u32,
}

impl ChunkFooter {
    /// Serialize the footer into its fixed 128-byte representation.
    pub fn encode(&self) -> [u8; CHUNK_FOOTER_SIZE] {
        let mut buf = [0u8; CHUNK_FOOTER_SIZE];
        buf[0] = self.is_completed as u8;
        buf[1] = self.is_map_present as u8;
        buf[2..6].copy_from_slice(&(self.actual_data_size as i32).to_le_bytes());
        buf[6..10].copy_from_slice(&(self.physical_data_size as i32).to_le_bytes());
        buf[10..14].copy_from_slice(&(self.map_size as i32).to_le_bytes());
        buf[14..18].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse a footer from the last 128 bytes of a chunk file.
    ///
    /// # Errors
    ///
    /// Returns `CorruptDatabase(BadChunkInDatabase)` if the buffer is too
    /// short or a size field is negative.
    pub fn decode(buf: &[u8]) -> Result<ChunkFooter, Error> {
        if buf.len() < CHUNK_FOOTER_SIZE {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("file too short for chunk footer: {} bytes", buf.len()),
            ));
        }
        let actual = i32::from_le_bytes(buf[2..6].try_into().expect("4 bytes"));
        let physical = i32::from_le_bytes(buf[6..10].try_into().expect("4 bytes"));
        let map_size = i32::from_le_bytes(buf[10..14].try_into().expect("4 bytes"));
        if actual < 0 || physical < 0 || map_size < 0 {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "negative size in footer: actual={actual} physical={physical} map={map_size}"
                ),
            ));
        }
        Ok(ChunkFooter {
            is_completed: buf[0] != 0,
            is_map_present: buf[1] != 0,
            actual_data_size: actual as u32,
            physical_data_size: physical as u32,
            map_size: map_size as u32,
            checksum: u32::from_le_bytes(buf[14..18].try_into().expect("4 bytes")),
        })
    }
}

/// One open chunk file: either the ongoing tail or a sealed, immutable segment.
#[derive(Debug)]
pub struct Chunk {
    file: File,
    path: PathBuf,
    header: ChunkHeader,
    /// Present once the chunk has been sealed.
    footer: Option<ChunkFooter>,
    /// Logical fill level of the body. For a completed chunk this equals the
    /// footer's `actual_data_size`; for an ongoing chunk it is supplied from
    /// the writer checkpoint and advanced by `append`.
    data_size: u32,
}

impl Chunk {
    /// Allocate a fresh ongoing chunk covering `[start, end]` for appending.
    ///
    /// Writes the header, pre-allocates the full body region, fsyncs the file
    /// and the parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on any filesystem failure.
    pub fn create(path: &Path, start: u32, end: u32, chunk_size: u32) -> Result<Chunk, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let header = ChunkHeader {
            format_version: CHUNK_FORMAT_VERSION,
            chunk_size,
            chunk_start_number: start,
            chunk_end_number: end,
            is_scavenged: false,
            chunk_id: Uuid::new_v4(),
        };
        file.write_all(&header.encode())?;
        file.set_len(CHUNK_HEADER_SIZE as u64 + chunk_size as u64)?;
        file.sync_all()?;

        let parent = path.parent().expect("chunk path must have a parent directory");
        File::open(parent)?.sync_all()?;

        Ok(Chunk {
            file,
            path: path.to_path_buf(),
            header,
            footer: None,
            data_size: 0,
        })
    }

    /// Open a sealed chunk, validating its geometry and optionally its hash.
    ///
    /// # Arguments
    ///
    /// * `path` - Chunk file location.
    /// * `expected_chunk_size` - The database-wide body capacity.
    /// * `verify_hash` - Recompute the CRC32 over header + body and compare
    ///   against the footer.
    ///
    /// # Errors
    ///
    /// Returns `CorruptDatabase(BadChunkInDatabase)` if the footer is not
    /// sealed, declared sizes disagree with the file length or capacity, the
    /// header's chunk size disagrees with `expected_chunk_size`, or the hash
    /// mismatches. Returns [`Error::Io`] for filesystem failures.
    pub fn open_completed(
        path: &Path,
        expected_chunk_size: u32,
        verify_hash: bool,
    ) -> Result<Chunk, Error> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();

        if file_len < (CHUNK_HEADER_SIZE + CHUNK_FOOTER_SIZE) as u64 {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "chunk file {} too short for header and footer: {file_len} bytes",
                    path.display()
                ),
            ));
        }

        let mut header_buf = [0u8; CHUNK_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = ChunkHeader::decode(&header_buf)?;

        if header.chunk_size != expected_chunk_size {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "chunk {} declares chunk size {}, database uses {}",
                    path.display(),
                    header.chunk_size,
                    expected_chunk_size
                ),
            ));
        }

        let mut footer_buf = [0u8; CHUNK_FOOTER_SIZE];
        file.seek(SeekFrom::End(-(CHUNK_FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer_buf)?;
        let footer = ChunkFooter::decode(&footer_buf)?;

        if !footer.is_completed {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("chunk {} has an unsealed footer", path.display()),
            ));
        }
        if footer.actual_data_size > header.chunk_size {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "chunk {} actual data size {} exceeds capacity {}",
                    path.display(),
                    footer.actual_data_size,
                    header.chunk_size
                ),
            ));
        }
        let expected_len = (CHUNK_HEADER_SIZE + CHUNK_FOOTER_SIZE) as u64
            + footer.actual_data_size as u64
            + footer.map_size as u64;
        if file_len != expected_len {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "chunk {} file length {file_len} does not match declared sizes \
                     (expected {expected_len})",
                    path.display()
                ),
            ));
        }

        if verify_hash {
            let mut body = vec![0u8; footer.actual_data_size as usize];
            file.seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64))?;
            file.read_exact(&mut body)?;

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&header_buf);
            hasher.update(&body);
            let computed = hasher.finalize();
            if computed != footer.checksum {
                return Err(Error::corrupt(
                    CorruptionKind::BadChunkInDatabase,
                    format!(
                        "chunk {} checksum mismatch: stored {:#010X}, computed {computed:#010X}",
                        path.display(),
                        footer.checksum
                    ),
                ));
            }
        }

        let data_size = footer.actual_data_size;
        Ok(Chunk {
            file,
            path: path.to_path_buf(),
            header,
            footer: Some(footer),
            data_size,
        })
    }

    /// Open the tail chunk as ongoing.
    ///
    /// Parses the header only. Body-size validation is deliberately disabled:
    /// a crash may leave the tail under-allocated, in which case the body is
    /// re-extended to its full capacity. The logical fill level comes from the
    /// writer checkpoint, not the file.
    ///
    /// # Arguments
    ///
    /// * `data_size` - Logical bytes already appended, derived from the writer
    ///   checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `CorruptDatabase(BadChunkInDatabase)` if the header is invalid
    /// or its chunk size disagrees with `expected_chunk_size`.
    pub fn open_ongoing(
        path: &Path,
        expected_chunk_size: u32,
        data_size: u32,
    ) -> Result<Chunk, Error> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let file_len = file.metadata()?.len();
        if file_len < CHUNK_HEADER_SIZE as u64 {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "chunk file {} too short for header: {file_len} bytes",
                    path.display()
                ),
            ));
        }

        let mut header_buf = [0u8; CHUNK_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = ChunkHeader::decode(&header_buf)?;

        if header.chunk_size != expected_chunk_size {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!(
                    "chunk {} declares chunk size {}, database uses {}",
                    path.display(),
                    header.chunk_size,
                    expected_chunk_size
                ),
            ));
        }

        // Re-extend a crash-truncated tail to full ongoing geometry.
        let full_len = CHUNK_HEADER_SIZE as u64 + header.chunk_size as u64;
        if file_len < full_len {
            file.set_len(full_len)?;
        }

        Ok(Chunk {
            file,
            path: path.to_path_buf(),
            header,
            footer: None,
            data_size,
        })
    }

    /// Decide whether the file at `path` is a sealed chunk without opening it
    /// for use.
    ///
    /// A file counts as completed when its trailing footer parses with the
    /// sealed flag set and its declared sizes reproduce the file length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn peek_completed(path: &Path) -> Result<bool, Error> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < (CHUNK_HEADER_SIZE + CHUNK_FOOTER_SIZE) as u64 {
            return Ok(false);
        }
        let mut footer_buf = [0u8; CHUNK_FOOTER_SIZE];
        file.seek(SeekFrom::End(-(CHUNK_FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer_buf)?;
        let Ok(footer) = ChunkFooter::decode(&footer_buf) else {
            return Ok(false);
        };
        let expected_len = (CHUNK_HEADER_SIZE + CHUNK_FOOTER_SIZE) as u64
            + footer.actual_data_size as u64
            + footer.map_size as u64;
        Ok(footer.is_completed && file_len == expected_len)
    }

    /// The parsed header.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// The parsed footer, present once sealed.
    pub fn footer(&self) -> Option<&ChunkFooter> {
        self.footer.as_ref()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First chunk number covered by this file.
    pub fn start_number(&self) -> u32 {
        self.header.chunk_start_number
    }

    /// Last chunk number covered by this file.
    pub fn end_number(&self) -> u32 {
        self.header.chunk_end_number
    }

    /// Whether this file covers the given chunk number.
    pub fn covers(&self, chunk_number: u32) -> bool {
        self.header.chunk_start_number <= chunk_number
            && chunk_number <= self.header.chunk_end_number
    }

    /// Logical bytes of record data in the body.
    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    /// Remaining body capacity in bytes. Zero for a completed chunk.
    pub fn available(&self) -> u32 {
        if self.footer.is_some() {
            0
        } else {
            self.header.chunk_size - self.data_size
        }
    }

    /// Whether the chunk is still open for appends.
    pub fn is_ongoing(&self) -> bool {
        self.footer.is_none()
    }

    /// Append `bytes` to the body and return the local offset they start at.
    ///
    /// The write is buffered by the OS; call [`flush`](Chunk::flush) at a
    /// commit boundary for durability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChunkFull`] if the body would exceed capacity and
    /// [`Error::InvalidOperation`] if the chunk is already sealed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u32, Error> {
        if self.footer.is_some() {
            return Err(Error::InvalidOperation(format!(
                "append to completed chunk {}",
                self.path.display()
            )));
        }
        let available = self.header.chunk_size - self.data_size;
        if bytes.len() > available as usize {
            return Err(Error::ChunkFull {
                chunk_start: self.header.chunk_start_number,
                requested: bytes.len(),
                available: available as usize,
            });
        }
        let local_offset = self.data_size;
        self.file
            .seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64 + local_offset as u64))?;
        self.file.write_all(bytes)?;
        self.data_size += bytes.len() as u32;
        Ok(local_offset)
    }

    /// Read `len` bytes of body starting at `local_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the range exceeds the logical
    /// data size, or [`Error::Io`] on read failure.
    pub fn read(&mut self, local_offset: u32, len: usize) -> Result<Vec<u8>, Error> {
        if local_offset as u64 + len as u64 > self.data_size as u64 {
            return Err(Error::InvalidArgument(format!(
                "read of {len} bytes at local offset {local_offset} exceeds data size {}",
                self.data_size
            )));
        }
        let mut buf = vec![0u8; len];
        self.file
            .seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64 + local_offset as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read the entire logical body (`0..data_size`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on read failure.
    pub fn read_body(&mut self) -> Result<Vec<u8>, Error> {
        self.read(0, self.data_size as usize)
    }

    /// Fsync buffered appends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the sync fails.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Seal the chunk: truncate to the actual data size, write the footer with
    /// the computed content hash, and fsync. Transitions ongoing -> completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if already sealed, or [`Error::Io`]
    /// on filesystem failure.
    pub fn complete(&mut self) -> Result<(), Error> {
        if self.footer.is_some() {
            return Err(Error::InvalidOperation(format!(
                "chunk {} is already completed",
                self.path.display()
            )));
        }

        let body = self.read_body()?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.header.encode());
        hasher.update(&body);
        let checksum = hasher.finalize();

        let footer = ChunkFooter {
            is_completed: true,
            is_map_present: false,
            actual_data_size: self.data_size,
            physical_data_size: self.data_size,
            map_size: 0,
            checksum,
        };

        let body_end = CHUNK_HEADER_SIZE as u64 + self.data_size as u64;
        self.file.set_len(body_end)?;
        self.file.seek(SeekFrom::Start(body_end))?;
        self.file.write_all(&footer.encode())?;
        self.file.sync_all()?;

        self.footer = Some(footer);
        Ok(())
    }
}
