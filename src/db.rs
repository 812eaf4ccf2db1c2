//! The chunked transaction-file database.
//!
//! `ChunkDb` owns a directory of chunk files plus the four checkpoints that
//! govern it (`writer.chk`, `chaser.chk`, `epoch.chk`, `truncate.chk`). Opening
//! a directory validates and recovers it into a consistent runtime state: a
//! roster of completed chunks plus at most one ongoing tail chunk, positioned
//! exactly where the writer checkpoint says the next append lands.
//!
//! The database deals in raw record bytes. Framing and stream semantics live
//! above it (see [`crate::codec`] and [`crate::store`]).

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::checkpoint::Checkpoint;
use crate::chunk::{CHUNK_HEADER_SIZE, Chunk};
use crate::error::{CorruptionKind, Error};
use crate::naming::{ChunkFileInfo, ChunkNamingStrategy};

/// Configuration for opening a [`ChunkDb`].
#[derive(Debug, Clone)]
pub struct ChunkDbConfig {
    /// Directory holding chunk files and checkpoints.
    pub dir: PathBuf,
    /// Body capacity of each chunk in bytes.
    pub chunk_size: u32,
    /// Filename strategy for chunk files.
    pub naming: ChunkNamingStrategy,
    /// Recompute and verify the content hash of every completed chunk at open.
    pub verify_hash: bool,
}

impl ChunkDbConfig {
    /// Configuration with the production naming strategy and hash verification
    /// disabled.
    pub fn new(dir: impl Into<PathBuf>, chunk_size: u32) -> ChunkDbConfig {
        ChunkDbConfig {
            dir: dir.into(),
            chunk_size,
            naming: ChunkNamingStrategy::default_prefix(),
            verify_hash: false,
        }
    }

    /// Replace the naming strategy.
    pub fn with_naming(mut self, naming: ChunkNamingStrategy) -> ChunkDbConfig {
        self.naming = naming;
        self
    }

    /// Enable or disable open-time hash verification of completed chunks.
    pub fn with_verify_hash(mut self, verify_hash: bool) -> ChunkDbConfig {
        self.verify_hash = verify_hash;
        self
    }
}

/// An open, validated chunk database.
///
/// The single writer owns this handle; readers see committed data through the
/// in-memory index the stream layer builds on top.
pub struct ChunkDb {
    config: ChunkDbConfig,
    writer_chk: Checkpoint,
    chaser_chk: Checkpoint,
    epoch_chk: Checkpoint,
    truncate_chk: Checkpoint,
    /// Next byte offset at which the log will append. Authoritative in memory;
    /// the writer checkpoint is flushed to it at commit boundaries and rolls.
    writer_pos: u64,
    /// Chunks ordered by start number. The tail (if ongoing) is last.
    chunks: Vec<Chunk>,
    /// Every chunk number covered by the roster, mapped to its index in
    /// `chunks`. Scavenged chunks map several numbers to one index.
    by_number: BTreeMap<u32, usize>,
}

impl ChunkDb {
    /// Open (creating if absent) and validate the database directory.
    ///
    /// Performs any pending truncation, verifies checkpoint sanity, sweeps
    /// transient files, collapses superseded chunk versions, validates every
    /// completed chunk, and establishes the ongoing tail (creating a fresh
    /// chunk when the writer checkpoint sits on a boundary with no tail file).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptDatabase`] when validation fails -- the
    /// instance must then be discarded -- or [`Error::Io`] on filesystem
    /// failures.
    pub fn open(config: ChunkDbConfig) -> Result<ChunkDb, Error> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk size must be positive".into()));
        }
        std::fs::create_dir_all(&config.dir)?;

        // Hot checkpoints are memory-mapped; the cold pair are plain files.
        let mut writer_chk = Checkpoint::open_mem_mapped(&config.dir.join("writer.chk"), 0)?;
        let mut chaser_chk = Checkpoint::open_mem_mapped(&config.dir.join("chaser.chk"), 0)?;
        let mut epoch_chk = Checkpoint::open_file(&config.dir.join("epoch.chk"), -1)?;
        let mut truncate_chk = Checkpoint::open_file(&config.dir.join("truncate.chk"), -1)?;

        if truncate_chk.read() >= 0 {
            run_truncation(
                &config,
                &mut writer_chk,
                &mut chaser_chk,
                &mut epoch_chk,
                &mut truncate_chk,
            )?;
        }

        let writer = writer_chk.read();
        if writer < 0 {
            return Err(Error::corrupt(
                CorruptionKind::BadChunkInDatabase,
                format!("writer checkpoint is negative: {writer}"),
            ));
        }
        if chaser_chk.read() > writer {
            return Err(Error::corrupt(
                CorruptionKind::ReaderCheckpointHigherThanWriter,
                format!(
                    "chaser checkpoint {} ahead of writer {writer}",
                    chaser_chk.read()
                ),
            ));
        }
        if epoch_chk.read() > writer {
            return Err(Error::corrupt(
                CorruptionKind::ReaderCheckpointHigherThanWriter,
                format!(
                    "epoch checkpoint {} ahead of writer {writer}",
                    epoch_chk.read()
                ),
            ));
        }

        let writer = writer as u64;
        let chunk_size = config.chunk_size as u64;
        let tail_number = (writer / chunk_size) as u32;
        let on_boundary = writer % chunk_size == 0;

        sweep_transient_files(&config)?;
        let live = collapse_versions(&config)?;

        // Extraneous live chunks beyond the writer frontier.
        for info in &live {
            if info.start > tail_number {
                return Err(Error::corrupt(
                    CorruptionKind::ExtraneousFileFound,
                    format!(
                        "chunk file {} is beyond the writer checkpoint {writer}",
                        info.path.display()
                    ),
                ));
            }
        }

        // Open every live chunk; the tail (when its file exists) opens as
        // ongoing unless it was already sealed on a boundary.
        let mut chunks: Vec<Chunk> = Vec::with_capacity(live.len() + 1);
        let mut by_number: BTreeMap<u32, usize> = BTreeMap::new();
        let mut tail_file_seen = false;

        for info in &live {
            let chunk = if info.start == tail_number {
                tail_file_seen = true;
                if on_boundary && Chunk::peek_completed(&info.path)? {
                    // A freshly created chunk sealed right at the boundary.
                    Chunk::open_completed(&info.path, config.chunk_size, config.verify_hash)?
                } else {
                    let data_size = (writer - tail_number as u64 * chunk_size) as u32;
                    Chunk::open_ongoing(&info.path, config.chunk_size, data_size)?
                }
            } else {
                Chunk::open_completed(&info.path, config.chunk_size, config.verify_hash)?
            };

            if chunk.start_number() != info.start {
                return Err(Error::corrupt(
                    CorruptionKind::BadChunkInDatabase,
                    format!(
                        "chunk file {} declares start number {}, filename says {}",
                        info.path.display(),
                        chunk.start_number(),
                        info.start
                    ),
                ));
            }

            let index = chunks.len();
            for number in chunk.start_number()..=chunk.end_number() {
                if by_number.insert(number, index).is_some() {
                    return Err(Error::corrupt(
                        CorruptionKind::BadChunkInDatabase,
                        format!("chunk number {number} is covered by two live files"),
                    ));
                }
            }
            chunks.push(chunk);
        }

        // Missing chunks below the frontier.
        let required_below = tail_number;
        for number in 0..required_below {
            if !by_number.contains_key(&number) {
                return Err(Error::corrupt(
                    CorruptionKind::ChunkNotFound,
                    format!("no chunk file covers chunk number {number}"),
                ));
            }
        }
        if !on_boundary && !by_number.contains_key(&tail_number) {
            return Err(Error::corrupt(
                CorruptionKind::ChunkNotFound,
                format!(
                    "writer checkpoint {writer} lies inside chunk {tail_number}, which is missing"
                ),
            ));
        }

        let mut db = ChunkDb {
            config,
            writer_chk,
            chaser_chk,
            epoch_chk,
            truncate_chk,
            writer_pos: writer,
            chunks,
            by_number,
        };

        // On a boundary with no tail file, reserve the fresh ongoing chunk.
        if on_boundary && !tail_file_seen && !db.by_number.contains_key(&tail_number) {
            db.create_chunk(tail_number)?;
        }

        // Crash window: writer flushed, chaser not. Records below the writer
        // are durable, so the chaser catches up here.
        if (db.chaser_chk.read() as u64) < db.writer_pos {
            db.chaser_chk.write(db.writer_pos as i64);
            db.chaser_chk.flush()?;
        }

        tracing::info!(
            dir = %db.config.dir.display(),
            chunks = db.chunks.len(),
            writer = db.writer_pos,
            "chunk database opened"
        );
        Ok(db)
    }

    /// Append one record's bytes to the log.
    ///
    /// Returns the record's global byte offset. When the ongoing tail cannot
    /// fit the record, the tail is sealed, a fresh chunk is published to the
    /// roster, and only then does the writer position move past the old
    /// chunk's capacity.
    ///
    /// Durability is deferred to [`commit`](ChunkDb::commit).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the record exceeds the chunk
    /// body capacity, or [`Error::Io`] on write failure.
    pub fn append(&mut self, record: &[u8]) -> Result<u64, Error> {
        if record.len() > self.config.chunk_size as usize {
            return Err(Error::InvalidArgument(format!(
                "record of {} bytes exceeds chunk size {}",
                record.len(),
                self.config.chunk_size
            )));
        }

        loop {
            let chunk_size = self.config.chunk_size as u64;
            let tail = self
                .chunks
                .last_mut()
                .expect("roster always holds at least one chunk");

            if tail.is_ongoing() {
                match tail.append(record) {
                    Ok(local_offset) => {
                        let global =
                            tail.start_number() as u64 * chunk_size + local_offset as u64;
                        self.writer_pos = global + record.len() as u64;
                        // An exactly full tail seals eagerly so the writer
                        // checkpoint never rests on a boundary behind an
                        // ongoing chunk.
                        if tail.available() == 0 {
                            self.roll()?;
                        }
                        return Ok(global);
                    }
                    Err(Error::ChunkFull { .. }) => {
                        self.roll()?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                // Tail was sealed (e.g. opened completed at a boundary).
                self.roll()?;
            }
        }
    }

    /// The global offset the next append of `record_len` bytes will land at.
    ///
    /// Returns the current writer position when the record fits in the ongoing
    /// tail, or the next chunk boundary when the tail must roll first. Records
    /// embed their own offset, so callers compute it here before encoding.
    pub fn next_append_offset(&self, record_len: usize) -> u64 {
        let tail = self
            .chunks
            .last()
            .expect("roster always holds at least one chunk");
        if tail.is_ongoing() && record_len <= tail.available() as usize {
            self.writer_pos
        } else {
            (tail.end_number() as u64 + 1) * self.config.chunk_size as u64
        }
    }

    /// Seal the current tail and publish a fresh ongoing chunk.
    fn roll(&mut self) -> Result<(), Error> {
        let next_number = {
            let tail = self
                .chunks
                .last_mut()
                .expect("roster always holds at least one chunk");
            if tail.is_ongoing() {
                tail.flush()?;
                tail.complete()?;
                tracing::info!(
                    chunk = tail.start_number(),
                    data_size = tail.footer().expect("just sealed").actual_data_size,
                    "chunk completed"
                );
            }
            tail.end_number() + 1
        };

        self.create_chunk(next_number)?;

        // The new chunk is on the roster; the writer may now pass the old
        // chunk's capacity.
        self.writer_pos = next_number as u64 * self.config.chunk_size as u64;
        self.writer_chk.write(self.writer_pos as i64);
        self.writer_chk.flush()?;
        Ok(())
    }

    /// Create and publish a fresh ongoing chunk with the given start number.
    fn create_chunk(&mut self, number: u32) -> Result<(), Error> {
        let filename = self.config.naming.filename_for(number, 0);
        let path = self.config.dir.join(filename);
        let chunk = Chunk::create(&path, number, number, self.config.chunk_size)?;
        tracing::info!(chunk = number, path = %path.display(), "chunk created");

        let index = self.chunks.len();
        self.by_number.insert(number, index);
        self.chunks.push(chunk);
        Ok(())
    }

    /// Explicitly seal the ongoing chunk with the given start number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no such ongoing chunk exists.
    pub fn complete_chunk(&mut self, chunk_start: u32) -> Result<(), Error> {
        let Some(&index) = self.by_number.get(&chunk_start) else {
            return Err(Error::InvalidArgument(format!(
                "no chunk with start number {chunk_start}"
            )));
        };
        let chunk = &mut self.chunks[index];
        if !chunk.is_ongoing() {
            return Err(Error::InvalidArgument(format!(
                "chunk {chunk_start} is already completed"
            )));
        }
        chunk.flush()?;
        chunk.complete()
    }

    /// Read `len` bytes starting at a global byte offset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no chunk covers the offset or the
    /// range escapes the chunk's logical data.
    pub fn read(&mut self, global_offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let chunk_size = self.config.chunk_size as u64;
        let number = (global_offset / chunk_size) as u32;
        let Some(&index) = self.by_number.get(&number) else {
            return Err(Error::InvalidArgument(format!(
                "no chunk covers global offset {global_offset}"
            )));
        };
        let chunk = &mut self.chunks[index];
        let local = global_offset - chunk.start_number() as u64 * chunk_size;
        chunk.read(local as u32, len)
    }

    /// Flush the tail chunk and both log checkpoints; the chaser advances to
    /// the writer once the data it covers is durable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if any flush fails.
    pub fn commit(&mut self) -> Result<(), Error> {
        if let Some(tail) = self.chunks.last_mut()
            && tail.is_ongoing()
        {
            tail.flush()?;
        }
        self.writer_chk.write(self.writer_pos as i64);
        self.writer_chk.flush()?;
        self.chaser_chk.write(self.writer_pos as i64);
        self.chaser_chk.flush()?;
        Ok(())
    }

    /// Record that an epoch marker now lives at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the offset is not below the
    /// writer position, or [`Error::Io`] if the flush fails.
    pub fn advance_epoch(&mut self, offset: u64) -> Result<(), Error> {
        if offset >= self.writer_pos {
            return Err(Error::InvalidArgument(format!(
                "epoch offset {offset} is not below the writer position {}",
                self.writer_pos
            )));
        }
        self.epoch_chk.write(offset as i64);
        self.epoch_chk.flush()?;
        Ok(())
    }

    /// Stage a truncation to take effect on the next open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the target is beyond the writer.
    pub fn request_truncation(&mut self, target: u64) -> Result<(), Error> {
        if target > self.writer_pos {
            return Err(Error::InvalidArgument(format!(
                "truncation target {target} is beyond the writer position {}",
                self.writer_pos
            )));
        }
        self.truncate_chk.write(target as i64);
        self.truncate_chk.flush()?;
        Ok(())
    }

    /// The chunk covering a global byte offset, if any.
    pub fn chunk_for_offset(&self, global_offset: u64) -> Option<&Chunk> {
        let number = (global_offset / self.config.chunk_size as u64) as u32;
        self.chunk_by_number(number)
    }

    /// The chunk covering the given chunk number, if any.
    pub fn chunk_by_number(&self, number: u32) -> Option<&Chunk> {
        self.by_number.get(&number).map(|&i| &self.chunks[i])
    }

    /// Start numbers of all chunks in the roster, in log order.
    pub fn chunk_starts(&self) -> Vec<u32> {
        self.chunks.iter().map(|c| c.start_number()).collect()
    }

    /// Read the full logical body of the chunk with the given start number,
    /// together with the global offset its first byte maps to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no such chunk exists.
    pub fn chunk_body(&mut self, chunk_start: u32) -> Result<(u64, Vec<u8>), Error> {
        let Some(&index) = self.by_number.get(&chunk_start) else {
            return Err(Error::InvalidArgument(format!(
                "no chunk with start number {chunk_start}"
            )));
        };
        let chunk = &mut self.chunks[index];
        let base = chunk.start_number() as u64 * self.config.chunk_size as u64;
        Ok((base, chunk.read_body()?))
    }

    /// Number of chunks in the roster.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Next byte offset at which the log will append.
    pub fn writer_position(&self) -> u64 {
        self.writer_pos
    }

    /// Highest offset known durable (flushed chaser checkpoint).
    pub fn chaser_position(&self) -> i64 {
        self.chaser_chk.read()
    }

    /// Offset of the most recent epoch marker, or -1.
    pub fn epoch_position(&self) -> i64 {
        self.epoch_chk.read()
    }

    /// Body capacity of each chunk.
    pub fn chunk_size(&self) -> u32 {
        self.config.chunk_size
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Flush everything and release the database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a final flush fails.
    pub fn close(mut self) -> Result<(), Error> {
        self.commit()?;
        self.epoch_chk.flush()?;
        self.truncate_chk.flush()?;
        Ok(())
    }
}

/// Delete files carrying a transient suffix (`.tmp`, `.scavenge.tmp`).
fn sweep_transient_files(config: &ChunkDbConfig) -> Result<(), Error> {
    for entry in std::fs::read_dir(&config.dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if config.naming.is_transient(name) {
            tracing::warn!(file = name, "deleting transient file left by a crash");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Keep the highest version of each chunk start; delete superseded versions.
///
/// Returns the surviving live files sorted by start number.
fn collapse_versions(config: &ChunkDbConfig) -> Result<Vec<ChunkFileInfo>, Error> {
    let all = config.naming.enumerate_all(&config.dir)?;
    let mut live: Vec<ChunkFileInfo> = Vec::new();
    for info in all {
        if live.last().map(|l| l.start) == Some(info.start) {
            tracing::info!(
                file = %info.path.display(),
                "deleting superseded chunk version"
            );
            std::fs::remove_file(&info.path)?;
        } else {
            live.push(info);
        }
    }
    Ok(live)
}

/// Carry out a pending truncation recorded in `truncate.chk`.
///
/// Chunks beyond the target are deleted; a target strictly inside a chunk
/// reshapes that chunk's file back to ongoing geometry. The writer and chaser
/// clamp to the target, the epoch resets if it points past it, and the
/// truncate checkpoint returns to -1.
fn run_truncation(
    config: &ChunkDbConfig,
    writer_chk: &mut Checkpoint,
    chaser_chk: &mut Checkpoint,
    epoch_chk: &mut Checkpoint,
    truncate_chk: &mut Checkpoint,
) -> Result<(), Error> {
    let target = truncate_chk.read();
    let writer = writer_chk.read();
    if target > writer {
        return Err(Error::InvalidArgument(format!(
            "truncation target {target} is beyond the writer checkpoint {writer}"
        )));
    }
    tracing::warn!(target, writer, "performing pending truncation");

    let target = target as u64;
    let chunk_size = config.chunk_size as u64;
    let boundary_number = (target / chunk_size) as u32;
    let inside_chunk = target % chunk_size != 0;

    for info in config.naming.enumerate_all(&config.dir)? {
        if info.start > boundary_number || (info.start == boundary_number && !inside_chunk) {
            tracing::warn!(file = %info.path.display(), "deleting truncated chunk file");
            std::fs::remove_file(&info.path)?;
        } else if info.start == boundary_number {
            // The surviving tail returns to ongoing geometry; bytes past the
            // target become dead body space.
            let file = OpenOptions::new().write(true).open(&info.path)?;
            file.set_len(CHUNK_HEADER_SIZE as u64 + chunk_size)?;
            file.sync_all()?;
        }
    }

    writer_chk.write(target as i64);
    writer_chk.flush()?;
    if chaser_chk.read() > target as i64 {
        chaser_chk.write(target as i64);
        chaser_chk.flush()?;
    }
    if epoch_chk.read() > target as i64 {
        epoch_chk.write(-1);
        epoch_chk.flush()?;
    }
    truncate_chk.write(-1);
    truncate_chk.flush()?;
    Ok(())
}
