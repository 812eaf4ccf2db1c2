//! Durable, monotonic 64-bit checkpoints.
//!
//! A checkpoint is a named i64 counter persisted as a fixed 8-byte little-endian
//! file (`writer.chk`, `chaser.chk`, `epoch.chk`, `truncate.chk`). Writes are
//! staged in memory; `flush()` makes the staged value durable and only then
//! updates the cached value that `read()` returns. This ordering means a reader
//! of the checkpoint never observes a value that is not yet on disk.
//!
//! Two on-disk variants exist: a plain-file checkpoint (seek + write + fsync)
//! and a memory-mapped checkpoint (`memmap2`, write through the map + flush).
//! An in-memory variant backs unit tests.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::Error;

/// Size of a checkpoint file in bytes: a single little-endian i64.
pub const CHECKPOINT_SIZE: usize = 8;

/// A durable i64 counter with staged writes and flushed reads.
///
/// The variants share one contract: `write` stages a value, `flush` persists it
/// and publishes it to `read`. Which backing store is used is chosen at open
/// time; callers hold the capability, not the concrete type.
#[derive(Debug)]
pub enum Checkpoint {
    /// Plain-file checkpoint: pwrite + fsync on flush.
    File(FileCheckpoint),
    /// Memory-mapped checkpoint: store through the map, `flush()` on flush.
    MemMapped(MemMappedCheckpoint),
    /// Volatile checkpoint for tests; flush is a no-op beyond publishing.
    InMemory(InMemoryCheckpoint),
}

impl Checkpoint {
    /// Open (or create) a plain-file checkpoint.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the checkpoint file.
    /// * `initial` - Value written if the file does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created, read, or written.
    pub fn open_file(path: &Path, initial: i64) -> Result<Checkpoint, Error> {
        Ok(Checkpoint::File(FileCheckpoint::open(path, initial)?))
    }

    /// Open (or create) a memory-mapped checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created or mapped.
    pub fn open_mem_mapped(path: &Path, initial: i64) -> Result<Checkpoint, Error> {
        Ok(Checkpoint::MemMapped(MemMappedCheckpoint::open(
            path, initial,
        )?))
    }

    /// Create a volatile in-memory checkpoint starting at `initial`.
    pub fn in_memory(initial: i64) -> Checkpoint {
        Checkpoint::InMemory(InMemoryCheckpoint {
            cached: initial,
            staged: initial,
        })
    }

    /// The last flushed value.
    pub fn read(&self) -> i64 {
        match self {
            Checkpoint::File(c) => c.cached,
            Checkpoint::MemMapped(c) => c.cached,
            Checkpoint::InMemory(c) => c.cached,
        }
    }

    /// Stage a new value. Not visible to `read()` until `flush()`.
    pub fn write(&mut self, value: i64) {
        match self {
            Checkpoint::File(c) => c.staged = value,
            Checkpoint::MemMapped(c) => c.staged = value,
            Checkpoint::InMemory(c) => c.staged = value,
        }
    }

    /// Persist the staged value and publish it to `read()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the write or sync fails. On error the cached
    /// value is left unchanged.
    pub fn flush(&mut self) -> Result<(), Error> {
        match self {
            Checkpoint::File(c) => c.flush(),
            Checkpoint::MemMapped(c) => c.flush(),
            Checkpoint::InMemory(c) => {
                c.cached = c.staged;
                Ok(())
            }
        }
    }

    /// Flush and release the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final flush fails.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush()
    }
}

/// Plain-file checkpoint backing.
#[derive(Debug)]
pub struct FileCheckpoint {
    file: File,
    cached: i64,
    staged: i64,
}

impl FileCheckpoint {
    /// Open (or create with `initial`) the checkpoint file at `path`.
    ///
    /// A new file is written and fsynced immediately, and the parent directory
    /// is fsynced so the entry survives a crash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on any filesystem failure, or
    /// [`Error::InvalidArgument`] if an existing file is not exactly 8 bytes.
    pub fn open(path: &Path, initial: i64) -> Result<FileCheckpoint, Error> {
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let value = if exists {
            let mut buf = [0u8; CHECKPOINT_SIZE];
            let len = file.metadata()?.len();
            if len != CHECKPOINT_SIZE as u64 {
                return Err(Error::InvalidArgument(format!(
                    "checkpoint file {} has length {len}, expected {CHECKPOINT_SIZE}",
                    path.display()
                )));
            }
            file.read_exact(&mut buf)?;
            i64::from_le_bytes(buf)
        } else {
            file.write_all(&initial.to_le_bytes())?;
            file.sync_all()?;
            sync_parent_dir(path)?;
            initial
        };

        Ok(FileCheckpoint {
            file,
            cached: value,
            staged: value,
        })
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.staged.to_le_bytes())?;
        self.file.sync_all()?;
        self.cached = self.staged;
        Ok(())
    }
}

/// Memory-mapped checkpoint backing.
#[derive(Debug)]
pub struct MemMappedCheckpoint {
    // The File must outlive the map; keep both.
    _file: File,
    mmap: MmapMut,
    cached: i64,
    staged: i64,
}

impl MemMappedCheckpoint {
    /// Open (or create with `initial`) a memory-mapped checkpoint at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem or mapping failure, or
    /// [`Error::InvalidArgument`] if an existing file is not exactly 8 bytes.
    pub fn open(path: &Path, initial: i64) -> Result<MemMappedCheckpoint, Error> {
        let exists = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if exists {
            let len = file.metadata()?.len();
            if len != CHECKPOINT_SIZE as u64 {
                return Err(Error::InvalidArgument(format!(
                    "checkpoint file {} has length {len}, expected {CHECKPOINT_SIZE}",
                    path.display()
                )));
            }
        } else {
            file.set_len(CHECKPOINT_SIZE as u64)?;
        }

        // SAFETY: the file is held open for the lifetime of the map and no other
        // mapping of this region exists in-process; the single writer task owns
        // all mutation.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let value = if exists {
            let bytes: [u8; CHECKPOINT_SIZE] = mmap[..CHECKPOINT_SIZE]
                .try_into()
                .expect("map is at least 8 bytes");
            i64::from_le_bytes(bytes)
        } else {
            mmap[..CHECKPOINT_SIZE].copy_from_slice(&initial.to_le_bytes());
            mmap.flush()?;
            sync_parent_dir(path)?;
            initial
        };

        Ok(MemMappedCheckpoint {
            _file: file,
            mmap,
            cached: value,
            staged: value,
        })
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.mmap[..CHECKPOINT_SIZE].copy_from_slice(&self.staged.to_le_bytes());
        self.mmap.flush()?;
        self.cached = self.staged;
        Ok(())
    }
}

/// Volatile checkpoint used by unit tests.
#[derive(Debug)]
pub struct InMemoryCheckpoint {
    cached: i64,
    staged: i64,
}

/// Fsync the parent directory of `path` so a newly created entry is durable.
fn sync_parent_dir(path: &Path) -> Result<(), Error> {
    let parent = path
        .parent()
        .expect("checkpoint path must have a parent directory");
    let dir_handle = File::open(parent)?;
    dir_handle.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn new_file_checkpoint_reads_initial_value() {
        let (_dir, path) = temp_path("writer.chk");
        let chk = Checkpoint::open_file(&path, 0).expect("open should succeed");
        assert_eq!(chk.read(), 0);
    }

    #[test]
    fn new_checkpoint_with_negative_initial_value() {
        let (_dir, path) = temp_path("epoch.chk");
        let chk = Checkpoint::open_file(&path, -1).expect("open should succeed");
        assert_eq!(chk.read(), -1);
    }

    #[test]
    fn unflushed_write_is_not_visible_to_read() {
        let (_dir, path) = temp_path("writer.chk");
        let mut chk = Checkpoint::open_file(&path, 0).expect("open should succeed");
        chk.write(500);
        assert_eq!(chk.read(), 0, "staged value must not be visible pre-flush");
        chk.flush().expect("flush should succeed");
        assert_eq!(chk.read(), 500);
    }

    #[test]
    fn flushed_value_survives_reopen() {
        let (_dir, path) = temp_path("writer.chk");
        {
            let mut chk = Checkpoint::open_file(&path, 0).expect("open should succeed");
            chk.write(10_000);
            chk.flush().expect("flush should succeed");
            chk.close().expect("close should succeed");
        }
        let chk = Checkpoint::open_file(&path, 0).expect("reopen should succeed");
        assert_eq!(chk.read(), 10_000);
    }

    #[test]
    fn close_flushes_staged_value() {
        let (_dir, path) = temp_path("chaser.chk");
        {
            let mut chk = Checkpoint::open_file(&path, 0).expect("open should succeed");
            chk.write(77);
            chk.close().expect("close should succeed");
        }
        let chk = Checkpoint::open_file(&path, 0).expect("reopen should succeed");
        assert_eq!(chk.read(), 77);
    }

    #[test]
    fn on_disk_format_is_8_byte_le() {
        let (_dir, path) = temp_path("writer.chk");
        let mut chk = Checkpoint::open_file(&path, 0).expect("open should succeed");
        chk.write(0x0102_0304_0506_0708);
        chk.flush().expect("flush should succeed");

        let raw = std::fs::read(&path).expect("read file");
        assert_eq!(raw.len(), CHECKPOINT_SIZE);
        assert_eq!(raw, 0x0102_0304_0506_0708i64.to_le_bytes());
    }

    #[test]
    fn existing_file_with_wrong_length_is_rejected() {
        let (_dir, path) = temp_path("writer.chk");
        std::fs::write(&path, b"too short").expect("seed file");
        let result = Checkpoint::open_file(&path, 0);
        assert!(
            matches!(result, Err(Error::InvalidArgument(_))),
            "expected InvalidArgument, got: {result:?}",
        );
    }

    #[test]
    fn mem_mapped_round_trip_and_reopen() {
        let (_dir, path) = temp_path("writer.chk");
        {
            let mut chk = Checkpoint::open_mem_mapped(&path, 0).expect("open should succeed");
            chk.write(123_456);
            assert_eq!(chk.read(), 0);
            chk.flush().expect("flush should succeed");
            assert_eq!(chk.read(), 123_456);
        }
        // A plain-file open must see the mmap-flushed value: same format.
        let chk = Checkpoint::open_file(&path, 0).expect("reopen should succeed");
        assert_eq!(chk.read(), 123_456);
    }

    #[test]
    fn mem_mapped_preserves_existing_value() {
        let (_dir, path) = temp_path("truncate.chk");
        {
            let mut chk = Checkpoint::open_file(&path, -1).expect("open should succeed");
            chk.write(42);
            chk.close().expect("close should succeed");
        }
        let chk = Checkpoint::open_mem_mapped(&path, -1).expect("mmap open should succeed");
        assert_eq!(chk.read(), 42);
    }

    #[test]
    fn in_memory_checkpoint_publishes_on_flush() {
        let mut chk = Checkpoint::in_memory(-1);
        assert_eq!(chk.read(), -1);
        chk.write(9);
        assert_eq!(chk.read(), -1);
        chk.flush().expect("in-memory flush is infallible");
        assert_eq!(chk.read(), 9);
    }
}
