//! Chunk file naming strategy.
//!
//! Maps `(chunk start number, version)` pairs to filenames of the form
//! `{prefix}{start:06}.{version:06}` (e.g. `chunk-000000.000005`) and back.
//! For each start number the highest version on disk is the live file; lower
//! versions are superseded leftovers from scavenging and are deleted during
//! database validation. Files whose names do not match the pattern are not
//! chunks and are never touched; files carrying a transient suffix (`.tmp`,
//! `.scavenge.tmp`) are in-progress artifacts deleted on recovery.

use std::path::{Path, PathBuf};

use crate::error::Error;

/// Width of the zero-padded start and version fields.
const FIELD_WIDTH: usize = 6;

/// Suffixes marking in-progress files that recovery deletes.
const TRANSIENT_SUFFIXES: [&str; 2] = [".scavenge.tmp", ".tmp"];

/// A parsed chunk file: its start number, version, and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFileInfo {
    /// Chunk start number encoded in the filename.
    pub start: u32,
    /// Version encoded in the filename.
    pub version: u32,
    /// Full path of the file.
    pub path: PathBuf,
}

/// Filename strategy for one chunk database directory.
///
/// The production prefix is `"chunk-"`; tests may use any prefix.
#[derive(Debug, Clone)]
pub struct ChunkNamingStrategy {
    prefix: String,
}

impl ChunkNamingStrategy {
    /// Create a strategy with the given filename prefix.
    pub fn new(prefix: impl Into<String>) -> ChunkNamingStrategy {
        ChunkNamingStrategy {
            prefix: prefix.into(),
        }
    }

    /// The default production strategy (`"chunk-"` prefix).
    pub fn default_prefix() -> ChunkNamingStrategy {
        ChunkNamingStrategy::new("chunk-")
    }

    /// The filename (without directory) for `(start, version)`.
    pub fn filename_for(&self, start: u32, version: u32) -> String {
        format!(
            "{}{start:0w$}.{version:0w$}",
            self.prefix,
            w = FIELD_WIDTH
        )
    }

    /// Parse a filename into `(start, version)`.
    ///
    /// # Returns
    ///
    /// `None` if the name does not match `{prefix}{6 digits}.{6 digits}` exactly.
    pub fn parse(&self, file_name: &str) -> Option<(u32, u32)> {
        let rest = file_name.strip_prefix(&self.prefix)?;
        let (start_part, version_part) = rest.split_once('.')?;
        if start_part.len() != FIELD_WIDTH || version_part.len() != FIELD_WIDTH {
            return None;
        }
        if !start_part.bytes().all(|b| b.is_ascii_digit())
            || !version_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let start = start_part.parse().ok()?;
        let version = version_part.parse().ok()?;
        Some((start, version))
    }

    /// Whether `file_name` carries a transient suffix (`.tmp`, `.scavenge.tmp`).
    pub fn is_transient(&self, file_name: &str) -> bool {
        TRANSIENT_SUFFIXES.iter().any(|s| file_name.ends_with(s))
    }

    /// Enumerate all chunk files in `dir`, sorted by (start asc, version desc).
    ///
    /// Non-matching filenames are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be read.
    pub fn enumerate_all(&self, dir: &Path) -> Result<Vec<ChunkFileInfo>, Error> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((start, version)) = self.parse(name) {
                found.push(ChunkFileInfo {
                    start,
                    version,
                    path: entry.path(),
                });
            }
        }
        found.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(found)
    }

    /// All versions of the chunk with the given start, highest version first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be read.
    pub fn all_versions_of(&self, dir: &Path, start: u32) -> Result<Vec<ChunkFileInfo>, Error> {
        Ok(self
            .enumerate_all(dir)?
            .into_iter()
            .filter(|info| info.start == start)
            .collect())
    }

    /// For each start number present in `dir`, the highest-versioned file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be read.
    pub fn latest_for_each_start(&self, dir: &Path) -> Result<Vec<ChunkFileInfo>, Error> {
        let all = self.enumerate_all(dir)?;
        let mut latest: Vec<ChunkFileInfo> = Vec::new();
        for info in all {
            // enumerate_all sorts version-descending within a start, so the
            // first entry seen per start is the live one.
            if latest.last().map(|l| l.start) != Some(info.start) {
                latest.push(info);
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> ChunkNamingStrategy {
        ChunkNamingStrategy::default_prefix()
    }

    #[test]
    fn filename_for_zero_pads_both_fields() {
        assert_eq!(strategy().filename_for(0, 0), "chunk-000000.000000");
        assert_eq!(strategy().filename_for(3, 17), "chunk-000003.000017");
        assert_eq!(strategy().filename_for(123_456, 2), "chunk-123456.000002");
    }

    #[test]
    fn parse_round_trips_filename_for() {
        let s = strategy();
        for (start, version) in [(0, 0), (1, 2), (42, 0), (999_999, 999_999)] {
            let name = s.filename_for(start, version);
            assert_eq!(s.parse(&name), Some((start, version)), "name: {name}");
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        let s = strategy();
        assert_eq!(s.parse("foo"), None);
        assert_eq!(s.parse("bla"), None);
        assert_eq!(s.parse("chunk-000001"), None);
        assert_eq!(s.parse("chunk-1.000000"), None);
        assert_eq!(s.parse("chunk-000001.00000x"), None);
        assert_eq!(s.parse("chunk-000001.000000.tmp"), None);
        assert_eq!(s.parse("writer.chk"), None);
    }

    #[test]
    fn parse_respects_custom_prefix() {
        let s = ChunkNamingStrategy::new("prefix.tf-");
        assert_eq!(s.filename_for(0, 0), "prefix.tf-000000.000000");
        assert_eq!(s.parse("prefix.tf-000000.000000"), Some((0, 0)));
        assert_eq!(s.parse("chunk-000000.000000"), None);
    }

    #[test]
    fn transient_suffixes_are_recognized() {
        let s = strategy();
        assert!(s.is_transient("bla.tmp"));
        assert!(s.is_transient("bla.scavenge.tmp"));
        assert!(s.is_transient("chunk-000000.000001.tmp"));
        assert!(!s.is_transient("bla"));
        assert!(!s.is_transient("chunk-000000.000001"));
    }

    #[test]
    fn enumerate_all_sorts_start_asc_version_desc() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let s = strategy();
        for name in [
            "chunk-000001.000000",
            "chunk-000000.000002",
            "chunk-000000.000000",
            "chunk-000001.000001",
            "foo",
            "writer.chk",
        ] {
            std::fs::write(dir.path().join(name), b"x").expect("seed file");
        }

        let all = s.enumerate_all(dir.path()).expect("enumerate should succeed");
        let key: Vec<(u32, u32)> = all.iter().map(|i| (i.start, i.version)).collect();
        assert_eq!(key, vec![(0, 2), (0, 0), (1, 1), (1, 0)]);
    }

    #[test]
    fn latest_for_each_start_picks_highest_version() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let s = strategy();
        for name in [
            "chunk-000000.000000",
            "chunk-000000.000005",
            "chunk-000000.000002",
            "chunk-000001.000001",
            "chunk-000002.000000",
        ] {
            std::fs::write(dir.path().join(name), b"x").expect("seed file");
        }

        let latest = s
            .latest_for_each_start(dir.path())
            .expect("latest should succeed");
        let key: Vec<(u32, u32)> = latest.iter().map(|i| (i.start, i.version)).collect();
        assert_eq!(key, vec![(0, 5), (1, 1), (2, 0)]);
    }

    #[test]
    fn all_versions_of_filters_by_start() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let s = strategy();
        for name in [
            "chunk-000000.000000",
            "chunk-000000.000001",
            "chunk-000001.000000",
        ] {
            std::fs::write(dir.path().join(name), b"x").expect("seed file");
        }

        let versions = s
            .all_versions_of(dir.path(), 0)
            .expect("all_versions_of should succeed");
        let key: Vec<(u32, u32)> = versions.iter().map(|i| (i.start, i.version)).collect();
        assert_eq!(key, vec![(0, 1), (0, 0)]);
    }
}
