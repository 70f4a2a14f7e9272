//! Disk-backed row cache for HearthDB
//!
//! One cache backs all disk-resident tables of a database. It hands out
//! file positions from a free list (first-fit) or the end of the file,
//! holds recently written rows in memory, writes them back lazily, and
//! can rebuild the backing file contiguously (defrag).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::row::Row;
use crate::error::{Error, Result};

/// Offset of the persisted free-position pointer within the file header.
pub const FREE_POS_POS: u64 = 16;

/// First byte available for row storage; the header occupies the space
/// below it.
pub const INITIAL_FREE_POS: i64 = 32;

/// The free list is discarded and restarted once this many blocks have
/// accumulated.
pub const MAX_FREE_COUNT: usize = 1024;

/// Leftover extents smaller than this are dropped rather than kept as
/// free blocks.
pub const MIN_FREE_BLOCK: usize = 32;

/// A reusable extent inside the backing file. Blocks never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub pos: i64,
    pub length: usize,
}

/// Properties sidecar carried next to the backing file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreProperties {
    /// Bumped whenever defrag rewrites the file.
    cache_version: u32,
}

/// The row cache over one backing data file.
#[derive(Debug)]
pub struct RowCache {
    path: PathBuf,
    file: Option<File>,
    readonly: bool,
    /// Free extents, newest first; scanned in order for a first fit.
    free: Vec<FreeBlock>,
    free_count: usize,
    /// High-water mark: next position past all allocated extents.
    free_pos: i64,
    /// Rows cached in memory, keyed by file position.
    rows: HashMap<i64, Row>,
    cache_version: u32,
}

impl RowCache {
    /// Open (or create) the cache over the given data file.
    pub fn open(path: impl AsRef<Path>, readonly: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cache = Self {
            path,
            file: None,
            readonly,
            free: Vec::new(),
            free_count: 0,
            free_pos: INITIAL_FREE_POS,
            rows: HashMap::new(),
            cache_version: 0,
        };
        cache.open_file()?;
        Ok(cache)
    }

    fn open_file(&mut self) -> Result<()> {
        let exists = self.path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(!self.readonly)
            .create(!self.readonly)
            .open(&self.path)
            .map_err(|e| self.io_err("open", e))?;
        let len = file.metadata().map_err(|e| self.io_err("open", e))?.len();
        self.file = Some(file);
        if exists && len > FREE_POS_POS {
            self.seek(FREE_POS_POS, "open")?;
            self.free_pos = self
                .file_mut()?
                .read_i64::<BigEndian>()
                .map_err(|e| self.io_err("open", e))?;
        } else {
            self.free_pos = INITIAL_FREE_POS;
            if !self.readonly {
                self.write_free_pos()?;
            }
        }
        self.cache_version = self.load_properties()?;
        debug!(path = %self.path.display(), free_pos = self.free_pos, "row cache opened");
        Ok(())
    }

    /// Whether the backing file is currently open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Next unallocated position (the file high-water mark).
    pub fn free_pos(&self) -> i64 {
        self.free_pos
    }

    /// Number of blocks currently on the free list.
    pub fn free_block_count(&self) -> usize {
        self.free.len()
    }

    /// Running free-list insertion count since the last reset.
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Current defrag generation of the backing file.
    pub fn cache_version(&self) -> u32 {
        self.cache_version
    }

    /// Return a previously freed extent to the allocator and drop any
    /// stale cached copy of the row that lived there.
    pub fn free(&mut self, pos: i64, length: usize) {
        self.rows.remove(&pos);
        self.free_count += 1;
        if self.free_count > MAX_FREE_COUNT {
            debug!(count = self.free_count, "free list reset");
            self.free.clear();
            self.free_count = 1;
        }
        self.free.insert(0, FreeBlock { pos, length });
    }

    /// Assign a file position to an unpersisted row: first fit from the
    /// free list, else the high-water mark.
    pub fn set_file_pos(&mut self, row: &mut Row) {
        let size = row.storage_size;
        let mut pos = -1;
        for i in 0..self.free.len() {
            if self.free[i].length >= size {
                pos = self.free[i].pos;
                let leftover = self.free[i].length - size;
                if leftover < MIN_FREE_BLOCK {
                    self.free.remove(i);
                    self.free_count = self.free_count.saturating_sub(1);
                } else {
                    self.free[i].pos += size as i64;
                    self.free[i].length = leftover;
                }
                break;
            }
        }
        if pos < 0 {
            pos = self.free_pos;
            self.free_pos += size as i64;
        }
        row.pos = pos;
    }

    /// Register a new row: allocate a position and keep the row in memory
    /// as dirty until flushed.
    pub fn add(&mut self, row: &mut Row) -> Result<()> {
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        self.set_file_pos(row);
        row.dirty = true;
        self.rows.insert(row.pos, row.clone());
        Ok(())
    }

    /// Fetch the row stored at `pos`, reading it from disk when it is not
    /// cached in memory.
    pub fn get(&mut self, pos: i64, table: &str, index_count: usize) -> Result<Row> {
        if let Some(row) = self.rows.get(&pos) {
            return Ok(row.clone());
        }
        let row = self.make_row(pos, table, index_count)?;
        self.rows.insert(pos, row.clone());
        Ok(row)
    }

    /// Read and deserialize one row image from the file.
    fn make_row(&mut self, pos: i64, table: &str, index_count: usize) -> Result<Row> {
        self.seek(pos as u64, "read")?;
        let size = self
            .file_mut()?
            .read_u32::<BigEndian>()
            .map_err(|e| self.io_err("read", e))? as usize;
        if size < super::row::ROW_HEADER_SIZE {
            return Err(Error::CorruptedRow(pos));
        }
        let mut buf = vec![0u8; size];
        self.seek(pos as u64, "read")?;
        self.file_mut()?
            .read_exact(&mut buf)
            .map_err(|e| self.io_err("read", e))?;
        Row::from_bytes(pos, table, &buf, index_count)
    }

    /// Write one row image at its position.
    fn save_row(&mut self, row: &Row, index_count: usize) -> Result<()> {
        let bytes = row.to_bytes(index_count);
        self.seek(row.pos as u64, "write")?;
        self.file_mut()?
            .write_all(&bytes)
            .map_err(|e| self.io_err("write", e))?;
        Ok(())
    }

    /// Flush every dirty in-memory row. `index_counts` maps table name to
    /// its index count, which fixes the row image layout.
    pub fn flush(&mut self, index_counts: &HashMap<String, usize>) -> Result<()> {
        if self.readonly || self.file.is_none() {
            return Ok(());
        }
        let dirty: Vec<Row> = self.rows.values().filter(|r| r.dirty).cloned().collect();
        for row in &dirty {
            let index_count = index_counts.get(&row.table).copied().unwrap_or(0);
            self.save_row(row, index_count)?;
        }
        for row in dirty {
            if let Some(r) = self.rows.get_mut(&row.pos) {
                r.dirty = false;
            }
        }
        self.file_mut()?
            .flush()
            .map_err(|e| self.io_err("write", e))?;
        Ok(())
    }

    /// Persist the free pointer, flush dirty rows, and close the file.
    /// A store that never grew past the header is deleted outright.
    pub fn close(&mut self, index_counts: &HashMap<String, usize>) -> Result<()> {
        if self.file.is_none() || self.readonly {
            self.file = None;
            return Ok(());
        }
        self.write_free_pos()?;
        self.flush(index_counts)?;
        self.file = None;
        self.rows.clear();
        if self.free_pos == INITIAL_FREE_POS {
            std::fs::remove_file(&self.path).map_err(|e| self.io_err("remove", e))?;
            info!(path = %self.path.display(), "empty row store removed");
        }
        Ok(())
    }

    fn write_free_pos(&mut self) -> Result<()> {
        let free_pos = self.free_pos;
        self.seek(FREE_POS_POS, "write")?;
        self.file_mut()?
            .write_i64::<BigEndian>(free_pos)
            .map_err(|e| self.io_err("write", e))?;
        Ok(())
    }

    /// Rewrite all live rows contiguously, swap the new file in, refresh
    /// the compressed backup, and bump the cache version. The cache is
    /// reopened for normal use whether or not the rewrite succeeded.
    ///
    /// `live` lists, per table, its index count and the positions of rows
    /// still reachable. Returns old position to new position mappings so
    /// callers can rewrite their references.
    pub fn defrag(&mut self, live: &[(String, usize, Vec<i64>)]) -> Result<HashMap<i64, i64>> {
        let index_counts: HashMap<String, usize> = live
            .iter()
            .map(|(t, n, _)| (t.clone(), *n))
            .collect();
        self.close(&index_counts)?;
        if !self.path.exists() {
            // Empty store was pruned on close, nothing to rewrite.
            self.free = Vec::new();
            self.free_count = 0;
            self.open_file()?;
            return Ok(HashMap::new());
        }
        let was_readonly = self.readonly;
        let result = self.defrag_rewrite(live);
        self.readonly = was_readonly;
        self.free = Vec::new();
        self.free_count = 0;
        self.rows.clear();
        self.file = None;
        self.open_file()?;
        let moved = result?;
        info!(rows = moved.len(), version = self.cache_version, "defrag complete");
        Ok(moved)
    }

    fn defrag_rewrite(&mut self, live: &[(String, usize, Vec<i64>)]) -> Result<HashMap<i64, i64>> {
        let was_readonly = self.readonly;
        self.readonly = true;
        self.open_file()?;
        let new_path = self.path.with_extension("data.new");
        let mut out = File::create(&new_path).map_err(|e| {
            Error::FileIo {
                op: "create",
                path: new_path.display().to_string(),
                source: e,
            }
        })?;

        let mut moved = HashMap::new();
        let mut next_pos = INITIAL_FREE_POS;
        let header = vec![0u8; INITIAL_FREE_POS as usize];
        out.write_all(&header)
            .map_err(|e| self.io_err("write", e))?;

        for (table, index_count, positions) in live {
            for &pos in positions {
                let mut row = self.make_row(pos, table, *index_count)?;
                row.pos = next_pos;
                out.write_all(&row.to_bytes(*index_count))
                    .map_err(|e| self.io_err("write", e))?;
                moved.insert(pos, next_pos);
                next_pos += row.storage_size as i64;
            }
        }

        // Stamp the free pointer into the new header.
        out.seek(SeekFrom::Start(FREE_POS_POS))
            .map_err(|e| self.io_err("write", e))?;
        out.write_i64::<BigEndian>(next_pos)
            .map_err(|e| self.io_err("write", e))?;
        out.sync_all().map_err(|e| self.io_err("write", e))?;
        drop(out);

        self.file = None;
        self.readonly = was_readonly;
        std::fs::rename(&new_path, &self.path).map_err(|e| self.io_err("rename", e))?;
        self.backup()?;
        self.cache_version += 1;
        self.save_properties()?;
        self.free_pos = next_pos;
        Ok(moved)
    }

    /// Write a gzip-compressed copy of the backing file next to it,
    /// replacing any previous backup atomically.
    pub fn backup(&self) -> Result<()> {
        let backup_path = self.path.with_extension("backup");
        let tmp_path = self.path.with_extension("backup.new");
        let mut input = File::open(&self.path).map_err(|e| self.io_err("backup", e))?;
        let out = File::create(&tmp_path).map_err(|e| self.io_err("backup", e))?;
        let mut encoder = GzEncoder::new(out, Compression::default());
        std::io::copy(&mut input, &mut encoder).map_err(|e| self.io_err("backup", e))?;
        encoder.finish().map_err(|e| self.io_err("backup", e))?;
        std::fs::rename(&tmp_path, &backup_path).map_err(|e| self.io_err("backup", e))?;
        debug!(path = %backup_path.display(), "backup written");
        Ok(())
    }

    fn properties_path(&self) -> PathBuf {
        self.path.with_extension("properties")
    }

    fn load_properties(&self) -> Result<u32> {
        let path = self.properties_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| self.io_err("open", e))?;
            let props: StoreProperties = serde_json::from_str(&text)
                .map_err(|e| Error::Internal(format!("bad properties file: {}", e)))?;
            Ok(props.cache_version)
        } else {
            Ok(0)
        }
    }

    fn save_properties(&self) -> Result<()> {
        let props = StoreProperties {
            cache_version: self.cache_version,
        };
        let text = serde_json::to_string_pretty(&props)
            .map_err(|e| Error::Internal(format!("properties encoding: {}", e)))?;
        std::fs::write(self.properties_path(), text).map_err(|e| self.io_err("write", e))?;
        Ok(())
    }

    fn seek(&mut self, pos: u64, op: &'static str) -> Result<()> {
        let path = self.path.display().to_string();
        match self.file.as_mut() {
            Some(f) => f
                .seek(SeekFrom::Start(pos))
                .map(|_| ())
                .map_err(|source| Error::FileIo { op, path, source }),
            None => Err(Error::Internal("row cache file is closed".to_string())),
        }
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Internal("row cache file is closed".to_string()))
    }

    fn io_err(&self, op: &'static str, source: std::io::Error) -> Error {
        Error::FileIo {
            op,
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::row::Value;
    use tempfile::tempdir;

    fn row(n: i32, pad: usize) -> Row {
        Row::new("t", vec![Value::Integer(n), Value::String("x".repeat(pad))], 1)
    }

    #[test]
    fn test_alloc_from_high_water_mark() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::open(dir.path().join("db.data"), false).unwrap();
        assert_eq!(cache.free_pos(), INITIAL_FREE_POS);

        let mut r1 = row(1, 0);
        let mut r2 = row(2, 0);
        cache.add(&mut r1).unwrap();
        cache.add(&mut r2).unwrap();
        assert_eq!(r1.pos, INITIAL_FREE_POS);
        assert_eq!(r2.pos, INITIAL_FREE_POS + r1.storage_size as i64);
        assert_eq!(
            cache.free_pos(),
            INITIAL_FREE_POS + (r1.storage_size + r2.storage_size) as i64
        );
    }

    #[test]
    fn test_free_then_first_fit_reuse() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::open(dir.path().join("db.data"), false).unwrap();

        let mut big = row(1, 200);
        cache.add(&mut big).unwrap();
        let big_pos = big.pos;
        let big_size = big.storage_size;
        cache.free(big_pos, big_size);
        assert_eq!(cache.free_block_count(), 1);

        // A row leaving >= 32 bytes of leftover shrinks the block in place.
        let mut small = row(2, 100);
        cache.add(&mut small).unwrap();
        assert_eq!(small.pos, big_pos);
        assert_eq!(cache.free_block_count(), 1);

        // A row consuming the rest (leftover < 32) removes the block.
        let leftover = big_size - small.storage_size;
        let mut filler = row(3, leftover.saturating_sub(40));
        assert!(filler.storage_size <= leftover);
        assert!(leftover - filler.storage_size < MIN_FREE_BLOCK);
        cache.add(&mut filler).unwrap();
        assert_eq!(filler.pos, big_pos + small.storage_size as i64);
        assert_eq!(cache.free_block_count(), 0);
    }

    #[test]
    fn test_no_fit_grows_file() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::open(dir.path().join("db.data"), false).unwrap();

        let mut small = row(1, 0);
        cache.add(&mut small).unwrap();
        cache.free(small.pos, small.storage_size);
        let mark = cache.free_pos();

        let mut big = row(2, 500);
        cache.add(&mut big).unwrap();
        assert_eq!(big.pos, mark);
        assert_eq!(cache.free_block_count(), 1);
    }

    #[test]
    fn test_free_extents_account_for_all_space() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::open(dir.path().join("db.data"), false).unwrap();

        let mut live = Vec::new();
        for i in 0..20 {
            let mut r = row(i, 40);
            cache.add(&mut r).unwrap();
            live.push(r);
        }
        // punch holes, then refill some of them with same-size rows
        for i in [17usize, 14, 11, 9, 5, 2] {
            let r = live.remove(i);
            cache.free(r.pos, r.storage_size);
        }
        for i in 0..3 {
            let mut r = row(100 + i, 40);
            cache.add(&mut r).unwrap();
            live.push(r);
        }

        // free extents and live rows tile the allocated region exactly,
        // with no gaps and no overlaps
        let mut extents: Vec<(i64, usize)> =
            cache.free.iter().map(|b| (b.pos, b.length)).collect();
        extents.extend(live.iter().map(|r| (r.pos, r.storage_size)));
        extents.sort();
        let mut next = INITIAL_FREE_POS;
        for (pos, len) in extents {
            assert_eq!(pos, next);
            next = pos + len as i64;
        }
        assert_eq!(next, cache.free_pos());
    }

    #[test]
    fn test_free_list_reset_after_max() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::open(dir.path().join("db.data"), false).unwrap();

        for i in 0..MAX_FREE_COUNT {
            cache.free(INITIAL_FREE_POS + (i as i64) * 64, 64);
        }
        assert_eq!(cache.free_block_count(), MAX_FREE_COUNT);

        // One more insertion resets the list and starts over with the
        // single new block.
        cache.free(INITIAL_FREE_POS + (MAX_FREE_COUNT as i64) * 64, 64);
        assert_eq!(cache.free_block_count(), 1);
        assert_eq!(cache.free_count(), 1);
    }

    #[test]
    fn test_close_reopen_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.data");
        let index_counts: HashMap<String, usize> = [("t".to_string(), 1)].into_iter().collect();

        let mut r1 = row(7, 10);
        let free_pos;
        {
            let mut cache = RowCache::open(&path, false).unwrap();
            cache.add(&mut r1).unwrap();
            free_pos = cache.free_pos();
            cache.close(&index_counts).unwrap();
        }
        assert!(path.exists());

        let mut cache = RowCache::open(&path, false).unwrap();
        assert_eq!(cache.free_pos(), free_pos);
        let back = cache.get(r1.pos, "t", 1).unwrap();
        assert_eq!(back.values, r1.values);
    }

    #[test]
    fn test_empty_store_pruned_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.data");
        let mut cache = RowCache::open(&path, false).unwrap();
        assert!(path.exists());
        cache.close(&HashMap::new()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_defrag_compacts_and_backs_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.data");
        let mut cache = RowCache::open(&path, false).unwrap();

        let mut r1 = row(1, 50);
        let mut r2 = row(2, 50);
        let mut r3 = row(3, 50);
        cache.add(&mut r1).unwrap();
        cache.add(&mut r2).unwrap();
        cache.add(&mut r3).unwrap();
        // Drop the middle row, leaving a hole.
        cache.free(r2.pos, r2.storage_size);

        let live = vec![("t".to_string(), 1usize, vec![r1.pos, r3.pos])];
        let moved = cache.defrag(&live).unwrap();
        assert_eq!(moved.len(), 2);
        assert_eq!(moved[&r1.pos], INITIAL_FREE_POS);
        assert_eq!(
            moved[&r3.pos],
            INITIAL_FREE_POS + r1.storage_size as i64
        );
        assert_eq!(cache.cache_version(), 1);
        assert_eq!(cache.free_block_count(), 0);
        assert!(path.with_extension("backup").exists());

        let back = cache.get(moved[&r3.pos], "t", 1).unwrap();
        assert_eq!(back.values, r3.values);
    }
}
