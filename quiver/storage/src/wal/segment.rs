//! Segmented write-ahead log.
//!
//! Record layout (little-endian):
//! ┌────────────┬────────────┬───────────┐
//! │ u32 len    │ u32 crc32  │ payload…  │
//! └────────────┴────────────┴───────────┘
//!
//! Segments live under `{data_dir}/wal/`. The active segment is named
//! `{seq:06}_open.wal`; sealing renames it to
//! `{seq:06}_{from_ts}_{to_ts}.wal` where the bounds are the commit
//! timestamps it covers, so retention can prune by timestamp without
//! reading file contents.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crc32fast::Hasher;
use quiver_common::{EdgeId, LabelId, PropertyId, PropertyValue, VertexId};
use quiver_transaction::{IsolationLevel, Timestamp};
use serde::{Deserialize, Serialize};

use super::{LogRecord, StorageWal};
use crate::error::{RecoveryFailure, StorageError, StorageResult, WalError};
use crate::model::{Edge, Vertex};

const HEADER_SIZE: usize = 8; // 4 bytes length + 4 bytes crc32
const OPEN_SUFFIX: &str = "open";

/// Which name-id mapper an interned name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameKind {
    Label,
    Property,
    EdgeType,
}

/// Logical redo operation carried by a WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    TxnBegin {
        start_ts: Timestamp,
        isolation: IsolationLevel,
    },
    TxnCommit {
        commit_ts: Timestamp,
    },
    TxnAbort,
    CreateVertex(Vertex),
    DeleteVertex(VertexId),
    CreateEdge(Edge),
    DeleteEdge(EdgeId),
    SetVertexProperty(VertexId, PropertyId, PropertyValue),
    SetEdgeProperty(EdgeId, PropertyId, PropertyValue),
    AddLabel(VertexId, LabelId),
    RemoveLabel(VertexId, LabelId),
    InternName {
        kind: NameKind,
        id: u32,
        name: String,
    },
    CreateLabelIndex(LabelId),
    DropLabelIndex(LabelId),
    CreateLabelPropertyIndex(LabelId, PropertyId),
    DropLabelPropertyIndex(LabelId, PropertyId),
    CreateExistenceConstraint(LabelId, PropertyId),
    DropExistenceConstraint(LabelId, PropertyId),
    CreateUniqueConstraint(LabelId, Vec<PropertyId>),
    DropUniqueConstraint(LabelId, Vec<PropertyId>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log sequence number; total order across segments.
    pub lsn: u64,
    /// Owning transaction, or `Timestamp::with_ts(0)` for records that
    /// have no transaction (name interning, DDL).
    pub txn_id: Timestamp,
    pub op: WalOp,
}

impl LogRecord for WalEntry {
    fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| StorageError::Wal(WalError::SerializationFailed(e.to_string())))
    }

    fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| StorageError::Wal(WalError::DeserializationFailed(e.to_string())))
    }
}

/// One append-only log file.
pub struct WalSegment {
    file: BufWriter<File>,
    path: PathBuf,
}

fn wal_io(e: io::Error) -> StorageError {
    StorageError::Wal(WalError::Io(e))
}

/// Builds one on-disk frame around a serialized record: payload length,
/// crc32 of the payload, then the payload itself.
fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&hasher.finalize().to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

impl StorageWal for WalSegment {
    type Record = WalEntry;

    type LogIterator = SegmentRecordIter;

    /// Opens a segment for appending, creating the file (and its
    /// directory) on first use. The cursor lands at the end so resumed
    /// segments keep growing.
    fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(wal_io)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(wal_io)?;
        file.seek(SeekFrom::End(0)).map_err(wal_io)?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
        })
    }

    /// Appends one frame with a single write. A failed write must not
    /// leave half a frame behind, so the file is cut back to where the
    /// frame started before the error is reported.
    fn append(&mut self, record: &Self::Record) -> StorageResult<()> {
        let frame = encode_frame(&record.to_bytes()?);
        let frame_start = self.file.stream_position().map_err(wal_io)?;
        if let Err(e) = self.file.write_all(&frame) {
            self.file
                .seek(SeekFrom::Start(frame_start))
                .map_err(wal_io)?;
            self.file.get_ref().set_len(frame_start).map_err(wal_io)?;
            return Err(wal_io(e));
        }
        Ok(())
    }

    /// Drains the buffer and syncs to the device; flushing alone only
    /// reaches the OS page cache.
    fn flush(&mut self) -> StorageResult<()> {
        self.file.flush().map_err(wal_io)?;
        self.file.get_ref().sync_data().map_err(wal_io)
    }

    fn iter(&self) -> StorageResult<Self::LogIterator> {
        let mut reader = self.file.get_ref().try_clone().map_err(wal_io)?;
        reader.seek(SeekFrom::Start(0)).map_err(wal_io)?;
        Ok(SegmentRecordIter {
            reader,
            offset: 0,
            done: false,
        })
    }
}

impl WalSegment {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the segment front to back, stopping at the first damaged
    /// frame. Returns the parsed records, the byte offset of the end of
    /// the last good frame, and whether the whole file was clean.
    pub fn read_tolerant(&self) -> StorageResult<(Vec<WalEntry>, u64, bool)> {
        let mut records = Vec::new();
        let mut iter = self.iter()?;
        loop {
            let last_good = iter.offset;
            match iter.next() {
                Some(Ok(record)) => records.push(record),
                Some(Err(_)) => return Ok((records, last_good, false)),
                None => return Ok((records, last_good, true)),
            }
        }
    }

    /// Drops everything after `offset`. Used to cut a torn tail before
    /// appending resumes.
    pub fn truncate_to(&mut self, offset: u64) -> StorageResult<()> {
        self.file.flush().map_err(wal_io)?;
        self.file.get_ref().set_len(offset).map_err(wal_io)?;
        self.file.seek(SeekFrom::Start(offset)).map_err(wal_io)?;
        Ok(())
    }
}

/// Streaming reader over one segment. Yields at most one error: a
/// damaged frame ends the iteration.
pub struct SegmentRecordIter {
    reader: File,
    offset: u64,
    done: bool,
}

impl Iterator for SegmentRecordIter {
    type Item = StorageResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // A header read that ends mid-way is a torn frame, not a clean
        // end of file; it must surface so recovery can cut the tail.
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(wal_io(e)));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        if filled < HEADER_SIZE {
            self.done = true;
            return Some(Err(StorageError::Wal(WalError::ChecksumMismatch)));
        }

        let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let checksum = u32::from_le_bytes(header[4..8].try_into().unwrap());

        let mut payload = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            self.done = true;
            if e.kind() == io::ErrorKind::UnexpectedEof {
                // Torn frame at the end of the file.
                return Some(Err(StorageError::Wal(WalError::ChecksumMismatch)));
            }
            return Some(Err(wal_io(e)));
        }

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != checksum {
            self.done = true;
            return Some(Err(StorageError::Wal(WalError::ChecksumMismatch)));
        }

        self.offset += (HEADER_SIZE + len) as u64;
        Some(WalEntry::from_bytes(&payload))
    }
}

/// Name and timestamp bounds of a segment file on disk.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub seq: u64,
    /// `(from_ts, to_ts)` for sealed segments; `None` for the active
    /// one.
    pub bounds: Option<(u64, u64)>,
    pub path: PathBuf,
}

fn parse_segment_name(path: &Path) -> Option<SegmentInfo> {
    let stem = path.file_stem()?.to_str()?;
    if path.extension()?.to_str()? != "wal" {
        return None;
    }
    let mut parts = stem.split('_');
    let seq: u64 = parts.next()?.parse().ok()?;
    let second = parts.next()?;
    if second == OPEN_SUFFIX {
        return Some(SegmentInfo {
            seq,
            bounds: None,
            path: path.to_path_buf(),
        });
    }
    let from: u64 = second.parse().ok()?;
    let to: u64 = parts.next()?.parse().ok()?;
    Some(SegmentInfo {
        seq,
        bounds: Some((from, to)),
        path: path.to_path_buf(),
    })
}

fn list_segments(dir: &Path) -> StorageResult<Vec<SegmentInfo>> {
    let mut segments = Vec::new();
    let entries = fs::read_dir(dir).map_err(wal_io)?;
    for entry in entries {
        let entry = entry.map_err(wal_io)?;
        if let Some(info) = parse_segment_name(&entry.path()) {
            segments.push(info);
        }
    }
    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

/// Owns the active segment and the sealed-segment directory; hands out
/// log sequence numbers.
pub struct WalManager {
    dir: PathBuf,
    /// `None` when the WAL is disabled by configuration.
    current: RwLock<Option<WalSegment>>,
    current_seq: AtomicU64,
    next_lsn: AtomicU64,
    // Commit-timestamp range and record count of the active segment,
    // tracked so sealing can name the file without re-reading it.
    seg_from_ts: AtomicU64,
    seg_to_ts: AtomicU64,
    seg_records: AtomicU64,
}

impl WalManager {
    /// Opens the WAL directory, resuming the active segment if one was
    /// left behind.
    pub fn open(dir: PathBuf, enabled: bool) -> StorageResult<Self> {
        if !enabled {
            return Ok(Self {
                dir,
                current: RwLock::new(None),
                current_seq: AtomicU64::new(0),
                next_lsn: AtomicU64::new(0),
                seg_from_ts: AtomicU64::new(u64::MAX),
                seg_to_ts: AtomicU64::new(0),
                seg_records: AtomicU64::new(0),
            })
        }
        fs::create_dir_all(&dir).map_err(wal_io)?;

        let segments = list_segments(&dir)?;
        let open_info = segments.iter().rev().find(|s| s.bounds.is_none()).cloned();
        let max_seq = segments.last().map(|s| s.seq).unwrap_or(0);

        let (seq, segment) = match open_info {
            Some(info) => (info.seq, WalSegment::open(&info.path)?),
            None => {
                let seq = max_seq + 1;
                let path = dir.join(format!("{:06}_{}.wal", seq, OPEN_SUFFIX));
                (seq, WalSegment::open(path)?)
            }
        };

        // Recover the active segment's commit range and count so a
        // later seal names it correctly.
        let (entries, _, _) = segment.read_tolerant()?;
        let mut from_ts = u64::MAX;
        let mut to_ts = 0;
        for entry in &entries {
            if let WalOp::TxnCommit { commit_ts } = entry.op {
                from_ts = from_ts.min(commit_ts.raw());
                to_ts = to_ts.max(commit_ts.raw());
            }
        }

        Ok(Self {
            dir,
            current: RwLock::new(Some(segment)),
            current_seq: AtomicU64::new(seq),
            next_lsn: AtomicU64::new(0),
            seg_from_ts: AtomicU64::new(from_ts),
            seg_to_ts: AtomicU64::new(to_ts),
            seg_records: AtomicU64::new(entries.len() as u64),
        })
    }

    pub fn enabled(&self) -> bool {
        self.current.read().unwrap().is_some()
    }

    pub fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek_next_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst)
    }

    pub fn set_next_lsn(&self, lsn: u64) {
        self.next_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn append(&self, entry: &WalEntry) -> StorageResult<()> {
        let mut guard = self.current.write().unwrap();
        let Some(segment) = guard.as_mut() else {
            return Ok(());
        };
        segment.append(entry)?;
        self.seg_records.fetch_add(1, Ordering::SeqCst);
        if let WalOp::TxnCommit { commit_ts } = entry.op {
            self.seg_from_ts
                .fetch_min(commit_ts.raw(), Ordering::SeqCst);
            self.seg_to_ts.fetch_max(commit_ts.raw(), Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn flush(&self) -> StorageResult<()> {
        let mut guard = self.current.write().unwrap();
        match guard.as_mut() {
            Some(segment) => segment.flush(),
            None => Ok(()),
        }
    }

    /// Appends and immediately syncs a transaction-less record (name
    /// interning, index and constraint DDL).
    pub fn append_ddl(&self, op: WalOp) -> StorageResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        let entry = WalEntry {
            lsn: self.next_lsn(),
            txn_id: Timestamp::with_ts(0),
            op,
        };
        self.append(&entry)?;
        self.flush()
    }

    /// Seals the active segment under its `{seq}_{from}_{to}` name and
    /// starts a fresh one. No-op when the segment has no records.
    pub fn seal_and_rotate(&self) -> StorageResult<()> {
        let mut guard = self.current.write().unwrap();
        let Some(segment) = guard.as_mut() else {
            return Ok(());
        };
        if self.seg_records.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        segment.flush()?;

        let seq = self.current_seq.load(Ordering::SeqCst);
        let from = self.seg_from_ts.load(Ordering::SeqCst);
        let from = if from == u64::MAX { 0 } else { from };
        let to = self.seg_to_ts.load(Ordering::SeqCst);
        let sealed_path = self.dir.join(format!("{:06}_{}_{}.wal", seq, from, to));
        let old_path = segment.path().to_path_buf();
        fs::rename(&old_path, &sealed_path).map_err(wal_io)?;
        tracing::debug!(segment = %sealed_path.display(), "sealed wal segment");

        let next_seq = seq + 1;
        let path = self.dir.join(format!("{:06}_{}.wal", next_seq, OPEN_SUFFIX));
        *guard = Some(WalSegment::open(path)?);
        self.current_seq.store(next_seq, Ordering::SeqCst);
        self.seg_from_ts.store(u64::MAX, Ordering::SeqCst);
        self.seg_to_ts.store(0, Ordering::SeqCst);
        self.seg_records.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Reads every surviving record across all segments, ordered by
    /// LSN. A damaged frame in a sealed segment or in the middle of the
    /// active one is unrecoverable; a torn tail on the active segment
    /// is cut off and replay continues without it.
    pub fn read_all(&self) -> StorageResult<Vec<WalEntry>> {
        let mut guard = self.current.write().unwrap();
        let Some(current) = guard.as_mut() else {
            return Ok(Vec::new());
        };
        current.flush()?;
        let current_path = current.path().to_path_buf();

        let mut records = Vec::new();
        for info in list_segments(&self.dir)? {
            if info.path == current_path {
                let (entries, last_good, clean) = current.read_tolerant()?;
                if !clean {
                    tracing::warn!(
                        segment = %info.path.display(),
                        offset = last_good,
                        "torn record at wal tail, truncating"
                    );
                    current.truncate_to(last_good)?;
                }
                records.extend(entries);
            } else {
                let segment = WalSegment::open(&info.path)?;
                let (entries, _, clean) = segment.read_tolerant()?;
                if !clean {
                    return Err(StorageError::Recovery(RecoveryFailure::new(format!(
                        "corrupt record in sealed wal segment {}",
                        info.path.display()
                    ))));
                }
                records.extend(entries);
            }
        }
        records.sort_by_key(|entry| entry.lsn);
        Ok(records)
    }

    /// Removes sealed segments entirely below `boundary_ts`, always
    /// keeping the newest of them so the snapshot + WAL chain of
    /// custody stays unbroken.
    pub fn prune_older_than(&self, boundary_ts: u64) -> StorageResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        let sealed: Vec<SegmentInfo> = list_segments(&self.dir)?
            .into_iter()
            .filter(|s| matches!(s.bounds, Some((_, to)) if to < boundary_ts))
            .collect();
        // The newest qualifying segment straddles or precedes the
        // boundary; it must survive.
        for info in sealed.iter().rev().skip(1) {
            fs::remove_file(&info.path).map_err(wal_io)?;
            tracing::info!(segment = %info.path.display(), "pruned wal segment");
        }
        Ok(())
    }

    /// Sealed and active segments currently on disk, in sequence order.
    pub fn segments(&self) -> StorageResult<Vec<SegmentInfo>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }
        list_segments(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use temp_dir::TempDir;

    use super::*;

    fn temp_wal_dir(tag: &str) -> TempDir {
        TempDir::with_prefix(format!("quiver_wal_{tag}_")).unwrap()
    }

    fn label(id: u32) -> LabelId {
        NonZeroU32::new(id).unwrap()
    }

    fn entry(lsn: u64, op: WalOp) -> WalEntry {
        WalEntry {
            lsn,
            txn_id: Timestamp::with_ts(Timestamp::TXN_ID_BIT + 7),
            op,
        }
    }

    #[test]
    fn entry_round_trips_through_bytes() {
        let original = entry(
            3,
            WalOp::SetVertexProperty(42, 1, PropertyValue::String("alice".into())),
        );
        let bytes = original.to_bytes().unwrap();
        let decoded = WalEntry::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.lsn, 3);
        match decoded.op {
            WalOp::SetVertexProperty(vid, pid, value) => {
                assert_eq!(vid, 42);
                assert_eq!(pid, 1);
                assert_eq!(value, PropertyValue::String("alice".into()));
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn append_and_replay() {
        let dir = temp_wal_dir("append");
        let path = dir.path().join("000001_open.wal");
        {
            let mut segment = WalSegment::open(&path).unwrap();
            segment.append(&entry(1, WalOp::DeleteVertex(10))).unwrap();
            segment.append(&entry(2, WalOp::DeleteEdge(20))).unwrap();
            segment.flush().unwrap();
        }
        let segment = WalSegment::open(&path).unwrap();
        let records: Vec<WalEntry> = segment.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].op, WalOp::DeleteVertex(10)));
        assert!(matches!(records[1].op, WalOp::DeleteEdge(20)));
    }

    #[test]
    fn damaged_frame_stops_iteration() {
        let dir = temp_wal_dir("damaged");
        let path = dir.path().join("000001_open.wal");
        {
            let mut segment = WalSegment::open(&path).unwrap();
            segment.append(&entry(1, WalOp::DeleteVertex(42))).unwrap();
            segment.flush().unwrap();
        }
        {
            // A frame with a deliberately wrong checksum.
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            let payload = vec![0u8; 20];
            file.write_all(&(payload.len() as u32).to_le_bytes())
                .unwrap();
            file.write_all(&12345u32.to_le_bytes()).unwrap();
            file.write_all(&payload).unwrap();
            file.sync_data().unwrap();
        }
        let segment = WalSegment::open(&path).unwrap();
        let (records, _, clean) = segment.read_tolerant().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!clean);
    }

    #[test]
    fn manager_rotates_and_prunes_segments() {
        let dir = temp_wal_dir("rotate");
        let manager = WalManager::open(dir.path().to_path_buf(), true).unwrap();

        for commit_ts in [5u64, 6] {
            manager
                .append(&entry(manager.next_lsn(), WalOp::DeleteVertex(1)))
                .unwrap();
            manager
                .append(&entry(
                    manager.next_lsn(),
                    WalOp::TxnCommit {
                        commit_ts: Timestamp::with_ts(commit_ts),
                    },
                ))
                .unwrap();
        }
        manager.flush().unwrap();
        manager.seal_and_rotate().unwrap();

        manager
            .append(&entry(
                manager.next_lsn(),
                WalOp::TxnCommit {
                    commit_ts: Timestamp::with_ts(9),
                },
            ))
            .unwrap();
        manager.flush().unwrap();
        manager.seal_and_rotate().unwrap();

        let segments = manager.segments().unwrap();
        // Two sealed segments plus the fresh open one.
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].bounds, Some((5, 6)));
        assert_eq!(segments[1].bounds, Some((9, 9)));
        assert!(segments[2].bounds.is_none());

        // Everything is below the boundary; the newest sealed segment
        // must still survive.
        manager.prune_older_than(100).unwrap();
        let segments = manager.segments().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].bounds, Some((9, 9)));

        let records = manager.read_all().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn disabled_manager_is_inert() {
        let scratch = temp_wal_dir("disabled");
        let wal_dir = scratch.path().join("wal");
        let manager = WalManager::open(wal_dir.clone(), false).unwrap();
        assert!(!manager.enabled());
        manager
            .append(&entry(0, WalOp::AddLabel(1, label(1))))
            .unwrap();
        manager.flush().unwrap();
        assert!(manager.read_all().unwrap().is_empty());
        assert!(!wal_dir.exists());
    }
}
