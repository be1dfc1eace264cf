//! File-based providers for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::log::{LogEntry, TransactionLog};
use crate::snapshot::{SnapshotLog, SnapshotReader, SnapshotWriter};
use bytes::Bytes;
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Magic bytes at the start of every log frame.
const FRAME_MAGIC: [u8; 4] = *b"RVTX";

/// magic (4) + payload length (4)
const FRAME_HEADER_SIZE: u64 = 8;

/// How long `poll` sleeps between looks at the file.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

const LOG_FILE_NAME: &str = "transactions.log";
const SNAPSHOT_SUFFIX: &str = ".snap";
const STAGING_SUFFIX: &str = ".snap.tmp";
const DIGEST_SIZE: usize = 32;

/// Position of the next unread frame.
#[derive(Debug, Default, Clone, Copy)]
struct FramePosition {
    offset: u64,
    next_id: u64,
}

/// Outcome of reading one frame.
enum Frame {
    Complete { payload: Vec<u8>, end: u64 },
    /// The frame is incomplete: either still being written or torn by a crash.
    Partial,
    End,
}

fn read_frame(file: &mut File, offset: u64) -> StorageResult<Frame> {
    let size = file.metadata()?.len();
    if offset >= size {
        return Ok(Frame::End);
    }
    if offset + FRAME_HEADER_SIZE > size {
        return Ok(Frame::Partial);
    }

    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut header)?;
    if header[..4] != FRAME_MAGIC {
        return Err(StorageError::corrupted(format!(
            "bad frame magic at offset {offset}"
        )));
    }
    let len = u64::from(u32::from_le_bytes([
        header[4], header[5], header[6], header[7],
    ]));
    let end = offset + FRAME_HEADER_SIZE + len;
    if end > size {
        return Ok(Frame::Partial);
    }

    let len = usize::try_from(len)
        .map_err(|_| StorageError::CapacityExceeded("frame larger than memory".into()))?;
    let mut payload = vec![0u8; len];
    file.read_exact(&mut payload)?;
    Ok(Frame::Complete { payload, end })
}

/// A transaction log stored as length-prefixed frames in one append-only file.
///
/// Transaction ids are frame indices. Appends from several processes are
/// serialized with an exclusive advisory lock on the file; before writing,
/// the appender re-scans frames written by others so ids stay dense. A
/// torn frame at the tail (crash mid-append) is invisible to readers and is
/// cut off by the next appender.
///
/// # Frame Format
///
/// ```text
/// | magic "RVTX" (4) | length u32 LE (4) | payload (N) |
/// ```
#[derive(Debug)]
pub struct FileTransactionLog {
    path: PathBuf,
    append_file: Mutex<(File, FramePosition)>,
    read_file: Mutex<(File, FramePosition, u64)>,
}

impl FileTransactionLog {
    /// Opens or creates the log inside `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created or opened.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let append = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let read = File::open(&path)?;

        Ok(Self {
            path,
            append_file: Mutex::new((append, FramePosition::default())),
            read_file: Mutex::new((read, FramePosition::default(), 0)),
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advances `position` over every complete frame. Returns true if a
    /// partial frame follows the last complete one.
    fn scan_to_end(file: &mut File, position: &mut FramePosition) -> StorageResult<bool> {
        loop {
            match read_frame(file, position.offset)? {
                Frame::Complete { end, .. } => {
                    position.offset = end;
                    position.next_id += 1;
                }
                Frame::Partial => return Ok(true),
                Frame::End => return Ok(false),
            }
        }
    }

    fn append_locked(
        file: &mut File,
        position: &mut FramePosition,
        payload: &[u8],
    ) -> StorageResult<u64> {
        if Self::scan_to_end(file, position)? {
            tracing::warn!(offset = position.offset, "discarding torn log frame");
            file.set_len(position.offset)?;
        }

        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::CapacityExceeded("transaction payload too large".into()))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(payload);

        file.write_all(&frame)?;
        file.sync_data()?;

        let id = position.next_id;
        position.offset += frame.len() as u64;
        position.next_id += 1;
        Ok(id)
    }
}

impl TransactionLog for FileTransactionLog {
    fn append(&self, store_name: &str, payload: &[u8]) -> StorageResult<u64> {
        let mut guard = self.append_file.lock();
        let (file, position) = &mut *guard;

        file.lock_exclusive()?;
        let result = Self::append_locked(file, position, payload);
        let unlocked = file.unlock();
        let id = result?;
        unlocked?;

        tracing::trace!(store = store_name, transaction_id = id, "appended transaction");
        Ok(id)
    }

    fn poll(&self, timeout: Duration) -> StorageResult<Option<LogEntry>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.read_file.lock();
        let (file, position, skip_below) = &mut *guard;

        loop {
            match read_frame(file, position.offset)? {
                Frame::Complete { payload, end } => {
                    let transaction_id = position.next_id;
                    position.offset = end;
                    position.next_id += 1;
                    if transaction_id < *skip_below {
                        continue;
                    }
                    return Ok(Some(LogEntry {
                        transaction_id,
                        payload: Bytes::from(payload),
                    }));
                }
                Frame::Partial | Frame::End => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
            }
        }
    }

    fn seek(&self, transaction_id: u64) -> StorageResult<()> {
        let mut guard = self.read_file.lock();
        let (_, _, skip_below) = &mut *guard;
        *skip_below = transaction_id.saturating_add(1);
        Ok(())
    }

    fn head(&self) -> StorageResult<Option<u64>> {
        let mut guard = self.append_file.lock();
        let (file, position) = &mut *guard;
        Self::scan_to_end(file, position)?;
        Ok(position.next_id.checked_sub(1))
    }
}

/// A snapshot log storing one file per transaction id in a directory.
///
/// Writers stage into `<id>.snap.tmp` and atomically rename to
/// `<id>.snap` on commit. Every committed file ends with a SHA-256 digest
/// of its body, verified when the snapshot is read back.
#[derive(Debug)]
pub struct FileSnapshotLog {
    dir: PathBuf,
}

impl FileSnapshotLog {
    /// Opens or creates the snapshot directory.
    ///
    /// Leftover staging files from an interrupted writer are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_staging = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(STAGING_SUFFIX));
            if is_staging {
                tracing::debug!(path = %path.display(), "removing abandoned snapshot staging file");
                fs::remove_file(&path)?;
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn snapshot_path(&self, transaction_id: u64) -> PathBuf {
        self.dir.join(format!("{transaction_id:020}{SNAPSHOT_SUFFIX}"))
    }

    fn staging_path(&self, transaction_id: u64) -> PathBuf {
        self.dir.join(format!("{transaction_id:020}{STAGING_SUFFIX}"))
    }
}

struct FileSnapshotWriter {
    file: Option<File>,
    hasher: Sha256,
    staging: PathBuf,
    target: PathBuf,
}

impl Write for FileSnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("snapshot writer closed"))?;
        let written = file.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl SnapshotWriter for FileSnapshotWriter {
    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        let Some(mut file) = self.file.take() else {
            return Err(StorageError::corrupted("snapshot writer already closed"));
        };
        let digest = std::mem::take(&mut self.hasher).finalize();
        let staged = file
            .write_all(&digest)
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::rename(&self.staging, &self.target));
        if let Err(e) = staged {
            let _ = fs::remove_file(&self.staging);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for FileSnapshotWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.staging);
        }
    }
}

impl SnapshotLog for FileSnapshotLog {
    fn create_writer(&self, transaction_id: u64) -> StorageResult<Box<dyn SnapshotWriter>> {
        let target = self.snapshot_path(transaction_id);
        if target.exists() {
            return Err(StorageError::SnapshotExists { transaction_id });
        }
        let staging = self.staging_path(transaction_id);
        let file = File::create(&staging)?;
        Ok(Box::new(FileSnapshotWriter {
            file: Some(file),
            hasher: Sha256::new(),
            staging,
            target,
        }))
    }

    fn create_reader(&self, transaction_id: u64) -> StorageResult<SnapshotReader> {
        let path = self.snapshot_path(transaction_id);
        let mut data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::SnapshotNotFound { transaction_id })
            }
            Err(e) => return Err(e.into()),
        };

        if data.len() < DIGEST_SIZE {
            return Err(StorageError::corrupted(format!(
                "snapshot {transaction_id} is shorter than its digest"
            )));
        }
        let body_len = data.len() - DIGEST_SIZE;
        let actual = Sha256::digest(&data[..body_len]);
        if actual.as_slice() != &data[body_len..] {
            return Err(StorageError::corrupted(format!(
                "snapshot {transaction_id} digest mismatch"
            )));
        }
        data.truncate(body_len);
        Ok(Box::new(Cursor::new(data)))
    }

    fn list(&self) -> StorageResult<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_suffix(SNAPSHOT_SUFFIX)
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn delete(&self, transaction_id: u64) -> StorageResult<()> {
        match fs::remove_file(self.snapshot_path(transaction_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::SnapshotNotFound { transaction_id })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = FileTransactionLog::open(dir.path()).unwrap();
            assert_eq!(log.append("s", b"one").unwrap(), 0);
            assert_eq!(log.append("s", b"two").unwrap(), 1);
        }

        let log = FileTransactionLog::open(dir.path()).unwrap();
        assert_eq!(log.head().unwrap(), Some(1));
        let first = log.poll(Duration::ZERO).unwrap().unwrap();
        assert_eq!(&first.payload[..], b"one");
        assert_eq!(log.append("s", b"three").unwrap(), 2);
    }

    #[test]
    fn two_handles_share_id_sequence() {
        let dir = tempdir().unwrap();
        let a = FileTransactionLog::open(dir.path()).unwrap();
        let b = FileTransactionLog::open(dir.path()).unwrap();

        assert_eq!(a.append("s", b"a0").unwrap(), 0);
        assert_eq!(b.append("s", b"b1").unwrap(), 1);
        assert_eq!(a.append("s", b"a2").unwrap(), 2);

        let ids: Vec<u64> = std::iter::from_fn(|| b.poll(Duration::ZERO).unwrap())
            .map(|e| e.transaction_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn seek_skips_frames() {
        let dir = tempdir().unwrap();
        let log = FileTransactionLog::open(dir.path()).unwrap();
        for payload in [b"0", b"1", b"2", b"3"] {
            log.append("s", payload).unwrap();
        }
        log.seek(2).unwrap();
        let entry = log.poll(Duration::ZERO).unwrap().unwrap();
        assert_eq!(entry.transaction_id, 3);
        assert!(log.poll(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn torn_tail_is_invisible_then_replaced() {
        let dir = tempdir().unwrap();
        let log = FileTransactionLog::open(dir.path()).unwrap();
        log.append("s", b"whole").unwrap();

        let mut raw = OpenOptions::new().append(true).open(log.path()).unwrap();
        raw.write_all(&FRAME_MAGIC).unwrap();
        raw.write_all(&100u32.to_le_bytes()).unwrap();
        raw.write_all(b"par").unwrap();
        drop(raw);

        assert_eq!(log.poll(Duration::ZERO).unwrap().unwrap().transaction_id, 0);
        assert!(log.poll(Duration::ZERO).unwrap().is_none());

        assert_eq!(log.append("s", b"next").unwrap(), 1);
        let entry = log.poll(Duration::ZERO).unwrap().unwrap();
        assert_eq!((entry.transaction_id, &entry.payload[..]), (1, &b"next"[..]));
    }

    #[test]
    fn corrupted_magic_is_fatal() {
        let dir = tempdir().unwrap();
        let log = FileTransactionLog::open(dir.path()).unwrap();
        fs::write(log.path(), b"JUNKJUNKJUNK").unwrap();
        assert!(matches!(
            log.poll(Duration::ZERO),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn snapshot_commit_and_read_back() {
        let dir = tempdir().unwrap();
        let snapshots = FileSnapshotLog::open(dir.path()).unwrap();

        let mut writer = snapshots.create_writer(4).unwrap();
        writer.write_all(b"state").unwrap();
        assert!(snapshots.list().unwrap().is_empty());
        writer.commit().unwrap();

        assert_eq!(snapshots.list().unwrap(), vec![4]);
        let mut body = Vec::new();
        snapshots
            .create_reader(4)
            .unwrap()
            .read_to_end(&mut body)
            .unwrap();
        assert_eq!(body, b"state");
    }

    #[test]
    fn abandoned_writer_leaves_nothing() {
        let dir = tempdir().unwrap();
        let snapshots = FileSnapshotLog::open(dir.path()).unwrap();
        {
            let mut writer = snapshots.create_writer(1).unwrap();
            writer.write_all(b"half").unwrap();
        }
        assert!(snapshots.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn damaged_snapshot_detected() {
        let dir = tempdir().unwrap();
        let snapshots = FileSnapshotLog::open(dir.path()).unwrap();
        let mut writer = snapshots.create_writer(2).unwrap();
        writer.write_all(b"important").unwrap();
        writer.commit().unwrap();

        let path = snapshots.snapshot_path(2);
        let mut data = fs::read(&path).unwrap();
        data[0] ^= 0xFF;
        fs::write(&path, data).unwrap();

        assert!(matches!(
            snapshots.create_reader(2),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn delete_missing_snapshot_fails() {
        let dir = tempdir().unwrap();
        let snapshots = FileSnapshotLog::open(dir.path()).unwrap();
        assert!(matches!(
            snapshots.delete(10),
            Err(StorageError::SnapshotNotFound { transaction_id: 10 })
        ));
    }
}
