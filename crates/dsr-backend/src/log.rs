use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BackendError, BackendResult};
use crate::memory::MemoryBackend;
use crate::traits::{Backend, Cursor, ScanOptions};

/// One mutation recorded in the log.
///
/// On-disk format:
/// ```text
/// [4 bytes: record length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Flush/sync strategy for the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for a [`LogBackend`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub sync_mode: SyncMode,
}

/// Outcome of [`LogBackend::compact`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionStats {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub live_keys: usize,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct LogWriter {
    writer: BufWriter<File>,
    /// Current end of the log file.
    offset: u64,
}

/// Persistent storage engine backed by a single append-only log.
///
/// Every mutation is appended as a CRC-framed [`LogRecord`] and then applied
/// to an in-memory ordered index, which serves all reads and scans. On open
/// the log is replayed front-to-back; a torn tail is ignored and records that
/// fail the CRC check are skipped. [`LogBackend::compact`] rewrites the log
/// to hold one `Put` per live key.
pub struct LogBackend {
    path: PathBuf,
    /// Append handle. Held across append and index update so the index
    /// applies mutations in log order.
    writer: Mutex<LogWriter>,
    index: MemoryBackend,
    config: LogConfig,
}

impl LogBackend {
    /// Open (or create) the log at `path` and rebuild the index from it.
    pub fn open(path: &Path, config: LogConfig) -> BackendResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let index = MemoryBackend::new();
        let (records, offset) = recover(path)?;
        if offset < file_len {
            warn!(path = %path.display(), dropped_bytes = file_len - offset, "cutting incomplete tail off log");
            file.set_len(offset)?;
        }
        let replayed = records.len();
        for record in records {
            match record {
                LogRecord::Put { key, value } => index.insert(&key, &value)?,
                LogRecord::Delete { key } => {
                    index.remove(&key)?;
                }
            }
        }
        info!(path = %path.display(), replayed, live = index.len(), "log backend opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            index,
            config,
        })
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current log length in bytes.
    pub fn offset(&self) -> BackendResult<u64> {
        Ok(self.lock()?.offset)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Rewrite the log so it holds exactly one record per live key.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash mid-compaction leaves the previous log intact.
    pub fn compact(&self) -> BackendResult<CompactionStats> {
        let mut w = self.lock()?;
        w.writer.flush()?;
        let bytes_before = w.offset;

        let live = self.index.snapshot()?;
        let tmp_path = self.path.with_extension("compact");
        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        let mut bytes_after = 0u64;
        for (key, value) in &live {
            bytes_after += write_record(&mut tmp, &LogRecord::Put {
                key: key.clone(),
                value: value.clone(),
            })?;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = bytes_after;

        let stats = CompactionStats {
            bytes_before,
            bytes_after,
            live_keys: live.len(),
        };
        info!(
            path = %self.path.display(),
            before = stats.bytes_before,
            after = stats.bytes_after,
            live = stats.live_keys,
            "log compacted"
        );
        Ok(stats)
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, LogWriter>> {
        self.writer.lock().map_err(|_| BackendError::Poisoned)
    }

    fn append(&self, w: &mut LogWriter, record: &LogRecord) -> BackendResult<()> {
        let written = write_record(&mut w.writer, record)?;
        w.writer.flush()?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            w.writer.get_ref().sync_all()?;
        }
        debug!(offset = w.offset, len = written, "log append");
        w.offset += written;
        Ok(())
    }
}

#[async_trait]
impl Backend for LogBackend {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.index.lookup(key)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        let mut w = self.lock()?;
        self.append(&mut w, &LogRecord::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.index.insert(key, value)
    }

    async fn has(&self, key: &[u8]) -> BackendResult<bool> {
        self.index.contains(key)
    }

    async fn delete(&self, key: &[u8]) -> BackendResult<bool> {
        let mut w = self.lock()?;
        if !self.index.contains(key)? {
            return Ok(false);
        }
        self.append(&mut w, &LogRecord::Delete { key: key.to_vec() })?;
        self.index.remove(key)
    }

    async fn size(&self, key: &[u8]) -> BackendResult<Option<u64>> {
        self.index.size(key).await
    }

    async fn scan(&self, opts: ScanOptions) -> BackendResult<Box<dyn Cursor>> {
        Ok(Box::new(self.index.open_cursor(opts)))
    }

    async fn flush(&self) -> BackendResult<()> {
        let mut w = self.lock()?;
        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Frame and write one record. Returns the number of bytes written.
fn write_record<W: Write>(out: &mut W, record: &LogRecord) -> BackendResult<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| BackendError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| BackendError::Serialization(format!("record too large: {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    out.write_all(&length.to_le_bytes())?;
    out.write_all(&crc.to_le_bytes())?;
    out.write_all(&payload)?;
    Ok(HEADER_SIZE as u64 + payload.len() as u64)
}

/// Decode the log at `path` frame by frame.
///
/// Frames with a bad checksum or an undecodable payload are dropped and
/// replay moves on. A frame whose header or payload runs past end of file
/// ends replay; the returned offset is where that frame starts.
fn recover(path: &Path) -> BackendResult<(Vec<LogRecord>, u64)> {
    let data = fs::read(path)?;
    let mut records = Vec::new();
    let mut pos = 0usize;

    while let Some(header) = data.get(pos..pos + HEADER_SIZE) {
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let body_start = pos + HEADER_SIZE;
        let body = match data.get(body_start..body_start + len) {
            Some(body) if len > 0 => body,
            _ => {
                warn!(at = pos, len, "incomplete frame at end of log");
                break;
            }
        };
        let at = pos;
        pos = body_start + len;

        if crc32fast::hash(body) != crc {
            warn!(at, "frame checksum does not match, dropped");
            continue;
        }
        match bincode::deserialize::<LogRecord>(body) {
            Ok(record) => records.push(record),
            Err(e) => warn!(at, error = %e, "frame payload does not decode, dropped"),
        }
    }

    debug!(records = records.len(), valid_bytes = pos, "log replayed");
    Ok((records, pos as u64))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;

    fn open(path: &Path) -> LogBackend {
        LogBackend::open(path, LogConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let log = open(&path);
        log.put(b"a", b"1").await.unwrap();
        log.put(b"b", b"2").await.unwrap();
        log.put(b"a", b"3").await.unwrap();
        assert!(log.delete(b"b").await.unwrap());
        log.flush().await.unwrap();
        drop(log);

        let log = open(&path);
        assert_eq!(log.get(b"a").await.unwrap(), Some(b"3".to_vec()));
        assert!(!log.has(b"b").await.unwrap());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn delete_absent_key_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = open(&dir.path().join("data.log"));
        assert!(!log.delete(b"missing").await.unwrap());
        assert_eq!(log.offset().unwrap(), 0);
    }

    #[tokio::test]
    async fn replay_survives_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.log");

        let log = open(&path);
        log.put(b"a", b"1").await.unwrap();
        log.put(b"b", b"2").await.unwrap();
        let total = log.offset().unwrap();
        drop(log);

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(total - 2).unwrap();
        drop(file);

        let log = open(&path);
        assert!(log.has(b"a").await.unwrap());
        assert!(!log.has(b"b").await.unwrap());
        assert!(log.offset().unwrap() < total - 2);

        // Records written after recovery must survive the next replay.
        log.put(b"c", b"3").await.unwrap();
        drop(log);
        let log = open(&path);
        assert!(log.has(b"a").await.unwrap());
        assert_eq!(log.get(b"c").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn replay_skips_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.log");

        let log = open(&path);
        log.put(b"a", b"1").await.unwrap();
        log.put(b"b", b"2").await.unwrap();
        drop(log);

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
            file.sync_all().unwrap();
        }

        let log = open(&path);
        assert!(!log.has(b"a").await.unwrap());
        assert_eq!(log.get(b"b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn compaction_shrinks_and_preserves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.log");

        let log = open(&path);
        for i in 0..20u8 {
            log.put(b"hot", &[i; 16]).await.unwrap();
        }
        log.put(b"cold", b"keep").await.unwrap();
        log.put(b"gone", b"x").await.unwrap();
        log.delete(b"gone").await.unwrap();

        let stats = log.compact().unwrap();
        assert_eq!(stats.live_keys, 2);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(log.offset().unwrap(), stats.bytes_after);

        // Writes after compaction land in the new file.
        log.put(b"new", b"after").await.unwrap();
        drop(log);

        let log = open(&path);
        assert_eq!(log.get(b"hot").await.unwrap(), Some(vec![19u8; 16]));
        assert_eq!(log.get(b"cold").await.unwrap(), Some(b"keep".to_vec()));
        assert_eq!(log.get(b"new").await.unwrap(), Some(b"after".to_vec()));
        assert!(!log.has(b"gone").await.unwrap());
    }

    #[tokio::test]
    async fn scan_reads_index() {
        let dir = tempfile::tempdir().unwrap();
        let log = open(&dir.path().join("scan.log"));
        log.put(b"p/2", b"b").await.unwrap();
        log.put(b"p/1", b"a").await.unwrap();
        log.put(b"q/1", b"c").await.unwrap();

        let mut cursor = log.scan(ScanOptions::prefix(b"p/".to_vec())).await.unwrap();
        let mut keys = Vec::new();
        while let Some(item) = cursor.next().await.unwrap() {
            keys.push(item.key);
        }
        cursor.close().await.unwrap();
        assert_eq!(keys, vec![b"p/1".to_vec(), b"p/2".to_vec()]);
    }

    #[tokio::test]
    async fn every_write_sync_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");
        let log = LogBackend::open(&path, LogConfig { sync_mode: SyncMode::EveryWrite }).unwrap();
        log.put(b"k", b"v").await.unwrap();
        drop(log);
        assert!(open(&path).has(b"k").await.unwrap());
    }

    #[test]
    fn sync_mode_uses_snake_case_names() {
        let config: LogConfig = toml::from_str("sync_mode = \"every_write\"").unwrap();
        assert_eq!(config.sync_mode, SyncMode::EveryWrite);
        let default: LogConfig = toml::from_str("").unwrap();
        assert_eq!(default.sync_mode, SyncMode::OsDefault);
    }
}
