use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LogError, LogResult};
use crate::manifest::{Manifest, StateDocument};
use crate::record::{LogRecord, RecordBody};

use super::LogBackend;

const LOG_FILE: &str = "log.wal";
const MANIFEST_FILE: &str = "manifest.json";
const STATE_FILE: &str = "state.bin";

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Flush/sync strategy for log appends and document writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for [`FileLog`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileLogConfig {
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl FileLogConfig {
    pub fn durable() -> Self {
        Self {
            sync_mode: SyncMode::EveryWrite,
        }
    }
}

struct Segment {
    writer: BufWriter<File>,
    /// Current write offset in the log file.
    offset: u64,
    /// Sequence number of the first retained record.
    first: u64,
    /// Retained records with their byte offsets.
    records: VecDeque<(u64, LogRecord)>,
}

impl Segment {
    fn head(&self) -> u64 {
        self.records
            .back()
            .map(|(_, r)| r.seq + 1)
            .unwrap_or(self.first)
    }
}

/// A log kept in one directory: a CRC-framed record segment plus the
/// manifest and state documents as atomically replaced files.
///
/// Record frames on disk:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogRecord)]
/// ```
///
/// On open the segment is scanned front to back. Frames that fail the CRC
/// check are skipped; a torn final frame is cut off so later appends start
/// on a frame boundary. Retained records are cached in memory, so one
/// `FileLog` should be shared (via `Arc`) by every replica in the process
/// rather than opened twice.
pub struct FileLog {
    dir: PathBuf,
    config: FileLogConfig,
    segment: Mutex<Segment>,
    head: watch::Sender<u64>,
}

impl FileLog {
    /// Open (or create) a log in `dir`.
    pub fn open(dir: &Path, config: FileLogConfig) -> LogResult<Self> {
        fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;
        let file_len = file.metadata()?.len();

        let (records, valid_len) = scan(&log_path, file_len)?;
        if valid_len < file_len {
            warn!(valid_len, file_len, "cutting torn tail off log segment");
            file.set_len(valid_len)?;
        }

        // Records are only discarded once a state document covers them, so
        // without one nothing was discarded and any gap is corruption.
        let first = match (read_state(dir)?, records.front()) {
            (Some(state), Some((_, record))) => state.position.min(record.seq),
            (Some(state), None) => state.position,
            (None, _) => 0,
        };
        let segment = Segment {
            writer: BufWriter::new(file),
            offset: valid_len,
            first,
            records,
        };
        let (head, _) = watch::channel(segment.head());
        info!(dir = %dir.display(), first, head = segment.head(), "file log opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            segment: Mutex::new(segment),
            head,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_document(&self, name: &str, bytes: &[u8]) -> LogResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(self.dir.join(name)).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_manifest(&self) -> LogResult<Option<Manifest>> {
        match fs::read(self.dir.join(MANIFEST_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_manifest(&self, manifest: &Manifest) -> LogResult<()> {
        self.write_document(MANIFEST_FILE, &serde_json::to_vec_pretty(manifest)?)
    }

    fn write_state(&self, doc: &StateDocument) -> LogResult<()> {
        self.write_document(STATE_FILE, &bincode::serialize(doc)?)
    }
}

fn read_state(dir: &Path) -> LogResult<Option<StateDocument>> {
    match fs::read(dir.join(STATE_FILE)) {
        Ok(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read every intact frame. Returns the records with their offsets and the
/// length of the prefix that ends on a frame boundary.
fn scan(path: &Path, file_len: u64) -> LogResult<(VecDeque<(u64, LogRecord)>, u64)> {
    let mut file = BufReader::new(File::open(path)?);
    let mut records = VecDeque::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid frame length; stopping scan");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated frame; stopping scan");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        // Everything after a bad frame is cut off like a torn tail, so
        // sequence numbers stay dense.
        match decode_frame(offset, expected, &payload) {
            Ok(record) => records.push_back((offset, record)),
            Err(e) => {
                warn!(offset, error = %e, "unreadable frame; stopping scan");
                break;
            }
        }
        offset += HEADER_SIZE as u64 + length as u64;
    }

    debug!(recovered = records.len(), "log scan complete");
    Ok((records, offset))
}

fn decode_frame(offset: u64, expected: u32, payload: &[u8]) -> LogResult<LogRecord> {
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(LogError::CrcMismatch {
            offset,
            expected,
            actual,
        });
    }
    Ok(bincode::deserialize(payload)?)
}

impl LogBackend for FileLog {
    fn manifest(&self) -> LogResult<Option<Manifest>> {
        let _segment = self.segment.lock().expect("log mutex poisoned");
        self.read_manifest()
    }

    fn initialize_manifest(&self, manifest: &Manifest) -> LogResult<Manifest> {
        let _segment = self.segment.lock().expect("log mutex poisoned");
        if let Some(stored) = self.read_manifest()? {
            return Ok(stored);
        }
        self.write_manifest(manifest)?;
        Ok(manifest.clone())
    }

    fn state(&self) -> LogResult<Option<StateDocument>> {
        let _segment = self.segment.lock().expect("log mutex poisoned");
        read_state(&self.dir)
    }

    fn replace_state(&self, expected_revision: Option<u64>, doc: &StateDocument) -> LogResult<()> {
        let _segment = self.segment.lock().expect("log mutex poisoned");
        let actual = read_state(&self.dir)?.map(|s| s.revision);
        if actual != expected_revision {
            return Err(LogError::RevisionConflict {
                expected: expected_revision,
                actual,
            });
        }
        self.write_state(doc)
    }

    fn upgrade(&self, expected: &Manifest, manifest: &Manifest, state: Option<&StateDocument>) -> LogResult<()> {
        let _segment = self.segment.lock().expect("log mutex poisoned");
        let stored = self.read_manifest()?;
        if stored.as_ref() != Some(expected) {
            return Err(LogError::ManifestMismatch {
                stored: stored.unwrap_or_else(|| expected.clone()),
                preferred: manifest.clone(),
            });
        }
        // The state document names its own format, so writing it before the
        // manifest never leaves a reader decoding with the wrong one.
        if let Some(state) = state {
            self.write_state(state)?;
        }
        self.write_manifest(manifest)
    }

    fn append(&self, correlation: Uuid, body: RecordBody) -> LogResult<u64> {
        let mut segment = self.segment.lock().expect("log mutex poisoned");
        let record = LogRecord {
            seq: segment.head(),
            correlation,
            body,
        };
        let payload = bincode::serialize(&record)?;
        let length = u32::try_from(payload.len())
            .map_err(|_| LogError::Codec(format!("record of {} bytes is too large", payload.len())))?;
        let crc = crc32fast::hash(&payload);

        let frame_offset = segment.offset;
        segment.writer.write_all(&length.to_le_bytes())?;
        segment.writer.write_all(&crc.to_le_bytes())?;
        segment.writer.write_all(&payload)?;
        segment.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            segment.writer.get_ref().sync_all()?;
        }
        segment.offset += HEADER_SIZE as u64 + payload.len() as u64;

        let seq = record.seq;
        segment.records.push_back((frame_offset, record));
        drop(segment);
        self.head.send_replace(seq + 1);
        debug!(seq, offset = frame_offset, len = payload.len(), %correlation, "log append");
        Ok(seq)
    }

    fn read_from(&self, position: u64) -> LogResult<Vec<LogRecord>> {
        let segment = self.segment.lock().expect("log mutex poisoned");
        if position < segment.first {
            return Err(LogError::Compacted {
                requested: position,
                first: segment.first,
            });
        }
        Ok(segment
            .records
            .iter()
            .filter(|(_, r)| r.seq >= position)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn head(&self) -> LogResult<u64> {
        Ok(self.segment.lock().expect("log mutex poisoned").head())
    }

    fn discard_before(&self, position: u64) -> LogResult<()> {
        let mut segment = self.segment.lock().expect("log mutex poisoned");
        let position = position.min(segment.head());
        if position <= segment.first {
            return Ok(());
        }
        let cut = segment
            .records
            .iter()
            .find(|(_, r)| r.seq >= position)
            .map(|(offset, _)| *offset)
            .unwrap_or(segment.offset);

        // Rewrite the retained suffix into a fresh file and swap it in.
        let log_path = self.dir.join(LOG_FILE);
        let bytes = fs::read(&log_path)?;
        let remaining = bytes.get(cut as usize..).unwrap_or_default();
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(remaining)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&log_path).map_err(|e| e.error)?;

        let file = OpenOptions::new().read(true).append(true).open(&log_path)?;
        segment.writer = BufWriter::new(file);
        segment.offset = remaining.len() as u64;
        segment.records.retain(|(_, r)| r.seq >= position);
        for (offset, _) in segment.records.iter_mut() {
            *offset -= cut;
        }
        segment.first = position;
        debug!(position, bytes_dropped = cut, "log compacted");
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }
}

impl std::fmt::Debug for FileLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLog").field("dir", &self.dir).finish()
    }
}
