//! Append-only JSON Lines implementation of `AuditStore`.
//!
//! Each chain lives in `<dir>/<stem>.jsonl`, one `CommittedEntry` per line,
//! `fsync`ed after every append. A line counts as committed only once its
//! terminating newline is on disk; a torn final line left by a crash is
//! invisible to readers and truncated by the next writer.
//!
//! Writers of a chain are serialized across processes by a `<stem>.lock`
//! sentinel created with `create_new`. Under the sentinel the writer first
//! re-reads any lines other processes appended, then compares the tail.
//! A sentinel left behind by a crashed process blocks appends to that chain
//! (they time out) until an operator removes it.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use custos_contracts::{
    entry::{AuditEntry, ChainId, CommittedEntry},
    error::{StoreError, StoreResult},
    filter::ScanFilter,
};
use custos_core::traits::{AdministrativeStore, AuditStore, EntryStream};

use crate::DEFAULT_STORE_TIMEOUT;

const SENTINEL_POLL: Duration = Duration::from_millis(2);

/// File stem for a chain: the chain id with `:` spelled `__` when that is
/// a safe file name, otherwise `chain-<sha256>`.
pub fn chain_file_stem(chain: &ChainId) -> String {
    let stem = chain.as_str().replace(':', "__");
    let safe = !stem.is_empty()
        && stem.len() <= 96
        && !stem.starts_with('.')
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if safe {
        stem
    } else {
        format!("chain-{}", hex::encode(Sha256::digest(chain.as_str().as_bytes())))
    }
}

fn io_unavailable(context: &str, path: &Path, e: io::Error) -> StoreError {
    StoreError::Unavailable {
        reason: format!("{context} {}: {e}", path.display()),
    }
}

// ── Line index ────────────────────────────────────────────────────────────────

/// What the last committed line says about the chain tail.
#[derive(Debug, Clone, Default)]
enum TailState {
    #[default]
    Empty,
    Hash(String),
    Unreadable { sequence: u64, reason: String },
}

/// In-memory index of one chain file, refreshed from disk on every access.
#[derive(Debug, Default)]
struct ChainIndex {
    /// Byte offset where each committed line starts.
    offsets: Vec<u64>,

    /// Length of the committed prefix of the file.
    committed_len: u64,

    tail: TailState,

    /// hash → sequence for every readable line.
    hashes: HashMap<String, u64>,
}

impl ChainIndex {
    /// Index complete lines appended since the last refresh.
    fn refresh(&mut self, path: &Path) -> StoreResult<()> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_unavailable("open", path, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| io_unavailable("stat", path, e))?
            .len();
        if len < self.committed_len {
            return Err(StoreError::Corrupt {
                sequence: self.offsets.len() as u64,
                reason: format!(
                    "{} shrank from {} to {} bytes",
                    path.display(),
                    self.committed_len,
                    len
                ),
            });
        }
        if len == self.committed_len {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.committed_len))
            .map_err(|e| io_unavailable("seek", path, e))?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| io_unavailable("read", path, e))?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }

            let sequence = self.offsets.len() as u64;
            self.offsets.push(self.committed_len);
            self.committed_len += read as u64;
            self.tail = match decode_line(&line, sequence) {
                Ok(committed) => {
                    self.hashes.insert(committed.entry.hash.clone(), sequence);
                    TailState::Hash(committed.entry.hash)
                }
                Err(StoreError::Corrupt { sequence, reason }) => {
                    TailState::Unreadable { sequence, reason }
                }
                Err(e) => return Err(e),
            };
        }
        Ok(())
    }

    fn tail(&self) -> StoreResult<Option<String>> {
        match &self.tail {
            TailState::Empty => Ok(None),
            TailState::Hash(h) => Ok(Some(h.clone())),
            TailState::Unreadable { sequence, reason } => Err(StoreError::Corrupt {
                sequence: *sequence,
                reason: reason.clone(),
            }),
        }
    }

    /// Byte range `[start, end)` covering sequences `from..=to`.
    fn byte_range(&self, from: u64, to: Option<u64>) -> Option<(u64, u64)> {
        let start = *self.offsets.get(from as usize)?;
        let end = match to {
            Some(to) => self
                .offsets
                .get(to as usize + 1)
                .copied()
                .unwrap_or(self.committed_len),
            None => self.committed_len,
        };
        (start < end).then_some((start, end))
    }
}

fn decode_line(line: &str, sequence: u64) -> StoreResult<CommittedEntry> {
    let committed: CommittedEntry =
        serde_json::from_str(line.trim_end()).map_err(|e| StoreError::Corrupt {
            sequence,
            reason: e.to_string(),
        })?;
    if committed.sequence != sequence {
        return Err(StoreError::Corrupt {
            sequence,
            reason: format!("line claims sequence {}", committed.sequence),
        });
    }
    Ok(committed)
}

fn encode_line(committed: &CommittedEntry) -> StoreResult<String> {
    let mut line = serde_json::to_string(committed).map_err(|e| StoreError::Unavailable {
        reason: format!("encode entry: {e}"),
    })?;
    line.push('\n');
    Ok(line)
}

// ── Durable write ─────────────────────────────────────────────────────────────

/// A chain file opened for append.
trait DurableFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl DurableFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `line` and flush it to disk.
///
/// A failed write or flush is rolled back to `committed_len`, so an
/// `Unavailable` error always means nothing was committed. If the rollback
/// fails too, the line may already be visible to readers and the outcome
/// is reported as a timeout.
fn persist_line(
    file: &mut impl DurableFile,
    path: &Path,
    line: &str,
    committed_len: u64,
) -> StoreResult<()> {
    let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.sync()) else {
        return Ok(());
    };
    match file.truncate(committed_len).and_then(|()| file.sync()) {
        Ok(()) => {
            warn!(path = %path.display(), error = %e, "append failed and was rolled back");
            Err(io_unavailable("write", path, e))
        }
        Err(rollback) => {
            error!(
                path = %path.display(),
                error = %e,
                rollback = %rollback,
                "append failed and could not be rolled back"
            );
            Err(StoreError::Timeout {
                operation: format!("append to {} (rollback failed: {rollback})", path.display()),
                after_ms: 0,
            })
        }
    }
}

// ── Cross-process sentinel ────────────────────────────────────────────────────

/// Exclusive right to write one chain file, held while the sentinel exists.
struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    fn acquire(path: PathBuf, deadline: Instant, timeout: Duration) -> StoreResult<Self> {
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    // Best effort; the file's existence is the lock.
                    let _ = writeln!(f, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Timeout {
                            operation: format!("acquire {}", path.display()),
                            after_ms: timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(SENTINEL_POLL);
                }
                Err(e) => return Err(io_unavailable("create", &path, e)),
            }
        }
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove chain lock");
        }
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

/// A durable audit store writing one JSON Lines file per chain.
///
/// Indexes of chains this handle has touched are kept for its lifetime.
pub struct JsonlAuditStore {
    dir: PathBuf,
    timeout: Duration,
    chains: Mutex<HashMap<ChainId, Arc<Mutex<ChainIndex>>>>,
}

impl JsonlAuditStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_timeout(dir, DEFAULT_STORE_TIMEOUT)
    }

    pub fn open_with_timeout(dir: impl Into<PathBuf>, timeout: Duration) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_unavailable("create directory", &dir, e))?;
        info!(dir = %dir.display(), "opened jsonl audit store");
        Ok(Self {
            dir,
            timeout,
            chains: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `chain`.
    pub fn chain_path(&self, chain: &ChainId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", chain_file_stem(chain)))
    }

    fn sentinel_path(&self, chain: &ChainId) -> PathBuf {
        self.dir.join(format!("{}.lock", chain_file_stem(chain)))
    }

    fn index(&self, chain: &ChainId) -> Arc<Mutex<ChainIndex>> {
        let mut chains = self.chains.lock();
        Arc::clone(chains.entry(chain.clone()).or_default())
    }

    fn lock_timeout(&self, operation: &str) -> StoreError {
        StoreError::Timeout {
            operation: operation.to_string(),
            after_ms: self.timeout.as_millis() as u64,
        }
    }

    /// Lock and refresh the chain's index.
    fn with_index<R>(
        &self,
        chain: &ChainId,
        operation: &str,
        f: impl FnOnce(&mut ChainIndex, &Path) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let index = self.index(chain);
        let mut guard = index
            .try_lock_for(self.timeout)
            .ok_or_else(|| self.lock_timeout(operation))?;
        let path = self.chain_path(chain);
        guard.refresh(&path)?;
        f(&mut guard, &path)
    }

    fn read_line_at(path: &Path, offset: u64, sequence: u64) -> StoreResult<CommittedEntry> {
        let mut file = File::open(path).map_err(|e| io_unavailable("open", path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| io_unavailable("seek", path, e))?;
        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .map_err(|e| io_unavailable("read", path, e))?;
        decode_line(&line, sequence)
    }
}

impl AuditStore for JsonlAuditStore {
    fn tail(&self, chain: &ChainId) -> StoreResult<Option<String>> {
        self.with_index(chain, "tail", |index, _| index.tail())
    }

    fn append_if_tail(
        &self,
        chain: &ChainId,
        expected_tail: Option<&str>,
        entry: &AuditEntry,
    ) -> StoreResult<CommittedEntry> {
        let deadline = Instant::now() + self.timeout;
        let index = self.index(chain);
        let mut index = index
            .try_lock_for(self.timeout)
            .ok_or_else(|| self.lock_timeout("append"))?;
        let _sentinel = Sentinel::acquire(self.sentinel_path(chain), deadline, self.timeout)?;

        let path = self.chain_path(chain);
        index.refresh(&path)?;

        let actual = index.tail()?;
        if actual.as_deref() != expected_tail {
            return Err(StoreError::Conflict {
                expected: expected_tail.map(str::to_string),
                actual,
            });
        }
        if index.hashes.contains_key(&entry.hash) {
            warn!(chain = %chain, hash = %entry.hash, "rejected duplicate hash");
            return Err(StoreError::DuplicateHash {
                hash: entry.hash.clone(),
            });
        }

        let committed = CommittedEntry {
            sequence: index.offsets.len() as u64,
            entry: entry.clone(),
        };
        let line = encode_line(&committed)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_unavailable("open", &path, e))?;
        let len = file
            .metadata()
            .map_err(|e| io_unavailable("stat", &path, e))?
            .len();
        if len > index.committed_len {
            warn!(
                path = %path.display(),
                torn_bytes = len - index.committed_len,
                "truncating torn trailing record"
            );
            file.set_len(index.committed_len)
                .map_err(|e| io_unavailable("truncate", &path, e))?;
        }
        persist_line(&mut file, &path, &line, index.committed_len)?;

        let offset = index.committed_len;
        index.offsets.push(offset);
        index.committed_len += line.len() as u64;
        index.hashes.insert(entry.hash.clone(), committed.sequence);
        index.tail = TailState::Hash(entry.hash.clone());

        debug!(chain = %chain, sequence = committed.sequence, offset, "jsonl append");
        Ok(committed)
    }

    fn scan(&self, chain: &ChainId, filter: &ScanFilter) -> StoreResult<EntryStream<'_>> {
        let start = filter.start();
        let snapshot = self.with_index(chain, "scan", |index, path| {
            Ok(index
                .byte_range(start, filter.to_sequence)
                .map(|range| (range, path.to_path_buf())))
        })?;

        let Some(((begin, end), path)) = snapshot else {
            return Ok(Box::new(std::iter::empty()));
        };
        debug!(chain = %chain, from = start, bytes = end - begin, "jsonl scan");

        let mut file = File::open(&path).map_err(|e| io_unavailable("open", &path, e))?;
        file.seek(SeekFrom::Start(begin))
            .map_err(|e| io_unavailable("seek", &path, e))?;
        let lines = BufReader::new(file.take(end - begin)).lines();

        let filter = filter.clone();
        Ok(Box::new(
            lines
                .zip(start..)
                .map(move |(line, sequence)| {
                    let line = line.map_err(|e| io_unavailable("read", &path, e))?;
                    decode_line(&line, sequence)
                })
                .filter(move |item| match item {
                    Ok(committed) => filter.matches(committed),
                    Err(_) => true,
                }),
        ))
    }

    fn locate(&self, chain: &ChainId, entry_id: &str) -> StoreResult<Option<CommittedEntry>> {
        self.with_index(chain, "locate", |index, path| {
            let Some(&sequence) = index.hashes.get(entry_id) else {
                return Ok(None);
            };
            let offset = index.offsets[sequence as usize];
            Self::read_line_at(path, offset, sequence).map(Some)
        })
    }
}

impl AdministrativeStore for JsonlAuditStore {
    /// Rewrite the chain file with one record replaced.
    ///
    /// The file is rebuilt beside the original and renamed over it under the
    /// chain's sentinel.
    fn replace_entry(
        &self,
        chain: &ChainId,
        sequence: u64,
        replacement: AuditEntry,
    ) -> StoreResult<AuditEntry> {
        let deadline = Instant::now() + self.timeout;
        let index = self.index(chain);
        let mut index = index
            .try_lock_for(self.timeout)
            .ok_or_else(|| self.lock_timeout("replace"))?;
        let _sentinel = Sentinel::acquire(self.sentinel_path(chain), deadline, self.timeout)?;

        let path = self.chain_path(chain);
        index.refresh(&path)?;
        if sequence >= index.offsets.len() as u64 {
            return Err(StoreError::Unavailable {
                reason: format!("chain '{chain}' has no entry at sequence {sequence}"),
            });
        }

        let original = fs::read_to_string(&path).map_err(|e| io_unavailable("read", &path, e))?;
        let mut rebuilt = String::with_capacity(original.len());
        let mut previous = None;
        for (i, line) in original.split_inclusive('\n').enumerate() {
            if !line.ends_with('\n') {
                break;
            }
            if i as u64 == sequence {
                previous = Some(decode_line(line, sequence)?.entry);
                rebuilt.push_str(&encode_line(&CommittedEntry {
                    sequence,
                    entry: replacement.clone(),
                })?);
            } else {
                rebuilt.push_str(line);
            }
        }
        let previous = previous.ok_or_else(|| StoreError::Corrupt {
            sequence,
            reason: "record vanished during rewrite".to_string(),
        })?;

        let staging = path.with_extension("jsonl.rewrite");
        fs::write(&staging, rebuilt.as_bytes()).map_err(|e| io_unavailable("write", &staging, e))?;
        File::open(&staging)
            .and_then(|f| f.sync_all())
            .map_err(|e| io_unavailable("fsync", &staging, e))?;
        fs::rename(&staging, &path).map_err(|e| io_unavailable("rename", &path, e))?;

        warn!(chain = %chain, sequence, "administrative replacement of audit entry");
        *index = ChainIndex::default();
        index.refresh(&path)?;
        Ok(previous)
    }
}
