//! SQLite implementation of `AuditStore` (rusqlite, bundled).
//!
//! # Schema
//!
//! `audit_entries` holds one row per committed entry, keyed by
//! `(chain_id, seq)` with `(chain_id, hash)` unique. The full entry is kept
//! as JSON in `record`; the other columns exist for indexing.
//!
//! `audit_tails` holds the tail hash and next sequence per chain. A
//! conditional append reads and advances it inside a `BEGIN IMMEDIATE`
//! transaction, so the compare-and-append is atomic across every connection
//! to the database file, including those of other processes.

use std::path::Path;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use custos_contracts::{
    entry::{AuditEntry, ChainId, CommittedEntry},
    error::{StoreError, StoreResult},
    filter::ScanFilter,
};
use custos_core::traits::{AdministrativeStore, AuditStore, EntryStream};

use crate::DEFAULT_STORE_TIMEOUT;

/// Rows fetched per scan round trip.
const SCAN_PAGE: u64 = 256;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_entries (
    chain_id      TEXT    NOT NULL,
    seq           INTEGER NOT NULL,
    hash          TEXT    NOT NULL,
    previous_hash TEXT,
    timestamp_us  INTEGER NOT NULL,
    actor         TEXT    NOT NULL,
    action        TEXT    NOT NULL,
    entity_type   TEXT    NOT NULL,
    entity_id     TEXT,
    record        TEXT    NOT NULL,
    PRIMARY KEY (chain_id, seq),
    UNIQUE (chain_id, hash)
);
CREATE INDEX IF NOT EXISTS idx_audit_entries_entity
    ON audit_entries (chain_id, entity_type, entity_id);
CREATE TABLE IF NOT EXISTS audit_tails (
    chain_id  TEXT    PRIMARY KEY,
    tail_hash TEXT    NOT NULL,
    next_seq  INTEGER NOT NULL
);
";

/// Classify a rusqlite failure for `operation`.
fn store_error(operation: &str, timeout: Duration, e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Timeout {
                operation: operation.to_string(),
                after_ms: timeout.as_millis() as u64,
            }
        }
        _ => StoreError::Unavailable {
            reason: format!("sqlite {operation}: {e}"),
        },
    }
}

fn decode_record(sequence: u64, record: &str) -> StoreResult<CommittedEntry> {
    let entry: AuditEntry = serde_json::from_str(record).map_err(|e| StoreError::Corrupt {
        sequence,
        reason: e.to_string(),
    })?;
    Ok(CommittedEntry { sequence, entry })
}

fn encode_record(entry: &AuditEntry) -> StoreResult<String> {
    serde_json::to_string(entry).map_err(|e| StoreError::Unavailable {
        reason: format!("encode entry: {e}"),
    })
}

/// A durable audit store in one SQLite database.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
    timeout: Duration,
}

impl SqliteAuditStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_with_timeout(path, DEFAULT_STORE_TIMEOUT)
    }

    pub fn open_with_timeout<P: AsRef<Path>>(path: P, timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| store_error("open", timeout, e))?;
        let store = Self::init(conn, timeout)?;
        info!(path = %path.as_ref().display(), "opened sqlite audit store");
        Ok(store)
    }

    /// A private in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| store_error("open", DEFAULT_STORE_TIMEOUT, e))?;
        Self::init(conn, DEFAULT_STORE_TIMEOUT)
    }

    fn init(conn: Connection, timeout: Duration) -> StoreResult<Self> {
        conn.busy_timeout(timeout)
            .map_err(|e| store_error("configure", timeout, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| store_error("migrate", timeout, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            timeout,
        })
    }

    fn connection(&self, operation: &str) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .try_lock_for(self.timeout)
            .ok_or_else(|| StoreError::Timeout {
                operation: operation.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            })
    }

    /// Next sequence of `chain`, i.e. its committed length.
    fn next_seq(&self, chain: &ChainId) -> StoreResult<u64> {
        let conn = self.connection("scan")?;
        let next: Option<i64> = conn
            .query_row(
                "SELECT next_seq FROM audit_tails WHERE chain_id = ?1",
                params![chain.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| store_error("scan", self.timeout, e))?;
        Ok(next.unwrap_or(0) as u64)
    }

    /// Rows with `from <= seq < end`, at most one page.
    fn page(&self, chain: &ChainId, from: u64, end: u64) -> StoreResult<Vec<(u64, String)>> {
        let conn = self.connection("scan")?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT seq, record FROM audit_entries
                 WHERE chain_id = ?1 AND seq >= ?2 AND seq < ?3
                 ORDER BY seq LIMIT ?4",
            )
            .map_err(|e| store_error("scan", self.timeout, e))?;
        let rows = stmt
            .query_map(
                params![chain.as_str(), from as i64, end as i64, SCAN_PAGE as i64],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .map_err(|e| store_error("scan", self.timeout, e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| store_error("scan", self.timeout, e))
    }
}

impl AuditStore for SqliteAuditStore {
    fn tail(&self, chain: &ChainId) -> StoreResult<Option<String>> {
        let conn = self.connection("tail")?;
        conn.query_row(
            "SELECT tail_hash FROM audit_tails WHERE chain_id = ?1",
            params![chain.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| store_error("tail", self.timeout, e))
    }

    fn append_if_tail(
        &self,
        chain: &ChainId,
        expected_tail: Option<&str>,
        entry: &AuditEntry,
    ) -> StoreResult<CommittedEntry> {
        let record = encode_record(entry)?;
        let mut conn = self.connection("append")?;
        let err = |e| store_error("append", self.timeout, e);

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(err)?;

        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT tail_hash, next_seq FROM audit_tails WHERE chain_id = ?1",
                params![chain.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(err)?;
        let (actual, next_seq) = match current {
            Some((hash, next)) => (Some(hash), next),
            None => (None, 0),
        };

        if actual.as_deref() != expected_tail {
            return Err(StoreError::Conflict {
                expected: expected_tail.map(str::to_string),
                actual,
            });
        }

        let duplicate: Option<i64> = tx
            .query_row(
                "SELECT seq FROM audit_entries WHERE chain_id = ?1 AND hash = ?2",
                params![chain.as_str(), entry.hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(err)?;
        if duplicate.is_some() {
            warn!(chain = %chain, hash = %entry.hash, "rejected duplicate hash");
            return Err(StoreError::DuplicateHash {
                hash: entry.hash.clone(),
            });
        }

        tx.execute(
            "INSERT INTO audit_entries
                (chain_id, seq, hash, previous_hash, timestamp_us, actor, action,
                 entity_type, entity_id, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                chain.as_str(),
                next_seq,
                entry.hash,
                entry.previous_hash,
                entry.timestamp.timestamp_micros(),
                entry.actor,
                entry.action,
                entry.entity_type,
                entry.entity_id,
                record,
            ],
        )
        .map_err(err)?;
        tx.execute(
            "INSERT INTO audit_tails (chain_id, tail_hash, next_seq) VALUES (?1, ?2, ?3)
             ON CONFLICT(chain_id) DO UPDATE SET tail_hash = excluded.tail_hash,
                                                 next_seq = excluded.next_seq",
            params![chain.as_str(), entry.hash, next_seq + 1],
        )
        .map_err(err)?;
        tx.commit().map_err(err)?;

        debug!(chain = %chain, sequence = next_seq, "sqlite append");
        Ok(CommittedEntry {
            sequence: next_seq as u64,
            entry: entry.clone(),
        })
    }

    fn scan(&self, chain: &ChainId, filter: &ScanFilter) -> StoreResult<EntryStream<'_>> {
        let committed = self.next_seq(chain)?;
        let end = filter
            .to_sequence
            .map_or(committed, |to| to.saturating_add(1).min(committed));
        debug!(chain = %chain, from = filter.start(), end, "sqlite scan");

        Ok(Box::new(PagedScan {
            store: self,
            chain: chain.clone(),
            filter: filter.clone(),
            next: filter.start(),
            end,
            buffer: Vec::new().into_iter(),
            failed: false,
        }))
    }

    fn locate(&self, chain: &ChainId, entry_id: &str) -> StoreResult<Option<CommittedEntry>> {
        let row: Option<(i64, String)> = {
            let conn = self.connection("locate")?;
            conn.query_row(
                "SELECT seq, record FROM audit_entries WHERE chain_id = ?1 AND hash = ?2",
                params![chain.as_str(), entry_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| store_error("locate", self.timeout, e))?
        };
        row.map(|(seq, record)| decode_record(seq as u64, &record))
            .transpose()
    }
}

/// Lazy scan reading `SCAN_PAGE` rows at a time up to a fixed end sequence.
struct PagedScan<'a> {
    store: &'a SqliteAuditStore,
    chain: ChainId,
    filter: ScanFilter,
    next: u64,
    end: u64,
    buffer: std::vec::IntoIter<(u64, String)>,
    failed: bool,
}

impl Iterator for PagedScan<'_> {
    type Item = StoreResult<CommittedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some((seq, record)) = self.buffer.next() {
                match decode_record(seq, &record) {
                    Ok(committed) if self.filter.matches(&committed) => return Some(Ok(committed)),
                    Ok(_) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }
            if self.next >= self.end {
                return None;
            }
            match self.store.page(&self.chain, self.next, self.end) {
                Ok(rows) if rows.is_empty() => return None,
                Ok(rows) => {
                    self.next = rows.last().map_or(self.end, |(seq, _)| seq + 1);
                    self.buffer = rows.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl AdministrativeStore for SqliteAuditStore {
    fn replace_entry(
        &self,
        chain: &ChainId,
        sequence: u64,
        replacement: AuditEntry,
    ) -> StoreResult<AuditEntry> {
        let record = encode_record(&replacement)?;
        let mut conn = self.connection("replace")?;
        let err = |e| store_error("replace", self.timeout, e);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(err)?;

        let old: Option<String> = tx
            .query_row(
                "SELECT record FROM audit_entries WHERE chain_id = ?1 AND seq = ?2",
                params![chain.as_str(), sequence as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(err)?;
        let Some(old) = old else {
            return Err(StoreError::Unavailable {
                reason: format!("chain '{chain}' has no entry at sequence {sequence}"),
            });
        };
        let previous = decode_record(sequence, &old)?.entry;

        tx.execute(
            "UPDATE audit_entries
             SET hash = ?3, previous_hash = ?4, timestamp_us = ?5, actor = ?6, action = ?7,
                 entity_type = ?8, entity_id = ?9, record = ?10
             WHERE chain_id = ?1 AND seq = ?2",
            params![
                chain.as_str(),
                sequence as i64,
                replacement.hash,
                replacement.previous_hash,
                replacement.timestamp.timestamp_micros(),
                replacement.actor,
                replacement.action,
                replacement.entity_type,
                replacement.entity_id,
                record,
            ],
        )
        .map_err(err)?;
        tx.execute(
            "UPDATE audit_tails SET tail_hash = ?2
             WHERE chain_id = ?1 AND next_seq = ?3",
            params![chain.as_str(), replacement.hash, sequence as i64 + 1],
        )
        .map_err(err)?;
        tx.commit().map_err(err)?;

        warn!(chain = %chain, sequence, "administrative replacement of audit entry");
        Ok(previous)
    }
}
