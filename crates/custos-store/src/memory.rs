//! In-memory implementation of `AuditStore`.
//!
//! `InMemoryAuditStore` is the reference adapter. Each chain is a `Vec` of
//! entries plus a hash index, guarded by its own bounded-wait lock so chains
//! never contend with each other.
//!
//! Scans copy the requested window while the lock is held and then release
//! it, so a scan observes exactly the entries committed when it started.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use custos_contracts::{
    entry::{AuditEntry, ChainId, CommittedEntry},
    error::{StoreError, StoreResult},
    filter::ScanFilter,
};
use custos_core::traits::{AdministrativeStore, AuditStore, EntryStream};

use crate::DEFAULT_STORE_TIMEOUT;

// ── Per-chain state ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ChainLog {
    /// Committed entries; position is the sequence number.
    entries: Vec<AuditEntry>,

    /// hash → sequence, for `locate` and duplicate rejection.
    index: HashMap<String, u64>,
}

impl ChainLog {
    fn tail(&self) -> Option<String> {
        self.entries.last().map(|e| e.hash.clone())
    }

    fn committed(&self, sequence: u64) -> Option<CommittedEntry> {
        self.entries.get(sequence as usize).map(|entry| CommittedEntry {
            sequence,
            entry: entry.clone(),
        })
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

/// A process-local, append-only audit store.
///
/// Chains live as long as the store; there is no eviction.
pub struct InMemoryAuditStore {
    chains: Mutex<HashMap<ChainId, Arc<Mutex<ChainLog>>>>,
    timeout: Duration,
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_STORE_TIMEOUT)
    }

    /// Bound every lock wait by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn chain(&self, chain: &ChainId) -> Arc<Mutex<ChainLog>> {
        let mut chains = self.chains.lock();
        Arc::clone(chains.entry(chain.clone()).or_default())
    }

    fn with_log<R>(
        &self,
        chain: &ChainId,
        operation: &str,
        f: impl FnOnce(&mut ChainLog) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let log = self.chain(chain);
        let mut guard = log
            .try_lock_for(self.timeout)
            .ok_or_else(|| StoreError::Timeout {
                operation: operation.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            })?;
        f(&mut guard)
    }
}

impl AuditStore for InMemoryAuditStore {
    fn tail(&self, chain: &ChainId) -> StoreResult<Option<String>> {
        self.with_log(chain, "tail", |log| Ok(log.tail()))
    }

    fn append_if_tail(
        &self,
        chain: &ChainId,
        expected_tail: Option<&str>,
        entry: &AuditEntry,
    ) -> StoreResult<CommittedEntry> {
        self.with_log(chain, "append", |log| {
            let actual = log.tail();
            if actual.as_deref() != expected_tail {
                return Err(StoreError::Conflict {
                    expected: expected_tail.map(str::to_string),
                    actual,
                });
            }
            if log.index.contains_key(&entry.hash) {
                warn!(chain = %chain, hash = %entry.hash, "rejected duplicate hash");
                return Err(StoreError::DuplicateHash {
                    hash: entry.hash.clone(),
                });
            }

            let sequence = log.entries.len() as u64;
            log.entries.push(entry.clone());
            log.index.insert(entry.hash.clone(), sequence);
            Ok(CommittedEntry {
                sequence,
                entry: entry.clone(),
            })
        })
    }

    fn scan(&self, chain: &ChainId, filter: &ScanFilter) -> StoreResult<EntryStream<'_>> {
        let start = filter.start();
        let window: Vec<AuditEntry> = self.with_log(chain, "scan", |log| {
            let len = log.entries.len() as u64;
            let end = filter.to_sequence.map_or(len, |to| to.saturating_add(1).min(len));
            if start >= end {
                return Ok(Vec::new());
            }
            Ok(log.entries[start as usize..end as usize].to_vec())
        })?;

        debug!(chain = %chain, from = start, snapshot = window.len(), "memory scan");

        let filter = filter.clone();
        Ok(Box::new(
            window
                .into_iter()
                .zip(start..)
                .map(|(entry, sequence)| CommittedEntry { sequence, entry })
                .filter(move |c| filter.matches(c))
                .map(Ok),
        ))
    }

    fn locate(&self, chain: &ChainId, entry_id: &str) -> StoreResult<Option<CommittedEntry>> {
        self.with_log(chain, "locate", |log| {
            Ok(log
                .index
                .get(entry_id)
                .and_then(|&sequence| log.committed(sequence)))
        })
    }
}

impl AdministrativeStore for InMemoryAuditStore {
    fn replace_entry(
        &self,
        chain: &ChainId,
        sequence: u64,
        replacement: AuditEntry,
    ) -> StoreResult<AuditEntry> {
        self.with_log(chain, "replace", |log| {
            let slot = log
                .entries
                .get_mut(sequence as usize)
                .ok_or_else(|| StoreError::Unavailable {
                    reason: format!("chain '{chain}' has no entry at sequence {sequence}"),
                })?;

            warn!(chain = %chain, sequence, "administrative replacement of audit entry");
            let previous = std::mem::replace(slot, replacement);
            log.index.remove(&previous.hash);
            log.index.insert(slot.hash.clone(), sequence);
            Ok(previous)
        })
    }
}
