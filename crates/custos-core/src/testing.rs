//! Test doubles shared by the core's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

use custos_contracts::{
    entry::{AuditEntry, ChainId, CommittedEntry},
    error::{StoreError, StoreResult},
    filter::ScanFilter,
    report::{ComplianceAssessment, ComplianceFinding, ReportQuery},
};

use crate::traits::{AuditStore, Clock, ComplianceEngine, ComplianceFold, EntryStream};

/// Vec-backed store with fault injection.
#[derive(Default)]
pub struct VecStore {
    chains: Mutex<HashMap<ChainId, Vec<AuditEntry>>>,
    /// Number of upcoming appends to reject with `Conflict`.
    pub conflicts_remaining: AtomicU32,
    pub time_out_appends: AtomicBool,
    pub tail_calls: AtomicU32,
    pub append_calls: AtomicU32,
}

impl VecStore {
    pub fn entries(&self, chain: &ChainId) -> Vec<AuditEntry> {
        self.chains.lock().unwrap().get(chain).cloned().unwrap_or_default()
    }

    /// Tamper with a stored entry in place.
    pub fn mutate(&self, chain: &ChainId, sequence: u64, f: impl FnOnce(&mut AuditEntry)) {
        let mut chains = self.chains.lock().unwrap();
        let entry = chains
            .get_mut(chain)
            .and_then(|c| c.get_mut(sequence as usize))
            .unwrap();
        f(entry);
    }
}

impl AuditStore for VecStore {
    fn tail(&self, chain: &ChainId) -> StoreResult<Option<String>> {
        self.tail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .chains
            .lock()
            .unwrap()
            .get(chain)
            .and_then(|c| c.last())
            .map(|e| e.hash.clone()))
    }

    fn append_if_tail(
        &self,
        chain: &ChainId,
        expected_tail: Option<&str>,
        entry: &AuditEntry,
    ) -> StoreResult<CommittedEntry> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.time_out_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout {
                operation: "append".to_string(),
                after_ms: 1,
            });
        }

        let mut chains = self.chains.lock().unwrap();
        let entries = chains.entry(chain.clone()).or_default();
        let actual = entries.last().map(|e| e.hash.clone());

        if self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict {
                expected: expected_tail.map(str::to_string),
                actual,
            });
        }
        if actual.as_deref() != expected_tail {
            return Err(StoreError::Conflict {
                expected: expected_tail.map(str::to_string),
                actual,
            });
        }
        if entries.iter().any(|e| e.hash == entry.hash) {
            return Err(StoreError::DuplicateHash {
                hash: entry.hash.clone(),
            });
        }

        entries.push(entry.clone());
        Ok(CommittedEntry {
            sequence: entries.len() as u64 - 1,
            entry: entry.clone(),
        })
    }

    fn scan(&self, chain: &ChainId, filter: &ScanFilter) -> StoreResult<EntryStream<'_>> {
        let snapshot = self.entries(chain);
        let filter = filter.clone();
        Ok(Box::new(
            snapshot
                .into_iter()
                .enumerate()
                .map(|(i, entry)| CommittedEntry {
                    sequence: i as u64,
                    entry,
                })
                .filter(move |c| filter.matches(c))
                .map(Ok),
        ))
    }

    fn locate(&self, chain: &ChainId, entry_id: &str) -> StoreResult<Option<CommittedEntry>> {
        Ok(self
            .entries(chain)
            .into_iter()
            .enumerate()
            .find(|(_, e)| e.hash == entry_id)
            .map(|(i, entry)| CommittedEntry {
                sequence: i as u64,
                entry,
            }))
    }
}

/// Clock pinned to a settable instant (default 2026-06-01T12:00:00Z).
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(Mutex::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        ))
    }
}

impl FixedClock {
    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Minimal policy: a retention horizon, one credential marker, and an
/// integrity finding.
pub struct MarkerEngine {
    retention_years: i64,
    marker: String,
}

impl MarkerEngine {
    pub fn new(retention_years: i64, marker: &str) -> Self {
        Self {
            retention_years,
            marker: marker.to_lowercase(),
        }
    }
}

impl ComplianceEngine for MarkerEngine {
    fn begin(&self, _query: &ReportQuery, as_of: DateTime<Utc>) -> Box<dyn ComplianceFold> {
        Box::new(MarkerFold {
            horizon: as_of - Duration::days(365 * self.retention_years),
            marker: self.marker.clone(),
            retention_ok: true,
            minimization_ok: true,
        })
    }
}

struct MarkerFold {
    horizon: DateTime<Utc>,
    marker: String,
    retention_ok: bool,
    minimization_ok: bool,
}

impl ComplianceFold for MarkerFold {
    fn observe_chain(&mut self, entry: &AuditEntry) {
        if entry.timestamp < self.horizon {
            self.retention_ok = false;
        }
    }

    fn observe_selected(&mut self, entry: &AuditEntry) {
        let leaks = [&entry.before, &entry.after]
            .into_iter()
            .flatten()
            .any(|p| p.to_lowercase().contains(&self.marker));
        if leaks {
            self.minimization_ok = false;
        }
    }

    fn conclude(self: Box<Self>, integrity_ok: bool) -> ComplianceAssessment {
        ComplianceAssessment {
            data_minimization_ok: self.minimization_ok,
            retention_ok: self.retention_ok,
            checks: vec![ComplianceFinding {
                check_id: "integrity".to_string(),
                framework: "TEST".to_string(),
                description: "Audit trail integrity".to_string(),
                satisfied: integrity_ok,
            }],
        }
    }
}
