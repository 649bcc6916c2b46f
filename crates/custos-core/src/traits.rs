//! Trait definitions at the edges of the audit core.
//!
//! - `AuditStore`: append-only persistence (no update, no delete)
//! - `AdministrativeStore`: segregated forensic capability, never handed to
//!   the recording path
//! - `Clock`: source of entry timestamps
//! - `ComplianceEngine`: policy predicates folded over a report scan
//!
//! The sequencer, verifier, and `AuditTrail` hold only `Arc<dyn AuditStore>`;
//! nothing on the recording path can reach a mutating verb.

use chrono::{DateTime, Utc};

use custos_contracts::{
    entry::{AuditEntry, ChainId, CommittedEntry},
    error::{AuditError, StoreError, StoreResult},
    filter::ScanFilter,
    report::{ComplianceAssessment, ReportQuery},
};

/// Lazy, append-ordered sequence of committed entries.
pub type EntryStream<'a> = Box<dyn Iterator<Item = StoreResult<CommittedEntry>> + 'a>;

/// The persistence contract the audit core depends on.
///
/// Implementations must make `append_if_tail` atomic with respect to every
/// other writer of the same chain, including writers in other processes.
pub trait AuditStore: Send + Sync {
    /// Hash of the most recently committed entry, or `None` for an empty
    /// chain.
    fn tail(&self, chain: &ChainId) -> StoreResult<Option<String>>;

    /// Append `entry` only if the chain's tail still equals `expected_tail`.
    ///
    /// Returns `StoreError::Conflict` without writing if the tail moved,
    /// `StoreError::DuplicateHash` if the hash is already present, and
    /// `StoreError::Timeout` if the outcome could not be determined in time.
    fn append_if_tail(
        &self,
        chain: &ChainId,
        expected_tail: Option<&str>,
        entry: &AuditEntry,
    ) -> StoreResult<CommittedEntry>;

    /// Stream the entries selected by `filter` in append order.
    ///
    /// The stream covers the snapshot of entries committed when `scan` was
    /// called; later appends are not observed and partially written records
    /// are never yielded.
    fn scan(&self, chain: &ChainId, filter: &ScanFilter) -> StoreResult<EntryStream<'_>>;

    /// Find a committed entry by its identity.
    fn locate(&self, chain: &ChainId, entry_id: &str) -> StoreResult<Option<CommittedEntry>>;
}

/// Forensic and lawful-erasure access to stored entries.
///
/// Kept separate from `AuditStore` so the recording path cannot depend on
/// it. Any use breaks the chain from `sequence` onward, which `verify` will
/// report.
pub trait AdministrativeStore: Send + Sync {
    /// Overwrite the record at `sequence`, returning the previous entry.
    fn replace_entry(
        &self,
        chain: &ChainId,
        sequence: u64,
        replacement: AuditEntry,
    ) -> StoreResult<AuditEntry>;
}

/// Source of the timestamps written into new entries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Compliance predicates evaluated over one report pass.
///
/// Implementations are read-only: they assert properties of the chain and
/// never enforce them (no entry is ever deleted to satisfy retention).
pub trait ComplianceEngine: Send + Sync {
    /// Start a fresh fold for `query`, evaluated as of `as_of`.
    fn begin(&self, query: &ReportQuery, as_of: DateTime<Utc>) -> Box<dyn ComplianceFold>;
}

/// Streaming state of one compliance evaluation.
pub trait ComplianceFold {
    /// Called for every entry in the chain snapshot.
    fn observe_chain(&mut self, entry: &AuditEntry);

    /// Called for every entry the report query selects.
    fn observe_selected(&mut self, entry: &AuditEntry);

    /// Produce the assessment once the scan is exhausted.
    fn conclude(self: Box<Self>, integrity_ok: bool) -> ComplianceAssessment;
}

/// Map a failure of a side-effect-free store call to the caller-facing error.
pub(crate) fn read_failure(operation: &str, err: StoreError) -> AuditError {
    match err {
        StoreError::Timeout { .. } => AuditError::StoreTimeout {
            operation: operation.to_string(),
        },
        other => AuditError::StoreUnavailable {
            reason: format!("{operation}: {other}"),
        },
    }
}
