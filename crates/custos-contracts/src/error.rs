//! Error types for the custos audit pipeline.
//!
//! Two layers exist. `StoreError` is what a store adapter reports about a
//! single operation; `AuditError` is what callers of the trail see after the
//! sequencer has applied its retry and timeout rules.

use thiserror::Error;

/// Failure reported by an `AuditStore` adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The chain tail moved between the caller's read and its conditional
    /// append. Nothing was written.
    #[error("conditional append lost the race: expected tail {expected:?}, found {actual:?}")]
    Conflict {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// An entry with this hash already exists in the chain.
    #[error("hash '{hash}' already exists in the chain")]
    DuplicateHash { hash: String },

    /// The operation did not finish within the configured bound.
    ///
    /// For appends the outcome is unknown: the entry may or may not have
    /// been committed.
    #[error("store operation '{operation}' timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The backing medium could not be reached or returned an I/O error.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// A committed record could not be decoded.
    #[error("stored record at sequence {sequence} is unreadable: {reason}")]
    Corrupt { sequence: u64, reason: String },
}

/// Convenience alias for adapter results.
pub type StoreResult<T> = Result<T, StoreError>;

/// The error type returned by the audit trail to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// A payload could not be canonicalized. Raised before any hashing or
    /// store I/O; the caller's triggering action must fail as well.
    #[error("payload serialization failed: {reason}")]
    Serialization { reason: String },

    /// Every attempt to append lost the race for the chain tail.
    #[error("chain '{chain}' stayed contended after {attempts} append attempts")]
    Conflict { chain: String, attempts: u32 },

    /// The store failed in a way that is safe to retry later.
    #[error("audit store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// A store operation with no side effects timed out.
    #[error("audit store timed out during '{operation}'")]
    StoreTimeout { operation: String },

    /// An append timed out. The entry may or may not be committed; callers
    /// must re-query (`locate` / `tail`) before retrying.
    #[error("append of entry '{entry_id}' to chain '{chain}' has an unknown outcome")]
    AppendOutcomeUnknown { chain: String, entry_id: String },

    /// Two distinct entries produced the same digest.
    #[error("duplicate entry hash '{hash}'")]
    DuplicateHash { hash: String },

    /// A verification finding promoted to an error by
    /// `VerificationResult::ensure_intact`.
    #[error("audit chain broken at sequence {sequence}: {detail}")]
    ChainBroken { sequence: u64, detail: String },

    /// A verification or report range is malformed.
    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

impl AuditError {
    /// True when the same request may succeed if issued again later.
    ///
    /// `AppendOutcomeUnknown` is not retryable; re-issuing it blindly can
    /// duplicate a logical event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuditError::Conflict { .. }
                | AuditError::StoreUnavailable { .. }
                | AuditError::StoreTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Convenience alias used throughout the custos crates.
pub type AuditResult<T> = Result<T, AuditError>;
