//! Chain verification range and result types.

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};

/// Inclusive window of append-sequence numbers to verify.
///
/// `None` on either side means the start or the end of the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRange {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

impl VerifyRange {
    /// The whole chain.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn between(from: u64, to: u64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn is_full(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

/// Which check failed at the break point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakKind {
    /// `previous_hash` does not equal the hash of the preceding entry.
    Linkage {
        expected: Option<String>,
        found: Option<String>,
    },

    /// The stored `hash` differs from the digest recomputed over the entry's
    /// own fields.
    Digest { stored: String, recomputed: String },

    /// The stored record could not be decoded at all.
    Unreadable { reason: String },
}

/// The first point at which the replay diverged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub sequence: u64,
    pub kind: BreakKind,
}

/// Outcome of replaying a chain snapshot.
///
/// A broken chain is a finding carried here, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    /// Entries that passed both checks before the replay stopped.
    pub checked: u64,
    /// Identity (hash) of the entry where the replay stopped. `None` when the
    /// chain is intact, or when the record there was unreadable.
    pub break_at: Option<String>,
    pub failure: Option<ChainBreak>,
}

impl VerificationResult {
    pub fn intact(checked: u64) -> Self {
        Self {
            ok: true,
            checked,
            break_at: None,
            failure: None,
        }
    }

    pub fn broken(checked: u64, break_at: Option<String>, failure: ChainBreak) -> Self {
        Self {
            ok: false,
            checked,
            break_at,
            failure: Some(failure),
        }
    }

    /// Turn a failed verification into `AuditError::ChainBroken`.
    pub fn ensure_intact(&self) -> AuditResult<()> {
        match &self.failure {
            None => Ok(()),
            Some(failure) => Err(AuditError::ChainBroken {
                sequence: failure.sequence,
                detail: describe(&failure.kind),
            }),
        }
    }
}

fn describe(kind: &BreakKind) -> String {
    match kind {
        BreakKind::Linkage { expected, found } => format!(
            "previous_hash {} does not match predecessor {}",
            found.as_deref().unwrap_or("<none>"),
            expected.as_deref().unwrap_or("<none>")
        ),
        BreakKind::Digest { stored, recomputed } => {
            format!("stored hash {stored} differs from recomputed {recomputed}")
        }
        BreakKind::Unreadable { reason } => format!("record unreadable: {reason}"),
    }
}
