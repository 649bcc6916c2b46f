//! Hash-chain primitives: sealing entries and replaying a chain.
//!
//! An entry's hash is the lowercase hex SHA-256 of its canonical encoding
//! (see `canonical`), which includes `previous_hash`. Replay checks, in
//! append order:
//!
//! 1. **Linkage**: `previous_hash` equals the hash of the preceding entry
//!    (`None` for the head).
//! 2. **Digest**: the stored `hash` equals the digest recomputed from the
//!    entry's own fields.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use custos_contracts::{
    entry::{AuditEntry, AuditEvent, CallerContext, CommittedEntry, Origin},
    error::AuditResult,
    verify::{BreakKind, ChainBreak, VerificationResult},
};

use crate::canonical::{canonical_json, encode_entry, EntryFields};

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Recompute the hash an entry should carry from its own stored fields.
pub fn recompute_hash(entry: &AuditEntry) -> String {
    digest(&encode_entry(&EntryFields::of(entry)))
}

/// Drop sub-microsecond precision so a timestamp survives storage exactly.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// An event whose payloads are already canonical, ready to be sealed onto
/// whatever the chain tail turns out to be.
///
/// Preparing once and sealing per attempt keeps canonicalization failures
/// ahead of any store I/O and avoids redoing it on conflict retries.
#[derive(Debug, Clone)]
pub struct PreparedEvent {
    tenant: Option<String>,
    actor: String,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    description: Option<String>,
    before: Option<String>,
    after: Option<String>,
    origin: Origin,
}

impl PreparedEvent {
    /// Canonicalize `event`'s payloads under the caller's identity.
    pub fn new(ctx: &CallerContext, event: AuditEvent) -> AuditResult<Self> {
        let before = event.before.as_ref().map(canonical_json).transpose()?;
        let after = event.after.as_ref().map(canonical_json).transpose()?;

        Ok(Self {
            tenant: ctx.tenant_id.clone(),
            actor: ctx.actor_id.clone(),
            action: event.action,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            description: event.description,
            before,
            after,
            origin: ctx.origin.clone(),
        })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Build the immutable entry linked to `previous_hash`.
    pub fn seal(&self, timestamp: DateTime<Utc>, previous_hash: Option<String>) -> AuditEntry {
        let mut entry = AuditEntry {
            tenant: self.tenant.clone(),
            timestamp: truncate_to_micros(timestamp),
            actor: self.actor.clone(),
            action: self.action.clone(),
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            description: self.description.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            origin: self.origin.clone(),
            previous_hash,
            hash: String::new(),
        };
        entry.hash = recompute_hash(&entry);
        entry
    }
}

/// Incremental chain replay.
///
/// Feed committed entries in append order. The first failing check freezes
/// the replay; later entries are ignored.
#[derive(Debug, Default)]
pub struct ChainReplay {
    expected_prev: Option<String>,
    checked: u64,
    broken: Option<(Option<String>, ChainBreak)>,
}

impl ChainReplay {
    /// Replay from the chain head.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a window whose first entry must link to `predecessor_hash`.
    pub fn resume_after(predecessor_hash: String) -> Self {
        Self {
            expected_prev: Some(predecessor_hash),
            ..Self::default()
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }

    /// Check one entry. Returns `false` once the chain is broken.
    pub fn observe(&mut self, committed: &CommittedEntry) -> bool {
        if self.broken.is_some() {
            return false;
        }

        let entry = &committed.entry;

        if entry.previous_hash != self.expected_prev {
            warn!(
                sequence = committed.sequence,
                entry_id = %entry.id(),
                expected = ?self.expected_prev,
                found = ?entry.previous_hash,
                "audit chain linkage mismatch"
            );
            self.broken = Some((
                Some(entry.hash.clone()),
                ChainBreak {
                    sequence: committed.sequence,
                    kind: BreakKind::Linkage {
                        expected: self.expected_prev.clone(),
                        found: entry.previous_hash.clone(),
                    },
                },
            ));
            return false;
        }

        let recomputed = recompute_hash(entry);
        if recomputed != entry.hash {
            warn!(
                sequence = committed.sequence,
                entry_id = %entry.id(),
                recomputed = %recomputed,
                "audit entry digest mismatch"
            );
            self.broken = Some((
                Some(entry.hash.clone()),
                ChainBreak {
                    sequence: committed.sequence,
                    kind: BreakKind::Digest {
                        stored: entry.hash.clone(),
                        recomputed,
                    },
                },
            ));
            return false;
        }

        self.expected_prev = Some(entry.hash.clone());
        self.checked += 1;
        true
    }

    /// Record that the store could not decode the record at `sequence`.
    pub fn observe_unreadable(&mut self, sequence: u64, reason: String) {
        if self.broken.is_some() {
            return;
        }
        warn!(sequence, reason = %reason, "audit record unreadable");
        self.broken = Some((
            None,
            ChainBreak {
                sequence,
                kind: BreakKind::Unreadable { reason },
            },
        ));
    }

    pub fn finish(self) -> VerificationResult {
        match self.broken {
            None => VerificationResult::intact(self.checked),
            Some((break_at, failure)) => VerificationResult::broken(self.checked, break_at, failure),
        }
    }
}

/// Verify an in-memory chain, treating slice position as append order.
///
/// An empty slice is intact.
pub fn verify_chain(entries: &[AuditEntry]) -> VerificationResult {
    let mut replay = ChainReplay::new();
    for (i, entry) in entries.iter().enumerate() {
        let committed = CommittedEntry {
            sequence: i as u64,
            entry: entry.clone(),
        };
        if !replay.observe(&committed) {
            break;
        }
    }
    replay.finish()
}
