//! Integrity verification over a store snapshot.

use std::sync::Arc;

use tracing::{debug, info};

use custos_contracts::{
    entry::ChainId,
    error::{AuditError, AuditResult, StoreError},
    filter::ScanFilter,
    verify::{VerificationResult, VerifyRange},
};

use crate::{
    chain::ChainReplay,
    traits::{read_failure, AuditStore},
};

/// Replays chains in append order. Never writes.
pub struct IntegrityVerifier {
    store: Arc<dyn AuditStore>,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Verify `range` of `chain`.
    ///
    /// For a window starting after the head, the entry just before `from`
    /// anchors the expected linkage and is not counted in `checked`.
    ///
    /// # Errors
    ///
    /// `InvalidRange` when `from > to` or `from` lies beyond the snapshot;
    /// `StoreTimeout` / `StoreUnavailable` when the scan cannot proceed.
    /// A broken chain is a result, not an error.
    pub fn verify(&self, chain: &ChainId, range: VerifyRange) -> AuditResult<VerificationResult> {
        let start = range.from.unwrap_or(0);
        if let Some(to) = range.to {
            if start > to {
                return Err(AuditError::InvalidRange {
                    reason: format!("from sequence {start} is after to sequence {to}"),
                });
            }
        }

        let anchor = start.checked_sub(1);
        let filter = ScanFilter::sequences(anchor, range.to);
        let mut stream = self
            .store
            .scan(chain, &filter)
            .map_err(|e| read_failure("scan chain", e))?;

        let mut replay = match anchor {
            None => ChainReplay::new(),
            Some(anchor) => match stream.next() {
                Some(Ok(committed)) if committed.sequence == anchor => {
                    ChainReplay::resume_after(committed.entry.hash)
                }
                Some(Err(StoreError::Corrupt { sequence, reason })) if sequence == anchor => {
                    let mut replay = ChainReplay::new();
                    replay.observe_unreadable(sequence, reason);
                    return Ok(replay.finish());
                }
                Some(Err(e)) => return Err(read_failure("scan chain", e)),
                _ => {
                    return Err(AuditError::InvalidRange {
                        reason: format!("from sequence {start} is beyond the end of chain '{chain}'"),
                    })
                }
            },
        };

        let mut visited = 0u64;
        for item in stream {
            visited += 1;
            match item {
                Ok(committed) => {
                    if !replay.observe(&committed) {
                        break;
                    }
                }
                Err(StoreError::Corrupt { sequence, reason }) => {
                    replay.observe_unreadable(sequence, reason);
                    break;
                }
                Err(e) => return Err(read_failure("scan chain", e)),
            }
        }

        if anchor.is_some() && visited == 0 {
            return Err(AuditError::InvalidRange {
                reason: format!("from sequence {start} is beyond the end of chain '{chain}'"),
            });
        }

        let result = replay.finish();
        if result.ok {
            info!(chain = %chain, checked = result.checked, "audit chain verified");
        } else {
            debug!(
                chain = %chain,
                checked = result.checked,
                break_at = ?result.break_at,
                "audit chain verification failed"
            );
        }
        Ok(result)
    }
}
