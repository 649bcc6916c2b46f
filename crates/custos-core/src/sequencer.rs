//! The chain sequencer: the only writer of audit entries.
//!
//! Per append:
//!
//!   canonicalize → lock chain (in-process) → read tail → seal → conditional append
//!
//! The in-process per-chain lock removes contention between threads of this
//! process. It is not the correctness boundary: the store's
//! `append_if_tail` is, so a second process writing the same chain produces
//! a `Conflict` and a bounded retry, never a fork.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use custos_contracts::{
    entry::{AuditEntry, AuditEvent, CallerContext, ChainId},
    error::{AuditError, AuditResult, StoreError},
};

use crate::{
    chain::PreparedEvent,
    traits::{read_failure, AuditStore, Clock},
};

/// Retry and timeout settings for appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Conditional-append attempts before `AuditError::Conflict` is returned.
    pub max_attempts: u32,
    /// Ceiling of the first backoff after a conflict; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound on any single backoff.
    pub backoff_max_ms: u64,
    /// Longest wait for this process's per-chain lock.
    pub lock_timeout_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 5,
            backoff_max_ms: 200,
            lock_timeout_ms: 5_000,
        }
    }
}

impl SequencerConfig {
    pub fn validate(&self) -> AuditResult<()> {
        if self.max_attempts == 0 {
            return Err(AuditError::ConfigError {
                reason: "sequencer.max_attempts must be at least 1".to_string(),
            });
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(AuditError::ConfigError {
                reason: "sequencer.backoff_base_ms exceeds backoff_max_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Backoff ceiling after the `attempt`-th conflict (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// A random sleep in `[backoff / 2, backoff]`, so writers that collided
    /// do not retry in lockstep.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt);
        let floor = ceiling / 2;
        if ceiling == floor {
            return ceiling;
        }
        rand::thread_rng().gen_range(floor..=ceiling)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Serializes appends per chain and drives the conditional-append loop.
pub struct ChainSequencer {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    config: SequencerConfig,
    /// One gate per chain ever appended to. Never evicted; the set of
    /// chains is the set of tenants, which is bounded.
    gates: Mutex<HashMap<ChainId, Arc<Mutex<()>>>>,
}

impl ChainSequencer {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>, config: SequencerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Seal `event` onto the caller's chain and commit it.
    ///
    /// # Errors
    ///
    /// - `Serialization` if a payload cannot be canonicalized (nothing is
    ///   read or written)
    /// - `Conflict` once `max_attempts` conditional appends have lost
    /// - `AppendOutcomeUnknown` if the append itself timed out
    /// - `StoreTimeout` / `StoreUnavailable` for failures before any write
    /// - `DuplicateHash` if the store already holds the sealed hash
    pub fn append(&self, ctx: &CallerContext, event: AuditEvent) -> AuditResult<AuditEntry> {
        let prepared = PreparedEvent::new(ctx, event)?;
        let chain = ctx.chain();

        let gate = self.gate(&chain);
        let _permit = gate.try_lock_for(self.config.lock_timeout()).ok_or_else(|| {
            AuditError::StoreTimeout {
                operation: format!("lock chain '{chain}'"),
            }
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let tail = self
                .store
                .tail(&chain)
                .map_err(|e| read_failure("read chain tail", e))?;
            let entry = prepared.seal(self.clock.now(), tail.clone());

            debug!(
                chain = %chain,
                attempt,
                entry_id = %entry.id(),
                "attempting conditional append"
            );

            match self.store.append_if_tail(&chain, tail.as_deref(), &entry) {
                Ok(committed) => {
                    info!(
                        chain = %chain,
                        sequence = committed.sequence,
                        entry_id = %committed.entry.id(),
                        action = %prepared.action(),
                        actor = %ctx.actor_id,
                        "audit entry committed"
                    );
                    return Ok(committed.entry);
                }
                Err(StoreError::Conflict { actual, .. }) => {
                    warn!(
                        chain = %chain,
                        attempt,
                        expected = ?tail,
                        actual = ?actual,
                        "lost race for chain tail"
                    );
                    if attempt >= self.config.max_attempts {
                        return Err(AuditError::Conflict {
                            chain: chain.to_string(),
                            attempts: attempt,
                        });
                    }
                    thread::sleep(self.config.jittered_backoff(attempt));
                }
                Err(StoreError::Timeout { after_ms, .. }) => {
                    warn!(
                        chain = %chain,
                        entry_id = %entry.id(),
                        after_ms,
                        "append timed out; outcome unknown"
                    );
                    return Err(AuditError::AppendOutcomeUnknown {
                        chain: chain.to_string(),
                        entry_id: entry.hash,
                    });
                }
                Err(StoreError::DuplicateHash { hash }) => {
                    error!(chain = %chain, hash = %hash, "duplicate audit entry hash");
                    return Err(AuditError::DuplicateHash { hash });
                }
                Err(other) => {
                    return Err(AuditError::StoreUnavailable {
                        reason: format!("append to chain '{chain}': {other}"),
                    });
                }
            }
        }
    }

    fn gate(&self, chain: &ChainId) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry(chain.clone()).or_default())
    }
}
