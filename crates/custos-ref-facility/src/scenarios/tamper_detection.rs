//! Scenario 2: Tamper Detection
//!
//! After three entries are committed, someone with raw storage access
//! rewrites the middle entry's `action`. Verification pinpoints the altered
//! entry. A second forger also recomputes the entry's hash; verification
//! then breaks at the successor, whose `previous_hash` no longer matches.

use std::sync::Arc;

use custos_contracts::{
    entry::{AuditEntry, AuditEvent, ChainId},
    error::{AuditError, AuditResult},
    verify::{VerificationResult, VerifyRange},
};
use custos_core::{chain::recompute_hash, traits::AdministrativeStore};
use custos_store::InMemoryAuditStore;

use super::{facility_trail, short};
use crate::mock_data::{clients, front_desk};

/// How the stored record is altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forgery {
    /// Change a field, leave the stored hash alone.
    EditOnly,
    /// Change a field and recompute the entry's own hash.
    EditAndRehash,
}

pub struct TamperOutcome {
    pub entries: Vec<AuditEntry>,
    pub before: VerificationResult,
    pub after: VerificationResult,
}

pub fn simulate(forgery: Forgery) -> AuditResult<TamperOutcome> {
    let store = Arc::new(InMemoryAuditStore::new());
    let trail = facility_trail(&store)?;
    let ctx = front_desk("staff-ben");
    let chain = ctx.chain();

    let mut entries = Vec::new();
    for (action, client) in ["ClientViewed", "ClientUpdated", "ClientViewed"]
        .into_iter()
        .zip(clients())
    {
        entries.push(trail.record(&ctx, AuditEvent::new(action, "Client").entity(client.id))?);
    }
    let before = trail.verify(&chain, VerifyRange::full())?;

    let mut forged = entries[1].clone();
    forged.action = "ClientViewed".to_string();
    if forgery == Forgery::EditAndRehash {
        forged.hash = recompute_hash(&forged);
    }
    rewrite(store.as_ref(), &chain, 1, forged)?;

    let after = trail.verify(&chain, VerifyRange::full())?;
    Ok(TamperOutcome {
        entries,
        before,
        after,
    })
}

fn rewrite(
    admin: &dyn AdministrativeStore,
    chain: &ChainId,
    sequence: u64,
    forged: AuditEntry,
) -> AuditResult<()> {
    admin
        .replace_entry(chain, sequence, forged)
        .map(|_| ())
        .map_err(|e| AuditError::StoreUnavailable {
            reason: e.to_string(),
        })
}

pub fn run_scenario() -> AuditResult<()> {
    println!("=== Scenario 2: Tamper Detection ===");
    println!();

    for forgery in [Forgery::EditOnly, Forgery::EditAndRehash] {
        let outcome = simulate(forgery)?;
        println!("  Forgery: {:?}", forgery);
        println!("  Before tampering: ok={}", outcome.before.ok);
        println!(
            "  After tampering:  ok={} break_at={}",
            outcome.after.ok,
            outcome.after.break_at.as_deref().map(short).unwrap_or("-")
        );
        if let Err(e) = outcome.after.ensure_intact() {
            println!("  {}", e);
        }
        println!();
    }
    Ok(())
}
