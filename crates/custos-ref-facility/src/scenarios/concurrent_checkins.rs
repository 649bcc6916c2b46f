//! Scenario 3: Concurrent Check-ins
//!
//! Fifty check-ins arrive at once from several desks. Every record lands on
//! the same tenant chain; the sequencer and the store's conditional append
//! keep it linear.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use custos_contracts::{
    entry::AuditEvent,
    error::AuditResult,
    filter::ScanFilter,
    verify::{VerificationResult, VerifyRange},
};
use custos_store::InMemoryAuditStore;

use super::facility_trail;
use crate::mock_data::{front_desk, new_session_id};

pub const CHECKINS: usize = 50;

pub struct ConcurrentOutcome {
    pub committed: usize,
    pub distinct_predecessors: usize,
    pub failures: usize,
    pub verification: VerificationResult,
}

pub fn simulate(checkins: usize) -> AuditResult<ConcurrentOutcome> {
    let store = Arc::new(InMemoryAuditStore::new());
    let trail = facility_trail(&store)?;
    let chain = front_desk("any").chain();

    let failures = thread::scope(|s| {
        let handles: Vec<_> = (0..checkins)
            .map(|i| {
                let trail = &trail;
                s.spawn(move || {
                    let ctx = front_desk(&format!("desk-{}", i % 4));
                    trail.record(
                        &ctx,
                        AuditEvent::new("SessionStarted", "Session").entity(new_session_id()),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_or(true, |r| r.is_err()))
            .filter(|failed| *failed)
            .count()
    });

    let history = trail.history(&chain, &ScanFilter::all())?;
    let distinct_predecessors = history
        .iter()
        .map(|c| c.entry.previous_hash.clone())
        .collect::<HashSet<_>>()
        .len();
    let verification = trail.verify(&chain, VerifyRange::full())?;

    Ok(ConcurrentOutcome {
        committed: history.len(),
        distinct_predecessors,
        failures,
        verification,
    })
}

pub fn run_scenario() -> AuditResult<()> {
    println!("=== Scenario 3: Concurrent Check-ins ===");
    println!();

    let outcome = simulate(CHECKINS)?;
    println!("  Concurrent records:       {}", CHECKINS);
    println!("  Committed entries:        {}", outcome.committed);
    println!("  Distinct previous_hash:   {}", outcome.distinct_predecessors);
    println!("  Failed records:           {}", outcome.failures);
    println!(
        "  Verification:             ok={} checked={}",
        outcome.verification.ok, outcome.verification.checked
    );
    println!();
    Ok(())
}
