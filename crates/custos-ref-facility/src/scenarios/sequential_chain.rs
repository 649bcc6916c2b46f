//! Scenario 1: Sequential Client Intake
//!
//! A front-desk worker registers a client, opens a consumption session and
//! closes it. The three entries form a linear chain that verifies intact.

use std::sync::Arc;

use custos_contracts::{
    entry::{AuditEntry, AuditEvent},
    error::AuditResult,
    verify::{VerificationResult, VerifyRange},
};
use custos_store::InMemoryAuditStore;

use super::{facility_trail, short};
use crate::mock_data::{clients, front_desk, new_session_id};

/// What the scenario produced.
pub struct SequentialOutcome {
    pub entries: Vec<AuditEntry>,
    pub verification: VerificationResult,
}

/// Record the intake sequence and verify the chain.
pub fn simulate() -> AuditResult<SequentialOutcome> {
    let store = Arc::new(InMemoryAuditStore::new());
    let trail = facility_trail(&store)?;

    let ctx = front_desk("staff-ana");
    let client = &clients()[0];
    let session_id = new_session_id();

    let registered = trail.record(
        &ctx,
        AuditEvent::new("ClientRegistered", "Client")
            .entity(client.id.clone())
            .after(&client.snapshot())?,
    )?;
    let opened = trail.record(
        &ctx,
        AuditEvent::new("SessionStarted", "Session")
            .entity(session_id.clone())
            .description(format!("{} checked in", client.alias)),
    )?;
    let closed = trail.record(
        &ctx,
        AuditEvent::new("SessionEnded", "Session")
            .entity(session_id)
            .description("Session closed without incident"),
    )?;

    let verification = trail.verify(&ctx.chain(), VerifyRange::full())?;
    Ok(SequentialOutcome {
        entries: vec![registered, opened, closed],
        verification,
    })
}

pub fn run_scenario() -> AuditResult<()> {
    println!("=== Scenario 1: Sequential Client Intake ===");
    println!();

    let outcome = simulate()?;
    for entry in &outcome.entries {
        println!(
            "  {:<18} {:<8} prev={:<12} id={}",
            entry.action,
            entry.entity_type,
            entry.previous_hash.as_deref().map(short).unwrap_or("(head)"),
            short(entry.id())
        );
    }
    println!();
    println!(
        "  Verification: ok={} checked={}",
        outcome.verification.ok, outcome.verification.checked
    );
    println!();
    Ok(())
}
