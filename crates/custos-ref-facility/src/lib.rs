//! # custos-ref-facility
//!
//! Reference scenarios for the custos audit trail, set in a fictional
//! harm-reduction facility.
//!
//! 1. **Sequential Client Intake**: a linear chain verifies intact.
//! 2. **Tamper Detection**: a rewritten record is located exactly.
//! 3. **Concurrent Check-ins**: 50 simultaneous records, no forks.
//! 4. **Quarterly Compliance Report**: statistics, GDPR and ISO 27001
//!    findings, and a data-minimization failure.
//!
//! All data is hardcoded and fictional. No external systems are contacted.

use custos_contracts::error::AuditResult;

pub mod mock_data;
pub mod scenarios;

/// Run every scenario in order, printing each to stdout.
pub fn run_all() -> AuditResult<()> {
    scenarios::sequential_chain::run_scenario()?;
    scenarios::tamper_detection::run_scenario()?;
    scenarios::concurrent_checkins::run_scenario()?;
    scenarios::compliance_report::run_scenario()?;
    Ok(())
}
