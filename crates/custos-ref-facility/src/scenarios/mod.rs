//! Facility reference scenarios.
//!
//! Each scenario is a self-contained module that wires real custos
//! components (in-memory store, standard compliance policy, audit trail)
//! to mock facility data and demonstrates one property of the chain.

use std::sync::Arc;

use custos_contracts::error::AuditResult;
use custos_core::{traits::AuditStore, AuditTrail};
use custos_policy::TomlComplianceEngine;
use custos_store::InMemoryAuditStore;

pub mod compliance_report;
pub mod concurrent_checkins;
pub mod sequential_chain;
pub mod tamper_detection;

/// A trail over `store` using the standard GDPR/ISO 27001 policy.
pub(crate) fn facility_trail(store: &Arc<InMemoryAuditStore>) -> AuditResult<AuditTrail> {
    Ok(AuditTrail::new(
        Arc::clone(store) as Arc<dyn AuditStore>,
        Arc::new(TomlComplianceEngine::standard()?),
    ))
}

/// First 12 hex digits of an entry id, for console output.
pub(crate) fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
