//! # custos-core
//!
//! The tamper-evident audit chain engine.
//!
//! This crate provides:
//! - The canonical entry encoding and hash-chain primitives
//! - The store and compliance traits (`AuditStore`, `AdministrativeStore`,
//!   `Clock`, `ComplianceEngine`)
//! - The `ChainSequencer` that serializes appends per chain
//! - The `IntegrityVerifier` and `ComplianceAggregator` read paths
//! - The `AuditTrail` facade wiring them together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use custos_core::{AuditTrail, traits::{AuditStore, ComplianceEngine}};
//!
//! let trail = AuditTrail::new(store, compliance);
//! let entry = trail.record(&ctx, AuditEvent::new("ClientViewed", "Client"))?;
//! assert!(trail.verify(&ctx.chain(), VerifyRange::full())?.ok);
//! ```

pub mod canonical;
pub mod chain;
pub mod report;
pub mod sequencer;
pub mod trail;
pub mod traits;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use report::ComplianceAggregator;
pub use sequencer::{ChainSequencer, SequencerConfig};
pub use trail::AuditTrail;
pub use verifier::IntegrityVerifier;
