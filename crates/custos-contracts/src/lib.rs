//! # custos-contracts
//!
//! Shared types, errors, and report contracts for the custos audit trail.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, filters, and error types.

pub mod entry;
pub mod error;
pub mod filter;
pub mod report;
pub mod verify;
