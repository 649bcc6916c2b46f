//! Compliance report query and result types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entry::{AuditEntry, ChainId},
    verify::VerificationResult,
};

/// Parameters of a compliance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportQuery {
    /// Inclusive lower bound on entry timestamps.
    pub from: DateTime<Utc>,
    /// Inclusive upper bound on entry timestamps.
    pub to: DateTime<Utc>,
    pub entity_type: Option<String>,
    pub actor: Option<String>,
    pub action: Option<String>,
    /// Maximum number of `EntrySummary` rows carried in the report. Counts
    /// and predicates always cover every matching entry.
    pub entry_limit: usize,
}

impl ReportQuery {
    pub const DEFAULT_ENTRY_LIMIT: usize = 100;

    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            entity_type: None,
            actor: None,
            action: None,
            entry_limit: Self::DEFAULT_ENTRY_LIMIT,
        }
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn entry_limit(mut self, limit: usize) -> Self {
        self.entry_limit = limit;
        self
    }

    /// True when `entry` falls in the window and passes every filter.
    pub fn selects(&self, entry: &AuditEntry) -> bool {
        if entry.timestamp < self.from || entry.timestamp > self.to {
            return false;
        }
        if self.entity_type.as_ref().is_some_and(|t| &entry.entity_type != t) {
            return false;
        }
        if self.actor.as_ref().is_some_and(|a| &entry.actor != a) {
            return false;
        }
        if self.action.as_ref().is_some_and(|a| &entry.action != a) {
            return false;
        }
        true
    }
}

/// Report row describing one selected entry. Payloads are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub ip: String,
    pub hash: String,
}

impl EntrySummary {
    pub fn of(sequence: u64, entry: &AuditEntry) -> Self {
        Self {
            sequence,
            timestamp: entry.timestamp,
            actor: entry.actor.clone(),
            action: entry.action.clone(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            ip: entry.origin.ip.clone(),
            hash: entry.hash.clone(),
        }
    }
}

/// Outcome of one named compliance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub check_id: String,
    /// Regulatory framework the check belongs to (e.g. `"gdpr-art32"`).
    pub framework: String,
    pub description: String,
    pub satisfied: bool,
}

/// What a compliance engine concluded after folding over a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceAssessment {
    /// No selected `before`/`after` payload contains a credential marker.
    pub data_minimization_ok: bool,
    /// No entry in the chain is older than the retention horizon.
    pub retention_ok: bool,
    pub checks: Vec<ComplianceFinding>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    /// Entries selected by the query window and filters.
    pub total_entries: u64,
    /// Entries in the chain snapshot that were replayed.
    pub chain_entries: u64,
}

/// Aggregated audit statistics and compliance predicates for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub chain: ChainId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub totals: ReportTotals,
    pub integrity_ok: bool,
    pub integrity: VerificationResult,
    pub action_stats: BTreeMap<String, u64>,
    pub entity_stats: BTreeMap<String, u64>,
    pub actor_stats: BTreeMap<String, u64>,
    pub data_minimization_ok: bool,
    pub retention_ok: bool,
    pub checks: Vec<ComplianceFinding>,
    /// Up to `ReportQuery::entry_limit` selected entries in append order.
    pub entries: Vec<EntrySummary>,
}

impl ComplianceReport {
    /// Human-readable period label, e.g. `2026-01-01 to 2026-03-31`.
    pub fn period(&self) -> String {
        format!(
            "{} to {}",
            self.from.format("%Y-%m-%d"),
            self.to.format("%Y-%m-%d")
        )
    }

    /// Look up a check outcome by id.
    pub fn check(&self, check_id: &str) -> Option<&ComplianceFinding> {
        self.checks.iter().find(|c| c.check_id == check_id)
    }
}
