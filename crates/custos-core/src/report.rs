//! Compliance report: one snapshot scan folded into statistics, integrity
//! and policy predicates.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use custos_contracts::{
    entry::{ChainId, CommittedEntry},
    error::{AuditError, AuditResult, StoreError},
    filter::ScanFilter,
    report::{ComplianceReport, EntrySummary, ReportQuery, ReportTotals},
};

use crate::{
    chain::ChainReplay,
    traits::{read_failure, AuditStore, Clock, ComplianceEngine, ComplianceFold},
};

/// Builds `ComplianceReport`s. Read-only.
pub struct ComplianceAggregator {
    store: Arc<dyn AuditStore>,
    compliance: Arc<dyn ComplianceEngine>,
    clock: Arc<dyn Clock>,
}

impl ComplianceAggregator {
    pub fn new(
        store: Arc<dyn AuditStore>,
        compliance: Arc<dyn ComplianceEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            compliance,
            clock,
        }
    }

    /// Report on `chain` for `query`.
    ///
    /// Integrity and retention cover the whole snapshot; statistics, data
    /// minimization and policy checks cover the selected entries only.
    pub fn report(&self, chain: &ChainId, query: &ReportQuery) -> AuditResult<ComplianceReport> {
        if query.from > query.to {
            return Err(AuditError::InvalidRange {
                reason: format!("report window starts {} after it ends {}", query.from, query.to),
            });
        }

        let generated_at = self.clock.now();
        let stream = self
            .store
            .scan(chain, &ScanFilter::all())
            .map_err(|e| read_failure("scan chain", e))?;

        let mut state = ReportFold::new(query, self.compliance.begin(query, generated_at));
        for item in stream {
            match item {
                Ok(committed) => state.observe(&committed),
                Err(StoreError::Corrupt { sequence, reason }) => {
                    state.replay.observe_unreadable(sequence, reason);
                }
                Err(e) => return Err(read_failure("scan chain", e)),
            }
        }

        let report = state.finish(chain.clone(), query, generated_at);
        info!(
            chain = %chain,
            period = %report.period(),
            total_entries = report.totals.total_entries,
            integrity_ok = report.integrity_ok,
            retention_ok = report.retention_ok,
            data_minimization_ok = report.data_minimization_ok,
            "compliance report generated"
        );
        Ok(report)
    }
}

// ── Fold state ────────────────────────────────────────────────────────────────

struct ReportFold<'q> {
    query: &'q ReportQuery,
    replay: ChainReplay,
    policy: Box<dyn ComplianceFold>,
    chain_entries: u64,
    total_entries: u64,
    action_stats: BTreeMap<String, u64>,
    entity_stats: BTreeMap<String, u64>,
    actor_stats: BTreeMap<String, u64>,
    entries: Vec<EntrySummary>,
}

impl<'q> ReportFold<'q> {
    fn new(query: &'q ReportQuery, policy: Box<dyn ComplianceFold>) -> Self {
        Self {
            query,
            replay: ChainReplay::new(),
            policy,
            chain_entries: 0,
            total_entries: 0,
            action_stats: BTreeMap::new(),
            entity_stats: BTreeMap::new(),
            actor_stats: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    fn observe(&mut self, committed: &CommittedEntry) {
        let entry = &committed.entry;
        self.chain_entries += 1;
        self.replay.observe(committed);
        self.policy.observe_chain(entry);

        if !self.query.selects(entry) {
            return;
        }

        self.total_entries += 1;
        *self.action_stats.entry(entry.action.clone()).or_insert(0) += 1;
        *self.entity_stats.entry(entry.entity_type.clone()).or_insert(0) += 1;
        *self.actor_stats.entry(entry.actor.clone()).or_insert(0) += 1;
        self.policy.observe_selected(entry);

        if self.entries.len() < self.query.entry_limit {
            self.entries.push(EntrySummary::of(committed.sequence, entry));
        }
    }

    fn finish(
        self,
        chain: ChainId,
        query: &ReportQuery,
        generated_at: chrono::DateTime<chrono::Utc>,
    ) -> ComplianceReport {
        let integrity = self.replay.finish();
        let assessment = self.policy.conclude(integrity.ok);
        debug!(
            chain = %chain,
            chain_entries = self.chain_entries,
            checks = assessment.checks.len(),
            "report fold complete"
        );

        ComplianceReport {
            chain,
            from: query.from,
            to: query.to,
            generated_at,
            totals: ReportTotals {
                total_entries: self.total_entries,
                chain_entries: self.chain_entries,
            },
            integrity_ok: integrity.ok,
            integrity,
            action_stats: self.action_stats,
            entity_stats: self.entity_stats,
            actor_stats: self.actor_stats,
            data_minimization_ok: assessment.data_minimization_ok,
            retention_ok: assessment.retention_ok,
            checks: assessment.checks,
            entries: self.entries,
        }
    }
}
