//! `AuditTrail`: the public facade over sequencer, verifier and reports.

use std::sync::Arc;

use tracing::debug;

use custos_contracts::{
    entry::{AuditEntry, AuditEvent, CallerContext, ChainId, CommittedEntry},
    error::AuditResult,
    filter::ScanFilter,
    report::{ComplianceReport, ReportQuery},
    verify::{VerificationResult, VerifyRange},
};

use crate::{
    report::ComplianceAggregator,
    sequencer::{ChainSequencer, SequencerConfig},
    traits::{read_failure, AuditStore, Clock, ComplianceEngine, SystemClock},
    verifier::IntegrityVerifier,
};

/// Records, verifies and reports on tamper-evident audit chains.
///
/// Holds only the append-only `AuditStore` capability.
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    sequencer: ChainSequencer,
    verifier: IntegrityVerifier,
    aggregator: ComplianceAggregator,
}

impl AuditTrail {
    /// A trail using wall-clock time and default retry settings.
    pub fn new(store: Arc<dyn AuditStore>, compliance: Arc<dyn ComplianceEngine>) -> Self {
        Self::with_config(store, compliance, Arc::new(SystemClock), SequencerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn AuditStore>,
        compliance: Arc<dyn ComplianceEngine>,
        clock: Arc<dyn Clock>,
        config: SequencerConfig,
    ) -> Self {
        Self {
            sequencer: ChainSequencer::new(Arc::clone(&store), Arc::clone(&clock), config),
            verifier: IntegrityVerifier::new(Arc::clone(&store)),
            aggregator: ComplianceAggregator::new(Arc::clone(&store), compliance, clock),
            store,
        }
    }

    /// Append an event to the caller's chain.
    pub fn record(&self, ctx: &CallerContext, event: AuditEvent) -> AuditResult<AuditEntry> {
        self.sequencer.append(ctx, event)
    }

    pub fn verify(&self, chain: &ChainId, range: VerifyRange) -> AuditResult<VerificationResult> {
        self.verifier.verify(chain, range)
    }

    pub fn report(&self, chain: &ChainId, query: &ReportQuery) -> AuditResult<ComplianceReport> {
        self.aggregator.report(chain, query)
    }

    /// Entries matching `filter`, in append order.
    ///
    /// Use `ScanFilter::entity`, `ScanFilter::actor` or `ScanFilter::between`
    /// for the usual lookups.
    pub fn history(&self, chain: &ChainId, filter: &ScanFilter) -> AuditResult<Vec<CommittedEntry>> {
        let stream = self
            .store
            .scan(chain, filter)
            .map_err(|e| read_failure("scan chain", e))?;
        let entries = stream
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| read_failure("scan chain", e))?;
        debug!(chain = %chain, returned = entries.len(), "history query");
        Ok(entries)
    }

    /// Look up an entry by id, e.g. after `AppendOutcomeUnknown`.
    pub fn locate(&self, chain: &ChainId, entry_id: &str) -> AuditResult<Option<CommittedEntry>> {
        self.store
            .locate(chain, entry_id)
            .map_err(|e| read_failure("locate entry", e))
    }

    pub fn tail(&self, chain: &ChainId) -> AuditResult<Option<String>> {
        self.store
            .tail(chain)
            .map_err(|e| read_failure("read chain tail", e))
    }
}
