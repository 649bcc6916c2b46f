//! TOML-driven compliance engine implementation.
//!
//! `TomlComplianceEngine` loads a `CompliancePolicy` from a TOML string or
//! file and implements the `ComplianceEngine` trait from custos-core.
//!
//! Evaluation over one report scan:
//!
//! 1. Every chain entry is compared against the retention horizon
//!    (`as_of` minus `retention_years` calendar years).
//! 2. Every selected entry is searched for credential markers and matched
//!    against each `any-action-contains` check.
//! 3. `conclude` turns the folded flags into one finding per check.
//!
//! Nothing is enforced: an expired entry is reported, never removed.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use tracing::{debug, warn};

use custos_contracts::{
    entry::AuditEntry,
    error::{AuditError, AuditResult},
    report::{ComplianceAssessment, ComplianceFinding, ReportQuery},
};
use custos_core::traits::{ComplianceEngine, ComplianceFold};

use crate::rule::{CheckKind, CompliancePolicy};

/// The compliance policy shipped with custos.
pub const STANDARD_POLICY: &str = include_str!("../policies/standard.toml");

/// A `ComplianceEngine` implementation that reads its policy from TOML.
///
/// ```rust,ignore
/// use custos_policy::TomlComplianceEngine;
///
/// let engine = TomlComplianceEngine::from_file(Path::new("policies/compliance.toml"))?;
/// ```
#[derive(Debug, Clone)]
pub struct TomlComplianceEngine {
    policy: Arc<CompliancePolicy>,
}

impl TomlComplianceEngine {
    /// Build an engine from an already-parsed policy.
    pub fn new(policy: CompliancePolicy) -> AuditResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy: Arc::new(policy),
        })
    }

    /// GDPR and ISO 27001 defaults: 10-year retention, `password` as the
    /// credential marker, access/incident/backup logging and integrity checks.
    pub fn standard() -> AuditResult<Self> {
        Self::from_toml_str(STANDARD_POLICY)
    }

    /// Parse `s` as TOML and build a `TomlComplianceEngine`.
    ///
    /// Returns `AuditError::ConfigError` if the TOML is malformed, does not
    /// match `CompliancePolicy`, or fails validation.
    pub fn from_toml_str(s: &str) -> AuditResult<Self> {
        let policy: CompliancePolicy = toml::from_str(s).map_err(|e| AuditError::ConfigError {
            reason: format!("failed to parse compliance TOML: {}", e),
        })?;
        Self::new(policy)
    }

    /// Read the file at `path` and parse it as a compliance policy.
    pub fn from_file(path: &Path) -> AuditResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| AuditError::ConfigError {
            reason: format!("failed to read compliance file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn policy(&self) -> &CompliancePolicy {
        &self.policy
    }
}

impl ComplianceEngine for TomlComplianceEngine {
    fn begin(&self, query: &ReportQuery, as_of: DateTime<Utc>) -> Box<dyn ComplianceFold> {
        let horizon = as_of
            .checked_sub_months(Months::new(self.policy.retention_years.saturating_mul(12)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        debug!(
            from = %query.from,
            to = %query.to,
            horizon = %horizon,
            checks = self.policy.checks.len(),
            "starting compliance evaluation"
        );

        Box::new(PolicyFold {
            markers: self
                .policy
                .credential_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            matched: vec![false; self.policy.checks.len()],
            policy: Arc::clone(&self.policy),
            horizon,
            retention_ok: true,
            data_minimization_ok: true,
        })
    }
}

// ── Fold state ────────────────────────────────────────────────────────────────

struct PolicyFold {
    policy: Arc<CompliancePolicy>,
    horizon: DateTime<Utc>,
    /// Lowercased credential markers.
    markers: Vec<String>,
    /// Per check: whether an `any-action-contains` needle was seen.
    matched: Vec<bool>,
    retention_ok: bool,
    data_minimization_ok: bool,
}

impl PolicyFold {
    fn leaks_credentials(&self, entry: &AuditEntry) -> bool {
        [&entry.before, &entry.after]
            .into_iter()
            .flatten()
            .map(|payload| payload.to_lowercase())
            .any(|payload| self.markers.iter().any(|m| payload.contains(m.as_str())))
    }
}

impl ComplianceFold for PolicyFold {
    fn observe_chain(&mut self, entry: &AuditEntry) {
        if self.retention_ok && entry.timestamp < self.horizon {
            warn!(
                entry_id = %entry.id(),
                timestamp = %entry.timestamp,
                horizon = %self.horizon,
                "audit entry older than retention horizon"
            );
            self.retention_ok = false;
        }
    }

    fn observe_selected(&mut self, entry: &AuditEntry) {
        if self.data_minimization_ok && self.leaks_credentials(entry) {
            warn!(
                entry_id = %entry.id(),
                action = %entry.action,
                "audit payload contains a credential marker"
            );
            self.data_minimization_ok = false;
        }
        for (check, matched) in self.policy.checks.iter().zip(self.matched.iter_mut()) {
            if !*matched && check.matches_action(entry) {
                *matched = true;
            }
        }
    }

    fn conclude(self: Box<Self>, integrity_ok: bool) -> ComplianceAssessment {
        let checks = self
            .policy
            .checks
            .iter()
            .zip(&self.matched)
            .map(|(check, &matched)| ComplianceFinding {
                check_id: check.id.clone(),
                framework: check.framework.clone(),
                description: check.description.clone(),
                satisfied: match check.kind {
                    CheckKind::AnyActionContains => matched,
                    CheckKind::Integrity => integrity_ok,
                    CheckKind::DataMinimization => self.data_minimization_ok,
                    CheckKind::Retention => self.retention_ok,
                },
            })
            .collect();

        ComplianceAssessment {
            data_minimization_ok: self.data_minimization_ok,
            retention_ok: self.retention_ok,
            checks,
        }
    }
}
