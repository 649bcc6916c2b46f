//! Compliance policy types and configuration schema.
//!
//! A `CompliancePolicy` is deserialized from TOML. It fixes the retention
//! horizon, the credential markers that data minimization looks for, and an
//! ordered list of `ComplianceCheck`s reported as findings.

use serde::{Deserialize, Serialize};

use custos_contracts::{
    entry::AuditEntry,
    error::{AuditError, AuditResult},
};

/// What a check asserts about the entries a report selects.
///
/// Expressed as a kebab-case string in TOML:
/// ```toml
/// kind = "any-action-contains"
/// kind = "integrity"
/// kind = "data-minimization"
/// kind = "retention"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    /// At least one selected entry's action contains one of `needles`
    /// (case-sensitive substring).
    AnyActionContains,

    /// The chain verified intact.
    Integrity,

    /// No selected payload contains a credential marker.
    DataMinimization,

    /// No entry in the chain is older than the retention horizon.
    Retention,
}

/// A single compliance check loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceCheck {
    /// Stable identifier, e.g. `"gdpr-access-logging"`.
    pub id: String,

    /// Framework the check belongs to, e.g. `"GDPR"` or `"ISO27001"`.
    pub framework: String,

    pub description: String,

    pub kind: CheckKind,

    /// Substrings for `any-action-contains`; ignored by other kinds.
    #[serde(default)]
    pub needles: Vec<String>,
}

impl ComplianceCheck {
    /// True if `entry`'s action satisfies an `any-action-contains` check.
    pub fn matches_action(&self, entry: &AuditEntry) -> bool {
        self.kind == CheckKind::AnyActionContains
            && self.needles.iter().any(|n| entry.action.contains(n.as_str()))
    }
}

fn default_retention_years() -> u32 {
    10
}

fn default_credential_markers() -> Vec<String> {
    vec!["password".to_string()]
}

/// The top-level structure deserialized from a TOML compliance file.
///
/// Example:
/// ```toml
/// retention_years = 10
/// credential_markers = ["password", "secret"]
///
/// [[checks]]
/// id = "gdpr-access-logging"
/// framework = "GDPR"
/// description = "Access to personal data is logged"
/// kind = "any-action-contains"
/// needles = ["Access"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompliancePolicy {
    /// Entries older than this many calendar years fail retention.
    #[serde(default = "default_retention_years")]
    pub retention_years: u32,

    /// Matched case-insensitively against `before` and `after` payloads.
    #[serde(default = "default_credential_markers")]
    pub credential_markers: Vec<String>,

    /// Findings reported in declaration order.
    #[serde(default)]
    pub checks: Vec<ComplianceCheck>,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            retention_years: default_retention_years(),
            credential_markers: default_credential_markers(),
            checks: Vec::new(),
        }
    }
}

impl CompliancePolicy {
    /// Reject policies that cannot be evaluated meaningfully.
    pub fn validate(&self) -> AuditResult<()> {
        if self.retention_years == 0 {
            return Err(AuditError::ConfigError {
                reason: "retention_years must be at least 1".to_string(),
            });
        }
        if self.credential_markers.is_empty() {
            return Err(AuditError::ConfigError {
                reason: "credential_markers must name at least one marker".to_string(),
            });
        }
        if self.credential_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(AuditError::ConfigError {
                reason: "credential_markers must not contain empty strings".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for check in &self.checks {
            if !seen.insert(check.id.as_str()) {
                return Err(AuditError::ConfigError {
                    reason: format!("duplicate compliance check id '{}'", check.id),
                });
            }
            if check.kind == CheckKind::AnyActionContains && check.needles.is_empty() {
                return Err(AuditError::ConfigError {
                    reason: format!("check '{}' of kind any-action-contains has no needles", check.id),
                });
            }
        }
        Ok(())
    }
}
