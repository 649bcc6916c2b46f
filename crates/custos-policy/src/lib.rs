//! # custos-policy
//!
//! A TOML-driven compliance engine for custos reports.
//!
//! ## Overview
//!
//! This crate provides [`TomlComplianceEngine`], which implements the
//! [`ComplianceEngine`](custos_core::traits::ComplianceEngine) trait. A
//! policy declares a retention horizon, credential markers for data
//! minimization, and an ordered list of framework-tagged checks.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use custos_policy::TomlComplianceEngine;
//!
//! let engine = TomlComplianceEngine::standard()?;
//! // or: TomlComplianceEngine::from_file(Path::new("compliance.toml"))?
//! let trail = AuditTrail::new(store, Arc::new(engine));
//! ```
//!
//! ## Check kinds
//!
//! `any-action-contains` is satisfied when a selected entry's action
//! contains one of the check's `needles`. `integrity`, `data-minimization`
//! and `retention` mirror the report's own predicates so they can be tagged
//! with a framework.

pub mod engine;
pub mod rule;

pub use engine::{TomlComplianceEngine, STANDARD_POLICY};
pub use rule::{CheckKind, ComplianceCheck, CompliancePolicy};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use custos_contracts::{
        entry::{AuditEvent, CallerContext, ChainId, Origin},
        error::AuditError,
        report::ReportQuery,
    };
    use custos_core::{
        traits::{AdministrativeStore, AuditStore, Clock},
        AuditTrail, SequencerConfig,
    };
    use custos_store::InMemoryAuditStore;

    use crate::{CheckKind, TomlComplianceEngine};

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct SetClock(Mutex<DateTime<Utc>>);

    impl SetClock {
        fn at(t: DateTime<Utc>) -> Self {
            Self(Mutex::new(t))
        }

        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl Clock for SetClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 30, 17, 0, 0).unwrap()
    }

    fn this_year() -> ReportQuery {
        ReportQuery::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap(),
        )
    }

    fn ctx() -> CallerContext {
        CallerContext::new("dpo", Origin::new("10.9.0.1", "Browser/1"))
    }

    struct Fixture {
        store: Arc<InMemoryAuditStore>,
        clock: Arc<SetClock>,
        trail: AuditTrail,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(SetClock::at(now()));
        let trail = AuditTrail::with_config(
            Arc::clone(&store) as Arc<dyn AuditStore>,
            Arc::new(TomlComplianceEngine::standard().unwrap()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            SequencerConfig::default(),
        );
        Fixture { store, clock, trail }
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    /// The shipped policy parses and carries the documented defaults.
    #[test]
    fn test_standard_policy() {
        let engine = TomlComplianceEngine::standard().unwrap();
        let policy = engine.policy();
        assert_eq!(policy.retention_years, 10);
        assert_eq!(policy.credential_markers, vec!["password".to_string()]);
        assert_eq!(policy.checks.len(), 8);
        assert!(policy
            .checks
            .iter()
            .any(|c| c.framework == "ISO27001" && c.kind == CheckKind::Integrity));
    }

    /// Omitted fields fall back to 10 years and `password`.
    #[test]
    fn test_defaults_when_omitted() {
        let engine = TomlComplianceEngine::from_toml_str("").unwrap();
        assert_eq!(engine.policy().retention_years, 10);
        assert_eq!(engine.policy().credential_markers, vec!["password"]);
        assert!(engine.policy().checks.is_empty());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = TomlComplianceEngine::from_toml_str("retention_years = \"ten\"").unwrap_err();
        match err {
            AuditError::ConfigError { reason } => {
                assert!(reason.contains("failed to parse compliance TOML"), "{reason}")
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_check_kind_is_rejected() {
        let toml = r#"
            [[checks]]
            id = "x"
            framework = "GDPR"
            description = "x"
            kind = "all-actions-contain"
        "#;
        assert!(matches!(
            TomlComplianceEngine::from_toml_str(toml),
            Err(AuditError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_validation_errors() {
        let no_needles = r#"
            [[checks]]
            id = "x"
            framework = "GDPR"
            description = "x"
            kind = "any-action-contains"
        "#;
        let duplicate = r#"
            [[checks]]
            id = "x"
            framework = "GDPR"
            description = "x"
            kind = "integrity"

            [[checks]]
            id = "x"
            framework = "ISO27001"
            description = "y"
            kind = "retention"
        "#;
        for toml in [
            no_needles,
            duplicate,
            "retention_years = 0",
            "credential_markers = []",
            "credential_markers = [\"  \"]",
        ] {
            assert!(
                matches!(
                    TomlComplianceEngine::from_toml_str(toml),
                    Err(AuditError::ConfigError { .. })
                ),
                "policy should be rejected: {toml}"
            );
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = TomlComplianceEngine::from_file(std::path::Path::new("/nonexistent/c.toml"))
            .unwrap_err();
        assert!(matches!(err, AuditError::ConfigError { .. }));
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Action needles drive the framework findings.
    #[test]
    fn test_action_checks() {
        let f = fixture();
        f.trail.record(&ctx(), AuditEvent::new("Login", "User")).unwrap();
        f.trail
            .record(&ctx(), AuditEvent::new("ClientRecordAccess", "Client"))
            .unwrap();

        let report = f.trail.report(&ChainId::system(), &this_year()).unwrap();
        assert!(report.check("gdpr-access-logging").unwrap().satisfied);
        assert!(report.check("iso27001-access-control").unwrap().satisfied);
        assert!(!report.check("iso27001-backup-logging").unwrap().satisfied);
        assert!(!report.check("iso27001-incident-logging").unwrap().satisfied);
        assert!(report.check("gdpr-integrity").unwrap().satisfied);
        assert_eq!(report.check("gdpr-access-logging").unwrap().framework, "GDPR");
    }

    /// A credential marker in any casing fails data minimization.
    #[test]
    fn test_credential_marker_fails_minimization() {
        let f = fixture();
        let event = AuditEvent::new("UserUpdated", "User")
            .before(&json!({ "PASSWORD": "x" }))
            .unwrap();
        f.trail.record(&ctx(), event).unwrap();

        let report = f.trail.report(&ChainId::system(), &this_year()).unwrap();
        assert!(!report.data_minimization_ok);
        assert!(!report.check("gdpr-data-minimization").unwrap().satisfied);
        assert!(report.integrity_ok);
    }

    /// Markers outside the report window do not count against it.
    #[test]
    fn test_minimization_only_covers_selected_entries() {
        let f = fixture();
        let event = AuditEvent::new("UserUpdated", "User")
            .after(&json!({ "password": "x" }))
            .unwrap();
        f.trail.record(&ctx(), event).unwrap();

        let last_year = ReportQuery::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap(),
        );
        let report = f.trail.report(&ChainId::system(), &last_year).unwrap();
        assert_eq!(report.totals.total_entries, 0);
        assert!(report.data_minimization_ok);
        assert!(report.integrity_ok);
    }

    /// One entry past the horizon flips retention, not integrity.
    #[test]
    fn test_retention_horizon() {
        let f = fixture();
        f.clock.set(now() - Duration::days(365 * 9));
        f.trail.record(&ctx(), AuditEvent::new("Login", "User")).unwrap();
        f.clock.set(now());

        let report = f.trail.report(&ChainId::system(), &this_year()).unwrap();
        assert!(report.retention_ok);

        f.clock.set(now() - Duration::days(365 * 11));
        f.trail.record(&ctx(), AuditEvent::new("Login", "User")).unwrap();
        f.clock.set(now());

        let report = f.trail.report(&ChainId::system(), &this_year()).unwrap();
        assert!(!report.retention_ok);
        assert!(!report.check("gdpr-retention").unwrap().satisfied);
        assert!(report.integrity_ok);
        assert_eq!(report.totals.total_entries, 0);
    }

    /// A tampered chain fails both integrity findings.
    #[test]
    fn test_integrity_checks_follow_verification() {
        let f = fixture();
        let a = f.trail.record(&ctx(), AuditEvent::new("Backup", "System")).unwrap();
        f.trail.record(&ctx(), AuditEvent::new("Login", "User")).unwrap();

        let mut forged = a.clone();
        forged.actor = "someone".to_string();
        f.store.replace_entry(&ChainId::system(), 0, forged).unwrap();

        let report = f.trail.report(&ChainId::system(), &this_year()).unwrap();
        assert!(!report.integrity_ok);
        assert!(!report.check("gdpr-integrity").unwrap().satisfied);
        assert!(!report.check("iso27001-audit-trail").unwrap().satisfied);
        assert!(report.check("iso27001-backup-logging").unwrap().satisfied);
    }
}
