//! CLI configuration loaded from TOML.
//!
//! ```toml
//! [store]
//! kind = "jsonl"
//! path = "/var/lib/custos"
//! timeout_ms = 5000
//!
//! [sequencer]
//! max_attempts = 5
//!
//! [compliance]
//! policy = "/etc/custos/policy.toml"
//! ```
//!
//! Every table is optional; missing values fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use custos_contracts::error::{AuditError, AuditResult, StoreError};
use custos_core::{
    traits::{AuditStore, ComplianceEngine},
    SequencerConfig,
};
use custos_policy::TomlComplianceEngine;
use custos_store::{InMemoryAuditStore, JsonlAuditStore, SqliteAuditStore};

/// Which store adapter backs the trail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local; every invocation starts empty.
    Memory,
    /// One `.jsonl` file per chain under `path`.
    #[default]
    Jsonl,
    /// One SQLite database at `path`.
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: None,
            timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Location used when `path` is not set.
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.kind) {
            (Some(path), _) => path.clone(),
            (None, StoreKind::Sqlite) => PathBuf::from("custos-audit.db"),
            (None, _) => PathBuf::from("custos-audit"),
        }
    }

    pub fn open(&self) -> AuditResult<Arc<dyn AuditStore>> {
        let timeout = Duration::from_millis(self.timeout_ms);
        let store: Arc<dyn AuditStore> = match self.kind {
            StoreKind::Memory => Arc::new(InMemoryAuditStore::with_timeout(timeout)),
            StoreKind::Jsonl => Arc::new(
                JsonlAuditStore::open_with_timeout(self.resolved_path(), timeout)
                    .map_err(open_failure)?,
            ),
            StoreKind::Sqlite => Arc::new(
                SqliteAuditStore::open_with_timeout(self.resolved_path(), timeout)
                    .map_err(open_failure)?,
            ),
        };
        Ok(store)
    }
}

fn open_failure(e: StoreError) -> AuditError {
    AuditError::StoreUnavailable {
        reason: format!("open store: {e}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Policy TOML; the built-in standard policy when absent.
    pub policy: Option<PathBuf>,
}

impl ComplianceConfig {
    pub fn engine(&self) -> AuditResult<Arc<dyn ComplianceEngine>> {
        let engine = match &self.policy {
            Some(path) => TomlComplianceEngine::from_file(path)?,
            None => TomlComplianceEngine::standard()?,
        };
        Ok(Arc::new(engine))
    }
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CustosConfig {
    pub store: StoreConfig,
    pub sequencer: SequencerConfig,
    pub compliance: ComplianceConfig,
}

impl CustosConfig {
    pub fn from_toml_str(s: &str) -> AuditResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| AuditError::ConfigError {
            reason: format!("failed to parse custos config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AuditResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AuditError::ConfigError {
            reason: format!("cannot read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.store.timeout_ms == 0 {
            return Err(AuditError::ConfigError {
                reason: "store.timeout_ms must be at least 1".to_string(),
            });
        }
        self.sequencer.validate()
    }
}
