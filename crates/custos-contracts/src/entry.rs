//! Audit entry, event, and caller-context types.
//!
//! `AuditEvent` is what a caller submits. `AuditEntry` is what the sequencer
//! seals and the store commits; once committed it is never modified.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuditError, AuditResult};

/// Identifier of one independent hash chain.
///
/// Single-tenant deployments use the system chain; multi-tenant deployments
/// get one chain per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub String);

impl ChainId {
    /// Name of the chain used when no tenant is given.
    pub const SYSTEM: &'static str = "system";

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    /// The chain an entry for `tenant` belongs to.
    pub fn for_tenant(tenant: Option<&str>) -> Self {
        match tenant {
            Some(t) => Self(format!("tenant:{t}")),
            None => Self::system(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network and client metadata describing where an action came from.
///
/// Informational only: it is covered by the entry digest but never used for
/// trust decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub ip: String,
    pub user_agent: String,
}

impl Origin {
    /// Placeholder for an address or user agent that could not be resolved.
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Origin used for actions raised outside any client request.
    pub fn system() -> Self {
        Self::new("System", "System")
    }

    /// Resolve the client address from proxy headers the caller already
    /// extracted.
    ///
    /// Resolution order: first hop of `X-Forwarded-For`, then `X-Real-IP`,
    /// then the socket's remote address, else `"Unknown"`.
    pub fn from_forwarded(
        x_forwarded_for: Option<&str>,
        x_real_ip: Option<&str>,
        remote_addr: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        let first_hop = x_forwarded_for
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let ip = first_hop
            .or_else(|| x_real_ip.map(str::trim).filter(|v| !v.is_empty()))
            .or(remote_addr)
            .unwrap_or(Self::UNKNOWN);

        let user_agent = user_agent.filter(|v| !v.is_empty()).unwrap_or(Self::UNKNOWN);

        Self::new(ip, user_agent)
    }
}

/// Who is acting, on whose behalf, and from where.
///
/// Supplied by the caller on every `record`; the trail never reaches into
/// ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub actor_id: String,
    pub tenant_id: Option<String>,
    pub origin: Origin,
}

impl CallerContext {
    pub fn new(actor_id: impl Into<String>, origin: Origin) -> Self {
        Self {
            actor_id: actor_id.into(),
            tenant_id: None,
            origin,
        }
    }

    /// A background job acting as the system principal.
    pub fn system(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, Origin::system())
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// The chain this caller's entries are appended to.
    pub fn chain(&self) -> ChainId {
        ChainId::for_tenant(self.tenant_id.as_deref())
    }
}

/// A sensitive action submitted for recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened (e.g. `"ClientCheckIn"`, `"EmergencyCreated"`).
    pub action: String,
    /// The kind of record affected (e.g. `"Session"`).
    pub entity_type: String,
    pub entity_id: Option<String>,
    /// Free-text note attached to the action.
    pub description: Option<String>,
    /// State before the change.
    pub before: Option<Value>,
    /// State after the change.
    pub after: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            description: None,
            before: None,
            after: None,
        }
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach the prior state. Fails if `value` cannot be represented as JSON.
    pub fn before<T: Serialize>(mut self, value: &T) -> AuditResult<Self> {
        self.before = Some(to_payload(value)?);
        Ok(self)
    }

    /// Attach the new state. Fails if `value` cannot be represented as JSON.
    pub fn after<T: Serialize>(mut self, value: &T) -> AuditResult<Self> {
        self.after = Some(to_payload(value)?);
        Ok(self)
    }
}

fn to_payload<T: Serialize>(value: &T) -> AuditResult<Value> {
    serde_json::to_value(value).map_err(|e| AuditError::Serialization {
        reason: e.to_string(),
    })
}

/// One immutable, hash-chained record of a sensitive action.
///
/// The entry's identity is its `hash`. Changing any field after commit
/// invalidates this entry's digest and the linkage of its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant: Option<String>,

    /// UTC instant at microsecond precision.
    pub timestamp: DateTime<Utc>,

    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: Option<String>,

    /// Canonical JSON of the prior state.
    pub before: Option<String>,

    /// Canonical JSON of the new state.
    pub after: Option<String>,

    pub origin: Origin,

    /// `hash` of the chain tail at append time; `None` only for the head.
    pub previous_hash: Option<String>,

    /// Lowercase hex SHA-256 over the canonical encoding of every field
    /// above.
    pub hash: String,
}

impl AuditEntry {
    /// The entry's identity, which is its hash.
    pub fn id(&self) -> &str {
        &self.hash
    }

    /// The chain this entry belongs to.
    pub fn chain(&self) -> ChainId {
        ChainId::for_tenant(self.tenant.as_deref())
    }
}

/// An entry together with the store-assigned position in its chain.
///
/// `sequence` starts at 0 and has no gaps. Append order, not `timestamp`,
/// is the replay order for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEntry {
    pub sequence: u64,
    pub entry: AuditEntry,
}
