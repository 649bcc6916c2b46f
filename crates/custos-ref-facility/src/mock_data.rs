//! Simulated facility data for the custos reference scenarios.
//!
//! All data in this module is hardcoded and fictional. Identifiers are
//! random v4 UUIDs generated per run; nothing external is contacted.

use serde_json::{json, Value};
use uuid::Uuid;

use custos_contracts::entry::{CallerContext, Origin};

/// Tenant every scenario records under.
pub const FACILITY_TENANT: &str = "harbour-street";

// ── Clients ───────────────────────────────────────────────────────────────────

/// A registered client of the facility.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub alias: &'static str,
    pub programme: &'static str,
}

impl Client {
    /// State snapshot recorded as an audit payload. Contains no credentials.
    pub fn snapshot(&self) -> Value {
        json!({
            "id": self.id,
            "alias": self.alias,
            "programme": self.programme,
        })
    }
}

/// Three fictional clients with fresh ids.
pub fn clients() -> Vec<Client> {
    [
        ("Client A", "supervised-consumption"),
        ("Client B", "drug-checking"),
        ("Client C", "supervised-consumption"),
    ]
    .into_iter()
    .map(|(alias, programme)| Client {
        id: Uuid::new_v4().to_string(),
        alias,
        programme,
    })
    .collect()
}

/// A fresh consumption-session id.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

// ── Staff ─────────────────────────────────────────────────────────────────────

/// Front-desk staff member behind the facility's reverse proxy.
pub fn front_desk(staff_id: &str) -> CallerContext {
    let origin = Origin::from_forwarded(
        Some("198.51.100.23, 10.0.0.1"),
        None,
        Some("10.0.0.1"),
        Some("FacilityDesk/2.4"),
    );
    CallerContext::new(staff_id, origin).with_tenant(FACILITY_TENANT)
}

/// Background job running as the system principal.
pub fn scheduler() -> CallerContext {
    CallerContext::system("scheduler").with_tenant(FACILITY_TENANT)
}

/// A user record update that wrongly captures a credential in its payload.
pub fn careless_user_update(user_id: &str) -> (Value, Value) {
    (
        json!({ "id": user_id, "role": "staff", "Password": "hunter2" }),
        json!({ "id": user_id, "role": "supervisor" }),
    )
}
