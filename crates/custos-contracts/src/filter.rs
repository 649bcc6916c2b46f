//! Scan filters applied by store adapters while streaming a chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::CommittedEntry;

/// Selects committed entries from a chain scan.
///
/// Sequence bounds are inclusive and narrow the scan itself. The remaining
/// fields are predicates evaluated per entry; the result is still yielded in
/// append order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub from_sequence: Option<u64>,
    pub to_sequence: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

impl ScanFilter {
    /// Every committed entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries between two sequence numbers, inclusive.
    pub fn sequences(from: Option<u64>, to: Option<u64>) -> Self {
        Self {
            from_sequence: from,
            to_sequence: to,
            ..Self::default()
        }
    }

    /// All entries touching one entity.
    pub fn entity(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    /// All entries caused by one actor.
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Self::default()
        }
    }

    /// Entries timestamped within `[since, until]`.
    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            ..Self::default()
        }
    }

    /// First sequence number the scan must visit.
    pub fn start(&self) -> u64 {
        self.from_sequence.unwrap_or(0)
    }

    /// True once `sequence` lies past the upper bound.
    pub fn is_past_end(&self, sequence: u64) -> bool {
        self.to_sequence.is_some_and(|to| sequence > to)
    }

    /// Evaluate every predicate against `committed`.
    pub fn matches(&self, committed: &CommittedEntry) -> bool {
        let e = &committed.entry;

        if committed.sequence < self.start() || self.is_past_end(committed.sequence) {
            return false;
        }
        if self.since.is_some_and(|since| e.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| e.timestamp > until) {
            return false;
        }
        if let Some(actor) = &self.actor {
            if &e.actor != actor {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &e.action != action {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if &e.entity_type != entity_type {
                return false;
            }
        }
        if let Some(entity_id) = &self.entity_id {
            if e.entity_id.as_ref() != Some(entity_id) {
                return false;
            }
        }
        true
    }
}
