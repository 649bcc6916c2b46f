//! # custos-store
//!
//! Append-only `AuditStore` adapters for the custos audit trail.
//!
//! ## Overview
//!
//! | Adapter              | Medium                       | Cross-process safe |
//! |----------------------|------------------------------|--------------------|
//! | `InMemoryAuditStore` | `Vec` per chain              | n/a                |
//! | `JsonlAuditStore`    | one `.jsonl` file per chain  | yes (`.lock` file) |
//! | `SqliteAuditStore`   | one SQLite database          | yes (`IMMEDIATE`)  |
//!
//! Every adapter also implements `AdministrativeStore`, which is never
//! handed to the recording path.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use custos_store::SqliteAuditStore;
//! use custos_core::AuditTrail;
//!
//! let store = Arc::new(SqliteAuditStore::open("audit.db")?);
//! let trail = AuditTrail::new(store, compliance);
//! ```

use std::time::Duration;

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::JsonlAuditStore;
pub use memory::InMemoryAuditStore;
pub use sqlite::SqliteAuditStore;

/// Bound on every lock wait and busy wait unless configured otherwise.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;

    use custos_contracts::{
        entry::{AuditEntry, AuditEvent, CallerContext, ChainId, Origin},
        error::{AuditError, StoreError},
        filter::ScanFilter,
        verify::{BreakKind, VerifyRange},
    };
    use custos_core::{
        chain::{recompute_hash, PreparedEvent},
        traits::{AdministrativeStore, AuditStore, SystemClock},
        ChainSequencer, IntegrityVerifier, SequencerConfig,
    };

    use super::{InMemoryAuditStore, JsonlAuditStore, SqliteAuditStore};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn ctx() -> CallerContext {
        CallerContext::new("clerk-2", Origin::new("172.16.0.8", "Kiosk/4"))
    }

    /// Seal an entry onto `prev` without going through a sequencer.
    fn sealed(action: &str, prev: Option<&AuditEntry>) -> AuditEntry {
        let event = AuditEvent::new(action, "Client")
            .entity("c-42")
            .after(&json!({ "action": action }))
            .unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap();
        PreparedEvent::new(&ctx(), event)
            .unwrap()
            .seal(ts, prev.map(|p| p.hash.clone()))
    }

    fn append_three(store: &dyn AuditStore) -> Vec<AuditEntry> {
        let chain = ChainId::system();
        let a = sealed("A", None);
        let b = sealed("B", Some(&a));
        let c = sealed("C", Some(&b));
        store.append_if_tail(&chain, None, &a).unwrap();
        store.append_if_tail(&chain, Some(&a.hash), &b).unwrap();
        store.append_if_tail(&chain, Some(&b.hash), &c).unwrap();
        vec![a, b, c]
    }

    /// Behaviour every adapter must share.
    fn check_store_contract(store: &dyn AuditStore) {
        let chain = ChainId::system();
        assert_eq!(store.tail(&chain).unwrap(), None, "new chain has no tail");

        let entries = append_three(store);
        assert_eq!(store.tail(&chain).unwrap().as_deref(), Some(entries[2].id()));

        // Stale expectation: nothing written.
        let stale = sealed("D", Some(&entries[1]));
        match store.append_if_tail(&chain, Some(&entries[1].hash), &stale) {
            Err(StoreError::Conflict { actual, .. }) => {
                assert_eq!(actual.as_deref(), Some(entries[2].id()))
            }
            other => panic!("expected Conflict, got {:?}", other),
        }

        // Same hash again on the current tail.
        let err = store
            .append_if_tail(&chain, Some(&entries[2].hash), &entries[1])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHash { .. }));

        let all: Vec<_> = store
            .scan(&chain, &ScanFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), 3);
        for (i, committed) in all.iter().enumerate() {
            assert_eq!(committed.sequence, i as u64);
            assert_eq!(committed.entry, entries[i]);
        }

        let window: Vec<_> = store
            .scan(&chain, &ScanFilter::sequences(Some(1), Some(1)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].entry.action, "B");

        let located = store.locate(&chain, entries[1].id()).unwrap().unwrap();
        assert_eq!(located.sequence, 1);
        assert!(store.locate(&chain, "nope").unwrap().is_none());

        assert_eq!(store.tail(&ChainId::for_tenant(Some("other"))).unwrap(), None);
    }

    /// The scan snapshot excludes appends made after it started.
    fn check_snapshot(store: &dyn AuditStore) {
        let chain = ChainId::system();
        let entries = append_three(store);
        let stream = store.scan(&chain, &ScanFilter::all()).unwrap();

        let d = sealed("D", Some(&entries[2]));
        store.append_if_tail(&chain, Some(&entries[2].hash), &d).unwrap();

        assert_eq!(stream.count(), 3);
        assert_eq!(store.scan(&chain, &ScanFilter::all()).unwrap().count(), 4);
    }

    /// 50 concurrent sequenced appends produce one linear chain.
    fn check_contention(store: Arc<dyn AuditStore>) {
        let sequencer = Arc::new(ChainSequencer::new(
            Arc::clone(&store),
            Arc::new(SystemClock),
            SequencerConfig::default(),
        ));
        thread::scope(|s| {
            for i in 0..50 {
                let sequencer = Arc::clone(&sequencer);
                s.spawn(move || {
                    sequencer
                        .append(&ctx(), AuditEvent::new(format!("Checkin{i}"), "Session"))
                        .unwrap();
                });
            }
        });

        let chain = ChainId::system();
        let entries: Vec<_> = store
            .scan(&chain, &ScanFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 50);
        let prevs: HashSet<_> = entries.iter().map(|c| c.entry.previous_hash.clone()).collect();
        assert_eq!(prevs.len(), 50);

        let result = IntegrityVerifier::new(store)
            .verify(&chain, VerifyRange::full())
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.checked, 50);
    }

    /// Several sequencers, each over its own store handle, race on one chain.
    /// Only the store's conditional append keeps them linear.
    fn check_independent_writers(handles: Vec<Arc<dyn AuditStore>>) {
        const PER_WRITER: usize = 25;
        let writers = handles.len();
        let config = SequencerConfig {
            max_attempts: 40,
            backoff_base_ms: 1,
            backoff_max_ms: 20,
            ..SequencerConfig::default()
        };

        let outcomes: Vec<Result<AuditEntry, AuditError>> = thread::scope(|s| {
            let workers: Vec<_> = handles
                .iter()
                .enumerate()
                .map(|(w, handle)| {
                    let sequencer = ChainSequencer::new(
                        Arc::clone(handle),
                        Arc::new(SystemClock),
                        config.clone(),
                    );
                    s.spawn(move || {
                        (0..PER_WRITER)
                            .map(|i| {
                                sequencer.append(
                                    &ctx(),
                                    AuditEvent::new(format!("Writer{w}Checkin{i}"), "Session"),
                                )
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });
        assert_eq!(outcomes.len(), writers * PER_WRITER);
        for outcome in &outcomes {
            if let Err(e) = outcome {
                assert!(matches!(e, AuditError::Conflict { .. }), "unexpected failure: {e}");
            }
        }
        let committed = outcomes.iter().filter(|o| o.is_ok()).count();

        let chain = ChainId::system();
        let reader = Arc::clone(&handles[0]);
        let entries: Vec<_> = reader
            .scan(&chain, &ScanFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), committed);
        let prevs: HashSet<_> = entries.iter().map(|c| c.entry.previous_hash.clone()).collect();
        assert_eq!(prevs.len(), committed, "two entries claim the same predecessor");

        let result = IntegrityVerifier::new(reader)
            .verify(&chain, VerifyRange::full())
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.checked, committed as u64);
    }

    /// Administrative replacement is visible to the verifier.
    fn check_admin_replace<S: AuditStore + AdministrativeStore + 'static>(store: Arc<S>) {
        let chain = ChainId::system();
        let entries = append_three(store.as_ref());

        let mut forged = entries[1].clone();
        forged.action = "Erased".to_string();
        let previous = store.replace_entry(&chain, 1, forged).unwrap();
        assert_eq!(previous, entries[1]);

        let result = IntegrityVerifier::new(store)
            .verify(&chain, VerifyRange::full())
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.break_at.as_deref(), Some(entries[1].id()));
        assert!(matches!(
            result.failure.unwrap().kind,
            BreakKind::Digest { .. }
        ));
    }

    // ── In-memory ─────────────────────────────────────────────────────────────

    #[test]
    fn test_memory_contract() {
        check_store_contract(&InMemoryAuditStore::new());
    }

    #[test]
    fn test_memory_snapshot() {
        check_snapshot(&InMemoryAuditStore::new());
    }

    #[test]
    fn test_memory_contention() {
        check_contention(Arc::new(InMemoryAuditStore::new()));
    }

    #[test]
    fn test_memory_admin_replace() {
        check_admin_replace(Arc::new(InMemoryAuditStore::new()));
    }

    #[test]
    fn test_memory_filters_by_time_and_entity() {
        let store = InMemoryAuditStore::new();
        let chain = ChainId::system();
        let a = sealed("A", None);
        let mut b = sealed("B", Some(&a));
        b.timestamp = a.timestamp + ChronoDuration::days(2);
        b.entity_id = Some("c-7".to_string());
        b.hash = recompute_hash(&b);
        store.append_if_tail(&chain, None, &a).unwrap();
        store.append_if_tail(&chain, Some(&a.hash), &b).unwrap();

        let by_entity = store
            .scan(&chain, &ScanFilter::entity("Client", "c-7"))
            .unwrap()
            .count();
        assert_eq!(by_entity, 1);

        let by_time = store
            .scan(
                &chain,
                &ScanFilter::between(a.timestamp, a.timestamp + ChronoDuration::hours(1)),
            )
            .unwrap()
            .map(|c| c.unwrap().entry.action)
            .collect::<Vec<_>>();
        assert_eq!(by_time, vec!["A".to_string()]);
    }

    // ── JSON Lines ────────────────────────────────────────────────────────────

    #[test]
    fn test_jsonl_contract() {
        let dir = tempfile::tempdir().unwrap();
        check_store_contract(&JsonlAuditStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_jsonl_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        check_snapshot(&JsonlAuditStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_jsonl_contention() {
        let dir = tempfile::tempdir().unwrap();
        check_contention(Arc::new(JsonlAuditStore::open(dir.path()).unwrap()));
    }

    #[test]
    fn test_jsonl_admin_replace() {
        let dir = tempfile::tempdir().unwrap();
        check_admin_replace(Arc::new(JsonlAuditStore::open(dir.path()).unwrap()));
    }

    /// A reopened store sees every committed entry and keeps linking.
    #[test]
    fn test_jsonl_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainId::for_tenant(Some("clinic-9"));
        let entries = {
            let store = JsonlAuditStore::open(dir.path()).unwrap();
            let a = sealed("A", None);
            store.append_if_tail(&chain, None, &a).unwrap();
            vec![a]
        };

        let store = JsonlAuditStore::open(dir.path()).unwrap();
        assert_eq!(store.tail(&chain).unwrap().as_deref(), Some(entries[0].id()));
        let b = sealed("B", Some(&entries[0]));
        assert_eq!(
            store.append_if_tail(&chain, Some(&entries[0].hash), &b).unwrap().sequence,
            1
        );
        assert!(store.chain_path(&chain).ends_with("tenant__clinic-9.jsonl"));
    }

    /// Two handles on one directory behave like two processes.
    #[test]
    fn test_jsonl_cross_handle_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainId::system();
        let first = JsonlAuditStore::open(dir.path()).unwrap();
        let second = JsonlAuditStore::open(dir.path()).unwrap();

        let a = sealed("A", None);
        first.append_if_tail(&chain, None, &a).unwrap();

        let rival = sealed("Rival", None);
        let err = second.append_if_tail(&chain, None, &rival).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(second.tail(&chain).unwrap().as_deref(), Some(a.id()));
    }

    #[test]
    fn test_jsonl_independent_writers_never_fork() {
        let dir = tempfile::tempdir().unwrap();
        let handles = (0..6)
            .map(|_| Arc::new(JsonlAuditStore::open(dir.path()).unwrap()) as Arc<dyn AuditStore>)
            .collect();
        check_independent_writers(handles);
    }

    /// A torn trailing line is invisible and overwritten by the next append.
    #[test]
    fn test_jsonl_torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainId::system();
        let a = sealed("A", None);
        {
            let store = JsonlAuditStore::open(dir.path()).unwrap();
            store.append_if_tail(&chain, None, &a).unwrap();
            let mut f = OpenOptions::new()
                .append(true)
                .open(store.chain_path(&chain))
                .unwrap();
            f.write_all(br#"{"sequence":1,"entry":{"ten"#).unwrap();
        }

        let store = JsonlAuditStore::open(dir.path()).unwrap();
        assert_eq!(store.scan(&chain, &ScanFilter::all()).unwrap().count(), 1);
        let b = sealed("B", Some(&a));
        store.append_if_tail(&chain, Some(&a.hash), &b).unwrap();

        let result = IntegrityVerifier::new(Arc::new(store))
            .verify(&chain, VerifyRange::full())
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.checked, 2);
    }

    /// A complete but undecodable line is reported, never skipped.
    #[test]
    fn test_jsonl_garbage_line_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainId::system();
        let store = JsonlAuditStore::open(dir.path()).unwrap();
        append_three(&store);

        let path = store.chain_path(&chain);
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[1] = "not json";
        std::fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

        let fresh = JsonlAuditStore::open(dir.path()).unwrap();
        let result = IntegrityVerifier::new(Arc::new(fresh))
            .verify(&chain, VerifyRange::full())
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.checked, 1);
        assert!(result.break_at.is_none());
        let failure = result.failure.unwrap();
        assert_eq!(failure.sequence, 1);
        assert!(matches!(failure.kind, BreakKind::Unreadable { .. }));
    }

    #[test]
    fn test_jsonl_unsafe_chain_names_are_hashed() {
        let stem = super::file::chain_file_stem(&ChainId::for_tenant(Some("../etc")));
        assert!(stem.starts_with("chain-"));
        assert_eq!(stem.len(), "chain-".len() + 64);
        assert_eq!(super::file::chain_file_stem(&ChainId::system()), "system");
    }

    // ── SQLite ────────────────────────────────────────────────────────────────

    #[test]
    fn test_sqlite_contract() {
        check_store_contract(&SqliteAuditStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_snapshot() {
        check_snapshot(&SqliteAuditStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_contention() {
        check_contention(Arc::new(SqliteAuditStore::in_memory().unwrap()));
    }

    #[test]
    fn test_sqlite_admin_replace() {
        check_admin_replace(Arc::new(SqliteAuditStore::in_memory().unwrap()));
    }

    /// Conditional append is enforced by the database, not by this process.
    #[test]
    fn test_sqlite_cross_handle_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let chain = ChainId::system();
        let first = SqliteAuditStore::open(&path).unwrap();
        let second = SqliteAuditStore::open(&path).unwrap();

        let a = sealed("A", None);
        first.append_if_tail(&chain, None, &a).unwrap();

        let rival = sealed("Rival", None);
        let err = second.append_if_tail(&chain, None, &rival).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let b = sealed("B", Some(&a));
        assert_eq!(
            second.append_if_tail(&chain, Some(&a.hash), &b).unwrap().sequence,
            1
        );
        assert_eq!(first.tail(&chain).unwrap().as_deref(), Some(b.id()));
    }

    #[test]
    fn test_sqlite_independent_writers_never_fork() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let handles = (0..6)
            .map(|_| Arc::new(SqliteAuditStore::open(&path).unwrap()) as Arc<dyn AuditStore>)
            .collect();
        check_independent_writers(handles);
    }

    /// Scans page through more rows than one page holds.
    #[test]
    fn test_sqlite_scan_pages() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let chain = ChainId::system();
        let mut prev: Option<AuditEntry> = None;
        for i in 0..600 {
            let entry = sealed(&format!("Step{i}"), prev.as_ref());
            store
                .append_if_tail(&chain, prev.as_ref().map(|p| p.hash.as_str()), &entry)
                .unwrap();
            prev = Some(entry);
        }

        let seqs: Vec<u64> = store
            .scan(&chain, &ScanFilter::sequences(Some(250), Some(520)))
            .unwrap()
            .map(|c| c.unwrap().sequence)
            .collect();
        assert_eq!(seqs.len(), 271);
        assert_eq!(seqs.first(), Some(&250));
        assert_eq!(seqs.last(), Some(&520));
    }
}
