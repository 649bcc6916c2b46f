//! custos: operator CLI for the tamper-evident audit trail.
//!
//! Records entries, verifies chains, produces compliance reports and browses
//! history against a configured store. The `scenarios` subcommand runs the
//! facility reference scenarios against in-memory stores.
//!
//! Usage:
//!   cargo run -p demo -- record --actor staff-1 --tenant clinic ClientViewed Client
//!   cargo run -p demo -- verify --tenant clinic
//!   cargo run -p demo -- report --tenant clinic --from 2026-07-01 --to 2026-09-30
//!   cargo run -p demo -- history --tenant clinic --actor staff-1
//!   cargo run -p demo -- scenarios

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use custos_contracts::{
    entry::{AuditEvent, CallerContext, ChainId, CommittedEntry, Origin},
    error::AuditResult,
    filter::ScanFilter,
    report::{ComplianceReport, ReportQuery},
    verify::VerifyRange,
};
use custos_core::{traits::SystemClock, AuditTrail};

use crate::config::{CustosConfig, StoreKind};

/// Exit status when a chain fails verification.
const EXIT_CHAIN_BROKEN: i32 = 2;

// ── CLI definition ────────────────────────────────────────────────────────────

/// custos: tamper-evident audit trail.
#[derive(Parser)]
#[command(
    name = "custos",
    about = "Tamper-evident audit trail operator CLI",
    long_about = "Records audit entries to a hash-chained, append-only store, verifies\n\
                  chain integrity and produces GDPR / ISO 27001 compliance reports."
)]
struct Cli {
    /// TOML configuration file (store, sequencer, compliance).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured store adapter.
    #[arg(long, global = true, value_enum)]
    store: Option<StoreKind>,

    /// Override the configured store path.
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Selects the chain: a tenant's chain, or the system chain when omitted.
#[derive(Args)]
struct ChainArgs {
    #[arg(long)]
    tenant: Option<String>,
}

impl ChainArgs {
    fn chain(&self) -> ChainId {
        ChainId::for_tenant(self.tenant.as_deref())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Append one audit entry.
    Record {
        #[command(flatten)]
        chain: ChainArgs,
        /// Action name, e.g. ClientUpdated.
        action: String,
        /// Entity type, e.g. Client.
        entity_type: String,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long, default_value = "system")]
        actor: String,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// State before the change, as JSON.
        #[arg(long, value_parser = parse_json)]
        before: Option<Value>,
        /// State after the change, as JSON.
        #[arg(long, value_parser = parse_json)]
        after: Option<Value>,
    },
    /// Replay a chain and report the first break. Exits 2 when broken.
    Verify {
        #[command(flatten)]
        chain: ChainArgs,
        /// First sequence to verify.
        #[arg(long)]
        from: Option<u64>,
        /// Last sequence to verify.
        #[arg(long)]
        to: Option<u64>,
    },
    /// Compliance report over a time window.
    Report {
        #[command(flatten)]
        chain: ChainArgs,
        /// Window start: RFC 3339 instant or YYYY-MM-DD.
        #[arg(long, value_parser = parse_window_start)]
        from: DateTime<Utc>,
        /// Window end, inclusive: RFC 3339 instant or YYYY-MM-DD.
        #[arg(long, value_parser = parse_window_end)]
        to: DateTime<Utc>,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        action: Option<String>,
        /// Maximum entries listed in the report.
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List committed entries in append order.
    History {
        #[command(flatten)]
        chain: ChainArgs,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long, value_parser = parse_window_start)]
        since: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_window_end)]
        until: Option<DateTime<Utc>>,
        /// Print entries as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Run the facility reference scenarios on in-memory stores.
    Scenarios,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("custos: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> AuditResult<i32> {
    if let Command::Scenarios = cli.command {
        print_banner();
        custos_ref_facility::run_all()?;
        println!("All scenarios completed successfully.");
        return Ok(0);
    }

    let mut config = match &cli.config {
        Some(path) => CustosConfig::from_file(path)?,
        None => CustosConfig::default(),
    };
    if let Some(kind) = cli.store {
        config.store.kind = kind;
    }
    if let Some(path) = cli.store_path {
        config.store.path = Some(path);
    }
    config.validate()?;
    debug!(store = ?config.store.kind, path = %config.store.resolved_path().display(), "config loaded");

    let trail = AuditTrail::with_config(
        config.store.open()?,
        config.compliance.engine()?,
        Arc::new(SystemClock),
        config.sequencer.clone(),
    );

    match cli.command {
        Command::Record {
            chain,
            action,
            entity_type,
            entity_id,
            actor,
            ip,
            user_agent,
            description,
            before,
            after,
        } => {
            let origin = record_origin(ip.as_deref(), user_agent.as_deref());
            let mut ctx = CallerContext::new(actor, origin);
            if let Some(tenant) = chain.tenant {
                ctx = ctx.with_tenant(tenant);
            }

            let mut event = AuditEvent::new(action, entity_type);
            if let Some(id) = entity_id {
                event = event.entity(id);
            }
            if let Some(text) = description {
                event = event.description(text);
            }
            if let Some(state) = before {
                event = event.before(&state)?;
            }
            if let Some(state) = after {
                event = event.after(&state)?;
            }

            let entry = trail.record(&ctx, event)?;
            println!("{}", entry.id());
            Ok(0)
        }
        Command::Verify { chain, from, to } => {
            let range = VerifyRange { from, to };
            let result = trail.verify(&chain.chain(), range)?;
            if result.ok {
                println!("chain '{}' intact: {} entries checked", chain.chain(), result.checked);
                return Ok(0);
            }
            println!(
                "chain '{}' BROKEN after {} entries: break_at={}",
                chain.chain(),
                result.checked,
                result.break_at.as_deref().unwrap_or("(unreadable record)")
            );
            if let Err(e) = result.ensure_intact() {
                println!("  {}", e);
            }
            Ok(EXIT_CHAIN_BROKEN)
        }
        Command::Report {
            chain,
            from,
            to,
            entity_type,
            actor,
            action,
            limit,
            json,
        } => {
            let mut query = ReportQuery::new(from, to).entry_limit(limit);
            if let Some(entity_type) = entity_type {
                query = query.entity_type(entity_type);
            }
            if let Some(actor) = actor {
                query = query.actor(actor);
            }
            if let Some(action) = action {
                query = query.action(action);
            }
            let report = trail.report(&chain.chain(), &query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(0)
        }
        Command::History {
            chain,
            entity_type,
            entity_id,
            actor,
            action,
            since,
            until,
            json,
        } => {
            let filter = ScanFilter {
                since,
                until,
                actor,
                action,
                entity_type,
                entity_id,
                ..ScanFilter::all()
            };
            let entries = trail.history(&chain.chain(), &filter)?;
            for committed in &entries {
                if json {
                    println!("{}", serde_json::to_string(committed)?);
                } else {
                    print_entry(committed);
                }
            }
            Ok(0)
        }
        // Handled before the store is opened.
        Command::Scenarios => Ok(0),
    }
}

// ── Argument parsing ──────────────────────────────────────────────────────────

fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {e}"))
}

fn parse_instant(s: &str, day_time: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|date| date.and_time(day_time).and_utc())
        .map_err(|_| format!("'{s}' is neither an RFC 3339 instant nor YYYY-MM-DD"))
}

fn parse_window_start(s: &str) -> Result<DateTime<Utc>, String> {
    let midnight =
        NaiveTime::from_hms_opt(0, 0, 0).ok_or_else(|| "invalid midnight".to_string())?;
    parse_instant(s, midnight)
}

/// A bare date ends at the last microsecond of that day.
fn parse_window_end(s: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
        .ok_or_else(|| "invalid end-of-day time".to_string())?;
    parse_instant(s, end_of_day)
}

/// Origin of a `record` invocation: the system origin when neither value is
/// given, otherwise the given values with `Origin::UNKNOWN` filling gaps.
fn record_origin(ip: Option<&str>, user_agent: Option<&str>) -> Origin {
    if ip.is_none() && user_agent.is_none() {
        return Origin::system();
    }
    Origin::from_forwarded(None, None, ip, user_agent)
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_entry(committed: &CommittedEntry) {
    let e = &committed.entry;
    println!(
        "{:>6}  {}  {:<20} {:<12} {:<36} {:<16} {}",
        committed.sequence,
        e.timestamp.to_rfc3339(),
        e.action,
        e.entity_type,
        e.entity_id.as_deref().unwrap_or("-"),
        e.actor,
        e.id()
    );
}

fn print_report(report: &ComplianceReport) {
    println!("Compliance report for chain '{}'", report.chain);
    println!("  Period:             {}", report.period());
    println!("  Generated:          {}", report.generated_at.to_rfc3339());
    println!("  Entries in period:  {}", report.totals.total_entries);
    println!("  Entries in chain:   {}", report.totals.chain_entries);
    println!("  Integrity:          {}", report.integrity_ok);
    println!("  Data minimization:  {}", report.data_minimization_ok);
    println!("  Retention:          {}", report.retention_ok);
    println!();
    for (label, stats) in [
        ("action", &report.action_stats),
        ("entity", &report.entity_stats),
        ("actor", &report.actor_stats),
    ] {
        for (key, count) in stats {
            println!("  {:<7} {:<28} {}", label, key, count);
        }
    }
    println!();
    for finding in &report.checks {
        println!(
            "  [{}] {:<9} {}",
            if finding.satisfied { "PASS" } else { "FAIL" },
            finding.framework,
            finding.description
        );
    }
    if !report.entries.is_empty() {
        println!();
        for row in &report.entries {
            println!(
                "  {:>6}  {}  {:<20} {:<12} {}",
                row.sequence,
                row.timestamp.to_rfc3339(),
                row.action,
                row.entity_type,
                row.actor
            );
        }
    }
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("custos: Tamper-evident Audit Trail");
    println!("Facility Reference Scenarios");
    println!("==================================");
    println!();
    println!("Every recorded event passes through:");
    println!("  [1] Canonical encoding of the entry's fields (versioned, deterministic)");
    println!("  [2] Per-chain sequencer reads the tail and links previous_hash");
    println!("  [3] SHA-256 over the encoding becomes the entry id");
    println!("  [4] Conditional append: commits only if the tail is unchanged, else retry");
    println!("  [5] Verifier and report replay the chain in append order");
    println!();
}
