//! Mnemo CLI - administration for routed memory stores
//!
//! The `mnemo` command inspects and migrates a deployment described by a
//! JSON configuration file.
//!
//! ## Commands
//!
//! - `info`: Collection summary for main and every sub-store
//! - `status`: Migration progress for one or all sub-stores
//! - `migrate`: Move matching records from main into a sub-store
//! - `reset`: Return a sub-store's migration to `pending`
//! - `list`: Routed listing, each record tagged with its origin store

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mnemo_state::telemetry::init_tracing;
use mnemo_state::{
    Filters, MigrationProgress, MnemoConfig, MnemoStore, Scope, StoreError, SubStoreRef,
};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administer Mnemo memory stores and sub-store migrations", long_about = None)]
struct Cli {
    /// Path to the deployment configuration (JSON)
    #[arg(short, long, global = true, env = "MNEMO_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON lines (command output and logs)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record counts and locations of every collection
    Info,

    /// Show migration progress
    Status {
        /// Sub-store name or index (default: all)
        sub_store: Option<String>,
    },

    /// Migrate records matching a sub-store's routing filter out of main
    Migrate {
        /// Sub-store name or index
        sub_store: String,

        /// Delete migrated records from the main collection
        #[arg(long)]
        delete_source: bool,

        /// Records per batch (default: from configuration)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Reset a sub-store's migration record to pending
    Reset {
        /// Sub-store name or index
        sub_store: String,
    },

    /// List records through the router
    List {
        /// Metadata filter as key=value (repeatable)
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, Value)>,

        /// Restrict to one user's records
        #[arg(long)]
        user_id: Option<String>,

        /// Restrict to one agent's records
        #[arg(long)]
        agent_id: Option<String>,

        /// Maximum number of records
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.json, level);

    let path = cli
        .config
        .clone()
        .ok_or_else(|| anyhow!("no configuration: pass --config or set MNEMO_CONFIG"))?;
    let config = MnemoConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    let store = MnemoStore::open(&config)
        .await
        .context("Failed to open memory store")?;
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Info => cmd_info(&store, out).await,
        Commands::Status { sub_store } => cmd_status(&store, sub_store.as_deref(), out).await,
        Commands::Migrate {
            sub_store,
            delete_source,
            batch_size,
        } => cmd_migrate(&store, &sub_store, delete_source, batch_size, out).await,
        Commands::Reset { sub_store } => cmd_reset(&store, &sub_store, out).await,
        Commands::List {
            filters,
            user_id,
            agent_id,
            limit,
        } => {
            let scope = Scope {
                user_id,
                agent_id,
                run_id: None,
            };
            cmd_list(&store, filters.into_iter().collect(), &scope, limit, out).await
        }
    }
}

/// Human text or one JSON document per line.
#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

/// Parse `key=value`; the value is read as JSON when it parses as a scalar,
/// otherwise kept as a string.
fn parse_filter(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty filter key in '{}'", raw));
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(v) if !v.is_array() && !v.is_object() => v,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

fn sub_store_ref(raw: &str) -> Result<SubStoreRef> {
    raw.parse::<SubStoreRef>()
        .with_context(|| format!("Invalid sub-store reference '{}'", raw))
}

fn describe_progress(p: &MigrationProgress) -> String {
    let mut line = format!(
        "{:<16} {:<10} {}/{} ({:.1}%) {}ms",
        p.sub_store,
        p.status.as_str(),
        p.migrated_count,
        p.total_count,
        p.percentage,
        p.elapsed_ms
    );
    if let Some(err) = &p.error_message {
        line.push_str(&format!("  error: {}", err));
    }
    line
}

/// Show collection infos
async fn cmd_info(store: &MnemoStore, out: Output) -> Result<()> {
    let infos = store
        .collection_infos()
        .await
        .context("Failed to read collection info")?;

    for info in &infos {
        out.emit(info, || {
            format!(
                "{:<16} {:<24} {:>8} records  {}",
                info.origin.to_string(),
                info.item.name,
                info.item.record_count,
                info.item.location
            )
        })?;
    }
    Ok(())
}

/// Show migration progress
async fn cmd_status(store: &MnemoStore, sub_store: Option<&str>, out: Output) -> Result<()> {
    if store.status_store().is_degraded() {
        eprintln!("warning: backend has no migration bookkeeping; all traffic stays on main");
    }

    let progress = match sub_store {
        Some(raw) => {
            let reference = sub_store_ref(raw)?;
            match store.status(&reference).await? {
                Some(p) => vec![p],
                None => {
                    println!("No migration record for '{}'", reference);
                    return Ok(());
                }
            }
        }
        None => store.statuses().await,
    };

    if progress.is_empty() {
        println!("No sub-stores configured.");
    }
    for p in &progress {
        out.emit(p, || describe_progress(p))?;
    }
    Ok(())
}

/// Run a migration
async fn cmd_migrate(
    store: &MnemoStore,
    sub_store: &str,
    delete_source: bool,
    batch_size: Option<usize>,
    out: Output,
) -> Result<()> {
    let reference = sub_store_ref(sub_store)?;
    info!(sub_store = %reference, delete_source, "starting migration");

    let result = match batch_size {
        Some(n) => {
            store
                .migrate_with_batch_size(&reference, delete_source, n)
                .await
        }
        None => store.migrate(&reference, delete_source).await,
    };

    let report = match result {
        Ok(report) => report,
        Err(StoreError::Migration { sub_store, message }) => {
            return Err(anyhow!(
                "migration into '{}' failed: {}\nInspect with `mnemo status {}` before retrying.",
                sub_store,
                message,
                sub_store
            ));
        }
        Err(e) => return Err(e).context("Migration could not start"),
    };

    out.emit(&report, || {
        format!(
            "Migrated {} of {} records into '{}' ({} already present, {} deleted from main) in {}ms",
            report.migrated_count,
            report.total_count,
            report.sub_store,
            report.skipped_existing,
            report.deleted_from_source,
            report.duration_ms
        )
    })
}

/// Reset a migration record
async fn cmd_reset(store: &MnemoStore, sub_store: &str, out: Output) -> Result<()> {
    let reference = sub_store_ref(sub_store)?;
    store
        .reset(&reference)
        .await
        .with_context(|| format!("Failed to reset '{}'", reference))?;

    out.emit(
        &serde_json::json!({ "sub_store": reference.to_string(), "status": "pending" }),
        || format!("Reset '{}' to pending", reference),
    )
}

/// List records through the router
async fn cmd_list(
    store: &MnemoStore,
    filters: Filters,
    scope: &Scope,
    limit: usize,
    out: Output,
) -> Result<()> {
    let filters = (!filters.is_empty()).then_some(filters);
    let records = store
        .list(scope, filters.as_ref(), Some(limit))
        .await
        .context("Failed to list records")?;

    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }
    for routed in &records {
        out.emit(routed, || {
            format!(
                "[{}] {} {}",
                routed.origin,
                routed.item.id,
                Value::Object(routed.item.payload.clone())
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filter_values_parse_as_json_scalars() {
        assert_eq!(parse_filter("n=3").unwrap(), ("n".into(), json!(3)));
        assert_eq!(parse_filter("flag=true").unwrap(), ("flag".into(), json!(true)));
        assert_eq!(
            parse_filter("memory_type=working").unwrap(),
            ("memory_type".into(), json!("working"))
        );
        assert_eq!(parse_filter("tags=[1]").unwrap(), ("tags".into(), json!("[1]")));
        assert_eq!(parse_filter("note=a=b").unwrap(), ("note".into(), json!("a=b")));
        assert!(parse_filter("novalue").is_err());
        assert!(parse_filter("=x").is_err());
    }

    #[test]
    fn migrate_arguments_parse() {
        let cli = Cli::try_parse_from([
            "mnemo",
            "--config",
            "mnemo.json",
            "migrate",
            "0",
            "--delete-source",
            "--batch-size",
            "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Migrate {
                sub_store,
                delete_source,
                batch_size,
            } => {
                assert_eq!(sub_store, "0");
                assert!(delete_source);
                assert_eq!(batch_size, Some(10));
            }
            _ => panic!("expected migrate"),
        }
    }

    #[test]
    fn list_collects_repeated_filters() {
        let cli = Cli::try_parse_from([
            "mnemo",
            "list",
            "--filter",
            "memory_type=working",
            "-f",
            "n=2",
            "--user-id",
            "u1",
        ])
        .unwrap();
        match cli.command {
            Commands::List {
                filters, user_id, limit, ..
            } => {
                assert_eq!(filters.len(), 2);
                assert_eq!(user_id.as_deref(), Some("u1"));
                assert_eq!(limit, 20);
            }
            _ => panic!("expected list"),
        }
    }

    #[tokio::test]
    async fn commands_run_against_in_memory_store() {
        let filter = json!({"memory_type": "working"}).as_object().cloned().unwrap();
        let config = MnemoConfig::in_memory("memories", 2)
            .with_sub_store(mnemo_state::SubStoreConfig::new("working", filter));
        let store = MnemoStore::open(&config).await.unwrap();
        store
            .insert(
                &[vec![1.0, 0.0]],
                &[json!({"memory_type": "working"}).as_object().cloned().unwrap()],
            )
            .await
            .unwrap();

        let out = Output { json: true };
        cmd_migrate(&store, "working", true, Some(1), out).await.unwrap();
        cmd_status(&store, None, out).await.unwrap();
        cmd_info(&store, out).await.unwrap();
        cmd_list(&store, Filters::new(), &Scope::default(), 5, out).await.unwrap();
        cmd_reset(&store, "0", out).await.unwrap();
        assert!(cmd_reset(&store, "missing", out).await.is_err());
    }
}
