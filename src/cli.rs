//! Command-line surface.
//!
//! `run` starts the blocking engine; the remaining commands are one-shot
//! operator tools over the same config and database. Command results are
//! printed as JSON envelopes.

use crate::config;
use crate::core::dispatch::{Dispatcher, Engine};
use crate::core::error::DripError;
use crate::core::events::EventLog;
use crate::core::reconcile;
use crate::core::schedule;
use crate::core::store::{COL_FINGERPRINT, Filter, Store};
use crate::core::time;
use crate::registry::Registry;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "drip",
    version = env!("CARGO_PKG_VERSION"),
    about = "Declarative content lifecycle and dispatch engine"
)]
pub struct DripCli {
    /// Engine config file.
    #[clap(long, global = true, default_value = "drip.toml")]
    pub config: PathBuf,
    #[clap(subcommand)]
    pub command: DripCommand,
}

#[derive(Subcommand, Debug)]
pub enum DripCommand {
    /// Run the engine loop (reconcile + dispatch on the configured tick).
    Run,
    /// Run a single reconciliation pass and exit.
    Reconcile,
    /// Run a single dispatch pass (job sync + due firings) and exit.
    Dispatch,
    /// Inspect or remove persisted content records.
    Records {
        #[clap(subcommand)]
        command: RecordsCommand,
    },
    /// Check the config file: schedules, registry ids, key bundle paths.
    Validate,
}

#[derive(Subcommand, Debug)]
pub enum RecordsCommand {
    /// List records, optionally restricted to one table.
    List {
        #[clap(long)]
        table: Option<String>,
    },
    /// Delete one record by fingerprint (e.g. an orphaned row left
    /// behind by a changed spec definition).
    Delete {
        #[clap(long)]
        table: String,
        #[clap(long)]
        fingerprint: String,
    },
}

pub fn run_cli(cli: DripCli, registry: Registry) -> Result<(), DripError> {
    match cli.command {
        DripCommand::Run => {
            let cfg = config::load(&cli.config)?;
            Engine::new(&cli.config, &cfg, registry)?.run()
        }
        DripCommand::Reconcile => reconcile_once(&cli.config, &registry),
        DripCommand::Dispatch => dispatch_once(&cli.config, &registry),
        DripCommand::Records { command } => records(&cli.config, command),
        DripCommand::Validate => validate(&cli.config, &registry),
    }
}

fn open_store(config: &config::Config) -> Result<Store, DripError> {
    Store::open(&config.engine.database)
}

fn events_for(config: &config::Config) -> EventLog {
    let root = config
        .engine
        .database
        .parent()
        .unwrap_or_else(|| Path::new("."));
    EventLog::new(root)
}

fn reconcile_once(config_path: &Path, registry: &Registry) -> Result<(), DripError> {
    let cfg = config::load(config_path)?;
    let store = open_store(&cfg)?;
    let events = events_for(&cfg);
    let report = reconcile::reconcile_pass(&store, registry, &cfg.content, &events)?;
    println!(
        "{}",
        time::command_envelope(
            "reconcile",
            "ok",
            serde_json::json!({
                "created": report.created,
                "skipped": report.skipped,
                "rejected": report.rejected,
                "abandoned": report.abandoned,
            })
        )
    );
    Ok(())
}

fn dispatch_once(config_path: &Path, registry: &Registry) -> Result<(), DripError> {
    let cfg = config::load(config_path)?;
    let store = open_store(&cfg)?;
    let mut dispatcher = Dispatcher::new(events_for(&cfg));
    let now = Utc::now();
    dispatcher.sync(&store, now)?;
    let scheduled = dispatcher.job_count();
    let fired = dispatcher.fire_due(&store, registry, now)?;
    println!(
        "{}",
        time::command_envelope(
            "dispatch",
            "ok",
            serde_json::json!({ "scheduled": scheduled, "fired": fired })
        )
    );
    Ok(())
}

fn records(config_path: &Path, command: RecordsCommand) -> Result<(), DripError> {
    let cfg = config::load(config_path)?;
    let store = open_store(&cfg)?;
    match command {
        RecordsCommand::List { table } => {
            let tables = match table {
                Some(t) => vec![t],
                None => store.list_tables()?,
            };
            for table in tables {
                for row in store.select(&table, &Filter::All)? {
                    let mut obj = serde_json::Map::new();
                    obj.insert("table".to_string(), serde_json::json!(table.as_str()));
                    for (col, value) in &row {
                        obj.insert(col.clone(), serde_json::json!(value));
                    }
                    println!("{}", serde_json::Value::Object(obj));
                }
            }
            Ok(())
        }
        RecordsCommand::Delete { table, fingerprint } => {
            let deleted = store.delete(&table, &Filter::Fingerprint(fingerprint.clone()))?;
            if deleted == 0 {
                return Err(DripError::NotFound(format!(
                    "no record with {} '{}' in '{}'",
                    COL_FINGERPRINT, fingerprint, table
                )));
            }
            println!(
                "{}",
                time::command_envelope(
                    "records.delete",
                    "ok",
                    serde_json::json!({ "table": table, "deleted": deleted })
                )
            );
            Ok(())
        }
    }
}

fn validate(config_path: &Path, registry: &Registry) -> Result<(), DripError> {
    let cfg = config::load(config_path)?;
    let mut problems = Vec::new();
    for (idx, spec) in cfg.content.iter().enumerate() {
        let subject = format!("content[{}] ({})", idx, spec.variant);
        if let Err(e) = registry.schema(&spec.variant) {
            problems.push(format!("{}: {}", subject, e));
        }
        if let Err(e) = registry.generator(&spec.generator) {
            problems.push(format!("{}: {}", subject, e));
        }
        if let Err(e) = registry.publisher(&spec.publisher) {
            problems.push(format!("{}: {}", subject, e));
        }
        if let Some(id) = &spec.authorizer {
            if let Err(e) = registry.authorizer(id) {
                problems.push(format!("{}: {}", subject, e));
            }
        }
        if let Some(expr) = &spec.schedule {
            if let Err(e) = schedule::validate(expr) {
                problems.push(format!("{}: {}", subject, e));
            }
        }
        if let Some(path) = &spec.keys {
            if let Err(e) = config::load_key_bundle(Some(path)) {
                problems.push(format!("{}: {}", subject, e));
            }
        }
    }
    if problems.is_empty() {
        println!(
            "{}",
            time::command_envelope(
                "validate",
                "ok",
                serde_json::json!({ "specs": cfg.content.len() })
            )
        );
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("{}", problem);
        }
        Err(DripError::ValidationError(format!(
            "{} invalid spec field(s)",
            problems.len()
        )))
    }
}
