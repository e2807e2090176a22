//! Dispatch scheduler and the blocking engine loop.
//!
//! The dispatcher promotes authorized records into in-memory jobs keyed
//! by fingerprint. A job is an ephemeral, time-triggered pointer to its
//! backing record and must never outlive it: syncing drops jobs whose
//! record vanished, and firing deletes job and record before the publish
//! call runs. At-most-once delivery: a crash after deletion but before
//! publication loses that publication.

use crate::config::{self, Config};
use crate::core::codec::AttrValue;
use crate::core::error::DripError;
use crate::core::events::EventLog;
use crate::core::instance::ContentInstance;
use crate::core::reconcile::{self, ReconcileReport};
use crate::core::schedule;
use crate::core::store::{COL_AUTHORIZED, COL_FINGERPRINT, COL_KEYS_REF, COL_SCHEDULE, Filter, Row, Store};
use crate::registry::Registry;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub fingerprint: String,
    pub table: String,
    pub schedule: Option<String>,
    pub next_fire: Option<DateTime<Utc>>,
}

pub struct Dispatcher {
    jobs: BTreeMap<String, ScheduledJob>,
    events: EventLog,
}

impl Dispatcher {
    pub fn new(events: EventLog) -> Self {
        Self {
            jobs: BTreeMap::new(),
            events,
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn job(&self, fingerprint: &str) -> Option<&ScheduledJob> {
        self.jobs.get(fingerprint)
    }

    /// Rebuild the job set from the store. Register-or-replace keyed by
    /// fingerprint is idempotent; a job whose schedule is unchanged keeps
    /// its pending fire time so a due moment is never skipped by a
    /// concurrent sync. No schedule means fire immediately, once.
    pub fn sync(&mut self, store: &Store, now: DateTime<Utc>) -> Result<(), DripError> {
        let mut backed = BTreeSet::new();
        for table in store.list_tables()? {
            for row in store.select(&table, &Filter::All)? {
                let Some(fingerprint) = row.get(COL_FINGERPRINT).cloned() else {
                    continue;
                };
                if !row_is_authorized(&row)? {
                    continue;
                }
                backed.insert(fingerprint.clone());
                let expr = decode_schedule(&row)?;
                let unchanged = self
                    .jobs
                    .get(&fingerprint)
                    .is_some_and(|job| job.schedule == expr);
                if unchanged {
                    continue;
                }
                let next_fire = match &expr {
                    Some(expr) => schedule::next_fire(expr, now)?,
                    None => Some(now),
                };
                self.jobs.insert(
                    fingerprint.clone(),
                    ScheduledJob {
                        fingerprint: fingerprint.clone(),
                        table: table.clone(),
                        schedule: expr,
                        next_fire,
                    },
                );
                self.events
                    .record("dispatch.schedule", &fingerprint, "registered")?;
            }
        }
        // A job must never outlive its backing record.
        self.jobs.retain(|fp, _| backed.contains(fp));
        Ok(())
    }

    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        self.jobs
            .values()
            .filter(|job| job.next_fire.is_some_and(|at| at <= now))
            .map(|job| job.fingerprint.clone())
            .collect()
    }

    /// Fire one job: remove it from the schedule, delete the backing
    /// record, then publish. Deletion strictly precedes publication so a
    /// crash mid-publish cannot cause a re-fire on restart.
    pub fn fire(
        &mut self,
        store: &Store,
        registry: &Registry,
        fingerprint: &str,
    ) -> Result<bool, DripError> {
        let job = self
            .jobs
            .remove(fingerprint)
            .ok_or_else(|| DripError::NotFound(format!("job '{}'", fingerprint)))?;

        let rows = store.select(&job.table, &Filter::Fingerprint(job.fingerprint.clone()))?;
        let Some(row) = rows.first() else {
            self.events
                .record("dispatch.fire", fingerprint, "stale_job_dropped")?;
            return Ok(false);
        };

        store.delete(&job.table, &Filter::Fingerprint(job.fingerprint.clone()))?;

        let schema = registry.schema(&job.table)?.clone();
        let keys_ref = decode_keys_ref(row)?;
        let keys = config::load_key_bundle(keys_ref.as_deref().map(Path::new))?;
        let mut instance = ContentInstance::from_row(schema, row, keys)?;
        instance.mark_scheduled();
        instance.publish(registry)?;
        instance.mark_published();
        self.events.record("dispatch.fire", fingerprint, "published")?;
        Ok(true)
    }

    /// Fire every due job, one at a time. Publish failures are logged and
    /// absorbed; the job and record are already gone either way.
    pub fn fire_due(
        &mut self,
        store: &Store,
        registry: &Registry,
        now: DateTime<Utc>,
    ) -> Result<usize, DripError> {
        let mut fired = 0;
        for fingerprint in self.due(now) {
            match self.fire(store, registry, &fingerprint) {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    self.events.record_detail(
                        "dispatch.fire",
                        &fingerprint,
                        "error",
                        &e.to_string(),
                    )?;
                }
            }
        }
        Ok(fired)
    }
}

fn row_is_authorized(row: &Row) -> Result<bool, DripError> {
    match row.get(COL_AUTHORIZED) {
        Some(encoded) => Ok(matches!(AttrValue::decode(encoded)?, AttrValue::Bool(true))),
        None => Ok(false),
    }
}

fn decode_schedule(row: &Row) -> Result<Option<String>, DripError> {
    decode_opt_text(row, COL_SCHEDULE)
}

fn decode_keys_ref(row: &Row) -> Result<Option<String>, DripError> {
    decode_opt_text(row, COL_KEYS_REF)
}

fn decode_opt_text(row: &Row, col: &str) -> Result<Option<String>, DripError> {
    match row.get(col) {
        None => Ok(None),
        Some(encoded) => match AttrValue::decode(encoded)? {
            AttrValue::Str(s) => Ok(Some(s)),
            AttrValue::Null => Ok(None),
            other => Err(DripError::ValidationError(format!(
                "column '{}' holds {:?}, expected string or null",
                col, other
            ))),
        },
    }
}

/// Blocking engine: the reconcile + job-sync core tick on a fixed period,
/// with due jobs polled at 1s granularity in between. Single-threaded by
/// design; a slow collaborator call blocks the next due job.
pub struct Engine {
    config_path: PathBuf,
    tick_seconds: i64,
    registry: Registry,
    store: Store,
    dispatcher: Dispatcher,
    events: EventLog,
    last_tick: Option<DateTime<Utc>>,
}

impl Engine {
    pub fn new(config_path: &Path, config: &Config, registry: Registry) -> Result<Self, DripError> {
        let store = Store::open(&config.engine.database)?;
        let root = config
            .engine
            .database
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Ok(Self {
            config_path: config_path.to_path_buf(),
            tick_seconds: config.engine.tick_seconds as i64,
            registry,
            store,
            dispatcher: Dispatcher::new(EventLog::new(&root)),
            events: EventLog::new(&root),
            last_tick: None,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// One scheduling step at `now`. A failed reconcile or sync pass is
    /// logged and retried on the next core tick; it never stops the loop.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<usize, DripError> {
        let core_due = match self.last_tick {
            None => true,
            Some(at) => now - at >= Duration::seconds(self.tick_seconds),
        };
        if core_due {
            self.last_tick = Some(now);
            match self.reconcile_once(now) {
                Ok(report) => {
                    self.events.record_detail(
                        "engine.tick",
                        "reconcile",
                        "ok",
                        &format!(
                            "created={} skipped={} rejected={} abandoned={}",
                            report.created, report.skipped, report.rejected, report.abandoned
                        ),
                    )?;
                }
                Err(e) => {
                    self.events
                        .record_detail("engine.tick", "reconcile", "error", &e.to_string())?;
                }
            }
        }
        self.dispatcher.fire_due(&self.store, &self.registry, now)
    }

    fn reconcile_once(&mut self, now: DateTime<Utc>) -> Result<ReconcileReport, DripError> {
        // Specs are re-derived from configuration on every pass.
        let config = config::load(&self.config_path)?;
        let report =
            reconcile::reconcile_pass(&self.store, &self.registry, &config.content, &self.events)?;
        self.dispatcher.sync(&self.store, now)?;
        Ok(report)
    }

    pub fn run(&mut self) -> Result<(), DripError> {
        self.events.record("engine.run", "core", "started")?;
        loop {
            self.tick(Utc::now())?;
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }
}
