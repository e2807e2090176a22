//! Reconciliation driver.
//!
//! Diffs the declared specs against the database of record. Missing
//! fingerprints are realized (generate + bounded authorization) and
//! persisted; present fingerprints are skipped outright. Existing records
//! are never re-generated or re-authorized: a changed spec definition
//! produces a new fingerprint and therefore a new, independent record,
//! and the old one stays orphaned until removed explicitly.

use crate::config::{self, ContentSpec};
use crate::core::error::DripError;
use crate::core::events::EventLog;
use crate::core::instance::ContentInstance;
use crate::core::schedule;
use crate::core::store::{Filter, Store};
use crate::registry::Registry;
use serde::Serialize;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub abandoned: usize,
}

/// One reconciliation pass over all declared specs, in declaration
/// order. A rejected spec (bad schedule, unknown variant) does not stop
/// the others; authorization exhaustion persists nothing and is retried
/// whole on the next pass. Store I/O failures propagate and fail the
/// pass; the periodic tick is the retry mechanism.
pub fn reconcile_pass(
    store: &Store,
    registry: &Registry,
    specs: &[ContentSpec],
    events: &EventLog,
) -> Result<ReconcileReport, DripError> {
    let mut report = ReconcileReport::default();

    for spec in specs {
        if let Some(expr) = &spec.schedule {
            if let Err(e) = schedule::validate(expr) {
                events.record_detail("reconcile.spec", &spec.variant, "rejected", &e.to_string())?;
                report.rejected += 1;
                continue;
            }
        }
        let schema = match registry.schema(&spec.variant) {
            Ok(s) => s.clone(),
            Err(e) => {
                events.record_detail("reconcile.spec", &spec.variant, "rejected", &e.to_string())?;
                report.rejected += 1;
                continue;
            }
        };

        let fingerprint = spec.fingerprint();
        store.create_table(&spec.variant, &schema.field_names())?;
        let existing = store.select(&spec.variant, &Filter::Fingerprint(fingerprint.clone()))?;
        if !existing.is_empty() {
            report.skipped += 1;
            continue;
        }

        let keys = config::load_key_bundle(spec.keys.as_deref())?;
        let mut instance = ContentInstance::new(spec, schema, keys)?;
        if instance.realize(registry, events)? {
            store.upsert(&spec.variant, &fingerprint, &instance.to_row()?)?;
            events.record("reconcile.spec", &fingerprint, "created")?;
            report.created += 1;
        } else {
            report.abandoned += 1;
        }
    }

    Ok(report)
}
