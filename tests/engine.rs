use chrono::{TimeZone, Utc};
use drip::config::ContentSpec;
use drip::core::codec::AttrValue;
use drip::core::dispatch::Dispatcher;
use drip::core::error::DripError;
use drip::core::events::EventLog;
use drip::core::instance::AUTH_RETRY_BUDGET;
use drip::core::reconcile::reconcile_pass;
use drip::core::schema::{FieldKind, VariantSchema};
use drip::core::store::{COL_AUTHORIZED, Filter, Store};
use drip::registry::{
    AttrMap, AuthDecision, Authorizer, Generator, KeyBundle, Publisher, Registry,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tempfile::tempdir;

#[derive(Clone, Copy)]
enum GenMode {
    Exact,
    ExtraKey,
    MissingKey,
}

struct ScriptedGenerator {
    calls: Rc<Cell<usize>>,
    mode: GenMode,
}

impl Generator for ScriptedGenerator {
    fn generate(&self, _keys: &KeyBundle) -> Result<AttrMap, DripError> {
        self.calls.set(self.calls.get() + 1);
        let mut attrs = AttrMap::new();
        attrs.insert(
            "text".to_string(),
            AttrValue::Str(format!("take {}", self.calls.get())),
        );
        attrs.insert("topic".to_string(), AttrValue::Str("testing".to_string()));
        match self.mode {
            GenMode::Exact => {}
            GenMode::ExtraKey => {
                attrs.insert("surprise".to_string(), AttrValue::Int(1));
            }
            GenMode::MissingKey => {
                attrs.remove("topic");
            }
        }
        Ok(attrs)
    }
}

struct ScriptedAuthorizer {
    calls: Rc<Cell<usize>>,
    seen_texts: Rc<RefCell<Vec<String>>>,
    decision: AuthDecision,
}

impl Authorizer for ScriptedAuthorizer {
    fn authorize(&self, attrs: &AttrMap, _keys: &KeyBundle) -> Result<AuthDecision, DripError> {
        self.calls.set(self.calls.get() + 1);
        if let Some(AttrValue::Str(text)) = attrs.get("text") {
            self.seen_texts.borrow_mut().push(text.clone());
        }
        Ok(self.decision)
    }
}

struct RecordingPublisher {
    published: Rc<RefCell<Vec<AttrMap>>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, attrs: &AttrMap, _keys: &KeyBundle) -> Result<(), DripError> {
        self.published.borrow_mut().push(attrs.clone());
        Ok(())
    }
}

struct Harness {
    tmp: tempfile::TempDir,
    store: Store,
    events: EventLog,
    registry: Registry,
    gen_calls: Rc<Cell<usize>>,
    auth_calls: Rc<Cell<usize>>,
    seen_texts: Rc<RefCell<Vec<String>>>,
    published: Rc<RefCell<Vec<AttrMap>>>,
}

fn harness(mode: GenMode, decision: AuthDecision) -> Harness {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(&tmp.path().join("drip.db")).expect("open store");
    let events = EventLog::new(tmp.path());

    let gen_calls = Rc::new(Cell::new(0));
    let auth_calls = Rc::new(Cell::new(0));
    let seen_texts = Rc::new(RefCell::new(Vec::new()));
    let published = Rc::new(RefCell::new(Vec::new()));

    let mut registry = Registry::new();
    registry.register_schema(VariantSchema::new(
        "note",
        &[("text", FieldKind::Text), ("topic", FieldKind::Text)],
    ));
    registry.register_generator(
        "scripted",
        Box::new(ScriptedGenerator {
            calls: gen_calls.clone(),
            mode,
        }),
    );
    registry.register_authorizer(
        "scripted",
        Box::new(ScriptedAuthorizer {
            calls: auth_calls.clone(),
            seen_texts: seen_texts.clone(),
            decision,
        }),
    );
    registry.register_publisher(
        "recording",
        Box::new(RecordingPublisher {
            published: published.clone(),
        }),
    );

    Harness {
        tmp,
        store,
        events,
        registry,
        gen_calls,
        auth_calls,
        seen_texts,
        published,
    }
}

fn spec(schedule: Option<&str>, authorizer: Option<&str>, authorized: bool) -> ContentSpec {
    ContentSpec {
        variant: "note".to_string(),
        generator: "scripted".to_string(),
        publisher: "recording".to_string(),
        authorizer: authorizer.map(|s| s.to_string()),
        schedule: schedule.map(|s| s.to_string()),
        authorized,
        keys: None,
    }
}

#[test]
fn reconciliation_is_idempotent() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![spec(Some("0 0 9 * * *"), None, false)];

    let first = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();
    assert_eq!(first.created, 1);
    let second = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 1);

    let rows = h.store.select("note", &Filter::All).unwrap();
    assert_eq!(rows.len(), 1);
    // Existing records are never re-generated.
    assert_eq!(h.gen_calls.get(), 1);
}

#[test]
fn changed_schedule_yields_new_record_and_orphans_old() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let original = vec![spec(Some("0 0 9 * * *"), None, false)];
    reconcile_pass(&h.store, &h.registry, &original, &h.events).unwrap();

    let edited = vec![spec(Some("0 0 10 * * *"), None, false)];
    let report = reconcile_pass(&h.store, &h.registry, &edited, &h.events).unwrap();
    assert_eq!(report.created, 1);

    let rows = h.store.select("note", &Filter::All).unwrap();
    assert_eq!(rows.len(), 2, "old record stays orphaned until removed");
}

#[test]
fn schema_superset_leaves_store_untouched() {
    let h = harness(GenMode::ExtraKey, AuthDecision::Approved);
    let specs = vec![spec(None, None, false)];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    assert_eq!(report.abandoned, 1);
    assert_eq!(h.gen_calls.get(), AUTH_RETRY_BUDGET);
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());
}

#[test]
fn schema_subset_leaves_store_untouched() {
    let h = harness(GenMode::MissingKey, AuthDecision::Approved);
    let specs = vec![spec(None, None, false)];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    assert_eq!(report.abandoned, 1);
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());
}

#[test]
fn rejecting_authorizer_caps_at_five_fresh_rounds() {
    let h = harness(GenMode::Exact, AuthDecision::Rejected);
    let specs = vec![spec(Some("0 0 9 * * *"), Some("scripted"), false)];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    assert_eq!(report.abandoned, 1);
    assert_eq!(h.gen_calls.get(), AUTH_RETRY_BUDGET);
    assert_eq!(h.auth_calls.get(), AUTH_RETRY_BUDGET);
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());

    // Authorization is never retried against the same generated content.
    let seen = h.seen_texts.borrow();
    let mut distinct = seen.clone();
    distinct.dedup();
    assert_eq!(distinct.len(), AUTH_RETRY_BUDGET);
}

#[test]
fn timeout_decision_behaves_like_rejection() {
    let h = harness(GenMode::Exact, AuthDecision::TimedOut);
    let specs = vec![spec(None, Some("scripted"), false)];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    assert_eq!(report.abandoned, 1);
    assert_eq!(h.auth_calls.get(), AUTH_RETRY_BUDGET);
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());
}

#[test]
fn preauthorized_spec_skips_the_gate() {
    let h = harness(GenMode::Exact, AuthDecision::Rejected);
    let specs = vec![spec(None, Some("scripted"), true)];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(h.auth_calls.get(), 0);
    let rows = h.store.select("note", &Filter::All).unwrap();
    assert_eq!(rows[0][COL_AUTHORIZED], "b:true");
}

#[test]
fn invalid_schedule_rejects_that_spec_only() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![
        spec(Some("not a schedule"), None, false),
        spec(Some("0 0 9 * * *"), None, false),
    ];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(report.created, 1);
    assert_eq!(h.store.select("note", &Filter::All).unwrap().len(), 1);
}

#[test]
fn immediate_spec_publishes_exactly_once() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![spec(None, None, false)];
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();
    assert_eq!(report.created, 1);

    let now = Utc::now();
    let mut dispatcher = Dispatcher::new(EventLog::new(h.tmp.path()));
    dispatcher.sync(&h.store, now).unwrap();
    assert_eq!(dispatcher.job_count(), 1);

    let fired = dispatcher.fire_due(&h.store, &h.registry, now).unwrap();
    assert_eq!(fired, 1);
    assert_eq!(h.published.borrow().len(), 1);
    assert_eq!(
        h.published.borrow()[0]["text"],
        AttrValue::Str("take 1".to_string())
    );
    assert_eq!(dispatcher.job_count(), 0);
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());

    // A second dispatch pass finds no record and performs no action.
    dispatcher.sync(&h.store, now).unwrap();
    let fired_again = dispatcher.fire_due(&h.store, &h.registry, now).unwrap();
    assert_eq!(fired_again, 0);
    assert_eq!(h.published.borrow().len(), 1);
}

#[test]
fn cron_job_waits_for_its_trigger() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![spec(Some("0 0 9 * * *"), None, false)];
    reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    let morning = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let mut dispatcher = Dispatcher::new(EventLog::new(h.tmp.path()));
    dispatcher.sync(&h.store, morning).unwrap();
    assert_eq!(dispatcher.job_count(), 1);

    assert_eq!(
        dispatcher.fire_due(&h.store, &h.registry, morning).unwrap(),
        0
    );
    assert!(h.published.borrow().is_empty());

    let nine = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    assert_eq!(dispatcher.fire_due(&h.store, &h.registry, nine).unwrap(), 1);
    assert_eq!(h.published.borrow().len(), 1);
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());
}

#[test]
fn resync_keeps_pending_fire_time_for_unchanged_schedule() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![spec(Some("0 0 9 * * *"), None, false)];
    reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    let morning = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let mut dispatcher = Dispatcher::new(EventLog::new(h.tmp.path()));
    dispatcher.sync(&h.store, morning).unwrap();

    // The fire moment passes while only syncs happen; the pending time
    // must survive so the firing is not pushed to the next day.
    let past_due = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 30).unwrap();
    dispatcher.sync(&h.store, past_due).unwrap();
    assert_eq!(
        dispatcher.fire_due(&h.store, &h.registry, past_due).unwrap(),
        1
    );
}

#[test]
fn job_never_outlives_its_record() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![spec(Some("0 0 9 * * *"), None, false)];
    reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    let now = Utc::now();
    let mut dispatcher = Dispatcher::new(EventLog::new(h.tmp.path()));
    dispatcher.sync(&h.store, now).unwrap();
    assert_eq!(dispatcher.job_count(), 1);

    h.store.delete("note", &Filter::All).unwrap();
    dispatcher.sync(&h.store, now).unwrap();
    assert_eq!(dispatcher.job_count(), 0);
}

#[test]
fn published_spec_is_recreated_on_next_cycle() {
    let h = harness(GenMode::Exact, AuthDecision::Approved);
    let specs = vec![spec(None, None, false)];
    reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();

    let now = Utc::now();
    let mut dispatcher = Dispatcher::new(EventLog::new(h.tmp.path()));
    dispatcher.sync(&h.store, now).unwrap();
    dispatcher.fire_due(&h.store, &h.registry, now).unwrap();
    assert!(h.store.select("note", &Filter::All).unwrap().is_empty());

    // The spec is still declared, its record is gone: reconciliation
    // starts the lifecycle over from scratch.
    let report = reconcile_pass(&h.store, &h.registry, &specs, &h.events).unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(h.gen_calls.get(), 2);
    assert_eq!(h.store.select("note", &Filter::All).unwrap().len(), 1);
}
