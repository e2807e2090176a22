//! Drip: declarative content lifecycle and dispatch engine.
//!
//! Drip turns a declarative list of content specs into persisted,
//! uniquely-identified instances, drives them through generation and
//! human-gated authorization with bounded retries, and promotes
//! authorized instances into cron-triggered publication jobs that fire
//! at most once and then vanish.
//!
//! # Lifecycle
//!
//! ```text
//! declared spec -> fingerprint -> store lookup
//!     -> (if absent) generate -> authorize (<= 5 rounds) -> persist
//!     -> dispatch: schedule job keyed by fingerprint
//!     -> on fire: drop job, delete record, publish
//! ```
//!
//! Identity is a sha256 over the spec's registered behavior identifiers
//! and schedule, so re-declaring an unchanged spec never duplicates an
//! instance, and any behavioral edit yields a fresh one. Records, once
//! authorized and persisted, are never re-generated or re-authorized:
//! authorization is a one-time gate, not a per-cycle check.
//!
//! # Architecture
//!
//! - [`core::store`]: generic keyed-table SQLite store, one table per
//!   content variant, fingerprint as the logical unique key
//! - [`core::instance`]: the content state machine
//! - [`core::reconcile`]: periodic diff of declared specs vs. the store
//! - [`core::dispatch`]: job promotion, firing, and the blocking loop
//! - [`registry`]: closed identifier -> collaborator mapping
//! - [`config`]: TOML spec declarations and key bundles
//!
//! The engine is single-threaded by design: at most one job body runs at
//! a time, and collaborator calls (generation, authorization,
//! publication) may block the loop. Delivery is at-most-once; the record
//! is deleted before the publish call runs.

pub mod cli;
pub mod config;
pub mod core;
pub mod registry;

pub use crate::core::error::DripError;
