//! Append-only JSONL event log for engine observability.
//!
//! Every state-affecting operation (store writes, reconciliation outcomes,
//! job firings) appends one line to `engine.events.jsonl` next to the
//! database. The log is the engine's only observability surface.

use crate::core::error::DripError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EVENT_LOG_NAME: &str = "engine.events.jsonl";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub subject: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// `root` is the directory holding the engine database.
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(EVENT_LOG_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, op: &str, subject: &str, status: &str) -> Result<(), DripError> {
        self.append(op, subject, status, None)
    }

    pub fn record_detail(
        &self,
        op: &str,
        subject: &str,
        status: &str,
        detail: &str,
    ) -> Result<(), DripError> {
        self.append(op, subject, status, Some(detail.to_string()))
    }

    fn append(
        &self,
        op: &str,
        subject: &str,
        status: &str,
        detail: Option<String>,
    ) -> Result<(), DripError> {
        let ev = EngineEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            subject: subject.to_string(),
            status: status.to_string(),
            detail,
        };
        let line = serde_json::to_string(&ev)
            .map_err(|e| DripError::ValidationError(format!("event serialization: {}", e)))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(DripError::IoError)?;
        writeln!(f, "{}", line).map_err(DripError::IoError)?;
        Ok(())
    }
}
