use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DripError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("invalid schedule expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
    #[error("schema violation in variant '{variant}': {reason}")]
    SchemaViolation { variant: String, reason: String },
    #[error("instance '{0}' is not authorized to publish")]
    NotAuthorized(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    ConfigError(String),
}
