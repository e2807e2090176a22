use crate::core::error::DripError;
use rusqlite::Connection;
use std::fs;
use std::path::Path;

pub fn db_connect(db_path: &Path) -> Result<Connection, DripError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(DripError::IoError)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(DripError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(DripError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(DripError::RusqliteError)?;
    Ok(conn)
}
