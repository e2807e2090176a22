//! Generic keyed-table store over SQLite.
//!
//! One table per content variant; columns are the variant's declared
//! fields plus bookkeeping (fingerprint, authorization flag, schedule,
//! credential reference), all TEXT. The fingerprint is the logical unique
//! key, enforced by update-else-insert rather than a database constraint.
//! Every write is committed synchronously and logged to the engine event
//! trail. I/O failures propagate to the caller; the store never retries.

use crate::core::db;
use crate::core::error::DripError;
use crate::core::events::EventLog;
use rusqlite::{Connection, types::ToSql};
use std::collections::BTreeMap;
use std::path::Path;

pub const COL_FINGERPRINT: &str = "fingerprint";
pub const COL_AUTHORIZED: &str = "is_authorized";
pub const COL_SCHEDULE: &str = "schedule";
pub const COL_KEYS_REF: &str = "keys_ref";
pub const COL_GENERATOR: &str = "generator";
pub const COL_PUBLISHER: &str = "publisher";
pub const COL_AUTHORIZER: &str = "authorizer";

pub const BOOKKEEPING_COLUMNS: [&str; 7] = [
    COL_FINGERPRINT,
    COL_AUTHORIZED,
    COL_SCHEDULE,
    COL_KEYS_REF,
    COL_GENERATOR,
    COL_PUBLISHER,
    COL_AUTHORIZER,
];

/// A persisted row: column name to encoded value.
pub type Row = BTreeMap<String, String>;

/// Closed predicate set. Raw WHERE strings are not accepted.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Fingerprint(String),
}

pub struct Store {
    conn: Connection,
    events: EventLog,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, DripError> {
        let conn = db::db_connect(db_path)?;
        let root = db_path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            conn,
            events: EventLog::new(root),
        })
    }

    /// Idempotent: creates the table when missing, adds missing columns
    /// when the declared field set grew. Existing columns are left alone.
    pub fn create_table(&self, table: &str, fields: &[String]) -> Result<(), DripError> {
        validate_identifier(table)?;
        let mut columns: Vec<String> = fields.to_vec();
        for col in BOOKKEEPING_COLUMNS {
            if !columns.iter().any(|c| c == col) {
                columns.push(col.to_string());
            }
        }
        for col in &columns {
            validate_identifier(col)?;
        }

        let existing = self.table_columns(table)?;
        if existing.is_empty() {
            let decls = columns
                .iter()
                .map(|c| format!("\"{}\" TEXT", c))
                .collect::<Vec<_>>()
                .join(", ");
            self.conn.execute(
                &format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", table, decls),
                [],
            )?;
            self.events.record("store.create_table", table, "created")?;
        } else {
            for col in &columns {
                if !existing.contains(col) {
                    self.conn.execute(
                        &format!("ALTER TABLE \"{}\" ADD COLUMN \"{}\" TEXT", table, col),
                        [],
                    )?;
                }
            }
        }
        Ok(())
    }

    pub fn list_tables(&self) -> Result<Vec<String>, DripError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, DripError> {
        validate_identifier(table)?;
        let (clause, params) = filter_clause(filter);
        let sql = format!("SELECT * FROM \"{}\"{}", table, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(&params_as_dyn[..], |row| {
                let mut out = Row::new();
                for (idx, name) in column_names.iter().enumerate() {
                    let value: Option<String> = row.get(idx)?;
                    out.insert(name.clone(), value.unwrap_or_else(|| "n".to_string()));
                }
                Ok(out)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update-if-match-else-insert, keyed by fingerprint equality.
    pub fn upsert(&self, table: &str, fingerprint: &str, row: &Row) -> Result<(), DripError> {
        validate_identifier(table)?;
        for col in row.keys() {
            validate_identifier(col)?;
        }

        let mut set_clauses = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        for (col, value) in row {
            set_clauses.push(format!("\"{}\" = ?", col));
            params.push(Box::new(value.clone()));
        }
        params.push(Box::new(fingerprint.to_string()));
        let update_sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?",
            table,
            set_clauses.join(", "),
            COL_FINGERPRINT
        );
        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let changed = self.conn.execute(&update_sql, &params_as_dyn[..])?;

        if changed == 0 {
            let cols = row
                .keys()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; row.len()].join(", ");
            let insert_sql = format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                table, cols, placeholders
            );
            let values: Vec<Box<dyn ToSql>> = row
                .values()
                .map(|v| Box::new(v.clone()) as Box<dyn ToSql>)
                .collect();
            let values_as_dyn: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
            self.conn.execute(&insert_sql, &values_as_dyn[..])?;
            self.events.record("store.upsert", table, "inserted")?;
        } else {
            self.events.record("store.upsert", table, "updated")?;
        }
        Ok(())
    }

    pub fn delete(&self, table: &str, filter: &Filter) -> Result<usize, DripError> {
        validate_identifier(table)?;
        let (clause, params) = filter_clause(filter);
        let sql = format!("DELETE FROM \"{}\"{}", table, clause);
        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let deleted = self.conn.execute(&sql, &params_as_dyn[..])?;
        self.events.record_detail(
            "store.delete",
            table,
            "ok",
            &format!("{} row(s)", deleted),
        )?;
        Ok(deleted)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, DripError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cols)
    }
}

fn filter_clause(filter: &Filter) -> (String, Vec<Box<dyn ToSql>>) {
    match filter {
        Filter::All => (String::new(), Vec::new()),
        Filter::Fingerprint(fp) => (
            format!(" WHERE \"{}\" = ?", COL_FINGERPRINT),
            vec![Box::new(fp.clone()) as Box<dyn ToSql>],
        ),
    }
}

fn validate_identifier(name: &str) -> Result<(), DripError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DripError::ValidationError(format!(
            "malformed identifier: '{}'",
            name
        )))
    }
}
