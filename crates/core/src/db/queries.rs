//! Typed queries over the `conflict_resolutions` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{ConflictRecord, NewConflictRecord};

const RECORD_COLUMNS: &str = "id, file_path, strategy, diff_before, resolved_content, resolved_at";

/// Insert `record` on an open connection, typically inside
/// [`Database::transaction`]. Returns the new row id.
pub fn insert_conflict_record(
    conn: &Connection,
    record: &NewConflictRecord,
) -> Result<i64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO conflict_resolutions (file_path, strategy, diff_before, resolved_content, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.file_path,
            record.strategy,
            record.diff_before,
            record.resolved_content,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, file_path = %record.file_path, strategy = %record.strategy, "inserted conflict record");
    Ok(id)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ConflictRecord> {
    let resolved_at: String = row.get(5)?;
    Ok(ConflictRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        strategy: row.get(2)?,
        diff_before: row.get(3)?,
        resolved_content: row.get(4)?,
        resolved_at: parse_datetime(&resolved_at),
    })
}

impl Database {
    /// Insert a single record in its own statement.
    pub fn insert_conflict_record(&self, record: &NewConflictRecord) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        insert_conflict_record(&conn, record)
    }

    /// Most recent records first, at most `limit`.
    pub fn list_resolutions(&self, limit: u32) -> Result<Vec<ConflictRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM conflict_resolutions ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Every record for `file_path`, oldest first.
    pub fn resolutions_for_file(&self, file_path: &str) -> Result<Vec<ConflictRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM conflict_resolutions WHERE file_path = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![file_path], record_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The record with `id`, or [`DatabaseError::NotFound`].
    pub fn get_resolution(&self, id: i64) -> Result<ConflictRecord, DatabaseError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM conflict_resolutions WHERE id = ?1"),
            params![id],
            record_from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity: "conflict resolution".into(),
                id: id.to_string(),
            },
            other => other.into(),
        })
    }

    pub fn count_resolutions(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM conflict_resolutions", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}

/// Parse an RFC 3339 timestamp, falling back to now.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!(value = s, "unparseable timestamp in conflict_resolutions");
            Utc::now()
        })
}
