//! Schema definitions and the migration runner.
//!
//! Migrations are SQL strings applied in order and tracked with the SQLite
//! `user_version` pragma.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// `(version, description, sql)`, versions starting at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "conflict resolution history",
    r#"
        CREATE TABLE IF NOT EXISTS conflict_resolutions (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path         TEXT NOT NULL,
            strategy          TEXT NOT NULL,
            diff_before       TEXT NOT NULL DEFAULT '',
            resolved_content  TEXT NOT NULL DEFAULT '',
            resolved_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conflict_resolutions_file_path
            ON conflict_resolutions (file_path);
        CREATE INDEX IF NOT EXISTS idx_conflict_resolutions_resolved_at
            ON conflict_resolutions (resolved_at);
        "#,
)];

/// Highest migration version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.0).unwrap_or(0)
}

/// Apply every migration newer than the database's `user_version`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = schema_version(conn)?;
    info!(
        current_version,
        target_version = latest_version(),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        info!(version, description, "applying migration");
        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::MigrationFailed {
                version,
                detail: e.to_string(),
            })?;
        conn.pragma_update(None, "user_version", version)?;
        debug!(version, "migration applied");
    }

    Ok(())
}

/// Current `user_version` of `conn`.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_history_table_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        assert!(tables.contains(&"conflict_resolutions".to_string()));
    }
}
