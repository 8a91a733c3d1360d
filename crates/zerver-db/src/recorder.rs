use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;
use zerver_common::{Error, MigrationKey, Result};

pub const MIGRATIONS_TABLE: &str = "zerver_migrations";

/// Keeps track of which migration units have been applied to a database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MigrationRecorder;

impl MigrationRecorder {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app TEXT NOT NULL,
                name TEXT NOT NULL,
                applied TEXT NOT NULL,
                UNIQUE (app, name)
            );"
        ))
        .map_err(|e| Error::Database(format!("failed to create migration table: {e}")))
    }

    pub fn applied_migrations(&self, conn: &Connection) -> Result<BTreeMap<MigrationKey, DateTime<Utc>>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT app, name, applied FROM {MIGRATIONS_TABLE} ORDER BY id"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare applied query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query applied migrations: {e}")))?;

        let mut applied = BTreeMap::new();
        for row in rows {
            let (app, name, timestamp) =
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| Error::Database(format!("invalid applied timestamp '{timestamp}': {e}")))?
                .with_timezone(&Utc);
            applied.insert(MigrationKey::new(app, name), timestamp);
        }
        Ok(applied)
    }

    pub fn is_applied(&self, conn: &Connection, key: &MigrationKey) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                &format!("SELECT count(*) FROM {MIGRATIONS_TABLE} WHERE app = ? AND name = ?"),
                params![key.app_label, key.name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check migration {key}: {e}")))?;
        Ok(count > 0)
    }

    pub fn record_applied(&self, conn: &Connection, key: &MigrationKey) -> Result<()> {
        debug!("recording {key} as applied");
        conn.execute(
            &format!("INSERT INTO {MIGRATIONS_TABLE} (app, name, applied) VALUES (?, ?, ?)"),
            params![key.app_label, key.name, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to record {key} as applied: {e}")))?;
        Ok(())
    }

    pub fn record_unapplied(&self, conn: &Connection, key: &MigrationKey) -> Result<()> {
        debug!("recording {key} as unapplied");
        conn.execute(
            &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE app = ? AND name = ?"),
            params![key.app_label, key.name],
        )
        .map_err(|e| Error::Database(format!("failed to record {key} as unapplied: {e}")))?;
        Ok(())
    }

    /// Forgets every recorded migration.
    pub fn flush(&self, conn: &Connection) -> Result<usize> {
        conn.execute(&format!("DELETE FROM {MIGRATIONS_TABLE}"), [])
            .map_err(|e| Error::Database(format!("failed to flush migration records: {e}")))
    }
}
