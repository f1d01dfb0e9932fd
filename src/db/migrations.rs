use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{AppError, AppResult};

struct Migration {
    version: i32,
    description: &'static str,
    apply: fn(&Connection) -> AppResult<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add appointment version column",
        apply: add_version_column,
    },
    Migration {
        version: 2,
        description: "Index appointments and audit events",
        apply: add_lookup_indexes,
    },
];

#[derive(Debug)]
pub struct MigrationInfo {
    pub version: i32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Brings the database up to the latest `user_version`, one step at a time.
pub fn run(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migration_history (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            target: "app::db",
            from = current,
            to = migration.version,
            description = migration.description,
            "applying migration"
        );
        (migration.apply)(conn)?;
        conn.pragma_update(None, "user_version", migration.version)?;
        conn.execute(
            "INSERT OR REPLACE INTO migration_history (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.description, Utc::now().to_rfc3339()],
        )?;
    }
    Ok(())
}

pub fn get_migration_history(conn: &Connection) -> AppResult<Vec<MigrationInfo>> {
    let mut stmt = conn.prepare(
        "SELECT version, description, applied_at FROM migration_history ORDER BY version",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(version, description, applied_at)| {
            let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                .map_err(|err| AppError::database(format!("bad migration timestamp: {err}")))?
                .with_timezone(&Utc);
            Ok(MigrationInfo {
                version,
                description,
                applied_at,
            })
        })
        .collect()
}

// Databases created before optimistic locking lack the column.
fn add_version_column(conn: &Connection) -> AppResult<()> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('appointments')")?;
    let has_version = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .any(|name| name.eq_ignore_ascii_case("version"));

    if !has_version {
        conn.execute(
            "ALTER TABLE appointments ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    Ok(())
}

fn add_lookup_indexes(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_appointments_resource
            ON appointments(barber_id, location_id, start_at);
         CREATE INDEX IF NOT EXISTS idx_appointments_client
            ON appointments(client_identity, start_at);
         CREATE INDEX IF NOT EXISTS idx_audit_events_name
            ON audit_events(event_name, recorded_at);",
    )?;
    Ok(())
}
