use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::AppResult;

pub mod migrations;
pub mod repositories;
pub mod stores;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out short-lived SQLite connections to one database file.
///
/// The schema and pending migrations are applied by the first connection a
/// pool opens; clones share that state.
#[derive(Clone, Debug)]
pub struct DbPool {
    path: PathBuf,
    schema_ready: Arc<OnceCell<()>>,
}

impl DbPool {
    pub fn new<P: Into<PathBuf>>(path: P) -> AppResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let pool = Self {
            path,
            schema_ready: Arc::new(OnceCell::new()),
        };
        pool.get_connection()?;
        info!(target: "app::db", db_path = %pool.path.display(), "appointment database ready");
        Ok(pool)
    }

    pub fn get_connection(&self) -> AppResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        self.schema_ready.get_or_try_init(|| prepare_schema(&conn))?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, callback: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T>,
    {
        let conn = self.get_connection()?;
        callback(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn prepare_schema(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    migrations::run(conn)?;
    debug!(target: "app::db", "schema and migrations applied");
    Ok(())
}
