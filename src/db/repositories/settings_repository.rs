use rusqlite::{named_params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::AppResult;
use crate::models::settings::EngineSettings;

const ENGINE_SETTINGS_KEY: &str = "engine_settings";

/// Key/value rows in `app_settings`; values are JSON documents.
pub struct SettingsRepository;

impl SettingsRepository {
    pub fn get(conn: &Connection, key: &str) -> AppResult<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM app_settings WHERE key = :key",
                named_params! {":key": key},
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn upsert(conn: &Connection, key: &str, value: &str) -> AppResult<()> {
        conn.execute(
            "INSERT INTO app_settings (key, value) VALUES (:key, :value)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            named_params! {":key": key, ":value": value},
        )?;
        debug!(target: "app::db", key, "setting stored");
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(conn: &Connection, key: &str) -> AppResult<Option<T>> {
        Self::get(conn, key)?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    pub fn put_json<T: Serialize>(conn: &Connection, key: &str, value: &T) -> AppResult<()> {
        Self::upsert(conn, key, &serde_json::to_string(value)?)
    }

    /// Stored engine settings, or the defaults when none were saved.
    pub fn load_engine_settings(conn: &Connection) -> AppResult<EngineSettings> {
        let settings: EngineSettings =
            Self::get_json(conn, ENGINE_SETTINGS_KEY)?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_engine_settings(conn: &Connection, settings: &EngineSettings) -> AppResult<()> {
        settings.validate()?;
        Self::put_json(conn, ENGINE_SETTINGS_KEY, settings)
    }
}
