use rusqlite::{named_params, Connection, OptionalExtension};

use crate::error::AppResult;
use crate::models::appointment::ResourceKey;
use crate::models::constraints::WorkingConstraints;

/// Working constraints stored as one JSON document per resource. A missing
/// location is stored under the empty key so it can take part in the
/// primary key.
pub struct ConstraintsRepository;

impl ConstraintsRepository {
    pub fn get(conn: &Connection, resource: &ResourceKey) -> AppResult<Option<WorkingConstraints>> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM working_constraints WHERE barber_id = :barber_id AND location_key = :location_key",
                named_params! {
                    ":barber_id": resource.barber_id,
                    ":location_key": location_key(resource),
                },
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|raw| serde_json::from_str::<WorkingConstraints>(&raw))
            .transpose()
            .map_err(Into::into)
    }

    pub fn upsert(
        conn: &Connection,
        resource: &ResourceKey,
        constraints: &WorkingConstraints,
    ) -> AppResult<()> {
        constraints.validate()?;
        let payload = serde_json::to_string(constraints)?;
        conn.execute(
            r#"
                INSERT INTO working_constraints (barber_id, location_key, payload)
                VALUES (:barber_id, :location_key, :payload)
                ON CONFLICT(barber_id, location_key) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = CURRENT_TIMESTAMP
            "#,
            named_params! {
                ":barber_id": resource.barber_id,
                ":location_key": location_key(resource),
                ":payload": payload,
            },
        )?;
        Ok(())
    }
}

fn location_key(resource: &ResourceKey) -> &str {
    resource.location_id.as_deref().unwrap_or("")
}
