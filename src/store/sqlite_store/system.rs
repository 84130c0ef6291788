use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

pub(super) fn get_system(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    conn.query_row("SELECT value FROM system WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(StoreError::from)
}

pub(super) fn set_system(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO system (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
