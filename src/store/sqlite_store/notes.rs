use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::Note;
use crate::store::NoteFilter;

pub(super) fn find_note_by_uuid(
    conn: &Connection,
    uuid: Uuid,
) -> Result<Option<Note>, StoreError> {
    conn.query_row(
        "SELECT uuid, book_uuid, body, added_on, edited_on, usn, deleted, dirty, public
         FROM notes WHERE uuid = ?1",
        params![uuid.to_string()],
        row_to_note,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(super) fn list_notes(conn: &Connection, filter: NoteFilter) -> Result<Vec<Note>, StoreError> {
    let sql = match filter {
        NoteFilter::All => {
            "SELECT uuid, book_uuid, body, added_on, edited_on, usn, deleted, dirty, public FROM notes"
        }
        NoteFilter::Undeleted => {
            "SELECT uuid, book_uuid, body, added_on, edited_on, usn, deleted, dirty, public FROM notes WHERE deleted = 0"
        }
        NoteFilter::Dirty => {
            "SELECT uuid, book_uuid, body, added_on, edited_on, usn, deleted, dirty, public FROM notes WHERE dirty = 1"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], row_to_note)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Dirty notes ordered by ascending creation time, as the change sender
/// requires within a single operation kind.
pub(super) fn list_dirty_notes_in_order(conn: &Connection) -> Result<Vec<Note>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT uuid, book_uuid, body, added_on, edited_on, usn, deleted, dirty, public
         FROM notes WHERE dirty = 1 ORDER BY added_on ASC",
    )?;
    let rows = stmt.query_map([], row_to_note)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub(super) fn upsert_note(conn: &Connection, note: &Note) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO notes
             (uuid, book_uuid, body, added_on, edited_on, usn, deleted, dirty, public)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(uuid) DO UPDATE SET
             book_uuid = excluded.book_uuid,
             body = excluded.body,
             added_on = excluded.added_on,
             edited_on = excluded.edited_on,
             usn = excluded.usn,
             deleted = excluded.deleted,
             dirty = excluded.dirty,
             public = excluded.public",
        params![
            note.uuid.to_string(),
            note.book_uuid.to_string(),
            note.body,
            note.added_on,
            note.edited_on,
            note.usn,
            note.deleted as i64,
            note.dirty as i64,
            note.public as i64,
        ],
    )?;
    Ok(())
}

pub(super) fn delete_note(conn: &Connection, uuid: Uuid) -> Result<(), StoreError> {
    conn.execute("DELETE FROM notes WHERE uuid = ?1", params![uuid.to_string()])?;
    Ok(())
}

pub(super) fn count_local_notes(conn: &Connection, undeleted: bool) -> Result<u64, StoreError> {
    let count: i64 = if undeleted {
        conn.query_row("SELECT COUNT(*) FROM notes WHERE deleted = 0", [], |r| r.get(0))?
    } else {
        conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?
    };
    Ok(count as u64)
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let uuid: String = row.get(0)?;
    let book_uuid: String = row.get(1)?;
    Ok(Note {
        uuid: Uuid::parse_str(&uuid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        book_uuid: Uuid::parse_str(&book_uuid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        body: row.get(2)?,
        added_on: row.get(3)?,
        edited_on: row.get(4)?,
        usn: row.get(5)?,
        deleted: row.get::<_, i64>(6)? != 0,
        dirty: row.get::<_, i64>(7)? != 0,
        public: row.get::<_, i64>(8)? != 0,
    })
}
