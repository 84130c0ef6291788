use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::Book;
use crate::store::BookFilter;

pub(super) fn find_book_by_uuid(
    conn: &Connection,
    uuid: Uuid,
) -> Result<Option<Book>, StoreError> {
    conn.query_row(
        "SELECT uuid, label, usn, deleted, dirty FROM books WHERE uuid = ?1",
        params![uuid.to_string()],
        row_to_book,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(super) fn find_book_by_label(
    conn: &Connection,
    label: &str,
    deleted: bool,
) -> Result<Option<Book>, StoreError> {
    conn.query_row(
        "SELECT uuid, label, usn, deleted, dirty FROM books WHERE label = ?1 AND deleted = ?2",
        params![label, deleted as i64],
        row_to_book,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(super) fn find_next_label_suffix(conn: &Connection, base: &str) -> Result<String, StoreError> {
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}_{n}");
        if find_book_by_label(conn, &candidate, false)?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

pub(super) fn list_books(conn: &Connection, filter: BookFilter) -> Result<Vec<Book>, StoreError> {
    let sql = match filter {
        BookFilter::All => "SELECT uuid, label, usn, deleted, dirty FROM books",
        BookFilter::Undeleted => "SELECT uuid, label, usn, deleted, dirty FROM books WHERE deleted = 0",
        BookFilter::Dirty => "SELECT uuid, label, usn, deleted, dirty FROM books WHERE dirty = 1",
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], row_to_book)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub(super) fn upsert_book(conn: &Connection, book: &Book) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO books (uuid, label, usn, deleted, dirty) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(uuid) DO UPDATE SET
             label = excluded.label,
             usn = excluded.usn,
             deleted = excluded.deleted,
             dirty = excluded.dirty",
        params![
            book.uuid.to_string(),
            book.label,
            book.usn,
            book.deleted as i64,
            book.dirty as i64,
        ],
    )?;
    Ok(())
}

pub(super) fn delete_book(conn: &Connection, uuid: Uuid) -> Result<(), StoreError> {
    conn.execute("DELETE FROM books WHERE uuid = ?1", params![uuid.to_string()])?;
    Ok(())
}

pub(super) fn count_local_books(conn: &Connection, undeleted: bool) -> Result<u64, StoreError> {
    let count: i64 = if undeleted {
        conn.query_row("SELECT COUNT(*) FROM books WHERE deleted = 0", [], |r| r.get(0))?
    } else {
        conn.query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))?
    };
    Ok(count as u64)
}

fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    let uuid: String = row.get(0)?;
    Ok(Book {
        uuid: Uuid::parse_str(&uuid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        label: row.get(1)?,
        usn: row.get(2)?,
        deleted: row.get::<_, i64>(3)? != 0,
        dirty: row.get::<_, i64>(4)? != 0,
    })
}
