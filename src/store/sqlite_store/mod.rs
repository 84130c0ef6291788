//! `SQLite`-backed implementation of [`LocalStore`].
//!
//! Unlike the teacher's pooled store, one [`SqliteStore`] holds a single
//! long-lived connection: a sync run needs its outer transaction to stay
//! open across the whole pull/push/commit sequence, which is the opposite
//! of what a connection pool is built for. `BEGIN IMMEDIATE` doubles as the
//! per-database advisory lock — a concurrent sync attempt gets `SQLITE_BUSY`
//! instead of a second writer silently interleaving.

mod books;
mod migrations;
mod notes;
mod system;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Book, Note};
use crate::store::{BookFilter, LocalStore, NoteFilter};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and runs pending
    /// migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path)?;
        Self::configure(&mut conn)?;
        migrations::apply_migrations(&mut conn)?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    /// Opens an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        Self::configure(&mut conn)?;
        migrations::apply_migrations(&mut conn)?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    fn configure(conn: &mut Connection) -> Result<(), StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        rusqlite::vtab::array::load_module(conn)?;
        Ok(())
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        f(&conn)
    }
}

impl LocalStore for SqliteStore {
    fn begin(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(())
        })
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("ROLLBACK")?;
            Ok(())
        })
    }

    fn find_book_by_uuid(&self, uuid: Uuid) -> Result<Option<Book>, StoreError> {
        self.with_conn(|conn| books::find_book_by_uuid(conn, uuid))
    }

    fn find_book_by_label(&self, label: &str, deleted: bool) -> Result<Option<Book>, StoreError> {
        self.with_conn(|conn| books::find_book_by_label(conn, label, deleted))
    }

    fn find_next_label_suffix(&self, base: &str) -> Result<String, StoreError> {
        self.with_conn(|conn| books::find_next_label_suffix(conn, base))
    }

    fn list_books(&self, filter: BookFilter) -> Result<Vec<Book>, StoreError> {
        self.with_conn(|conn| books::list_books(conn, filter))
    }

    fn upsert_book(&self, book: &Book) -> Result<(), StoreError> {
        self.with_conn(|conn| books::upsert_book(conn, book))
    }

    fn delete_book(&self, uuid: Uuid) -> Result<(), StoreError> {
        self.with_conn(|conn| books::delete_book(conn, uuid))
    }

    fn find_note_by_uuid(&self, uuid: Uuid) -> Result<Option<Note>, StoreError> {
        self.with_conn(|conn| notes::find_note_by_uuid(conn, uuid))
    }

    fn list_notes(&self, filter: NoteFilter) -> Result<Vec<Note>, StoreError> {
        self.with_conn(|conn| notes::list_notes(conn, filter))
    }

    fn list_dirty_notes_in_order(&self) -> Result<Vec<Note>, StoreError> {
        self.with_conn(notes::list_dirty_notes_in_order)
    }

    fn upsert_note(&self, note: &Note) -> Result<(), StoreError> {
        self.with_conn(|conn| notes::upsert_note(conn, note))
    }

    fn delete_note(&self, uuid: Uuid) -> Result<(), StoreError> {
        self.with_conn(|conn| notes::delete_note(conn, uuid))
    }

    fn count_local_books(&self, undeleted: bool) -> Result<u64, StoreError> {
        self.with_conn(|conn| books::count_local_books(conn, undeleted))
    }

    fn count_local_notes(&self, undeleted: bool) -> Result<u64, StoreError> {
        self.with_conn(|conn| notes::count_local_notes(conn, undeleted))
    }

    fn get_system(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| system::get_system(conn, key))
    }

    fn set_system(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| system::set_system(conn, key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Book;

    #[test]
    fn upsert_then_find_book_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let book = Book::new_local("js".into()).unwrap();
        store.upsert_book(&book).unwrap();
        let found = store.find_book_by_uuid(book.uuid).unwrap().unwrap();
        assert_eq!(found, book);
    }

    #[test]
    fn find_next_label_suffix_probes_ascending() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_book(&Book::new_local("js".into()).unwrap()).unwrap();
        assert_eq!(store.find_next_label_suffix("js").unwrap(), "js_2");

        let mut taken = Book::new_local("js_2".into()).unwrap();
        taken.dirty = false;
        store.upsert_book(&taken).unwrap();
        assert_eq!(store.find_next_label_suffix("js").unwrap(), "js_3");
    }

    #[test]
    fn system_kv_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.last_max_usn().unwrap(), 0);
        store.set_last_max_usn(5).unwrap();
        assert_eq!(store.last_max_usn().unwrap(), 5);
    }

    #[test]
    fn rollback_discards_writes_since_begin() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.begin().unwrap();
        store.upsert_book(&Book::new_local("js".into()).unwrap()).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count_local_books(true).unwrap(), 0);
    }
}
