//! The local record store: three tables (books, notes, system) behind a
//! transactional interface the [`crate::sync`] components drive directly.

pub mod sqlite_store;

use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Book, Note};

pub use sqlite_store::SqliteStore;

/// Selects which books a listing query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookFilter {
    All,
    Undeleted,
    Dirty,
}

/// Selects which notes a listing query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteFilter {
    All,
    Undeleted,
    Dirty,
}

/// The transactional local store the sync engine reads from and writes to.
///
/// A single outer transaction spans one whole sync run: [`LocalStore::begin`]
/// is called once at driver entry, [`LocalStore::commit`] once at the end of
/// step 7, and [`LocalStore::rollback`] on any unrecoverable error in
/// between. No method here performs network I/O, so holding the transaction
/// open across calls never suspends on a pending request.
pub trait LocalStore {
    fn begin(&self) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    fn rollback(&self) -> Result<(), StoreError>;

    // Books
    fn find_book_by_uuid(&self, uuid: Uuid) -> Result<Option<Book>, StoreError>;
    fn find_book_by_label(&self, label: &str, deleted: bool) -> Result<Option<Book>, StoreError>;
    /// Finds the smallest `n >= 2` such that `{base}_{n}` is not already in
    /// use by a non-deleted book.
    fn find_next_label_suffix(&self, base: &str) -> Result<String, StoreError>;
    fn list_books(&self, filter: BookFilter) -> Result<Vec<Book>, StoreError>;
    fn list_dirty_books(&self) -> Result<Vec<Book>, StoreError> {
        self.list_books(BookFilter::Dirty)
    }
    fn upsert_book(&self, book: &Book) -> Result<(), StoreError>;
    fn delete_book(&self, uuid: Uuid) -> Result<(), StoreError>;

    // Notes
    fn find_note_by_uuid(&self, uuid: Uuid) -> Result<Option<Note>, StoreError>;
    fn list_notes(&self, filter: NoteFilter) -> Result<Vec<Note>, StoreError>;
    fn list_dirty_notes_in_order(&self) -> Result<Vec<Note>, StoreError>;
    fn upsert_note(&self, note: &Note) -> Result<(), StoreError>;
    fn delete_note(&self, uuid: Uuid) -> Result<(), StoreError>;

    // Counts (excluding tombstones unless requested)
    fn count_local_books(&self, undeleted: bool) -> Result<u64, StoreError>;
    fn count_local_notes(&self, undeleted: bool) -> Result<u64, StoreError>;

    // System key/value
    fn get_system(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_system(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn last_max_usn(&self) -> Result<i64, StoreError> {
        Ok(self
            .get_system("last_max_usn")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
    fn set_last_max_usn(&self, usn: i64) -> Result<(), StoreError> {
        self.set_system("last_max_usn", &usn.to_string())
    }
    fn last_sync_at(&self) -> Result<i64, StoreError> {
        Ok(self
            .get_system("last_sync_at")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
    fn set_last_sync_at(&self, at: i64) -> Result<(), StoreError> {
        self.set_system("last_sync_at", &at.to_string())
    }
}
