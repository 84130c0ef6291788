//! Applies incoming fragments to local state and runs conflict resolution
//! per the rules table.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Book, Note, CONFLICTS_BOOK_LABEL};
use crate::store::{BookFilter, LocalStore, NoteFilter};

use super::puller::Fragment;

const LOCAL_MARKER: &str = "<<<<<<< Local\n";
const SEPARATOR_MARKER: &str = "=======\n";
const SERVER_MARKER: &str = "\n>>>>>>> Server\n";

pub struct Merger<'a> {
    store: &'a dyn LocalStore,
}

/// Tracks every UUID seen across a full sync's fragments, so cleanup can
/// tell which local records the server no longer knows about.
#[derive(Default)]
pub struct SeenUuids {
    pub books: HashSet<Uuid>,
    pub notes: HashSet<Uuid>,
}

impl<'a> Merger<'a> {
    pub fn new(store: &'a dyn LocalStore) -> Self {
        Merger { store }
    }

    /// Applies one fragment in step-sync order: all incoming books before
    /// any incoming notes, so a note's parent book always already exists.
    pub fn apply_fragment(
        &self,
        fragment: &Fragment,
        mut seen: Option<&mut SeenUuids>,
    ) -> Result<(), StoreError> {
        for wire in &fragment.books {
            if let Some(seen) = seen.as_mut() {
                seen.books.insert(wire.uuid);
            }
            self.apply_incoming_book(wire)?;
        }
        for wire in &fragment.notes {
            if let Some(seen) = seen.as_mut() {
                seen.notes.insert(wire.uuid);
            }
            self.apply_incoming_note(wire)?;
        }
        Ok(())
    }

    fn apply_incoming_book(&self, incoming: &crate::rpc::BookWire) -> Result<(), StoreError> {
        match self.store.find_book_by_uuid(incoming.uuid)? {
            None => {
                // mergeBook label-collision: a different local dirty book
                // already claims this label, so it must step aside first.
                if !incoming.deleted {
                    if let Some(colliding) = self.store.find_book_by_label(&incoming.label, false)? {
                        if colliding.uuid != incoming.uuid && colliding.dirty {
                            let new_label = self.store.find_next_label_suffix(&incoming.label)?;
                            self.store.upsert_book(&Book {
                                label: new_label,
                                ..colliding
                            })?;
                        }
                    }
                }
                self.store.upsert_book(&Book {
                    uuid: incoming.uuid,
                    label: incoming.label.clone(),
                    usn: incoming.usn,
                    deleted: incoming.deleted,
                    dirty: false,
                })?;
            }
            Some(local) if !local.dirty => {
                self.store.upsert_book(&Book {
                    uuid: local.uuid,
                    label: incoming.label.clone(),
                    usn: incoming.usn,
                    deleted: incoming.deleted,
                    dirty: false,
                })?;
            }
            Some(local) => self.merge_dirty_book(local, incoming)?,
        }
        Ok(())
    }

    /// Row-by-row per the book conflict table, keyed on the (deleted,
    /// deleted) pair of local/incoming state.
    fn merge_dirty_book(&self, local: Book, incoming: &crate::rpc::BookWire) -> Result<(), StoreError> {
        match (local.deleted, incoming.deleted) {
            (false, false) => {
                // Renamed locally, renamed (or not) on the server: server wins.
                self.store.upsert_book(&Book {
                    label: incoming.label.clone(),
                    usn: incoming.usn,
                    deleted: false,
                    dirty: false,
                    ..local
                })
            }
            (true, false) => {
                // Locally deleted, server renamed: undelete with server's label.
                self.store.upsert_book(&Book {
                    label: incoming.label.clone(),
                    usn: incoming.usn,
                    deleted: false,
                    dirty: false,
                    ..local
                })
            }
            (false, true) => {
                // Dirty locally, deleted on the server: re-upload as a new book,
                // drop the server tombstone locally. Insert the new row before
                // repointing notes at it: notes.book_uuid is a non-deferrable
                // FK reference, so the old row can't be dropped first.
                let new_uuid = Uuid::new_v4();
                let old_uuid = local.uuid;
                self.store.upsert_book(&Book {
                    uuid: new_uuid,
                    label: local.label,
                    usn: 0,
                    deleted: false,
                    dirty: true,
                })?;
                for note in self.store.list_notes(NoteFilter::All)? {
                    if note.book_uuid == old_uuid {
                        self.store.upsert_note(&Note { book_uuid: new_uuid, ..note })?;
                    }
                }
                self.store.delete_book(old_uuid)
            }
            (true, true) => {
                // Both sides agree it's gone.
                self.store.upsert_book(&Book {
                    usn: incoming.usn,
                    dirty: false,
                    ..local
                })
            }
        }
    }

    fn apply_incoming_note(&self, incoming: &crate::rpc::NoteWire) -> Result<(), StoreError> {
        match self.store.find_note_by_uuid(incoming.uuid)? {
            None => self.store.upsert_note(&incoming_to_local(incoming, false)),
            Some(local) if !local.dirty => self.store.upsert_note(&incoming_to_local(incoming, false)),
            Some(local) => self.merge_dirty_note(local, incoming),
        }
    }

    fn merge_dirty_note(&self, local: Note, incoming: &crate::rpc::NoteWire) -> Result<(), StoreError> {
        if local.deleted {
            return if incoming.deleted {
                self.store.upsert_note(&Note {
                    usn: incoming.usn,
                    dirty: false,
                    ..local
                })
            } else {
                // Server wins: undelete, take server's fields.
                self.store.upsert_note(&incoming_to_local(incoming, false))
            };
        }

        if local.book_uuid != incoming.book_uuid {
            return self.move_to_conflicts(&local, incoming);
        }

        if local.body != incoming.body {
            let merged_body = format!(
                "{LOCAL_MARKER}{}\n{SEPARATOR_MARKER}{}{SERVER_MARKER}",
                local.body, incoming.body
            );
            return self.store.upsert_note(&Note {
                body: merged_body,
                usn: incoming.usn,
                dirty: true,
                ..local
            });
        }

        self.store.upsert_note(&Note {
            usn: incoming.usn,
            dirty: false,
            ..local
        })
    }

    fn move_to_conflicts(&self, local: &Note, incoming: &crate::rpc::NoteWire) -> Result<(), StoreError> {
        let local_book = self
            .store
            .find_book_by_uuid(local.book_uuid)?
            .map(|b| b.label)
            .unwrap_or_default();
        let server_book = self
            .store
            .find_book_by_uuid(incoming.book_uuid)?
            .map(|b| b.label)
            .unwrap_or_default();

        let conflicts_book = self.ensure_conflicts_book()?;
        let body = format!(
            "{LOCAL_MARKER}Moved to the book {local_book}\n{SEPARATOR_MARKER}Moved to the book {server_book}{SERVER_MARKER}\n{}",
            local.body
        );
        self.store.upsert_note(&Note {
            book_uuid: conflicts_book.uuid,
            body,
            usn: incoming.usn,
            dirty: true,
            ..local.clone()
        })
    }

    fn ensure_conflicts_book(&self) -> Result<Book, StoreError> {
        if let Some(book) = self.store.find_book_by_label(CONFLICTS_BOOK_LABEL, false)? {
            return Ok(book);
        }
        let book = Book {
            uuid: Uuid::new_v4(),
            label: CONFLICTS_BOOK_LABEL.to_string(),
            usn: 0,
            deleted: false,
            dirty: true,
        };
        self.store.upsert_book(&book)?;
        Ok(book)
    }

    /// Full-sync cleanup: deletes local records the server no longer has,
    /// skipping anything still dirty (pending uploads). Must run after the
    /// push phase so dirty records about to be re-uploaded survive.
    /// Notes are deleted before books to avoid a referential violation
    /// mid-transaction.
    pub fn cleanup(&self, seen: &SeenUuids) -> Result<(), StoreError> {
        for note in self.store.list_notes(NoteFilter::All)? {
            if !seen.notes.contains(&note.uuid) && !note.dirty {
                self.store.delete_note(note.uuid)?;
            }
        }
        for book in self.store.list_books(BookFilter::All)? {
            if !seen.books.contains(&book.uuid) && !book.dirty {
                self.store.delete_book(book.uuid)?;
            }
        }
        Ok(())
    }
}

fn incoming_to_local(wire: &crate::rpc::NoteWire, dirty: bool) -> Note {
    Note {
        uuid: wire.uuid,
        book_uuid: wire.book_uuid,
        body: wire.body.clone(),
        added_on: wire.added_on,
        edited_on: wire.edited_on,
        usn: wire.usn,
        deleted: wire.deleted,
        dirty,
        public: wire.public,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite_store::SqliteStore;

    fn wire_book(uuid: Uuid, label: &str, usn: i64) -> crate::rpc::BookWire {
        crate::rpc::BookWire {
            uuid,
            label: label.to_string(),
            usn,
            deleted: false,
        }
    }

    #[test]
    fn body_conflict_produces_three_way_merge_marker() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut book = Book::new_local("js".into()).unwrap();
        book.dirty = false;
        store.upsert_book(&book).unwrap();

        let note_uuid = Uuid::new_v4();
        let local_note = Note {
            uuid: note_uuid,
            book_uuid: book.uuid,
            body: "x".into(),
            added_on: 1,
            edited_on: 1,
            usn: 1,
            deleted: false,
            dirty: true,
            public: false,
        };
        store.upsert_note(&local_note).unwrap();

        let merger = Merger::new(&store);
        let incoming = crate::rpc::NoteWire {
            uuid: note_uuid,
            book_uuid: book.uuid,
            body: "y".into(),
            added_on: 1,
            edited_on: 2,
            usn: 2,
            deleted: false,
            public: false,
        };
        merger.apply_incoming_note(&incoming).unwrap();

        let merged = store.find_note_by_uuid(note_uuid).unwrap().unwrap();
        assert_eq!(merged.body, "<<<<<<< Local\nx\n=======\ny\n>>>>>>> Server\n");
        assert!(merged.dirty);
    }

    #[test]
    fn move_conflict_lands_note_in_conflicts_book() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut book_a = Book::new_local("a".into()).unwrap();
        book_a.dirty = false;
        let mut book_b = Book::new_local("b".into()).unwrap();
        book_b.dirty = false;
        store.upsert_book(&book_a).unwrap();
        store.upsert_book(&book_b).unwrap();

        let note_uuid = Uuid::new_v4();
        let local_note = Note {
            uuid: note_uuid,
            book_uuid: book_a.uuid,
            body: "hi".into(),
            added_on: 1,
            edited_on: 1,
            usn: 1,
            deleted: false,
            dirty: true,
            public: false,
        };
        store.upsert_note(&local_note).unwrap();

        let merger = Merger::new(&store);
        let incoming = crate::rpc::NoteWire {
            uuid: note_uuid,
            book_uuid: book_b.uuid,
            body: "hi".into(),
            added_on: 1,
            edited_on: 2,
            usn: 2,
            deleted: false,
            public: false,
        };
        merger.apply_incoming_note(&incoming).unwrap();

        let moved = store.find_note_by_uuid(note_uuid).unwrap().unwrap();
        let conflicts = store.find_book_by_label("conflicts", false).unwrap().unwrap();
        assert_eq!(moved.book_uuid, conflicts.uuid);
        assert!(moved.body.starts_with("<<<<<<< Local\nMoved to the book a\n=======\nMoved to the book b\n>>>>>>> Server\n\n"));
        assert!(moved.dirty);
    }

    #[test]
    fn label_collision_renames_local_dirty_book() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_book(&Book::new_local("js".into()).unwrap()).unwrap();

        let merger = Merger::new(&store);
        let incoming_uuid = Uuid::new_v4();
        merger.apply_incoming_book(&wire_book(incoming_uuid, "js", 1)).unwrap();

        assert!(store.find_book_by_label("js_2", false).unwrap().is_some());
        let incoming_book = store.find_book_by_uuid(incoming_uuid).unwrap().unwrap();
        assert_eq!(incoming_book.label, "js");
        assert!(!incoming_book.dirty);
    }
}
