//! Uploads dirty local records and classifies/recovers from server errors.

use uuid::Uuid;

use crate::error::{RpcError, SyncError};
use crate::model::{Book, Note};
use crate::rpc::{ServerClient, UpdateNoteRequest};
use crate::store::LocalStore;

/// What the driver should do after a push phase.
pub enum PushOutcome {
    /// Every dirty record was confirmed (or, for orphan notes, skipped and
    /// left dirty for the caller to retry after a catch-up pull).
    Completed { skipped_notes: Vec<Uuid> },
    /// A 409 was hit; the driver should pull, merge, and retry the push.
    NeedsReconcile,
}

pub struct ChangeSender<'a> {
    store: &'a dyn LocalStore,
    client: &'a dyn ServerClient,
}

impl<'a> ChangeSender<'a> {
    pub fn new(store: &'a dyn LocalStore, client: &'a dyn ServerClient) -> Self {
        ChangeSender { store, client }
    }

    /// Walks dirty records in order: create-book, create-note, update-book,
    /// update-note, delete-note, delete-book.
    pub async fn push(&self) -> Result<PushOutcome, SyncError> {
        let dirty_books = self.store.list_dirty_books()?;
        let create_books: Vec<_> = dirty_books.into_iter().filter(|b| b.usn == 0 && !b.deleted).collect();

        for book in &create_books {
            if self.create_book(book).await? {
                return Ok(PushOutcome::NeedsReconcile);
            }
        }

        // Re-read after book creation: any note whose book was just
        // reassigned a server-issued UUID must use the new one.
        let dirty_books = self.store.list_dirty_books()?;
        let update_books: Vec<_> = dirty_books.iter().filter(|b| b.usn != 0 && !b.deleted).collect();
        let delete_books: Vec<_> = dirty_books.iter().filter(|b| b.deleted).collect();

        let dirty_notes = self.store.list_dirty_notes_in_order()?;
        let create_notes: Vec<_> = dirty_notes.iter().filter(|n| n.usn == 0 && !n.deleted).collect();
        let update_notes: Vec<_> = dirty_notes.iter().filter(|n| n.usn != 0 && !n.deleted).collect();
        let delete_notes: Vec<_> = dirty_notes.iter().filter(|n| n.deleted).collect();

        let mut skipped_notes = Vec::new();
        for note in &create_notes {
            match self.create_note(note).await {
                Ok(()) => {}
                Err(SkipOrFail::Skip) => skipped_notes.push(note.uuid),
                Err(SkipOrFail::Fail(err)) => return Err(err),
            }
        }

        for book in &update_books {
            self.update_book(book).await?;
        }
        for note in &update_notes {
            self.update_note(note).await?;
        }
        for note in &delete_notes {
            self.delete_note(note).await?;
        }
        for book in &delete_books {
            self.delete_book(book).await?;
        }

        Ok(PushOutcome::Completed { skipped_notes })
    }

    /// Retries notes that were skipped for an unknown `book_uuid`, after the
    /// caller has pulled and merged so the book now exists locally. Fails
    /// with `Internal` if the book is still unknown to the server.
    pub async fn retry_skipped_notes(&self, uuids: &[Uuid]) -> Result<(), SyncError> {
        for uuid in uuids {
            let Some(note) = self.store.find_note_by_uuid(*uuid)? else {
                continue;
            };
            if !note.dirty {
                continue;
            }
            match self.create_note(&note).await {
                Ok(()) => {}
                Err(SkipOrFail::Skip) => {
                    return Err(SyncError::Internal(format!(
                        "note {uuid} still references an unknown book after catch-up pull"
                    )))
                }
                Err(SkipOrFail::Fail(err)) => return Err(err),
            }
        }
        Ok(())
    }

    /// Returns `Ok(true)` if the driver should reconcile (409) before
    /// continuing the push.
    async fn create_book(&self, book: &Book) -> Result<bool, SyncError> {
        match self.client.create_book(&book.label).await {
            Ok(wire) => {
                self.reassign_book_uuid(book.uuid, wire.uuid, &wire.label, wire.usn)?;
                Ok(false)
            }
            Err(RpcError::Conflict { .. }) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    fn reassign_book_uuid(&self, old: Uuid, new: Uuid, label: &str, usn: i64) -> Result<(), SyncError> {
        if old != new {
            // Insert the new book row before repointing notes at it and
            // dropping the old row: notes.book_uuid is a non-deferrable FK
            // reference, so the new row must exist first.
            self.store.upsert_book(&Book {
                uuid: new,
                label: label.to_string(),
                usn,
                deleted: false,
                dirty: false,
            })?;
            for note in self.store.list_notes(crate::store::NoteFilter::All)? {
                if note.book_uuid == old {
                    self.store.upsert_note(&Note { book_uuid: new, ..note })?;
                }
            }
            self.store.delete_book(old)?;
        } else {
            self.store.upsert_book(&Book {
                uuid: new,
                label: label.to_string(),
                usn,
                deleted: false,
                dirty: false,
            })?;
        }
        Ok(())
    }

    async fn create_note(&self, note: &Note) -> Result<(), SkipOrFail> {
        match self.client.create_note(note.book_uuid, &note.body).await {
            Ok(wire) => {
                self.store
                    .delete_note(note.uuid)
                    .map_err(|e| SkipOrFail::Fail(e.into()))?;
                self.store
                    .upsert_note(&Note {
                        uuid: wire.uuid,
                        book_uuid: wire.book_uuid,
                        body: wire.body,
                        added_on: wire.added_on,
                        edited_on: wire.edited_on,
                        usn: wire.usn,
                        deleted: false,
                        dirty: false,
                        public: wire.public,
                    })
                    .map_err(|e| SkipOrFail::Fail(e.into()))?;
                Ok(())
            }
            Err(RpcError::ServerError { .. }) => Err(SkipOrFail::Skip),
            Err(err) => Err(SkipOrFail::Fail(err.into())),
        }
    }

    async fn update_book(&self, book: &Book) -> Result<(), SyncError> {
        let wire = self.client.update_book(book.uuid, &book.label).await?;
        self.store.upsert_book(&Book {
            usn: wire.usn,
            dirty: false,
            ..book.clone()
        })?;
        Ok(())
    }

    async fn update_note(&self, note: &Note) -> Result<(), SyncError> {
        let wire = self
            .client
            .update_note(
                note.uuid,
                UpdateNoteRequest {
                    content: Some(&note.body),
                    book_uuid: Some(note.book_uuid),
                    public: Some(note.public),
                },
            )
            .await?;
        self.store.upsert_note(&Note {
            usn: wire.usn,
            dirty: false,
            ..note.clone()
        })?;
        Ok(())
    }

    async fn delete_note(&self, note: &Note) -> Result<(), SyncError> {
        if note.usn == 0 {
            self.store.delete_note(note.uuid)?;
            return Ok(());
        }
        let wire = self.client.delete_note(note.uuid).await?;
        self.store.upsert_note(&Note {
            body: String::new(),
            usn: wire.usn,
            deleted: true,
            dirty: false,
            ..note.clone()
        })?;
        Ok(())
    }

    async fn delete_book(&self, book: &Book) -> Result<(), SyncError> {
        if book.usn == 0 {
            self.store.delete_book(book.uuid)?;
            return Ok(());
        }
        let wire = self.client.delete_book(book.uuid).await?;
        self.store.upsert_book(&Book {
            label: String::new(),
            usn: wire.usn,
            deleted: true,
            dirty: false,
            ..book.clone()
        })?;
        Ok(())
    }
}

enum SkipOrFail {
    Skip,
    Fail(SyncError),
}
