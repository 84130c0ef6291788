//! An in-process [`ServerClient`] double standing in for the real HTTP
//! server in tests. No HTTP-mocking crate is used here: the trait
//! boundary itself is the seam, the way the teacher substitutes `mock::
//! Client` for its real `rpc_client::RpcClient` behind `NodeApi`.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{RpcEndpoint, RpcError};

use super::{BookWire, NoteWire, ServerClient, SyncFragment, SyncState, UpdateNoteRequest};

#[derive(Debug, Clone)]
struct ServerBook {
    uuid: Uuid,
    label: String,
    usn: i64,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct ServerNote {
    uuid: Uuid,
    book_uuid: Uuid,
    body: String,
    added_on: i64,
    edited_on: i64,
    usn: i64,
    deleted: bool,
    public: bool,
}

struct Inner {
    books: Vec<ServerBook>,
    notes: Vec<ServerNote>,
    max_usn: i64,
    full_sync_before: i64,
    current_time: i64,
    unauthorized: bool,
    force_conflict_on_next_book_create: bool,
    /// `book_uuid`s the server will reject note-creation for, to simulate
    /// the orphan-note 500 case.
    unknown_books: Vec<Uuid>,
}

/// An in-memory server double. All mutating methods bump `max_usn`
/// exactly like the real server would.
pub struct FakeServerClient {
    inner: Mutex<Inner>,
}

impl Default for FakeServerClient {
    fn default() -> Self {
        FakeServerClient {
            inner: Mutex::new(Inner {
                books: Vec::new(),
                notes: Vec::new(),
                max_usn: 0,
                full_sync_before: 0,
                current_time: 1,
                unauthorized: false,
                force_conflict_on_next_book_create: false,
                unknown_books: Vec::new(),
            }),
        }
    }
}

impl FakeServerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unauthorized(&self, value: bool) {
        self.inner.lock().unwrap().unauthorized = value;
    }

    pub fn set_current_time(&self, time: i64) {
        self.inner.lock().unwrap().current_time = time;
    }

    pub fn force_empty_server(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.books.clear();
        inner.notes.clear();
        inner.max_usn = 0;
    }

    pub fn set_full_sync_before(&self, at: i64) {
        self.inner.lock().unwrap().full_sync_before = at;
    }

    /// Makes the next `create_book` call fail with 409, to exercise the
    /// change sender's rename-retry loop.
    pub fn force_conflict_on_next_book_create(&self) {
        self.inner.lock().unwrap().force_conflict_on_next_book_create = true;
    }

    /// Makes `create_note` for `book_uuid` fail with 500 (orphan book), to
    /// exercise the change sender's skip-and-retry path.
    pub fn mark_book_unknown(&self, book_uuid: Uuid) {
        self.inner.lock().unwrap().unknown_books.push(book_uuid);
    }

    pub fn unmark_book_unknown(&self, book_uuid: Uuid) {
        self.inner.lock().unwrap().unknown_books.retain(|u| *u != book_uuid);
    }

    /// Seeds a book directly (bypassing `create_book`), for setting up
    /// pre-existing server state in tests.
    pub fn seed_book(&self, label: &str) -> Uuid {
        let mut inner = self.inner.lock().unwrap();
        inner.max_usn += 1;
        let uuid = Uuid::new_v4();
        let usn = inner.max_usn;
        inner.books.push(ServerBook {
            uuid,
            label: label.to_string(),
            usn,
            deleted: false,
        });
        uuid
    }

    pub fn seed_note(&self, book_uuid: Uuid, body: &str, at: i64) -> Uuid {
        let mut inner = self.inner.lock().unwrap();
        inner.max_usn += 1;
        let uuid = Uuid::new_v4();
        let usn = inner.max_usn;
        inner.notes.push(ServerNote {
            uuid,
            book_uuid,
            body: body.to_string(),
            added_on: at,
            edited_on: at,
            usn,
            deleted: false,
            public: false,
        });
        uuid
    }

    fn check_auth(&self, inner: &Inner, endpoint: RpcEndpoint) -> Result<(), RpcError> {
        if inner.unauthorized {
            return Err(RpcError::Unauthorized { endpoint });
        }
        Ok(())
    }
}

#[async_trait]
impl ServerClient for FakeServerClient {
    async fn get_sync_state(&self) -> Result<SyncState, RpcError> {
        let inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::SyncState)?;
        Ok(SyncState {
            full_sync_before: inner.full_sync_before,
            max_usn: inner.max_usn,
            current_time: inner.current_time,
        })
    }

    async fn get_sync_fragment(&self, after_usn: i64) -> Result<SyncFragment, RpcError> {
        let inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::SyncFragment)?;

        const PAGE_SIZE: usize = 50;
        let mut books: Vec<BookWire> = inner
            .books
            .iter()
            .filter(|b| b.usn > after_usn)
            .map(|b| BookWire {
                uuid: b.uuid,
                label: b.label.clone(),
                usn: b.usn,
                deleted: b.deleted,
            })
            .collect();
        let mut notes: Vec<NoteWire> = inner
            .notes
            .iter()
            .filter(|n| n.usn > after_usn)
            .map(|n| NoteWire {
                uuid: n.uuid,
                book_uuid: n.book_uuid,
                body: n.body.clone(),
                added_on: n.added_on,
                edited_on: n.edited_on,
                usn: n.usn,
                deleted: n.deleted,
                public: n.public,
            })
            .collect();
        books.sort_by_key(|b| b.usn);
        notes.sort_by_key(|n| n.usn);
        books.truncate(PAGE_SIZE);
        notes.truncate(PAGE_SIZE);

        let max_usn_in_page = books
            .iter()
            .map(|b| b.usn)
            .chain(notes.iter().map(|n| n.usn))
            .max()
            .unwrap_or(after_usn);

        Ok(SyncFragment {
            notes,
            books,
            full_sync_before: inner.full_sync_before,
            user_max_usn: max_usn_in_page,
            current_time: inner.current_time,
        })
    }

    async fn create_book(&self, name: &str) -> Result<BookWire, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::CreateBook)?;
        if inner.force_conflict_on_next_book_create {
            inner.force_conflict_on_next_book_create = false;
            return Err(RpcError::Conflict {
                endpoint: RpcEndpoint::CreateBook,
            });
        }
        if inner.books.iter().any(|b| !b.deleted && b.label == name) {
            return Err(RpcError::Conflict {
                endpoint: RpcEndpoint::CreateBook,
            });
        }
        inner.max_usn += 1;
        let uuid = Uuid::new_v4();
        let usn = inner.max_usn;
        inner.books.push(ServerBook {
            uuid,
            label: name.to_string(),
            usn,
            deleted: false,
        });
        Ok(BookWire {
            uuid,
            label: name.to_string(),
            usn,
            deleted: false,
        })
    }

    async fn update_book(&self, uuid: Uuid, name: &str) -> Result<BookWire, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::UpdateBook)?;
        inner.max_usn += 1;
        let usn = inner.max_usn;
        let book = inner
            .books
            .iter_mut()
            .find(|b| b.uuid == uuid)
            .ok_or(RpcError::ClientError {
                endpoint: RpcEndpoint::UpdateBook,
                status: 404,
                message: "book not found".into(),
            })?;
        book.label = name.to_string();
        book.usn = usn;
        Ok(BookWire {
            uuid,
            label: book.label.clone(),
            usn,
            deleted: book.deleted,
        })
    }

    async fn delete_book(&self, uuid: Uuid) -> Result<BookWire, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::DeleteBook)?;
        inner.max_usn += 1;
        let usn = inner.max_usn;
        let book = inner
            .books
            .iter_mut()
            .find(|b| b.uuid == uuid)
            .ok_or(RpcError::ClientError {
                endpoint: RpcEndpoint::DeleteBook,
                status: 404,
                message: "book not found".into(),
            })?;
        book.deleted = true;
        book.label = String::new();
        book.usn = usn;
        Ok(BookWire {
            uuid,
            label: String::new(),
            usn,
            deleted: true,
        })
    }

    async fn create_note(&self, book_uuid: Uuid, content: &str) -> Result<NoteWire, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::CreateNote)?;
        let book_known = inner.books.iter().any(|b| b.uuid == book_uuid && !b.deleted);
        if !book_known || inner.unknown_books.contains(&book_uuid) {
            return Err(RpcError::ServerError {
                endpoint: RpcEndpoint::CreateNote,
                message: "unknown book_uuid".into(),
            });
        }
        inner.max_usn += 1;
        let usn = inner.max_usn;
        let uuid = Uuid::new_v4();
        let now = inner.current_time;
        inner.notes.push(ServerNote {
            uuid,
            book_uuid,
            body: content.to_string(),
            added_on: now,
            edited_on: now,
            usn,
            deleted: false,
            public: false,
        });
        Ok(NoteWire {
            uuid,
            book_uuid,
            body: content.to_string(),
            added_on: now,
            edited_on: now,
            usn,
            deleted: false,
            public: false,
        })
    }

    async fn update_note(
        &self,
        uuid: Uuid,
        request: UpdateNoteRequest<'_>,
    ) -> Result<NoteWire, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::UpdateNote)?;
        inner.max_usn += 1;
        let usn = inner.max_usn;
        let now = inner.current_time;
        let note = inner
            .notes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(RpcError::ClientError {
                endpoint: RpcEndpoint::UpdateNote,
                status: 404,
                message: "note not found".into(),
            })?;
        if let Some(content) = request.content {
            note.body = content.to_string();
        }
        if let Some(book_uuid) = request.book_uuid {
            note.book_uuid = book_uuid;
        }
        if let Some(public) = request.public {
            note.public = public;
        }
        note.edited_on = now;
        note.usn = usn;
        Ok(NoteWire {
            uuid,
            book_uuid: note.book_uuid,
            body: note.body.clone(),
            added_on: note.added_on,
            edited_on: note.edited_on,
            usn,
            deleted: note.deleted,
            public: note.public,
        })
    }

    async fn delete_note(&self, uuid: Uuid) -> Result<NoteWire, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        self.check_auth(&inner, RpcEndpoint::DeleteNote)?;
        inner.max_usn += 1;
        let usn = inner.max_usn;
        let note = inner
            .notes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(RpcError::ClientError {
                endpoint: RpcEndpoint::DeleteNote,
                status: 404,
                message: "note not found".into(),
            })?;
        note.deleted = true;
        note.body = String::new();
        note.usn = usn;
        Ok(NoteWire {
            uuid,
            book_uuid: note.book_uuid,
            body: String::new(),
            added_on: note.added_on,
            edited_on: note.edited_on,
            usn,
            deleted: true,
            public: note.public,
        })
    }
}
