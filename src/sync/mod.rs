//! Orchestrates one sync run: decides step vs. full, handles the
//! empty-server prompt, and retries through reconciliation.

pub mod change_sender;
pub mod merger;
pub mod puller;

use crate::error::SyncError;
use crate::model::Book;
use crate::rpc::ServerClient;
use crate::store::{BookFilter, LocalStore, NoteFilter};

use change_sender::{ChangeSender, PushOutcome};
use merger::{Merger, SeenUuids};
use puller::FragmentPuller;

pub const EMPTY_SERVER_PROMPT: &str = "The server is empty but you have local data";

/// Bound on reconcile-then-retry iterations after a 409 during push (§4.4).
const MAX_RECONCILE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Step,
    Full,
}

/// A summary of what one sync run accomplished, for the CLI to print.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub mode_ran: Option<SyncMode>,
    pub last_max_usn: i64,
    pub books_synced: u64,
    pub notes_synced: u64,
}

/// Confirms the empty-server prompt. Returns `true` to proceed (reset local
/// USNs and re-upload everything), `false` to abort with no local writes.
pub trait ConfirmPrompt {
    fn confirm(&self, message: &str) -> bool;
}

/// Checked at every phase boundary (§5). Mid-phase cancellation rolls back
/// the outer transaction and surfaces `UserCancelled`.
pub trait CancellationToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A token that never cancels, for callers with no cancellation surface.
pub struct NeverCancelled;

impl CancellationToken for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

fn check_cancelled(cancel: &dyn CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::UserCancelled)
    } else {
        Ok(())
    }
}

pub struct SyncDriver<'a> {
    store: &'a dyn LocalStore,
    client: &'a dyn ServerClient,
}

impl<'a> SyncDriver<'a> {
    pub fn new(store: &'a dyn LocalStore, client: &'a dyn ServerClient) -> Self {
        SyncDriver { store, client }
    }

    pub async fn run(
        &self,
        mode: SyncMode,
        confirm: &dyn ConfirmPrompt,
    ) -> Result<SyncSummary, SyncError> {
        self.run_cancellable(mode, confirm, &NeverCancelled).await
    }

    /// Only `Unauthorized` and `UserCancelled` are terminal before step 7;
    /// every other failure is retried once, with `mode` upgraded to `Full`,
    /// before surfacing (§4.1, §7).
    pub async fn run_cancellable(
        &self,
        mut mode: SyncMode,
        confirm: &dyn ConfirmPrompt,
        cancel: &dyn CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        check_cancelled(cancel)?;

        let mut state = self.client.get_sync_state().await?;

        // Step 2: full-sync gate.
        if self.store.last_sync_at()? < state.full_sync_before {
            mode = SyncMode::Full;
        }

        // Step 3: empty-server check, before any transaction is opened so a
        // decline makes literally zero local writes.
        if state.max_usn == 0 && self.has_local_record_with_usn()? {
            check_cancelled(cancel)?;
            if !confirm.confirm(EMPTY_SERVER_PROMPT) {
                return Err(SyncError::UserCancelled);
            }
        }

        let mut retried = false;
        loop {
            check_cancelled(cancel)?;
            self.store.begin()?;
            match self.run_locked(mode, &state, cancel).await {
                Ok(summary) => {
                    self.store.commit()?;
                    return Ok(summary);
                }
                Err(err) => {
                    // Best-effort: the outer transaction must not leave a
                    // half-applied sync behind.
                    let _ = self.store.rollback();
                    match err {
                        SyncError::Unauthorized | SyncError::UserCancelled => return Err(err),
                        _ if !retried => {
                            retried = true;
                            mode = SyncMode::Full;
                            state = self.client.get_sync_state().await?;
                        }
                        _ => return Err(err),
                    }
                }
            }
        }
    }

    fn has_local_record_with_usn(&self) -> Result<bool, SyncError> {
        let any_book = self
            .store
            .list_books(BookFilter::Undeleted)?
            .iter()
            .any(|b| b.usn > 0);
        let any_note = self
            .store
            .list_notes(NoteFilter::Undeleted)?
            .iter()
            .any(|n| n.usn > 0);
        Ok(any_book || any_note)
    }

    async fn run_locked(
        &self,
        mode: SyncMode,
        state: &crate::rpc::SyncState,
        cancel: &dyn CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        if state.max_usn == 0 && self.has_local_record_with_usn()? {
            self.reset_for_empty_server_recovery()?;
        }

        let puller = FragmentPuller::new(self.client);
        let merger = Merger::new(self.store);

        let mut current_time = state.current_time;
        let mut seen = SeenUuids::default();

        // Step 4: pull phase.
        check_cancelled(cancel)?;
        let start_usn = match mode {
            SyncMode::Full => 0,
            SyncMode::Step => self.store.last_max_usn()?,
        };
        let fragments = puller.pull_all(start_usn).await?;
        let mut last_max_usn = start_usn;
        for fragment in &fragments {
            current_time = fragment.current_time;
            last_max_usn = last_max_usn.max(fragment.max_usn_in_page);
            merger.apply_fragment(fragment, Some(&mut seen))?;
        }

        // Step 5: push phase, reconciling on 409 up to the retry bound.
        check_cancelled(cancel)?;
        let sender = ChangeSender::new(self.store, self.client);
        let mut skipped_notes = Vec::new();
        let mut reconciled = false;
        for _ in 0..MAX_RECONCILE_ATTEMPTS {
            match sender.push().await? {
                PushOutcome::Completed { skipped_notes: skipped } => {
                    skipped_notes = skipped;
                    reconciled = true;
                    break;
                }
                PushOutcome::NeedsReconcile => {
                    check_cancelled(cancel)?;
                    let extra = puller.pull_all(last_max_usn).await?;
                    for fragment in &extra {
                        current_time = fragment.current_time;
                        last_max_usn = last_max_usn.max(fragment.max_usn_in_page);
                        merger.apply_fragment(fragment, Some(&mut seen))?;
                    }
                }
            }
        }
        if !reconciled {
            return Err(SyncError::Conflict);
        }

        // Step 6: catch-up pull to absorb anything written during steps 4-5.
        check_cancelled(cancel)?;
        let catch_up = puller.pull_all(last_max_usn).await?;
        for fragment in &catch_up {
            current_time = fragment.current_time;
            last_max_usn = last_max_usn.max(fragment.max_usn_in_page);
            merger.apply_fragment(fragment, Some(&mut seen))?;
        }

        if !skipped_notes.is_empty() {
            check_cancelled(cancel)?;
            sender.retry_skipped_notes(&skipped_notes).await?;
        }

        check_cancelled(cancel)?;

        if mode == SyncMode::Full {
            merger.cleanup(&seen)?;
        }

        // Step 7: commit system counters. An all-empty catch-up must never
        // regress last_max_usn back to the pre-pull value of 0.
        self.store.set_last_max_usn(last_max_usn)?;
        self.store.set_last_sync_at(current_time)?;

        Ok(SyncSummary {
            mode_ran: Some(mode),
            last_max_usn,
            books_synced: self.store.count_local_books(true)?,
            notes_synced: self.store.count_local_notes(true)?,
        })
    }

    /// Empty-server recovery: reset every local record's USN to 0 and mark
    /// it dirty so the push phase re-uploads everything from scratch.
    fn reset_for_empty_server_recovery(&self) -> Result<(), SyncError> {
        for book in self.store.list_books(BookFilter::All)? {
            self.store.upsert_book(&Book {
                usn: 0,
                dirty: true,
                ..book
            })?;
        }
        for note in self.store.list_notes(NoteFilter::All)? {
            self.store.upsert_note(&crate::model::Note {
                usn: 0,
                dirty: true,
                ..note
            })?;
        }
        self.store.set_last_max_usn(0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fake::FakeServerClient;
    use crate::store::sqlite_store::SqliteStore;

    struct AlwaysConfirm;
    impl ConfirmPrompt for AlwaysConfirm {
        fn confirm(&self, _message: &str) -> bool {
            true
        }
    }

    struct AlwaysDecline;
    impl ConfirmPrompt for AlwaysDecline {
        fn confirm(&self, _message: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn fresh_upload_creates_books_and_notes_on_server() {
        let store = SqliteStore::open_in_memory().unwrap();
        let server = FakeServerClient::new();

        let js = Book::new_local("js".into()).unwrap();
        let css = Book::new_local("css".into()).unwrap();
        store.upsert_book(&js).unwrap();
        store.upsert_book(&css).unwrap();
        store
            .upsert_note(&crate::model::Note {
                uuid: uuid::Uuid::new_v4(),
                book_uuid: js.uuid,
                body: "js1".into(),
                added_on: 1,
                edited_on: 1,
                usn: 0,
                deleted: false,
                dirty: true,
                public: false,
            })
            .unwrap();
        store
            .upsert_note(&crate::model::Note {
                uuid: uuid::Uuid::new_v4(),
                book_uuid: css.uuid,
                body: "css1".into(),
                added_on: 2,
                edited_on: 2,
                usn: 0,
                deleted: false,
                dirty: true,
                public: false,
            })
            .unwrap();
        store
            .upsert_note(&crate::model::Note {
                uuid: uuid::Uuid::new_v4(),
                book_uuid: js.uuid,
                body: "js2".into(),
                added_on: 3,
                edited_on: 3,
                usn: 0,
                deleted: false,
                dirty: true,
                public: false,
            })
            .unwrap();

        let driver = SyncDriver::new(&store, &server);
        let summary = driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

        assert_eq!(summary.books_synced, 2);
        assert_eq!(summary.notes_synced, 3);
        assert_eq!(summary.last_max_usn, 5);
        assert_eq!(store.list_dirty_books().unwrap().len(), 0);
        assert_eq!(store.list_dirty_notes_in_order().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn empty_server_prompt_declined_makes_no_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let server = FakeServerClient::new();

        let mut book = Book::new_local("js".into()).unwrap();
        book.usn = 3;
        book.dirty = false;
        store.upsert_book(&book).unwrap();
        store.set_last_max_usn(3).unwrap();

        let driver = SyncDriver::new(&store, &server);
        let err = driver.run(SyncMode::Step, &AlwaysDecline).await.unwrap_err();
        assert!(matches!(err, SyncError::UserCancelled));

        let unchanged = store.find_book_by_uuid(book.uuid).unwrap().unwrap();
        assert_eq!(unchanged, book);
        assert_eq!(server.get_sync_state().await.unwrap().max_usn, 0);
    }

    #[tokio::test]
    async fn empty_fragment_catch_up_preserves_last_max_usn() {
        let store = SqliteStore::open_in_memory().unwrap();
        let server = FakeServerClient::new();
        let book = server.seed_book("js");
        server.seed_note(book, "hi", 1);

        let driver = SyncDriver::new(&store, &server);
        let summary = driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();
        assert_eq!(summary.last_max_usn, 2);
        assert_eq!(store.last_max_usn().unwrap(), 2);
    }

    struct AlreadyCancelled;
    impl CancellationToken for AlreadyCancelled {
        fn is_cancelled(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn cancellation_before_run_makes_no_writes_and_surfaces_user_cancelled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let server = FakeServerClient::new();
        server.seed_book("js");

        let driver = SyncDriver::new(&store, &server);
        let err = driver
            .run_cancellable(SyncMode::Step, &AlwaysConfirm, &AlreadyCancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UserCancelled));
        assert_eq!(store.count_local_books(true).unwrap(), 0);
    }
}
