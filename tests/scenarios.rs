//! End-to-end seed scenarios against an in-memory store and a fake server.

use noted_sync::model::{Book, Note};
use noted_sync::rpc::fake::FakeServerClient;
use noted_sync::store::sqlite_store::SqliteStore;
use noted_sync::store::LocalStore;
use noted_sync::{ConfirmPrompt, SyncDriver, SyncError, SyncMode};
use uuid::Uuid;

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

fn add_note(store: &SqliteStore, book_uuid: Uuid, body: &str, at: i64) -> Uuid {
    let uuid = Uuid::new_v4();
    store
        .upsert_note(&Note {
            uuid,
            book_uuid,
            body: body.to_string(),
            added_on: at,
            edited_on: at,
            usn: 0,
            deleted: false,
            dirty: true,
            public: false,
        })
        .unwrap();
    uuid
}

fn add_book(store: &SqliteStore, label: &str) -> Uuid {
    let book = Book::new_local(label.to_string()).unwrap();
    let uuid = book.uuid;
    store.upsert_book(&book).unwrap();
    uuid
}

#[tokio::test]
async fn scenario_1_fresh_upload() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();

    let js = add_book(&store, "js");
    let css = add_book(&store, "css");
    add_note(&store, js, "js1", 1);
    add_note(&store, css, "css1", 2);
    add_note(&store, js, "js2", 3);

    let driver = SyncDriver::new(&store, &server);
    let summary = driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    assert_eq!(summary.last_max_usn, 5);
    assert_eq!(store.count_local_books(true).unwrap(), 2);
    assert_eq!(store.count_local_notes(true).unwrap(), 3);
    assert_eq!(store.last_max_usn().unwrap(), 5);
}

#[tokio::test]
async fn scenario_2_label_collision() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();
    let server_js = server.seed_book("js");
    server.seed_note(server_js, "js1", 1);

    let local_js = add_book(&store, "js");
    add_note(&store, local_js, "js1", 1);

    let driver = SyncDriver::new(&store, &server);
    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    assert!(store.find_book_by_label("js", false).unwrap().is_some());
    assert!(store.find_book_by_label("js_2", false).unwrap().is_some());
    assert_eq!(store.count_local_notes(true).unwrap(), 2);
}

#[tokio::test]
async fn scenario_3_edit_conflict_on_body() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();
    let book = server.seed_book("js");
    let note_uuid = server.seed_note(book, "original", 1);

    // Sync once so the local copy is clean and known to the server.
    let driver = SyncDriver::new(&store, &server);
    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    // Local edits to "x".
    let mut note = store.find_note_by_uuid(note_uuid).unwrap().unwrap();
    note.body = "x".into();
    note.dirty = true;
    store.upsert_note(&note).unwrap();

    // Server independently edits to "y".
    server.set_current_time(2);
    let _ = server
        .update_note(
            note_uuid,
            noted_sync::rpc::UpdateNoteRequest {
                content: Some("y"),
                book_uuid: None,
                public: None,
            },
        )
        .await
        .unwrap();

    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    let merged = store.find_note_by_uuid(note_uuid).unwrap().unwrap();
    assert_eq!(merged.body, "<<<<<<< Local\nx\n=======\ny\n>>>>>>> Server\n");
}

#[tokio::test]
async fn scenario_4_move_conflict() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();
    let book_a = server.seed_book("a");
    let book_b = server.seed_book("b");
    let note_uuid = server.seed_note(book_a, "hi", 1);

    let driver = SyncDriver::new(&store, &server);
    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    let local_book_b = store.find_book_by_label("b", false).unwrap().unwrap();
    let mut note = store.find_note_by_uuid(note_uuid).unwrap().unwrap();
    note.book_uuid = local_book_b.uuid;
    note.dirty = true;
    store.upsert_note(&note).unwrap();

    server.set_current_time(2);
    server
        .update_note(
            note_uuid,
            noted_sync::rpc::UpdateNoteRequest {
                content: None,
                book_uuid: Some(book_a),
                public: None,
            },
        )
        .await
        .unwrap();

    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    let moved = store.find_note_by_uuid(note_uuid).unwrap().unwrap();
    let conflicts = store.find_book_by_label("conflicts", false).unwrap().unwrap();
    assert_eq!(moved.book_uuid, conflicts.uuid);
    assert!(moved
        .body
        .starts_with("<<<<<<< Local\nMoved to the book b\n=======\nMoved to the book a\n>>>>>>> Server\n\n"));
}

#[tokio::test]
async fn scenario_5_empty_server_recovery_confirmed() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();

    let book1 = add_book(&store, "js");
    let book2 = add_book(&store, "css");
    add_note(&store, book1, "js1", 1);
    add_note(&store, book2, "css1", 2);

    let driver = SyncDriver::new(&store, &server);
    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();
    assert_eq!(store.last_max_usn().unwrap(), 4);

    server.force_empty_server();

    let summary = driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();
    assert_eq!(summary.last_max_usn, 4);
    assert_eq!(store.count_local_books(true).unwrap(), 2);
    assert_eq!(store.count_local_notes(true).unwrap(), 2);
}

#[tokio::test]
async fn scenario_5_empty_server_recovery_declined() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();

    let book1 = add_book(&store, "js");
    add_note(&store, book1, "js1", 1);

    let driver = SyncDriver::new(&store, &server);
    driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();
    let before = store.list_books(noted_sync::store::BookFilter::All).unwrap();

    server.force_empty_server();

    let err = driver.run(SyncMode::Step, &AlwaysDecline).await.unwrap_err();
    assert!(matches!(err, SyncError::UserCancelled));

    let after = store.list_books(noted_sync::store::BookFilter::All).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn scenario_6_stale_client_race_triggers_full_sync() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();
    server.seed_book("a");
    server.seed_book("b");
    store.set_last_max_usn(8).unwrap();
    server.set_full_sync_before(100);

    let driver = SyncDriver::new(&store, &server);
    let summary = driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    assert_eq!(summary.mode_ran, Some(noted_sync::SyncMode::Full));
    assert_eq!(store.count_local_books(true).unwrap(), 2);
}

#[tokio::test]
async fn scenario_7_empty_catch_up_preserves_last_max_usn() {
    let store = SqliteStore::open_in_memory().unwrap();
    let server = FakeServerClient::new();
    let book = server.seed_book("js");
    server.seed_note(book, "hi", 1);

    let driver = SyncDriver::new(&store, &server);
    let summary = driver.run(SyncMode::Step, &AlwaysConfirm).await.unwrap();

    assert_eq!(summary.last_max_usn, 2);
    assert_eq!(store.last_max_usn().unwrap(), 2);
}
