//! The thin request/response binding for the server REST protocol.

#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod http_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RpcError;

pub use http_client::HttpServerClient;

#[derive(Debug, Clone, Deserialize)]
pub struct SyncState {
    pub full_sync_before: i64,
    pub max_usn: i64,
    pub current_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookWire {
    pub uuid: Uuid,
    pub label: String,
    pub usn: i64,
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteWire {
    pub uuid: Uuid,
    pub book_uuid: Uuid,
    pub body: String,
    pub added_on: i64,
    pub edited_on: i64,
    pub usn: i64,
    pub deleted: bool,
    pub public: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncFragment {
    pub notes: Vec<NoteWire>,
    pub books: Vec<BookWire>,
    pub full_sync_before: i64,
    pub user_max_usn: i64,
    pub current_time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateBookRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateBookRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateNoteRequest<'a> {
    pub book_uuid: Uuid,
    pub content: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateNoteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
}

/// A capability binding for the server protocol in `§6`. Implementations
/// must propagate `RpcError::Unauthorized` immediately on HTTP 401, without
/// retrying, so the caller can trigger logout.
#[async_trait]
pub trait ServerClient: Send + Sync {
    async fn get_sync_state(&self) -> Result<SyncState, RpcError>;
    async fn get_sync_fragment(&self, after_usn: i64) -> Result<SyncFragment, RpcError>;

    async fn create_book(&self, name: &str) -> Result<BookWire, RpcError>;
    async fn update_book(&self, uuid: Uuid, name: &str) -> Result<BookWire, RpcError>;
    async fn delete_book(&self, uuid: Uuid) -> Result<BookWire, RpcError>;

    async fn create_note(&self, book_uuid: Uuid, content: &str) -> Result<NoteWire, RpcError>;
    async fn update_note(
        &self,
        uuid: Uuid,
        request: UpdateNoteRequest<'_>,
    ) -> Result<NoteWire, RpcError>;
    async fn delete_note(&self, uuid: Uuid) -> Result<NoteWire, RpcError>;
}
