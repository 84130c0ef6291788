use thiserror::Error;

/// Errors surfaced by the [`crate::store`] layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("query error: {0}")]
    QueryError(String),

    #[error("parsing error: {0}")]
    ParsingError(String),

    #[error("book not found: {0}")]
    BookNotFound(String),

    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("note {note} references missing or deleted book {book}")]
    OrphanNote { note: String, book: String },

    #[error("a non-deleted book with label {0:?} already exists")]
    DuplicateLabel(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidColumnType(..) => Self::ParsingError(value.to_string()),
            rusqlite::Error::InvalidParameterName(_)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::StatementChangedRows(_)
            | rusqlite::Error::ExecuteReturnedResults
            | rusqlite::Error::InvalidQuery
            | rusqlite::Error::MultipleStatement
            | rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::QueryReturnedNoRows => Self::QueryError(value.to_string()),
            _ => Self::DatabaseError(value.to_string()),
        }
    }
}

impl From<rusqlite_migration::Error> for StoreError {
    fn from(value: rusqlite_migration::Error) -> Self {
        Self::DatabaseError(value.to_string())
    }
}

/// Which endpoint an [`RpcError`] originated from, for logging and
/// error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcEndpoint {
    SyncState,
    SyncFragment,
    CreateBook,
    UpdateBook,
    DeleteBook,
    CreateNote,
    UpdateNote,
    DeleteNote,
}

impl std::fmt::Display for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RpcEndpoint::SyncState => "sync/state",
            RpcEndpoint::SyncFragment => "sync/fragment",
            RpcEndpoint::CreateBook => "books#create",
            RpcEndpoint::UpdateBook => "books#update",
            RpcEndpoint::DeleteBook => "books#delete",
            RpcEndpoint::CreateNote => "notes#create",
            RpcEndpoint::UpdateNote => "notes#update",
            RpcEndpoint::DeleteNote => "notes#delete",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the [`crate::rpc`] layer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{endpoint}: unauthorized")]
    Unauthorized { endpoint: RpcEndpoint },

    #[error("{endpoint}: conflict (409)")]
    Conflict { endpoint: RpcEndpoint },

    #[error("{endpoint}: server error (500): {message}")]
    ServerError { endpoint: RpcEndpoint, message: String },

    #[error("{endpoint}: client error ({status}): {message}")]
    ClientError {
        endpoint: RpcEndpoint,
        status: u16,
        message: String,
    },

    #[error("{endpoint}: transport error: {source}")]
    Transport {
        endpoint: RpcEndpoint,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: malformed response: {source}")]
    Decode {
        endpoint: RpcEndpoint,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn endpoint(&self) -> RpcEndpoint {
        match self {
            RpcError::Unauthorized { endpoint }
            | RpcError::Conflict { endpoint }
            | RpcError::ServerError { endpoint, .. }
            | RpcError::ClientError { endpoint, .. }
            | RpcError::Transport { endpoint, .. }
            | RpcError::Decode { endpoint, .. } => *endpoint,
        }
    }

    /// Whether a request with this outcome is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}

/// Top-level sync failure kinds, per the error handling design.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("sync cancelled by user")]
    UserCancelled,

    #[error("unresolved conflict after retrying")]
    Conflict,

    #[error("network error: {0}")]
    NetworkTransient(String),

    #[error("internal sync error: {0}")]
    Internal(String),
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        SyncError::Internal(value.to_string())
    }
}

impl From<RpcError> for SyncError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Unauthorized { .. } => SyncError::Unauthorized,
            RpcError::Conflict { .. } => SyncError::Conflict,
            RpcError::Transport { .. } => SyncError::NetworkTransient(value.to_string()),
            RpcError::ServerError { .. }
            | RpcError::ClientError { .. }
            | RpcError::Decode { .. } => SyncError::Internal(value.to_string()),
        }
    }
}

impl SyncError {
    /// Exit code per the CLI contract: 0 success, 1 generic, 2 unauthorized, 3 user-cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Unauthorized => 2,
            SyncError::UserCancelled => 3,
            _ => 1,
        }
    }
}
