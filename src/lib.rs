//! A bidirectional synchronization engine that reconciles a local-first
//! note-taking client with a central server via a USN-ordered delta feed.

#[cfg(feature = "executable")]
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod rpc;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{RpcError, StoreError, SyncError};
pub use model::{Book, Note};
pub use rpc::ServerClient;
pub use store::LocalStore;
pub use sync::{CancellationToken, ConfirmPrompt, NeverCancelled, SyncDriver, SyncMode, SyncSummary};
