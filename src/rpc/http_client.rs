use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Config, RetryConfig};
use crate::error::{RpcEndpoint, RpcError};

use super::{
    BookWire, CreateBookRequest, CreateNoteRequest, NoteWire, ServerClient, SyncFragment,
    SyncState, UpdateBookRequest, UpdateNoteRequest,
};

/// `POST /v3/books` wraps the created book under a `book` key.
#[derive(Debug, Deserialize)]
struct CreateBookResponse {
    book: BookWire,
}

/// `POST /v3/notes` wraps the created note under a `result` key.
#[derive(Debug, Deserialize)]
struct CreateNoteResponse {
    result: NoteWire,
}

/// `reqwest`-backed [`ServerClient`], sending the session token as a
/// `Cookie` header per the protocol in `§6`.
pub struct HttpServerClient {
    client: Client,
    base_url: String,
    session_cookie: String,
    retry: RetryConfig,
}

impl HttpServerClient {
    pub fn new(config: &Config, session_cookie: impl Into<String>) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .cookie_store(false)
            .build()
            .map_err(|source| RpcError::Transport {
                endpoint: RpcEndpoint::SyncState,
                source,
            })?;
        Ok(HttpServerClient {
            client,
            base_url: config.api_endpoint.clone(),
            session_cookie: session_cookie.into(),
            retry: config.retry.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issues `request_once` up to `retry.max_attempts` times, retrying only
    /// on transient transport errors with exponential backoff and jitter.
    async fn with_retry<T, F, Fut>(&self, endpoint: RpcEndpoint, request_once: F) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match request_once().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(%endpoint, attempt, ?delay, "retrying after transient rpc error");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.base_delay_ms as f64 * self.retry.factor.powi(attempt as i32 - 1);
        let jitter_span = base * self.retry.jitter;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        endpoint: RpcEndpoint,
        method: reqwest::Method,
        path: String,
        body: Option<&B>,
    ) -> Result<T, RpcError> {
        let mut request = self
            .client
            .request(method, path)
            .header("Cookie", &self.session_cookie);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| RpcError::Transport { endpoint, source })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(RpcError::Unauthorized { endpoint }),
            StatusCode::CONFLICT => Err(RpcError::Conflict { endpoint }),
            status if status.is_server_error() => {
                let message = response.text().await.unwrap_or_default();
                Err(RpcError::ServerError { endpoint, message })
            }
            status if status.is_client_error() => {
                let message = response.text().await.unwrap_or_default();
                Err(RpcError::ClientError {
                    endpoint,
                    status: status.as_u16(),
                    message,
                })
            }
            _ => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|source| RpcError::Transport { endpoint, source })?;
                serde_json::from_slice(&bytes).map_err(|source| RpcError::Decode { endpoint, source })
            }
        }
    }
}

#[async_trait]
impl ServerClient for HttpServerClient {
    async fn get_sync_state(&self) -> Result<SyncState, RpcError> {
        self.with_retry(RpcEndpoint::SyncState, || async {
            self.send_json::<(), _>(
                RpcEndpoint::SyncState,
                reqwest::Method::GET,
                self.url("/v3/sync/state"),
                None,
            )
            .await
        })
        .await
    }

    async fn get_sync_fragment(&self, after_usn: i64) -> Result<SyncFragment, RpcError> {
        self.with_retry(RpcEndpoint::SyncFragment, || async {
            self.send_json::<(), _>(
                RpcEndpoint::SyncFragment,
                reqwest::Method::GET,
                self.url(&format!("/v3/sync/fragment?after_usn={after_usn}")),
                None,
            )
            .await
        })
        .await
    }

    async fn create_book(&self, name: &str) -> Result<BookWire, RpcError> {
        self.with_retry(RpcEndpoint::CreateBook, || async {
            let response: CreateBookResponse = self
                .send_json(
                    RpcEndpoint::CreateBook,
                    reqwest::Method::POST,
                    self.url("/v3/books"),
                    Some(&CreateBookRequest { name }),
                )
                .await?;
            Ok(response.book)
        })
        .await
    }

    async fn update_book(&self, uuid: Uuid, name: &str) -> Result<BookWire, RpcError> {
        self.with_retry(RpcEndpoint::UpdateBook, || async {
            self.send_json(
                RpcEndpoint::UpdateBook,
                reqwest::Method::PATCH,
                self.url(&format!("/v3/books/{uuid}")),
                Some(&UpdateBookRequest { name }),
            )
            .await
        })
        .await
    }

    async fn delete_book(&self, uuid: Uuid) -> Result<BookWire, RpcError> {
        self.with_retry(RpcEndpoint::DeleteBook, || async {
            self.send_json::<(), _>(
                RpcEndpoint::DeleteBook,
                reqwest::Method::DELETE,
                self.url(&format!("/v3/books/{uuid}")),
                None,
            )
            .await
        })
        .await
    }

    async fn create_note(&self, book_uuid: Uuid, content: &str) -> Result<NoteWire, RpcError> {
        self.with_retry(RpcEndpoint::CreateNote, || async {
            let response: CreateNoteResponse = self
                .send_json(
                    RpcEndpoint::CreateNote,
                    reqwest::Method::POST,
                    self.url("/v3/notes"),
                    Some(&CreateNoteRequest { book_uuid, content }),
                )
                .await?;
            Ok(response.result)
        })
        .await
    }

    async fn update_note(
        &self,
        uuid: Uuid,
        request: UpdateNoteRequest<'_>,
    ) -> Result<NoteWire, RpcError> {
        self.with_retry(RpcEndpoint::UpdateNote, || async {
            self.send_json(
                RpcEndpoint::UpdateNote,
                reqwest::Method::PATCH,
                self.url(&format!("/v3/notes/{uuid}")),
                Some(&request),
            )
            .await
        })
        .await
    }

    async fn delete_note(&self, uuid: Uuid) -> Result<NoteWire, RpcError> {
        self.with_retry(RpcEndpoint::DeleteNote, || async {
            self.send_json::<(), _>(
                RpcEndpoint::DeleteNote,
                reqwest::Method::DELETE,
                self.url(&format!("/v3/notes/{uuid}")),
                None,
            )
            .await
        })
        .await
    }
}
