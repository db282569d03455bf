//! The board service HTTP contract.
//!
//! [`BoardTransport`] is the seam the sync controller talks through;
//! [`HttpTransport`] is the reqwest implementation used by the CLI.

use std::time::Duration;

use async_trait::async_trait;
use kanbin_common::{
    Board, BoardResponse, CreateBoardRequest, ErrorEnvelope, MessageResponse, NewTask, Task,
    TaskPatch,
};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{SyncError, SyncResult};

/// Header the server uses to authorize task writes.
pub const BOARD_KEY_HEADER: &str = "X-Board-Key";

/// Result of a conditional board read.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 304: the validator still matches.
    NotModified,
    /// 200 with a fresh payload and the validator to send next time.
    Fetched {
        body: BoardResponse,
        validator: Option<String>,
    },
}

/// One method per endpoint of the board service.
#[async_trait]
pub trait BoardTransport: Send + Sync {
    async fn create_board(&self, request: &CreateBoardRequest) -> SyncResult<Board>;

    /// `validator` is sent as `If-None-Match` when present.
    async fn fetch_board(&self, key: &str, validator: Option<&str>) -> SyncResult<FetchOutcome>;

    async fn delete_board(&self, key: &str) -> SyncResult<MessageResponse>;

    async fn create_task(&self, key: &str, task: &NewTask) -> SyncResult<Task>;

    async fn update_task(&self, key: &str, id: Uuid, patch: &TaskPatch) -> SyncResult<Task>;

    async fn delete_task(&self, key: &str, id: Uuid) -> SyncResult<MessageResponse>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kanbin/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let resp = request.send().await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(resp);
        }
        Err(error_from_response(resp).await)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        let resp = self.send(request).await?;
        decode(resp).await
    }
}

#[async_trait]
impl BoardTransport for HttpTransport {
    async fn create_board(&self, request: &CreateBoardRequest) -> SyncResult<Board> {
        self.send_json(self.client.post(self.url("/boards")).json(request))
            .await
    }

    async fn fetch_board(&self, key: &str, validator: Option<&str>) -> SyncResult<FetchOutcome> {
        let mut request = self.client.get(self.url(&format!("/boards/{key}")));
        if let Some(validator) = validator {
            request = request.header(IF_NONE_MATCH, validator);
        }
        let resp = self.send(request).await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            debug!(key, "board not modified");
            return Ok(FetchOutcome::NotModified);
        }
        let validator = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = decode(resp).await?;
        Ok(FetchOutcome::Fetched { body, validator })
    }

    async fn delete_board(&self, key: &str) -> SyncResult<MessageResponse> {
        self.send_json(self.client.delete(self.url(&format!("/boards/{key}"))))
            .await
    }

    async fn create_task(&self, key: &str, task: &NewTask) -> SyncResult<Task> {
        self.send_json(
            self.client
                .post(self.url(&format!("/boards/{key}/tasks")))
                .json(task),
        )
        .await
    }

    async fn update_task(&self, key: &str, id: Uuid, patch: &TaskPatch) -> SyncResult<Task> {
        self.send_json(
            self.client
                .put(self.url(&format!("/tasks/{id}")))
                .header(BOARD_KEY_HEADER, key)
                .json(patch),
        )
        .await
    }

    async fn delete_task(&self, key: &str, id: Uuid) -> SyncResult<MessageResponse> {
        self.send_json(
            self.client
                .delete(self.url(&format!("/tasks/{id}")))
                .header(BOARD_KEY_HEADER, key),
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> SyncResult<T> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Protocol(format!("failed to decode response body: {e}")))
}

/// Turn a non-2xx response into a [`SyncError`], preferring the server's `{"error": ...}` text.
async fn error_from_response(resp: Response) -> SyncError {
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<ErrorEnvelope>(&body)
        .ok()
        .map(|env| env.error)
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| format!("request failed with status HTTP {}", status.as_u16()));
    SyncError::from_status(status, message)
}
