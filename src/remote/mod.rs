pub mod http;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    core::key::QueryKey,
    event::{AcknowledgeReceipt, HealthStatus, IngestReceipt, NewEvent, Page},
};

/// Failure of a single call into the remote event directory.
///
/// Cloneable so one failed list call can be handed to every coalesced reader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Unauthorized: Invalid or missing API key")]
    Unauthorized,
    #[error("Not found: The requested resource was not found")]
    NotFound,
    #[error("Rate limit exceeded: Please try again later")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Server error: {detail}")]
    Server { status: u16, detail: String },
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Maps a non-success HTTP status and optional body `detail` to an error.
    pub fn from_status(status: u16, detail: Option<String>, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => RemoteError::Unauthorized,
            404 => RemoteError::NotFound,
            429 => RemoteError::RateLimited { retry_after },
            500.. => RemoteError::Server {
                status,
                detail: detail.unwrap_or_else(|| "Internal server error".to_string()),
            },
            _ => RemoteError::Rejected {
                status,
                detail: detail.unwrap_or_else(|| format!("Request failed with status {status}")),
            },
        }
    }

    /// True for a missing or rejected credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Unauthorized)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The remote, eventually consistent inbox collection.
///
/// Every call may have succeeded server-side even when it reports an error.
#[async_trait]
pub trait EventDirectory: Send + Sync + 'static {
    async fn list(&self, key: &QueryKey) -> RemoteResult<Page>;
    async fn acknowledge(&self, event_id: &str) -> RemoteResult<AcknowledgeReceipt>;
    async fn delete(&self, event_id: &str) -> RemoteResult<()>;
    async fn health(&self) -> RemoteResult<HealthStatus>;
    async fn ingest(&self, event: &NewEvent) -> RemoteResult<IngestReceipt>;
}
