//! reqwest-backed client for the remote inbox API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url, header};
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    config::InboxConfig,
    core::key::QueryKey,
    credential::CredentialHolder,
    event::{AcknowledgeReceipt, HealthStatus, IngestReceipt, NewEvent, Page},
};

use super::{EventDirectory, RemoteError, RemoteResult};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// HTTP implementation of [`crate::remote::EventDirectory`].
///
/// The bearer credential is read from the shared holder on every request.
#[derive(Debug, Clone)]
pub struct HttpEventDirectory {
    client: reqwest::Client,
    base_url: String,
    base: Url,
    credential: CredentialHolder,
}

impl HttpEventDirectory {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credential: CredentialHolder,
    ) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| RemoteError::Network(format!("invalid API endpoint {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Network(format!("invalid API endpoint {base_url:?}")));
        }

        Ok(Self {
            client,
            base_url,
            base,
            credential,
        })
    }

    pub fn from_config(config: &InboxConfig, credential: CredentialHolder) -> RemoteResult<Self> {
        Self::new(&config.api_base_url, config.request_timeout, credential)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Appends `segments` to the base path, percent-encoding each one so an
    /// event id can never add path components or a query string.
    fn url(&self, segments: &[&str]) -> RemoteResult<Url> {
        if segments.iter().any(|s| matches!(*s, "" | "." | "..")) {
            return Err(RemoteError::Rejected {
                status: 400,
                detail: "invalid event id".to_string(),
            });
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Network(format!("invalid API endpoint {:?}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let key = self.credential.get().ok_or(RemoteError::Unauthorized)?;
        Ok(req.bearer_auth(key.expose()))
    }

    fn optionally_authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.credential.get() {
            Some(key) => req.bearer_auth(key.expose()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> RemoteResult<Response> {
        let response = req.send().await.map_err(|err| {
            tracing::debug!(error = %err, "request did not complete");
            if err.is_timeout() {
                RemoteError::Network("request timed out".to_string())
            } else {
                RemoteError::Network("Unable to connect to the API".to_string())
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let detail = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => None,
        _ => response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.detail)
            .map(|detail| match detail {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
    };

    RemoteError::from_status(status.as_u16(), detail, retry_after)
}

async fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl EventDirectory for HttpEventDirectory {
    async fn list(&self, key: &QueryKey) -> RemoteResult<Page> {
        let mut params: Vec<(&str, String)> = vec![("limit", key.page_size.to_string())];
        if let Some(cursor) = &key.cursor {
            params.push(("cursor", cursor.as_str().to_string()));
        }
        if let Some(status) = key.status {
            params.push(("status", status.as_str().to_string()));
        }

        let req = self.authorized(self.client.get(self.url(&["inbox"])?).query(&params))?;
        let response = self.send(req).await?;
        decode(response).await
    }

    async fn acknowledge(&self, event_id: &str) -> RemoteResult<AcknowledgeReceipt> {
        let url = self.url(&["inbox", event_id, "acknowledge"])?;
        let req = self.authorized(self.client.post(url))?;
        let response = self.send(req).await?;
        decode(response).await
    }

    async fn delete(&self, event_id: &str) -> RemoteResult<()> {
        let url = self.url(&["inbox", event_id])?;
        let req = self.authorized(self.client.delete(url))?;
        self.send(req).await?;
        Ok(())
    }

    async fn health(&self) -> RemoteResult<HealthStatus> {
        let req = self.optionally_authorized(self.client.get(self.url(&["health"])?));
        let response = self.send(req).await?;
        decode(response).await
    }

    async fn ingest(&self, event: &NewEvent) -> RemoteResult<IngestReceipt> {
        let req = self.authorized(self.client.post(self.url(&["events"])?).json(event))?;
        let response = self.send(req).await?;
        decode(response).await
    }
}
