use std::time::Duration;

use async_trait::async_trait;
use content_sync_core::{
    ApiEnvelope, ApplicationError, ContentDraft, ContentRecord, ListFilter, RemoteError,
    RemoteStore, ResourceType, TransportError,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote store client for the content service REST API.
///
/// Every response is classified before it is parsed: anything that is not a
/// JSON envelope is a transport failure, a well-formed envelope with
/// `success: false` is an application failure.
pub struct HttpRemoteStore {
    http_client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl HttpRemoteStore {
    /// Create a new client for the service rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(HttpClient::new(), base_url)
    }

    pub fn with_client(http_client: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-request timeout applied by the HTTP client itself.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, resource: ResourceType) -> String {
        format!("{}{}", self.base_url, resource.route_prefix())
    }

    fn item_url(&self, resource: ResourceType, id: &str) -> String {
        format!("{}/{}", self.collection_url(resource), urlencoding::encode(id))
    }

    fn classify_request_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Aborted(e.to_string())
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        request
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Transport(self.classify_request_error(e)))
    }

    /// Decode an envelope, returning its (possibly absent) data.
    ///
    /// The envelope is classified before `data` is interpreted, so a rejection
    /// carrying an arbitrary `data` object is still an application error.
    async fn decode<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<Option<T>, RemoteError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        // HTML error pages from proxies must never reach the JSON parser
        if !is_json_content_type(&content_type) {
            return Err(TransportError::UnexpectedContentType {
                status: status.as_u16(),
                content_type,
            }
            .into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(self.classify_request_error(e)))?;

        let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_slice(&body)
            .map_err(|e| TransportError::MalformedBody(e.to_string()))?;

        if !status.is_success() || !envelope.success {
            let message = envelope.message.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            return Err(ApplicationError::new(status.as_u16(), message).into());
        }

        envelope
            .data
            .map(serde_json::from_value::<T>)
            .transpose()
            .map_err(|e| TransportError::MalformedBody(e.to_string()).into())
    }

    async fn decode_required<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, RemoteError> {
        self.decode(response).await?.ok_or_else(|| {
            TransportError::MalformedBody("envelope has no data".to_string()).into()
        })
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn backend_name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(
        &self,
        resource: ResourceType,
        filter: &ListFilter,
    ) -> Result<Vec<ContentRecord>, RemoteError> {
        let request = self
            .http_client
            .get(self.collection_url(resource))
            .query(filter);
        let response = self.send(request).await?;
        let records: Vec<ContentRecord> = self.decode_required(response).await?;

        debug!("Listed {} {} records", records.len(), resource);
        Ok(records)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, resource: ResourceType, id: &str) -> Result<ContentRecord, RemoteError> {
        let response = self
            .send(self.http_client.get(self.item_url(resource, id)))
            .await?;
        self.decode_required(response).await
    }

    #[instrument(skip(self, draft), level = "debug")]
    async fn create(
        &self,
        resource: ResourceType,
        draft: &ContentDraft,
    ) -> Result<ContentRecord, RemoteError> {
        let request = self.http_client.post(self.collection_url(resource)).json(draft);
        let response = self.send(request).await?;
        let record: ContentRecord = self.decode_required(response).await?;

        debug!("Created {} {}", resource, record.id);
        Ok(record)
    }

    #[instrument(skip(self, draft), level = "debug")]
    async fn update(
        &self,
        resource: ResourceType,
        id: &str,
        draft: &ContentDraft,
    ) -> Result<ContentRecord, RemoteError> {
        let request = self.http_client.put(self.item_url(resource, id)).json(draft);
        let response = self.send(request).await?;
        self.decode_required(response).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, resource: ResourceType, id: &str) -> Result<(), RemoteError> {
        let response = self
            .send(self.http_client.delete(self.item_url(resource, id)))
            .await?;
        let _ack: Option<serde_json::Value> = self.decode(response).await?;

        debug!("Deleted {} {}", resource, id);
        Ok(())
    }
}
