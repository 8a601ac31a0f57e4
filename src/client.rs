//! Template service client.
//!
//! One remote service owns both sides of the external contract: listing the
//! available templates (with their field schemas) and generating a document
//! from a merged payload. [`GenerationService`] keeps the pipeline decoupled
//! from the wire; [`HttpGenerationService`] is the production implementation.

use crate::error::EngineError;
use crate::schema::Template;
use crate::types::TemplateId;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Descriptor of one generated document as returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub file_name: String,
    /// Download URL, present only when the run asked for an attachment and
    /// the service produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

/// Remote template service operations the engine consumes.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Available templates with their schemas. Read path only, never part of
    /// the per-record hot path.
    async fn list_templates(&self) -> Result<Vec<Template>, EngineError>;

    /// Submits one record's merged payload for generation.
    async fn generate_document(
        &self,
        template: &TemplateId,
        payload: Map<String, Value>,
        with_attachment: bool,
    ) -> Result<GeneratedFile, EngineError>;

    /// Name used in logs to identify the service implementation.
    fn service_name(&self) -> &str;
}

// Wire structures. The service wraps every response in a `data` envelope.
#[derive(Serialize)]
struct MergeRequest<'a> {
    data: &'a Map<String, Value>,
    attach: bool,
}

#[derive(Deserialize)]
struct MergeEnvelope {
    data: GeneratedFile,
}

#[derive(Deserialize)]
struct TemplatesEnvelope {
    data: Vec<Template>,
}

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn build_service_http_client() -> Result<Client, EngineError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| EngineError::ServiceRequestFailed(format!("Failed to create HTTP client: {}", e)))
}

// Maps transport-level failures to EngineError.
fn map_transport_error(error: reqwest::Error) -> EngineError {
    if error.is_timeout() {
        EngineError::ServiceRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        EngineError::ServiceRequestFailed(format!("Connection error: {}", error))
    } else {
        EngineError::ServiceRequestFailed(format!("HTTP error: {}", error))
    }
}

// Maps a non-success HTTP status plus response body to EngineError.
fn error_from_status(status: u16, body: String) -> EngineError {
    match status {
        401 | 403 => EngineError::ServiceAuthFailed(format!("Authentication failed: {}", body)),
        429 => EngineError::ServiceRateLimit(format!("Rate limit exceeded: {}", body)),
        404 => EngineError::TemplateNotFound(body),
        _ => EngineError::ServiceRequestFailed(format!(
            "Request failed with status {}: {}",
            status, body
        )),
    }
}

/// HTTP implementation of [`GenerationService`].
pub struct HttpGenerationService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGenerationService {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, EngineError> {
        let client = build_service_http_client()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn read_error(response: reqwest::Response) -> EngineError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error_from_status(status, body)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn list_templates(&self) -> Result<Vec<Template>, EngineError> {
        let url = format!("{}/templates", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let envelope: TemplatesEnvelope = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(format!("Template listing: {}", e)))?;

        debug!(count = envelope.data.len(), "templates listed");
        Ok(envelope.data)
    }

    async fn generate_document(
        &self,
        template: &TemplateId,
        payload: Map<String, Value>,
        with_attachment: bool,
    ) -> Result<GeneratedFile, EngineError> {
        let request = MergeRequest {
            data: &payload,
            attach: with_attachment,
        };

        let url = format!("{}/templates/{}/merge", self.base_url, template);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let envelope: MergeEnvelope = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(format!("Merge response: {}", e)))?;

        Ok(envelope.data)
    }

    fn service_name(&self) -> &str {
        "http"
    }
}
