//! HTTP API client for the i2ap server

use i2ap_common::{JobAcceptedResponse, JobStatusResponse};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{CliError, Result};

// ============================================================================
// API Client Constants
// ============================================================================

/// Default timeout for API requests in seconds.
/// Can be overridden via I2AP_API_TIMEOUT_SECS environment variable.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 60;

/// Default server URL when not specified via flag or environment variable.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3101";

pub const CLIENT_ID_HEADER: &str = "Tt-I2ap-Id";
pub const CLIENT_SECRET_HEADER: &str = "Tt-I2ap-Sec";

/// Origination sent with every request
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// Body of `POST /Sync`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParam {
    pub key: String,
    pub value: String,
}

/// Body of `POST /DbToDb`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DbToDbRequest {
    pub object_name: String,
    pub query_params: Vec<QueryParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

/// Query string of `GET /FileToDb`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileToDbRequest {
    pub object_name: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

/// Query string of `GET /Replicate`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplicateRequest {
    pub object_name: String,
    pub source_project: String,
    pub source_dataset: String,
    pub dest_project: String,
    pub dest_dataset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

/// Result of a status lookup; a 404 is an answer, not an error
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    Found(JobStatusResponse),
    NotFound,
}

/// API client for the i2ap server
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let timeout_secs = std::env::var("I2AP_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_API_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(CliError::config("server URL is empty"));
        }

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(CLIENT_ID_HEADER, &self.credentials.client_id)
            .header(CLIENT_SECRET_HEADER, &self.credentials.client_secret)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn sync(&self, request: &SyncRequest) -> Result<JobAcceptedResponse> {
        let builder = self.client.post(self.url("/Sync")).json(request);
        accepted(self.authorized(builder).send().await?).await
    }

    pub async fn db_to_db(&self, request: &DbToDbRequest) -> Result<JobAcceptedResponse> {
        let builder = self.client.post(self.url("/DbToDb")).json(request);
        accepted(self.authorized(builder).send().await?).await
    }

    pub async fn file_to_db(&self, request: &FileToDbRequest) -> Result<JobAcceptedResponse> {
        let builder = self.client.get(self.url("/FileToDb")).query(request);
        accepted(self.authorized(builder).send().await?).await
    }

    pub async fn replicate(&self, request: &ReplicateRequest) -> Result<JobAcceptedResponse> {
        let builder = self.client.get(self.url("/Replicate")).query(request);
        accepted(self.authorized(builder).send().await?).await
    }

    /// Look up `GET /{service}/{job_id}`
    pub async fn job_status(&self, service: &str, job_id: &str) -> Result<StatusLookup> {
        let builder = self.client.get(self.url(&format!("/{}/{}", service, job_id)));
        let response = self.authorized(builder).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(service, job_id, "Status endpoint answered 404");
            return Ok(StatusLookup::NotFound);
        }

        let response = check(response).await?;
        Ok(StatusLookup::Found(response.json().await?))
    }
}

async fn accepted(response: Response) -> Result<JobAcceptedResponse> {
    Ok(check(response).await?.json().await?)
}

/// Turn a non-success response into a [`CliError`] carrying the server's message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            }
        });

    if status == StatusCode::UNAUTHORIZED {
        return Err(CliError::Unauthorized(message));
    }
    Err(CliError::api(status.as_u16(), message))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:3101/", Credentials::default()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3101");
        assert_eq!(client.url("/Sync"), "http://localhost:3101/Sync");
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(
            ApiClient::new("", Credentials::default()),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_request_bodies_use_kebab_case() {
        let body = serde_json::to_value(DbToDbRequest {
            object_name: "orders".into(),
            query_params: vec![QueryParam {
                key: "REGION".into(),
                value: "EMEA".into(),
            }],
            disposition: None,
        })
        .unwrap();
        assert_eq!(body["object-name"], "orders");
        assert_eq!(body["query-params"][0]["key"], "REGION");
        assert!(body.get("disposition").is_none());

        let body = serde_json::to_value(SyncRequest::default()).unwrap();
        assert_eq!(body, serde_json::json!({}));
    }
}
