//! Client for the external scraping service
//!
//! Every operation is a pass-through: the request body built by the tool
//! layer is posted as-is and the service's JSON answer is handed back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use scrape_mcp_gateway::ApiVersion;
use serde_json::Value;
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Scraping service returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid response from scraping service: {0}")]
    InvalidResponse(String),
}

/// Which API generation to call and with whose credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiAuth {
    pub version: ApiVersion,
    pub api_key: Option<String>,
}

impl ApiAuth {
    pub fn new(version: ApiVersion, api_key: Option<String>) -> Self {
        Self { version, api_key }
    }
}

/// Operations of the scraping service used by the tools
#[async_trait]
pub trait ScrapeApi: Send + Sync + 'static {
    async fn scrape(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError>;

    async fn map(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError>;

    async fn search(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError>;

    /// Start an asynchronous crawl; the answer carries the job id
    async fn crawl(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError>;

    async fn crawl_status(&self, auth: &ApiAuth, id: &str) -> Result<Value, ScrapeError>;

    async fn extract(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError>;
}

/// `reqwest` implementation against `{base}/v1/...` and `{base}/v2/...`
#[derive(Debug, Clone)]
pub struct FirecrawlClient {
    base_url: Url,
    http_client: Client,
}

impl FirecrawlClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ScrapeError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, http_client))
    }

    pub fn with_client(base_url: Url, http_client: Client) -> Self {
        Self {
            base_url,
            http_client,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, version: ApiVersion, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            version,
            path
        )
    }

    async fn call(
        &self,
        method: Method,
        auth: &ApiAuth,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ScrapeError> {
        let url = self.endpoint(auth.version, path);
        debug!("{} {}", method, url);

        let mut request = self.http_client.request(method, &url);
        if let Some(api_key) = &auth.api_key {
            request = request.bearer_auth(api_key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(ScrapeError::Api { status, message });
        }

        serde_json::from_str(&text).map_err(|e| ScrapeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ScrapeApi for FirecrawlClient {
    async fn scrape(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        self.call(Method::POST, auth, "scrape", Some(request)).await
    }

    async fn map(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        self.call(Method::POST, auth, "map", Some(request)).await
    }

    async fn search(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        self.call(Method::POST, auth, "search", Some(request)).await
    }

    async fn crawl(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        self.call(Method::POST, auth, "crawl", Some(request)).await
    }

    async fn crawl_status(&self, auth: &ApiAuth, id: &str) -> Result<Value, ScrapeError> {
        let path = format!("crawl/{}", id);
        self.call(Method::GET, auth, &path, None).await
    }

    async fn extract(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        self.call(Method::POST, auth, "extract", Some(request)).await
    }
}
