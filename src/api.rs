// API client module: a small async HTTP client that talks to the
// CodeThreat service. It only knows how to send authenticated requests
// and classify the outcome; what the endpoints mean lives in `scan`,
// `monitor` and `project`. It never retries, callers decide that.

use crate::config::RemoteConfig;
use crate::error::{Result, ScanError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::Form;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Organization header expected by the service on every call.
pub const ORGANIZATION_HEADER: &str = "x-ct-organization";

/// Request bodies the client knows how to send. The variant decides the
/// content type: `application/json` or `multipart/form-data`.
pub enum Payload {
    Json(serde_json::Value),
    Multipart(Form),
}

/// A successful (2xx) response. The text is kept as-is and only parsed on
/// demand.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub status: u16,
    pub text: String,
}

impl ResponseBody {
    /// Decode the body as JSON; a body of the wrong shape is a protocol error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.text)
            .map_err(|e| ScanError::protocol(format!("unexpected response body: {e}")))
    }
}

/// Holds a reqwest client (and its connection pool) plus the settings every
/// request needs. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: RemoteConfig,
}

impl ApiClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("codethreat-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ApiClient { client, config })
    }

    /// Check that every request would carry a base URL, token and
    /// organization, without sending anything.
    pub fn validate(&self) -> Result<()> {
        self.url("/")?;
        self.auth_headers().map(|_| ())
    }

    /// Bearer token and organization headers. Fails before anything is
    /// sent when either is missing.
    fn auth_headers(&self) -> Result<HeaderMap> {
        let token = required(&self.config.access_token, "access token")?;
        let org = required(&self.config.organization_name, "organization name")?;
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ScanError::config("access token contains characters not allowed in a header"))?;
        headers.insert(AUTHORIZATION, bearer);
        let org = HeaderValue::from_str(org)
            .map_err(|_| ScanError::config("organization name contains characters not allowed in a header"))?;
        headers.insert(ORGANIZATION_HEADER, org);
        Ok(headers)
    }

    fn url(&self, path: &str) -> Result<String> {
        let base = required(&self.config.base_url, "base URL")?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/')))
    }

    /// POST `payload` to `path`.
    pub async fn post(&self, path: &str, payload: Payload) -> Result<ResponseBody> {
        let url = self.url(path)?;
        let headers = self.auth_headers()?;
        let req = self.client.post(&url).headers(headers);
        let req = match payload {
            Payload::Json(v) => req.json(&v),
            Payload::Multipart(form) => req.multipart(form),
        };
        debug!(%url, "api.post");
        self.execute(req).await
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> Result<ResponseBody> {
        self.get_request(path, None).await
    }

    /// GET `path`, giving up after `timeout`. An expired request is a
    /// `Transport` error like any other network failure.
    pub async fn get_with_timeout(&self, path: &str, timeout: Duration) -> Result<ResponseBody> {
        self.get_request(path, Some(timeout)).await
    }

    async fn get_request(&self, path: &str, timeout: Option<Duration>) -> Result<ResponseBody> {
        let url = self.url(path)?;
        let headers = self.auth_headers()?;
        let mut req = self.client.get(&url).headers(headers);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        debug!(%url, ?timeout, "api.get");
        self.execute(req).await
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<ResponseBody> {
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            // The body is diagnostics only; if it can't be read we still
            // report the status.
            let body = res.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "api.response.rejected");
            return Err(ScanError::RemoteService { status: status.as_u16(), body });
        }
        let text = res.text().await?;
        debug!(status = status.as_u16(), len = text.len(), "api.response.ok");
        Ok(ResponseBody { status: status.as_u16(), text })
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ScanError::config(format!("missing {what}"))),
    }
}
