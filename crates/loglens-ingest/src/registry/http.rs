//! Registry client speaking JSON over HTTP.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use super::{Registry, RegistryFuture};
use crate::error::{IngestError, Result};
use crate::types::{FileId, HostId, LogFile, LogLine, LogSource, NewLogFile, SourceId};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`HttpRegistry`].
#[derive(Debug, Clone)]
pub struct HttpRegistryConfig {
    /// Base URL of the API, e.g. `https://logs.example.com/api/`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRegistryConfig {
    /// Creates a config for the given base URL with default settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Registry backed by the REST API.
pub struct HttpRegistry {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistry")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpRegistry {
    /// Creates a client for the configured API.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an absolute http(s) URL or the
    /// HTTP client cannot be built.
    pub fn new(config: HttpRegistryConfig) -> Result<Self> {
        let mut raw = config.base_url;
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let base = Url::parse(&raw)
            .map_err(|e| IngestError::Config(format!("invalid api url '{raw}': {e}")))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(IngestError::Config(format!(
                "api url must start with http:// or https://, got '{raw}'"
            )));
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base,
            token: config.token,
        })
    }

    /// Resolves an endpoint path against the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not form a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| IngestError::Config(format!("invalid endpoint '{path}': {e}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        trace!(%method, %url, "registry request");
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(Method::GET, path)?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.request(method, path)?.json(body).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Turns a non-success status into [`IngestError::Registry`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    debug!(status = status.as_u16(), %message, "registry request failed");

    Err(IngestError::Registry {
        status: status.as_u16(),
        message,
    })
}

impl Registry for HttpRegistry {
    fn list_sources_for_host(&self, host_id: HostId) -> RegistryFuture<'_, Vec<LogSource>> {
        Box::pin(async move { self.get_json(&format!("hosts/{host_id}/logsources")).await })
    }

    fn list_files_for_source(&self, source_id: SourceId) -> RegistryFuture<'_, Vec<LogFile>> {
        Box::pin(async move { self.get_json(&format!("logsources/{source_id}/logfiles")).await })
    }

    fn create_file<'a>(&'a self, file: &'a NewLogFile) -> RegistryFuture<'a, LogFile> {
        Box::pin(async move { self.send_json(Method::POST, "logfiles", file).await })
    }

    fn update_file<'a>(&'a self, file: &'a LogFile) -> RegistryFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .request(Method::PUT, &format!("logfiles/{}", file.id))?
                .json(file)
                .send()
                .await?;
            check(response).await?;
            Ok(())
        })
    }

    fn line_count_for_file(&self, file_id: FileId) -> RegistryFuture<'_, i64> {
        Box::pin(async move { self.get_json(&format!("logfiles/{file_id}/linecount")).await })
    }

    fn create_line<'a>(&'a self, line: &'a LogLine) -> RegistryFuture<'a, LogLine> {
        Box::pin(async move { self.send_json(Method::POST, "loglines", line).await })
    }
}
