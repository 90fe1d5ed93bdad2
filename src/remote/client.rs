use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::AppConfig;
use crate::util::{validate_base_url, UrlValidationError};

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Name of the cookie carrying the anti-forgery token.
const XSRF_COOKIE: &str = "xsrf-token";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[from] UrlValidationError),
    #[error("Invalid member slug: {0:?}")]
    InvalidSlug(String),
}

/// One window of the remote blocklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPage {
    /// Author identities in this window, in response order.
    pub ids: Vec<String>,
    /// Set when the provider signals end-of-list or returned no data.
    pub is_end: bool,
}

#[derive(Deserialize)]
struct BlockedUsersResponse {
    data: Option<Vec<BlockedUserEntry>>,
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct BlockedUserEntry {
    #[serde(default)]
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct Paging {
    is_end: Option<bool>,
}

impl BlockedUserEntry {
    /// Identities arrive as strings or numbers; anything else has no id.
    fn into_id(self) -> Option<String> {
        match self.id {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<BlockedUsersResponse> for BlockedPage {
    fn from(response: BlockedUsersResponse) -> Self {
        let entries = response.data.unwrap_or_default();
        let is_end = entries.is_empty()
            || response.paging.and_then(|p| p.is_end) != Some(false);
        Self {
            ids: entries.into_iter().filter_map(BlockedUserEntry::into_id).collect(),
            is_end,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the blocklist listing and the block/unblock endpoints.
///
/// Every call carries the session cookie (when configured) and is bounded as
/// a whole, body included, by the configured request timeout.
pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
    session_cookie: Option<SecretString>,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &AppConfig) -> Result<Self, RemoteError> {
        let base = validate_base_url(&config.base_url)?;
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(create_redirect_policy())
            .build()?;

        if config.session_cookie.is_none() {
            tracing::debug!("No session cookie configured, remote calls are anonymous");
        }

        Ok(Self {
            http,
            base,
            session_cookie: config.session_cookie.clone().map(SecretString::from),
            timeout: config.request_timeout(),
        })
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch one window of the remote blocklist.
    pub async fn fetch_blocked_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<BlockedPage, RemoteError> {
        let mut url = self.endpoint(&["api", "v3", "settings", "blocked_users"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        let body = self.execute(self.request(Method::GET, url)).await?;
        let response: BlockedUsersResponse = serde_json::from_slice(&body)?;
        Ok(response.into())
    }

    /// Block (`POST`) or unblock (`DELETE`) the member addressed by `slug`.
    ///
    /// Any 2xx counts as success; the body is ignored.
    pub async fn set_block(&self, slug: &str, block: bool) -> Result<(), RemoteError> {
        validate_slug(slug)?;
        let url = self.endpoint(&["api", "v4", "members", slug, "actions", "block"]);
        let method = if block { Method::POST } else { Method::DELETE };

        let mut request = self
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match self.xsrf_token() {
            Some(token) => request = request.header("x-xsrf-token", token),
            None => tracing::warn!("No xsrf-token in session cookie, sending toggle without it"),
        }

        self.execute(request).await?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // A validated base is never cannot-be-a-base.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.session_cookie {
            Some(cookie) => request.header(reqwest::header::COOKIE, cookie.expose_secret()),
            None => request,
        }
    }

    fn xsrf_token(&self) -> Option<&str> {
        self.session_cookie
            .as_ref()
            .and_then(|cookie| xsrf_from_cookie(cookie.expose_secret()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>, RemoteError> {
        let call = async {
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(RemoteError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, MAX_RESPONSE_SIZE).await
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RemoteError::Timeout(self.timeout))?
    }
}

/// Limit redirects to 3 hops and refuse loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// A slug must address exactly one path segment.
fn validate_slug(slug: &str) -> Result<(), RemoteError> {
    let bad = slug.is_empty()
        || slug == "."
        || slug == ".."
        || slug.chars().any(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace());
    if bad {
        return Err(RemoteError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

/// Value of the `xsrf-token` cookie in a raw `Cookie` header.
pub fn xsrf_from_cookie(cookie: &str) -> Option<&str> {
    cookie
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == XSRF_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, RemoteError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
