use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url, header};
use tracing::debug;

use crate::error::{ClientBuildError, TransportError};
use crate::redact::redact_sensitive;
use crate::transport::{ApiMethod, ApiRequest, RawResponse, Transport};

/// Base used when `ARLO_API_BASE` is unset: the development server.
pub const DEFAULT_API_BASE: &str = "http://localhost:3001";
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];
/// Name of the server's session cookie.
const SESSION_COOKIE_NAME: &str = "session";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin wrapper around a configured `reqwest::Client` for Arlo API access.
///
/// The client pre-configures default headers (including the session cookie
/// when one is known) and builds requests against a validated base URL.
#[derive(Debug, Clone)]
pub struct ArloClient {
    base_url: String,
    http: Client,
    user_agent: String,
}

impl ArloClient {
    /// Build a client for `base_url`, authenticating with `session` when given.
    pub fn new(base_url: &str, session: Option<&str>, timeout: Duration) -> Result<Self, ClientBuildError> {
        validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(session) = session.filter(|value| !value.trim().is_empty()) {
            let mut cookie = header::HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={}", session.trim()))
                .map_err(|_| ClientBuildError::InvalidSessionCookie)?;
            cookie.set_sensitive(true);
            default_headers.insert(header::COOKIE, cookie);
        }

        let http = Client::builder().default_headers(default_headers).timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("arlo-sync/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Construct an [`ArloClient`] from `ARLO_API_BASE` and `ARLO_SESSION`.
    ///
    /// Without `ARLO_API_BASE` the local development server is used.
    pub fn from_env() -> Result<Self, ClientBuildError> {
        Self::from_env_with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn from_env_with_timeout(timeout: Duration) -> Result<Self, ClientBuildError> {
        let base_url = env::var("ARLO_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let session = env::var("ARLO_SESSION").ok();
        Self::new(&base_url, session.as_deref(), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }
}

#[async_trait]
impl Transport for ArloClient {
    async fn execute(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        let method_label = request.method.to_string();
        let method = match request.method {
            ApiMethod::Get => Method::GET,
            ApiMethod::Post => Method::POST,
        };
        let mut builder = self.request(method, &request.path);
        if let Some(body) = &request.body {
            debug!(path = %request.path, body = %redact_sensitive(&body.to_string()), "sending request body");
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| TransportError::from_reqwest(&method_label, &request.path, &error))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::from_reqwest(&method_label, &request.path, &error))?;

        debug!(path = %request.path, status, "received response");
        Ok(RawResponse { status, body })
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<(), ClientBuildError> {
    let parsed_base_url = Url::parse(base).map_err(|e| ClientBuildError::invalid_base_url(base, e.to_string()))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| ClientBuildError::invalid_base_url(base, "URL must include a host"))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(ClientBuildError::InsecureScheme(parsed_base_url.scheme().to_string()));
    }

    Ok(())
}
