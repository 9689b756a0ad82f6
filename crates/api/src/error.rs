use thiserror::Error;

/// Why a request produced no usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// Request could not be built or the body could not be read.
    Other,
}

/// A request that never reached a server decision.
///
/// Retrying is always safe: nothing was applied locally.
#[derive(Debug, Clone, Error)]
#[error("{method} {path} failed: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub method: String,
    pub path: String,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, method: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: method.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn timeout(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, method, path, "request timed out")
    }

    pub fn connect(method: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, method, path, message)
    }

    pub fn other(method: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, method, path, message)
    }

    pub(crate) fn from_reqwest(method: impl Into<String>, path: impl Into<String>, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, method, path, error.to_string())
    }
}

/// Errors constructing an [`crate::ArloClient`].
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid ARLO_API_BASE URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("ARLO_API_BASE must use https for non-localhost hosts; got '{0}://'")]
    InsecureScheme(String),
    #[error("session cookie contains characters not allowed in a header")]
    InvalidSessionCookie,
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientBuildError {
    pub fn invalid_base_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidBaseUrl {
            url: url.into(),
            message: message.into(),
        }
    }
}
