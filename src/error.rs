use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// 429, the server is shedding load
    RateLimited,
    /// 404
    NotFound,
    /// 401 / 403, bad or expired credential
    Unauthorized,
    /// 5xx
    ServerError,
    /// Connection, TLS or timeout failure before a status was received
    NetworkError,
    /// Response could not be decoded, or an unexpected 4xx
    Malformed,
}

impl ApiErrorKind {
    /// Map an HTTP status code to an error kind. Only meaningful for non-2xx codes.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ApiErrorKind::RateLimited,
            404 => ApiErrorKind::NotFound,
            401 | 403 => ApiErrorKind::Unauthorized,
            500..=599 => ApiErrorKind::ServerError,
            _ => ApiErrorKind::Malformed,
        }
    }

    /// Whether a retry can plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiErrorKind::RateLimited | ApiErrorKind::ServerError | ApiErrorKind::NetworkError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::ServerError => "server_error",
            ApiErrorKind::NetworkError => "network_error",
            ApiErrorKind::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network or protocol level failure talking to the Riot API
#[derive(Debug, Clone, Error)]
#[error("{kind} (status {status_code:?}): {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status_code: Option<u16>,
    /// Advisory wait from the `Retry-After` header, if the server sent one
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            retry_after: None,
            message: message.into(),
        }
    }

    /// Build an error from a non-success HTTP response
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        Self {
            kind: ApiErrorKind::from_status(status),
            status_code: Some(status),
            retry_after,
            message: truncate(body, 200),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NetworkError, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Malformed, message)
    }
}

/// Identity lookup did not produce a player
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("no account found for {0}")]
    NotFound(String),
    #[error("account lookup for {subject} failed: {source}")]
    Api {
        subject: String,
        #[source]
        source: ApiError,
    },
    #[error("account payload for {0} has no puuid")]
    MissingPuuid(String),
}

/// No candidate path resolved a required field
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("required field `{field}` not found (tried {tried:?})")]
pub struct SchemaError {
    pub field: String,
    pub tried: Vec<String>,
}

/// Failure in the response cache backing store
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("cached entry for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("payload for {key} could not be serialized: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// The API error kind, if this error came from the remote API
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Error::Api(e) => Some(e.kind),
            Error::Resolution(ResolutionError::Api { source, .. }) => Some(source.kind),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
