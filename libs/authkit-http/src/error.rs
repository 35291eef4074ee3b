use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by [`HttpClient`](crate::HttpClient).
///
/// Every HTTP status comes back as a response; only [`HttpResponse`]
/// helpers that check the status produce [`HttpError::HttpStatus`].
///
/// [`HttpResponse`]: crate::HttpResponse
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Request(#[from] http::Error),

    #[error("invalid value for header `{name}`")]
    InvalidHeader { name: String },

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    /// Plain `http://` while the client is TLS-only, or a non-HTTP scheme.
    #[error("scheme `{scheme}` refused: {reason}")]
    InvalidScheme { scheme: String, reason: &'static str },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Connection failure, or an error raised by the auth layer.
    ///
    /// Layers box their own error type here; callers recover it with
    /// `source().downcast_ref()`.
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] BoxError),

    #[error("response body over {limit} bytes (read {actual})")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-2xx status from a status-checking read. `Display` shows the status
    /// only.
    #[error("HTTP {status}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    #[error("request queue full")]
    Overloaded,

    #[error("client worker stopped")]
    ServiceClosed,
}
