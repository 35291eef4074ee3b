use thiserror::Error;

use authkit_http::HttpError;

/// Errors produced by token storage backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("token store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("token store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A stored token cannot be used as a header value.
    #[error("stored token is not a valid header value")]
    InvalidToken,

    /// Backend-specific failure (database, session layer, ...).
    #[error("token store backend error: {0}")]
    Backend(String),
}

/// Errors returned by the authorization-code flow.
///
/// Variants never carry secret values or provider response bodies; transport
/// failures are flattened by [`format_http_error`](crate::http_error::format_http_error).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The user declined consent at the provider (`error=` on the callback).
    #[error("authorization denied by user: {error}")]
    ClientDenied {
        error: String,
        description: Option<String>,
    },

    /// The callback carried neither `code` nor `error`, or could not be parsed.
    #[error("unexpected callback input: {0}")]
    UnexpectedInput(String),

    /// A 401 was received and no refresh token is available; the user must
    /// authorize again.
    #[error("access token expired and no refresh token is available")]
    KeyExpired,

    /// The provider rejected the refresh token; the user must authorize again.
    #[error("refresh token rejected: {0}")]
    InvalidRefresh(String),

    /// The provider rejected the authorization code exchange.
    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token revocation failed: {0}")]
    RevokeFailed(String),

    /// The token endpoint returned a `token_type` that is not `Bearer`.
    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    #[error("OAuth2 config error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The internal HTTP client could not be built.
    #[error("{0}")]
    Http(String),
}

impl AuthError {
    /// Whether the caller has to send the user through consent again.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::KeyExpired | Self::InvalidRefresh(_))
    }
}

/// Recover an [`AuthError`] raised inside the refresh layer from the
/// transport error the client returned.
#[must_use]
pub fn auth_error(err: &HttpError) -> Option<&AuthError> {
    match err {
        HttpError::Transport(source) => source.downcast_ref::<AuthError>(),
        _ => None,
    }
}
