use authkit_http::HttpError;

/// Format an [`HttpError`] into a message with a context prefix
/// (e.g. `"token exchange"`, `"token refresh"`).
///
/// `HttpStatus` errors render the status code only; the provider's response
/// body is never included.
#[must_use]
pub fn format_http_error(e: &HttpError, prefix: &str) -> String {
    match e {
        HttpError::HttpStatus { status, .. } => format!("{prefix} HTTP {status}"),
        HttpError::Json(err) => format!("{prefix} JSON parse failed: {err}"),
        HttpError::Timeout(duration) => {
            format!("{prefix} request timed out after {duration:?}")
        }
        HttpError::Transport(err) => format!("{prefix} transport error: {err}"),
        HttpError::BodyTooLarge { limit, actual } => {
            format!("{prefix} response too large: limit {limit} bytes, got {actual} bytes")
        }
        HttpError::Tls(err) => format!("{prefix} TLS error: {err}"),
        HttpError::Request(err) => format!("{prefix} request build failed: {err}"),
        HttpError::InvalidHeader { name } => format!("{prefix} invalid header {name}"),
        HttpError::FormEncode(err) => format!("{prefix} form encode error: {err}"),
        HttpError::Overloaded => format!("{prefix} request rejected: client overloaded"),
        HttpError::ServiceClosed => format!("{prefix} client unavailable"),
        HttpError::InvalidUrl { url, reason } => {
            format!("{prefix} invalid URL '{url}': {reason}")
        }
        HttpError::InvalidScheme { scheme, reason } => {
            format!("{prefix} invalid scheme '{scheme}': {reason}")
        }
        _ => format!("{prefix} request failed"),
    }
}
