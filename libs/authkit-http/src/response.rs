use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Upper bound on the body kept in `HttpStatus` previews.
const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Response returned by [`RequestBuilder::send`](crate::RequestBuilder::send).
///
/// `json` and `text` check the status first; `bytes` does not. Every read is
/// capped at the client's `max_body_size`.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Check status and return error for non-2xx responses
    ///
    /// Does NOT read the response body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` if the response status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }

        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            body_preview: String::new(),
            content_type: content_type(self.inner.headers()),
        })
    }

    /// Read response body as bytes without status check
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if body exceeds limit.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Parse response body as JSON with status check
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if status is not 2xx.
    /// Returns `HttpError::BodyTooLarge` if body exceeds limit.
    /// Returns `HttpError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body_bytes = checked_body(self.inner, self.max_body_size).await?;
        let value = serde_json::from_slice(&body_bytes)?;
        Ok(value)
    }

    /// Read response body as text (UTF-8, lossy) with status check
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if status is not 2xx.
    /// Returns `HttpError::BodyTooLarge` if body exceeds limit.
    pub async fn text(self) -> Result<String, HttpError> {
        let body_bytes = checked_body(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body_bytes).into_owned())
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Bytes, HttpError> {
    let status = response.status();
    if !status.is_success() {
        let content_type = content_type(response.headers());
        let preview_limit = max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = match read_body_limited(response, preview_limit).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
            Err(e) => return Err(e),
        };

        return Err(HttpError::HttpStatus {
            status,
            body_preview,
            content_type,
        });
    }

    read_body_limited(response, max_body_size).await
}

async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let (_parts, body) = response.into_parts();

    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response(status: StatusCode, body: &'static str) -> HttpResponse {
        let body: ResponseBody = Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|never| match never {})
            .boxed();
        HttpResponse {
            inner: Response::builder().status(status).body(body).unwrap(),
            max_body_size: 16,
        }
    }

    #[tokio::test]
    async fn json_reads_success_body() {
        let value: serde_json::Value = response(StatusCode::OK, r#"{"a":1}"#)
            .json()
            .await
            .unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn text_reports_status_with_preview() {
        let err = response(StatusCode::BAD_REQUEST, "bad grant")
            .text()
            .await
            .unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                ..
            } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body_preview, "bad grant");
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bytes_enforces_limit() {
        let err = response(StatusCode::OK, "this body is longer than sixteen")
            .bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 16, .. }));
    }

    #[test]
    fn error_for_status_passes_success() {
        assert!(response(StatusCode::NO_CONTENT, "").error_for_status().is_ok());
        assert!(
            response(StatusCode::UNAUTHORIZED, "")
                .error_for_status()
                .is_err()
        );
    }
}
