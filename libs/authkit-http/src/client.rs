use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use tower::Service;
use tower::buffer::Buffer;

pub(crate) type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

pub(crate) type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Handle to a buffered tower stack over a pooled hyper client.
///
/// Clones share the same stack and connection pool. Built by
/// [`HttpClientBuilder`](crate::HttpClientBuilder).
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
    pub(crate) user_agent: http::HeaderValue,
}

impl HttpClient {
    /// Request with an arbitrary method. `url` must be absolute, with any
    /// query already encoded.
    fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            self.transport_security,
            self.user_agent.clone(),
            method,
            url.to_owned(),
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    /// ```ignore
    /// let resp = client
    ///     .post("https://oauth2.googleapis.com/token")
    ///     .form(&[("grant_type", "refresh_token")])?
    ///     .send()
    ///     .await?;
    /// ```
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }
}

/// `Buffer` hands back the inner error boxed; anything that is not an
/// `HttpError` means the worker is gone.
pub(crate) fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Reserve a queue slot without waiting; a full queue is `Overloaded`.
pub(crate) async fn try_acquire_buffer_slot(
    service: &mut BufferedService,
) -> Result<(), HttpError> {
    use std::task::Poll;

    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}
