use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use authkit_http::HttpError;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use tower::{Layer, Service};

use crate::interceptor::AuthInterceptor;

/// Tower layer that signs requests with the stored bearer token and
/// refreshes-and-replays once on 401.
///
/// Obtain one from [`AuthCodeClient::layer`](crate::AuthCodeClient::layer)
/// or install it on an HTTP client via
/// [`HttpClientBuilderExt::with_refresh_auth`](crate::HttpClientBuilderExt::with_refresh_auth).
#[derive(Clone)]
pub struct RefreshAuthLayer {
    interceptor: AuthInterceptor,
}

impl RefreshAuthLayer {
    #[must_use]
    pub fn new(interceptor: AuthInterceptor) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for RefreshAuthLayer {
    type Service = RefreshAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RefreshAuthService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Service produced by [`RefreshAuthLayer`].
#[derive(Clone)]
pub struct RefreshAuthService<S> {
    inner: S,
    interceptor: AuthInterceptor,
}

impl<S, ResBody> Service<Request<Full<Bytes>>> for RefreshAuthService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Clone-swap: the ready service goes into the future.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move { interceptor.execute(inner, req).await })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn layer_is_send_sync_clone() {
        fn assert_layer<T: Send + Sync + Clone>() {}
        fn assert_service<T: Send + Clone>() {}
        assert_layer::<RefreshAuthLayer>();
        assert_service::<RefreshAuthService<authkit_http::InnerService>>();
    }
}
