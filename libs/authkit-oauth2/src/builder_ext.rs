use tower::ServiceExt;

use crate::interceptor::AuthInterceptor;
use crate::layer::RefreshAuthLayer;

/// Extension trait for adding refresh-and-retry bearer auth to
/// [`authkit_http::HttpClientBuilder`].
///
/// ```ignore
/// use authkit_oauth2::HttpClientBuilderExt;
///
/// let api = HttpClientBuilder::new()
///     .with_refresh_auth(auth_client.interceptor())
///     .build()?;
/// ```
pub trait HttpClientBuilderExt {
    #[must_use]
    fn with_refresh_auth(self, interceptor: AuthInterceptor) -> Self;
}

impl HttpClientBuilderExt for authkit_http::HttpClientBuilder {
    fn with_refresh_auth(self, interceptor: AuthInterceptor) -> Self {
        let layer = RefreshAuthLayer::new(interceptor);
        self.with_auth_layer(move |svc| {
            tower::ServiceBuilder::new()
                .layer(layer)
                .service(svc)
                .boxed_clone()
        })
    }
}
