use crate::config::{HttpClientConfig, TransportSecurity};
use crate::error::HttpError;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};

/// Type-erased inner service handed to an auth layer in
/// [`HttpClientBuilder::with_auth_layer`].
pub type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

/// Assembles an [`HttpClient`](crate::HttpClient):
/// `Buffer → [auth layer] → Timeout → hyper`.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    auth_layer: Option<Box<dyn FnOnce(InnerService) -> InnerService + Send>>,
}

impl HttpClientBuilder {
    /// Builder over the API preset ([`HttpClientConfig::default`]).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            auth_layer: None,
        }
    }

    /// Accept `http://` URLs. Compiled into debug builds, or release builds
    /// with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Wrap the timed transport with an auth layer.
    ///
    /// The layer sits inside the buffer, so it sees every request and every
    /// response and may send a request more than once. A second call replaces
    /// the first layer.
    #[must_use]
    pub fn with_auth_layer(
        mut self,
        wrap: impl FnOnce(InnerService) -> InnerService + Send + 'static,
    ) -> Self {
        self.auth_layer = Some(Box::new(wrap));
        self
    }

    /// Must run inside a Tokio runtime: the request buffer spawns its worker.
    ///
    /// # Errors
    /// [`HttpError::Tls`] when no root store can be loaded, or
    /// [`HttpError::InvalidHeader`] for an unusable user agent.
    pub fn build(self) -> Result<crate::HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                target: "authkit_http::security",
                "plain http:// allowed; credentials may be sent unencrypted"
            );
        }

        let timeout = self.config.request_timeout;
        let user_agent = http::HeaderValue::from_str(&self.config.user_agent).map_err(|_| {
            HttpError::InvalidHeader {
                name: "user-agent".to_owned(),
            }
        })?;
        let https = build_https_connector(self.config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle_timeout) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        // HTTP statuses are never errors at this level.
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        let mut boxed_service: InnerService = service.boxed_clone();

        if let Some(wrap) = self.auth_layer {
            boxed_service = wrap(boxed_service);
        }

        let buffered_service: crate::client::BufferedService =
            Buffer::new(boxed_service, self.config.buffer_capacity.max(1));

        Ok(crate::HttpClient {
            service: buffered_service,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
            user_agent,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Build the HTTPS connector with webpki roots.
///
/// Uses the process-wide rustls crypto provider when one is installed,
/// otherwise a private aws-lc-rs provider (no global state mutation).
fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(provider)
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
