use std::time::Duration;

/// `User-Agent` sent when the caller sets none.
pub const DEFAULT_USER_AGENT: &str = concat!("authkit-http/", env!("CARGO_PKG_VERSION"));

/// Which URL schemes a client accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    #[default]
    TlsOnly,
    /// Also accept `http://`. Bearer tokens then travel in clear text, so
    /// this is for local mock providers only.
    AllowInsecureHttp,
}

/// Settings for one [`HttpClient`](crate::HttpClient).
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Applied to each attempt separately; a refresh-and-replay cycle can take
    /// up to three times this.
    pub request_timeout: Duration,
    pub max_body_size: usize,
    pub user_agent: String,
    pub transport: TransportSecurity,
    /// Requests queued in front of the connection pool before `send` fails
    /// with [`HttpError::Overloaded`](crate::HttpError::Overloaded).
    pub buffer_capacity: usize,
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    /// Preset for API traffic.
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 << 20,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Preset for the provider's token and revoke endpoints: small JSON
    /// bodies and a handful of connections.
    #[must_use]
    pub fn token_endpoint() -> Self {
        Self {
            max_body_size: 1 << 20,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(60)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }

    /// Token-endpoint preset that also accepts `http://`, for mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            ..Self::token_endpoint()
        }
    }
}
