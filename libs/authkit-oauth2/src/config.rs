use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::error::AuthError;
use crate::secret::SecretString;
use crate::store::UserId;

/// Google's authorization endpoint, used when `auth_endpoint` is unset.
pub const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
/// Google's token endpoint, used when `token_endpoint` is unset.
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/token";
/// Google's revocation endpoint, used when `revoke_endpoint` is unset.
pub const GOOGLE_REVOKE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/revoke";

/// Resolves the user whose tokens a request should use when the request
/// itself carries no [`UserId`] extension.
pub type UserIdResolver = Arc<dyn Fn() -> Option<UserId> + Send + Sync>;

/// Whether the provider should issue a refresh token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Online,
    /// Request a refresh token alongside the access token.
    #[default]
    Offline,
}

impl AccessType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Whether the consent screen is shown again for already-approved scopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPrompt {
    #[default]
    Auto,
    /// Always prompt; Google only re-issues a refresh token in this mode.
    Force,
}

impl ApprovalPrompt {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Force => "force",
        }
    }
}

/// Configuration for an authorization-code client.
///
/// `client_id`, `client_secret`, `redirect_uri` and at least one scope are
/// required; [`validate`](Self::validate) enforces this and every
/// constructor that accepts a config calls it.
///
/// Endpoints left as `None` fall back to Google's `accounts.google.com`
/// endpoints. `Debug` redacts [`client_secret`](Self::client_secret).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuthCodeConfig {
    pub client_id: String,

    pub client_secret: SecretString,

    /// Absolute URL the provider redirects to after consent.
    pub redirect_uri: String,

    /// Requested scopes. Blank entries and duplicates are removed on
    /// validation; first occurrence wins.
    #[serde(alias = "scope")]
    pub scopes: Vec<String>,

    pub access_type: AccessType,

    pub approval_prompt: ApprovalPrompt,

    /// Static user id, consulted after the request extension and the resolver.
    pub user_id: Option<UserId>,

    #[serde(skip)]
    pub user_id_resolver: Option<UserIdResolver>,

    pub auth_endpoint: Option<Url>,

    pub token_endpoint: Option<Url>,

    pub revoke_endpoint: Option<Url>,

    /// Override for the internal token-endpoint HTTP client. When `None`,
    /// [`HttpClientConfig::token_endpoint()`](authkit_http::HttpClientConfig::token_endpoint)
    /// is used.
    #[serde(skip)]
    pub http_config: Option<authkit_http::HttpClientConfig>,
}

impl AuthCodeConfig {
    /// Build a config with the required fields and defaults for the rest.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        redirect_uri: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check required fields and endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id must not be empty".into()));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::Config("client_secret must not be empty".into()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(AuthError::Config("redirect_uri must not be empty".into()));
        }
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::Config(format!("redirect_uri is not an absolute URL: {e}"))
        })?;
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(AuthError::Config("at least one scope is required".into()));
        }
        if let Some(user) = &self.user_id
            && user.as_str().is_empty()
        {
            return Err(AuthError::Config("user_id must not be empty".into()));
        }
        Ok(())
    }

    /// Validate and normalize scopes in one step.
    pub(crate) fn into_validated(mut self) -> Result<Self, AuthError> {
        self.validate()?;
        self.scopes = normalize_scopes(&self.scopes);
        Ok(self)
    }

    /// Pick the token slot for a request: an explicit id wins, then the
    /// resolver, then the static `user_id`.
    #[must_use]
    pub fn resolve_user(&self, explicit: Option<&UserId>) -> Option<UserId> {
        if let Some(user) = explicit {
            return Some(user.clone());
        }
        if let Some(resolver) = &self.user_id_resolver
            && let Some(user) = resolver()
        {
            return Some(user);
        }
        self.user_id.clone()
    }

    /// Space-joined scope list as sent to the authorization endpoint.
    #[must_use]
    pub fn scope_param(&self) -> String {
        normalize_scopes(&self.scopes).join(" ")
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the built-in default fails to parse.
    pub fn auth_endpoint_url(&self) -> Result<Url, AuthError> {
        endpoint_or_default(self.auth_endpoint.as_ref(), GOOGLE_AUTH_ENDPOINT)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the built-in default fails to parse.
    pub fn token_endpoint_url(&self) -> Result<Url, AuthError> {
        endpoint_or_default(self.token_endpoint.as_ref(), GOOGLE_TOKEN_ENDPOINT)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the built-in default fails to parse.
    pub fn revoke_endpoint_url(&self) -> Result<Url, AuthError> {
        endpoint_or_default(self.revoke_endpoint.as_ref(), GOOGLE_REVOKE_ENDPOINT)
    }
}

fn endpoint_or_default(endpoint: Option<&Url>, default: &str) -> Result<Url, AuthError> {
    match endpoint {
        Some(url) => Ok(url.clone()),
        None => Url::parse(default)
            .map_err(|e| AuthError::Config(format!("invalid default endpoint {default}: {e}"))),
    }
}

fn normalize_scopes(scopes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let scope = scope.trim();
        if !scope.is_empty() && !out.iter().any(|s| s == scope) {
            out.push(scope.to_owned());
        }
    }
    out
}

impl Default for AuthCodeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: SecretString::default(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            access_type: AccessType::default(),
            approval_prompt: ApprovalPrompt::default(),
            user_id: None,
            user_id_resolver: None,
            auth_endpoint: None,
            token_endpoint: None,
            revoke_endpoint: None,
            http_config: None,
        }
    }
}

impl fmt::Debug for AuthCodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCodeConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("access_type", &self.access_type)
            .field("approval_prompt", &self.approval_prompt)
            .field("user_id", &self.user_id)
            .field("user_id_resolver", &self.user_id_resolver.is_some())
            .field("auth_endpoint", &self.auth_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("revoke_endpoint", &self.revoke_endpoint)
            .field("http_config", &self.http_config)
            .finish()
    }
}
