use std::sync::Arc;

use arc_swap::ArcSwap;
use authkit_http::{HttpClient, HttpClientBuilder};
use url::Url;

use crate::builder_ext::HttpClientBuilderExt;
use crate::callback::{CallbackHandler, build_auth_url};
use crate::config::AuthCodeConfig;
use crate::error::AuthError;
use crate::exchange::{AuthorizationCodeExchanger, TokenPair};
use crate::http_error::format_http_error;
use crate::interceptor::AuthInterceptor;
use crate::layer::RefreshAuthLayer;
use crate::store::{TokenStore, UserId};

/// Entry point for the authorization-code flow.
///
/// Owns the configuration (swappable through
/// [`update_config`](Self::update_config)), the token store handle and the
/// token-endpoint client. Interceptors, layers and callback handlers handed
/// out by this client share the same configuration.
///
/// ```ignore
/// let auth = AuthCodeClient::new(config, Arc::new(FileTokenStore::new("tokens.json")))?;
/// println!("visit {}", auth.authorization_url(Some("csrf-state"))?);
/// auth.handle_callback(&raw_query).await?;
///
/// let api = auth.api_client(HttpClientBuilder::new())?;
/// let events = api.get("https://www.googleapis.com/calendar/v3/users/me/calendarList")
///     .send()
///     .await?;
/// ```
pub struct AuthCodeClient {
    config: Arc<ArcSwap<AuthCodeConfig>>,
    store: Arc<dyn TokenStore>,
    exchanger: AuthorizationCodeExchanger,
    interceptor: AuthInterceptor,
}

impl AuthCodeClient {
    /// Validate `config` and build the client.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] if a required field is missing or blank
    /// - [`AuthError::Http`] if the token-endpoint client fails to build
    pub fn new(config: AuthCodeConfig, store: Arc<dyn TokenStore>) -> Result<Self, AuthError> {
        let config = config.into_validated()?;
        let exchanger = AuthorizationCodeExchanger::new(&config)?;
        let config = Arc::new(ArcSwap::from_pointee(config));
        let interceptor = AuthInterceptor::new(config.clone(), store.clone(), exchanger.clone());

        Ok(Self {
            config,
            store,
            exchanger,
            interceptor,
        })
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<AuthCodeConfig> {
        self.config.load_full()
    }

    /// Apply `update` to a copy of the configuration, validate it and swap it
    /// in. In-flight requests keep the snapshot they started with.
    ///
    /// `http_config` is only read at construction; changing it here has no
    /// effect on the token-endpoint client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] and leaves the current configuration in
    /// place if the updated one is invalid.
    pub fn update_config(
        &self,
        update: impl FnOnce(&mut AuthCodeConfig),
    ) -> Result<(), AuthError> {
        let mut next = (*self.config.load_full()).clone();
        update(&mut next);
        let next = next.into_validated()?;
        self.config.store(Arc::new(next));
        tracing::debug!("authorization-code config updated");
        Ok(())
    }

    /// Consent URL for the current configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the authorization endpoint is unusable.
    pub fn authorization_url(&self, state: Option<&str>) -> Result<Url, AuthError> {
        build_auth_url(&self.config.load(), state)
    }

    /// Exchange the code in a redirect callback and persist the tokens.
    ///
    /// # Errors
    ///
    /// See [`CallbackHandler::handle_callback`].
    pub async fn handle_callback(&self, raw_query: &str) -> Result<TokenPair, AuthError> {
        self.callback_handler().handle_callback(raw_query).await
    }

    #[must_use]
    pub fn callback_handler(&self) -> CallbackHandler {
        CallbackHandler::new(
            self.config.clone(),
            self.exchanger.clone(),
            self.store.clone(),
        )
    }

    #[must_use]
    pub fn interceptor(&self) -> AuthInterceptor {
        self.interceptor.clone()
    }

    #[must_use]
    pub fn layer(&self) -> RefreshAuthLayer {
        RefreshAuthLayer::new(self.interceptor.clone())
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Build an API client whose requests go through this client's
    /// refresh-and-retry layer.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client fails to build.
    pub fn api_client(&self, builder: HttpClientBuilder) -> Result<HttpClient, AuthError> {
        builder
            .with_refresh_auth(self.interceptor())
            .build()
            .map_err(|e| AuthError::Http(format_http_error(&e, "API client")))
    }

    /// Revoke the configured user's grant at the provider.
    ///
    /// Revokes the stored refresh token when there is one (which also
    /// invalidates access tokens issued from it), otherwise the stored access
    /// token. Returns `false` when nothing was stored. Local token slots are
    /// not cleared.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RevokeFailed`] if the provider rejects the request
    /// - [`AuthError::Store`] if reading the store fails
    pub async fn revoke(&self) -> Result<bool, AuthError> {
        let user = self.config.load().resolve_user(None);
        self.revoke_user(user.as_ref()).await
    }

    /// [`revoke`](Self::revoke) for a specific user slot.
    ///
    /// # Errors
    ///
    /// As [`revoke`](Self::revoke).
    pub async fn revoke_for(&self, user: &UserId) -> Result<bool, AuthError> {
        self.revoke_user(Some(user)).await
    }

    async fn revoke_user(&self, user: Option<&UserId>) -> Result<bool, AuthError> {
        let refresh = match self.store.refresh_tokens() {
            Some(refresh_store) => refresh_store.get_refresh(user).await?,
            None => None,
        };
        let token = match refresh {
            Some(token) => Some(token),
            None => self.store.get_token(user).await?,
        };

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::debug!(user = ?user, "nothing to revoke");
            return Ok(false);
        };

        let config = self.config.load_full();
        self.exchanger.revoke(&token, &config).await?;
        Ok(true)
    }
}
