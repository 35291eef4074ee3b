use std::sync::Arc;

use arc_swap::ArcSwap;
use authkit_http::HttpError;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use tokio::sync::Mutex;
use tower::{Service, ServiceExt};
use zeroize::Zeroizing;

use crate::config::AuthCodeConfig;
use crate::error::{AuthError, StoreError};
use crate::exchange::AuthorizationCodeExchanger;
use crate::secret::SecretString;
use crate::store::{RefreshTokenStore, TokenStore, UserId};

/// Signs outgoing requests and recovers from expired access tokens.
///
/// Per request: attach the stored bearer token and send. A non-401 response
/// is returned as is. On 401 the access token is refreshed with the stored
/// refresh token, persisted, and the request is replayed exactly once; the
/// replayed response is returned whatever its status.
///
/// Refreshes are serialized per user. A request that waited on another
/// request's refresh and sees a different stored token than the one it sent
/// replays with that token instead of refreshing again.
#[derive(Clone)]
pub struct AuthInterceptor {
    config: Arc<ArcSwap<AuthCodeConfig>>,
    store: Arc<dyn TokenStore>,
    exchanger: AuthorizationCodeExchanger,
    refresh_locks: Arc<DashMap<Option<UserId>, Arc<Mutex<()>>>>,
}

impl AuthInterceptor {
    pub(crate) fn new(
        config: Arc<ArcSwap<AuthCodeConfig>>,
        store: Arc<dyn TokenStore>,
        exchanger: AuthorizationCodeExchanger,
    ) -> Self {
        Self {
            config,
            store,
            exchanger,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// The user whose tokens sign `req`.
    #[must_use]
    pub fn resolve_user<B>(&self, req: &Request<B>) -> Option<UserId> {
        self.config
            .load()
            .resolve_user(req.extensions().get::<UserId>())
    }

    /// Set `Authorization: Bearer <token>` from the store, replacing any
    /// existing value. Leaves the request unsigned when no token is stored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the store fails or holds a token that
    /// is not a valid header value.
    pub async fn before_send<B>(&self, req: &mut Request<B>) -> Result<(), AuthError> {
        let user = self.resolve_user(req);
        self.attach(req, user.as_ref()).await.map(|_| ())
    }

    async fn attach<B>(
        &self,
        req: &mut Request<B>,
        user: Option<&UserId>,
    ) -> Result<Option<SecretString>, AuthError> {
        let Some(token) = self.store.get_token(user).await? else {
            tracing::debug!(user = ?user, "no access token stored; sending request unsigned");
            return Ok(None);
        };

        let raw = Zeroizing::new(format!("Bearer {}", token.expose()));
        let mut value = HeaderValue::from_str(&raw).map_err(|_| StoreError::InvalidToken)?;
        value.set_sensitive(true);
        req.headers_mut().insert(AUTHORIZATION, value);
        Ok(Some(token))
    }

    /// Refresh the access token for `user` after a 401.
    ///
    /// `sent` is the token the rejected request carried.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyExpired`] if the store has no refresh capability or
    ///   no refresh token for `user`
    /// - [`AuthError::InvalidRefresh`] if the provider rejects the refresh
    /// - [`AuthError::Store`] if persisting fails
    pub async fn on_unauthorized(
        &self,
        user: Option<&UserId>,
        sent: Option<&SecretString>,
    ) -> Result<(), AuthError> {
        let Some(refresh_store) = self.store.refresh_tokens() else {
            tracing::debug!(user = ?user, "401 and store has no refresh capability");
            return Err(AuthError::KeyExpired);
        };

        let key = user.cloned();
        let lock = self.refresh_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.refresh_serialized(refresh_store, user, sent).await
        };
        drop(lock);
        // Entries are cloned only under the shard lock, so a count of one
        // means no task is waiting on this user's lock.
        self.refresh_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn refresh_serialized(
        &self,
        refresh_store: &dyn RefreshTokenStore,
        user: Option<&UserId>,
        sent: Option<&SecretString>,
    ) -> Result<(), AuthError> {
        let current = self.store.get_token(user).await?;
        if current.is_some() && current.as_ref() != sent {
            tracing::debug!(user = ?user, "access token already refreshed by a concurrent request");
            return Ok(());
        }

        let Some(refresh_token) = refresh_store
            .get_refresh(user)
            .await?
            .filter(|t| !t.is_empty())
        else {
            tracing::debug!(user = ?user, "401 and no refresh token stored");
            return Err(AuthError::KeyExpired);
        };

        tracing::debug!(user = ?user, "refreshing access token");
        let config = self.config.load_full();
        let pair = self
            .exchanger
            .exchange_refresh(&refresh_token, &config)
            .await
            .inspect_err(|e| tracing::warn!(user = ?user, error = %e, "token refresh failed"))?;

        self.store.set_token(pair.access_token, user).await?;
        if let Some(rotated) = pair.refresh_token {
            refresh_store.set_refresh(rotated, user).await?;
        }

        tracing::info!(user = ?user, "access token refreshed");
        Ok(())
    }

    /// Send `req` through `inner`, refreshing and replaying once on 401.
    pub(crate) async fn execute<S, ResBody>(
        &self,
        mut inner: S,
        mut req: Request<Full<Bytes>>,
    ) -> Result<Response<ResBody>, HttpError>
    where
        S: Service<Request<Full<Bytes>>, Response = Response<ResBody>, Error = HttpError>,
    {
        let user = self.resolve_user(&req);
        let sent = self
            .attach(&mut req, user.as_ref())
            .await
            .map_err(into_http_error)?;
        let replay = clone_request(&req);

        let response = inner.ready().await?.call(req).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        drop(response);

        self.on_unauthorized(user.as_ref(), sent.as_ref())
            .await
            .map_err(into_http_error)?;

        let mut replay = replay;
        self.attach(&mut replay, user.as_ref())
            .await
            .map_err(into_http_error)?;

        let response = inner.ready().await?.call(replay).await?;
        tracing::debug!(
            user = ?user,
            status = %response.status(),
            "replayed request after token refresh"
        );
        Ok(response)
    }
}

/// Carry an [`AuthError`] through the transport error type.
fn into_http_error(err: AuthError) -> HttpError {
    HttpError::Transport(Box::new(err))
}

/// `http::Request` is not `Clone`; `Full<Bytes>` bodies and extensions are.
fn clone_request(req: &Request<Full<Bytes>>) -> Request<Full<Bytes>> {
    let mut clone = Request::new(req.body().clone());
    *clone.method_mut() = req.method().clone();
    *clone.uri_mut() = req.uri().clone();
    *clone.version_mut() = req.version();
    *clone.headers_mut() = req.headers().clone();
    *clone.extensions_mut() = req.extensions().clone();
    clone
}
