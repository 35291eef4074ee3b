use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;
use url::Url;

use crate::config::AuthCodeConfig;
use crate::error::AuthError;
use crate::exchange::{AuthorizationCodeExchanger, TokenPair};
use crate::secret::SecretString;
use crate::store::{TokenStore, UserId};

/// Build the consent URL the user is sent to.
///
/// `state` is appended only when non-empty. Scopes are space-joined and
/// form-encoded, so `["s1", "s2"]` becomes `scope=s1+s2`.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the authorization endpoint is unusable.
pub fn build_auth_url(config: &AuthCodeConfig, state: Option<&str>) -> Result<Url, AuthError> {
    let mut url = config.auth_endpoint_url()?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("scope", &config.scope_param())
            .append_pair("access_type", config.access_type.as_str())
            .append_pair("approval_prompt", config.approval_prompt.as_str());
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            query.append_pair("state", state);
        }
    }
    Ok(url)
}

/// Query parameters of the provider's redirect back to `redirect_uri`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackInput {
    #[serde(default)]
    pub code: Option<SecretString>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl CallbackInput {
    /// Parse a raw query string. A leading `?` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnexpectedInput`] if the query cannot be decoded
    /// (e.g. a repeated `code` parameter).
    pub fn parse(raw_query: &str) -> Result<Self, AuthError> {
        let raw = raw_query.strip_prefix('?').unwrap_or(raw_query);
        serde_urlencoded::from_str(raw)
            .map_err(|e| AuthError::UnexpectedInput(format!("malformed callback query: {e}")))
    }
}

/// Drives the initial code-for-token exchange from the redirect callback.
#[derive(Clone)]
pub struct CallbackHandler {
    config: Arc<ArcSwap<AuthCodeConfig>>,
    exchanger: AuthorizationCodeExchanger,
    store: Arc<dyn TokenStore>,
}

impl CallbackHandler {
    pub(crate) fn new(
        config: Arc<ArcSwap<AuthCodeConfig>>,
        exchanger: AuthorizationCodeExchanger,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            exchanger,
            store,
        }
    }

    /// Handle the redirect callback and persist the resulting tokens for the
    /// configured user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ClientDenied`] when the callback carries `error`
    /// - [`AuthError::UnexpectedInput`] when it carries neither `error` nor a
    ///   non-empty `code`
    /// - any error of [`AuthorizationCodeExchanger::exchange_code`]
    /// - [`AuthError::Store`] if persisting fails
    pub async fn handle_callback(&self, raw_query: &str) -> Result<TokenPair, AuthError> {
        let input = CallbackInput::parse(raw_query)?;
        self.handle(input, None).await
    }

    /// Like [`handle_callback`](Self::handle_callback), but first require the
    /// `state` parameter to equal `expected_state`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnexpectedInput`] on a state mismatch, otherwise
    /// as [`handle_callback`](Self::handle_callback).
    pub async fn handle_callback_with_state(
        &self,
        raw_query: &str,
        expected_state: &str,
    ) -> Result<TokenPair, AuthError> {
        let input = CallbackInput::parse(raw_query)?;
        if input.error.is_none() && input.state.as_deref() != Some(expected_state) {
            tracing::warn!("callback state does not match the issued state");
            return Err(AuthError::UnexpectedInput("state mismatch".into()));
        }
        self.handle(input, None).await
    }

    /// Handle a callback for a specific user slot.
    ///
    /// # Errors
    ///
    /// As [`handle_callback`](Self::handle_callback).
    pub async fn handle_callback_for(
        &self,
        raw_query: &str,
        user: &UserId,
    ) -> Result<TokenPair, AuthError> {
        let input = CallbackInput::parse(raw_query)?;
        self.handle(input, Some(user)).await
    }

    async fn handle(
        &self,
        input: CallbackInput,
        explicit_user: Option<&UserId>,
    ) -> Result<TokenPair, AuthError> {
        if let Some(error) = input.error {
            tracing::info!(error = %error, "authorization denied at the provider");
            return Err(AuthError::ClientDenied {
                error,
                description: input.error_description,
            });
        }

        let code = match input.code {
            Some(code) if !code.is_empty() => code,
            _ => {
                return Err(AuthError::UnexpectedInput(
                    "callback carries neither code nor error".into(),
                ));
            }
        };

        let config = self.config.load_full();
        let user = config.resolve_user(explicit_user);
        let pair = self.exchanger.exchange_code(code.expose(), &config).await?;

        self.store
            .set_token(pair.access_token.clone(), user.as_ref())
            .await?;
        match (&pair.refresh_token, self.store.refresh_tokens()) {
            (Some(refresh), Some(refresh_store)) => {
                refresh_store
                    .set_refresh(refresh.clone(), user.as_ref())
                    .await?;
            }
            (Some(_), None) => {
                tracing::warn!(
                    user = ?user,
                    "provider returned a refresh token but the store cannot hold one; discarding it"
                );
            }
            (None, _) => {}
        }

        tracing::info!(
            user = ?user,
            has_refresh_token = pair.refresh_token.is_some(),
            "authorization code exchanged"
        );
        Ok(pair)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{AccessType, ApprovalPrompt};
    use crate::store::InMemoryTokenStore;
    use authkit_http::HttpClientConfig;
    use httpmock::prelude::*;

    fn sample_config() -> AuthCodeConfig {
        AuthCodeConfig::new("a", SecretString::new("s"), "http://x", ["s1", "s2"])
    }

    fn query_pairs(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn auth_url_carries_all_parameters() {
        let url = build_auth_url(&sample_config(), Some("xyz")).unwrap();
        let query = url.query().unwrap();

        assert!(url.as_str().starts_with(crate::config::GOOGLE_AUTH_ENDPOINT));
        for part in [
            "response_type=code",
            "client_id=a",
            "redirect_uri=http%3A%2F%2Fx",
            "scope=s1+s2",
            "state=xyz",
            "access_type=offline",
            "approval_prompt=auto",
        ] {
            assert!(query.contains(part), "missing {part} in {query}");
        }
    }

    #[test]
    fn auth_url_omits_empty_state() {
        let cfg = sample_config();
        for state in [None, Some("")] {
            let url = build_auth_url(&cfg, state).unwrap();
            assert!(query_pairs(&url).iter().all(|(k, _)| k != "state"));
        }
    }

    #[test]
    fn auth_url_reflects_access_type_and_prompt() {
        let mut cfg = sample_config();
        cfg.access_type = AccessType::Online;
        cfg.approval_prompt = ApprovalPrompt::Force;
        cfg.auth_endpoint = Some(Url::parse("https://idp.example.com/authorize").unwrap());

        let url = build_auth_url(&cfg, None).unwrap();
        let pairs = query_pairs(&url);
        assert_eq!(url.path(), "/authorize");
        assert!(pairs.contains(&("access_type".into(), "online".into())));
        assert!(pairs.contains(&("approval_prompt".into(), "force".into())));
    }

    #[test]
    fn callback_input_parses_leading_question_mark() {
        let input = CallbackInput::parse("?code=4%2F0Ab&state=st&scope=email").unwrap();
        assert_eq!(input.code.unwrap().expose(), "4/0Ab");
        assert_eq!(input.state.as_deref(), Some("st"));
        assert!(input.error.is_none());
    }

    #[test]
    fn callback_input_rejects_repeated_code() {
        let err = CallbackInput::parse("code=a&code=b").unwrap_err();
        assert!(matches!(err, AuthError::UnexpectedInput(_)));
    }

    fn handler(server: &MockServer, store: Arc<dyn TokenStore>) -> CallbackHandler {
        let mut cfg = sample_config();
        cfg.token_endpoint = Some(Url::parse(&server.url("/token")).unwrap());
        cfg.http_config = Some(HttpClientConfig::for_testing());
        let exchanger = AuthorizationCodeExchanger::new(&cfg).unwrap();
        CallbackHandler::new(Arc::new(ArcSwap::from_pointee(cfg)), exchanger, store)
    }

    #[tokio::test]
    async fn error_parameter_is_client_denied() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200);
        });

        let err = handler(&server, Arc::new(InMemoryTokenStore::new()))
            .handle_callback("error=access_denied")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ClientDenied { ref error, .. } if error == "access_denied"));
        token.assert_calls(0);
    }

    #[tokio::test]
    async fn empty_query_is_unexpected_input() {
        let server = MockServer::start();
        let h = handler(&server, Arc::new(InMemoryTokenStore::new()));
        for raw in ["", "?", "code=", "state=only"] {
            let err = h.handle_callback(raw).await.unwrap_err();
            assert!(matches!(err, AuthError::UnexpectedInput(_)), "{raw}: {err:?}");
        }
    }

    #[tokio::test]
    async fn code_is_exchanged_and_persisted() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=authorization_code")
                .body_includes("code=abc123");
            then.status(200).json_body(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3599,
                "token_type": "Bearer"
            }));
        });

        let store = Arc::new(InMemoryTokenStore::new());
        let pair = handler(&server, store.clone())
            .handle_callback("code=abc123")
            .await
            .unwrap();

        token.assert_calls(1);
        assert_eq!(pair.access_token.expose(), "at-1");
        assert_eq!(store.get_token(None).await.unwrap().unwrap().expose(), "at-1");
        let refresh = store.refresh_tokens().unwrap();
        assert_eq!(refresh.get_refresh(None).await.unwrap().unwrap().expose(), "rt-1");
    }

    #[tokio::test]
    async fn tokens_land_in_the_given_user_slot() {
        let server = MockServer::start();
        let _token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "at-alice", "refresh_token": "rt-alice"}));
        });

        let store = Arc::new(InMemoryTokenStore::new());
        let alice = UserId::new("alice");
        handler(&server, store.clone())
            .handle_callback_for("code=c", &alice)
            .await
            .unwrap();

        assert!(store.get_token(None).await.unwrap().is_none());
        assert_eq!(
            store.get_token(Some(&alice)).await.unwrap().unwrap().expose(),
            "at-alice"
        );

        let refresh = store.refresh_tokens().unwrap();
        assert_eq!(
            refresh.get_refresh(Some(&alice)).await.unwrap().unwrap().expose(),
            "rt-alice"
        );
        assert!(refresh.get_refresh(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected_before_exchange() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(serde_json::json!({"access_token": "at"}));
        });

        let err = handler(&server, Arc::new(InMemoryTokenStore::new()))
            .handle_callback_with_state("code=c&state=forged", "issued")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::UnexpectedInput(_)));
        token.assert_calls(0);
    }

    #[tokio::test]
    async fn refresh_token_is_dropped_for_access_only_store() {
        let server = MockServer::start();
        let _token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "at", "refresh_token": "rt"}));
        });

        let store = Arc::new(InMemoryTokenStore::access_only());
        let pair = handler(&server, store.clone())
            .handle_callback("code=c")
            .await
            .unwrap();

        assert!(pair.refresh_token.is_some());
        assert_eq!(store.get_token(None).await.unwrap().unwrap().expose(), "at");
    }
}
