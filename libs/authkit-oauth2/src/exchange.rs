use std::time::Duration;

use authkit_http::{HttpClient, HttpClientBuilder, HttpClientConfig};
use serde::Deserialize;
use url::Url;

use crate::config::AuthCodeConfig;
use crate::error::AuthError;
use crate::http_error::format_http_error;
use crate::secret::SecretString;

/// Tokens returned by the token endpoint.
///
/// `refresh_token` is only present on the initial exchange (and on refreshes
/// where the provider rotates it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_in: Option<Duration>,
}

/// Raw token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: SecretString,
    #[serde(default)]
    refresh_token: Option<SecretString>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Talks to the token and revocation endpoints.
///
/// Endpoints and client credentials are read from the [`AuthCodeConfig`]
/// passed to each call so a config swap takes effect on the next request.
#[derive(Clone)]
pub struct AuthorizationCodeExchanger {
    client: HttpClient,
}

impl AuthorizationCodeExchanger {
    /// Build an exchanger with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client fails to build.
    pub fn new(config: &AuthCodeConfig) -> Result<Self, AuthError> {
        let http_config = config
            .http_config
            .clone()
            .unwrap_or_else(HttpClientConfig::token_endpoint);

        let client = HttpClientBuilder::with_config(http_config)
            .build()
            .map_err(|e| AuthError::Http(format_http_error(&e, "token client")))?;

        Ok(Self { client })
    }

    /// Use an existing client. It must not carry the refresh layer itself.
    #[must_use]
    pub fn with_client(client: HttpClient) -> Self {
        Self { client }
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ExchangeFailed`] on transport failure, non-2xx status
    ///   or a malformed body
    /// - [`AuthError::UnsupportedTokenType`] for a non-bearer token
    pub async fn exchange_code(
        &self,
        code: &str,
        config: &AuthCodeConfig,
    ) -> Result<TokenPair, AuthError> {
        let fields = [
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.expose()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        self.post_token(
            &config.token_endpoint_url()?,
            &fields,
            "token exchange",
            AuthError::ExchangeFailed,
        )
        .await
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRefresh`] on any transport or provider failure
    /// - [`AuthError::UnsupportedTokenType`] for a non-bearer token
    pub async fn exchange_refresh(
        &self,
        refresh_token: &SecretString,
        config: &AuthCodeConfig,
    ) -> Result<TokenPair, AuthError> {
        let fields = [
            ("refresh_token", refresh_token.expose()),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.expose()),
            ("grant_type", "refresh_token"),
        ];

        self.post_token(
            &config.token_endpoint_url()?,
            &fields,
            "token refresh",
            AuthError::InvalidRefresh,
        )
        .await
    }

    /// Revoke an access or refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RevokeFailed`] on transport failure or non-2xx.
    pub async fn revoke(
        &self,
        token: &SecretString,
        config: &AuthCodeConfig,
    ) -> Result<(), AuthError> {
        let endpoint = config.revoke_endpoint_url()?;
        let fail = |e: &authkit_http::HttpError| {
            AuthError::RevokeFailed(format_http_error(e, "token revocation"))
        };

        self.client
            .post(endpoint.as_str())
            .form(&[("token", token.expose())])
            .map_err(|e| fail(&e))?
            .send()
            .await
            .map_err(|e| fail(&e))?
            .error_for_status()
            .map_err(|e| fail(&e))?;

        tracing::info!(endpoint = %endpoint, "token revoked");
        Ok(())
    }

    async fn post_token(
        &self,
        endpoint: &Url,
        fields: &[(&str, &str)],
        context: &str,
        fail: fn(String) -> AuthError,
    ) -> Result<TokenPair, AuthError> {
        tracing::debug!(endpoint = %endpoint, context, "requesting tokens");

        let resp: TokenResponse = self
            .client
            .post(endpoint.as_str())
            .form(fields)
            .map_err(|e| fail(format_http_error(&e, context)))?
            .send()
            .await
            .map_err(|e| fail(format_http_error(&e, context)))?
            .error_for_status()
            .map_err(|e| fail(format_http_error(&e, context)))?
            .json()
            .await
            .map_err(|e| fail(format_http_error(&e, context)))?;

        if let Some(ref tt) = resp.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(AuthError::UnsupportedTokenType(tt.clone()));
        }

        if resp.access_token.is_empty() {
            return Err(fail(format!("{context} returned an empty access_token")));
        }

        Ok(TokenPair {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
            expires_in: resp.expires_in.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config(server: &MockServer) -> AuthCodeConfig {
        let mut cfg = AuthCodeConfig::new(
            "cid",
            SecretString::new("csecret"),
            "http://localhost/cb",
            ["s1"],
        );
        cfg.token_endpoint = Some(Url::parse(&server.url("/token")).unwrap());
        cfg.revoke_endpoint = Some(Url::parse(&server.url("/revoke")).unwrap());
        cfg.http_config = Some(HttpClientConfig::for_testing());
        cfg
    }

    #[tokio::test]
    async fn exchange_code_posts_authorization_code_grant() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("code=abc123")
                .body_includes("client_id=cid")
                .body_includes("client_secret=csecret")
                .body_includes("redirect_uri=http%3A%2F%2Flocalhost%2Fcb")
                .body_includes("grant_type=authorization_code");
            then.status(200).json_body(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "token_type": "Bearer"
            }));
        });

        let cfg = config(&server);
        let pair = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .exchange_code("abc123", &cfg)
            .await
            .unwrap();

        m.assert();
        assert_eq!(pair.access_token.expose(), "at-1");
        assert_eq!(pair.refresh_token.unwrap().expose(), "rt-1");
        assert_eq!(pair.expires_in, Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn exchange_code_rejection_is_exchange_failed_without_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400)
                .json_body(serde_json::json!({"error": "invalid_grant", "hint": "secret-detail"}));
        });

        let cfg = config(&server);
        let err = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .exchange_code("bad", &cfg)
            .await
            .unwrap_err();

        match err {
            AuthError::ExchangeFailed(msg) => {
                assert!(msg.contains("400"), "{msg}");
                assert!(!msg.contains("secret-detail"), "{msg}");
            }
            other => panic!("expected ExchangeFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_refresh_posts_refresh_grant() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("refresh_token=rt-1")
                .body_includes("client_id=cid")
                .body_includes("client_secret=csecret")
                .body_includes("grant_type=refresh_token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "at-2", "token_type": "bearer"}));
        });

        let cfg = config(&server);
        let pair = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .exchange_refresh(&SecretString::new("rt-1"), &cfg)
            .await
            .unwrap();

        m.assert();
        assert_eq!(pair.access_token.expose(), "at-2");
        assert!(pair.refresh_token.is_none());
        assert!(pair.expires_in.is_none());
    }

    #[tokio::test]
    async fn refresh_rejection_is_invalid_refresh() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body(serde_json::json!({"error": "invalid_grant"}));
        });

        let cfg = config(&server);
        let err = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .exchange_refresh(&SecretString::new("stale"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefresh(_)), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_refresh() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body("not json");
        });

        let cfg = config(&server);
        let err = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .exchange_refresh(&SecretString::new("rt"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefresh(_)), "{err:?}");
    }

    #[tokio::test]
    async fn non_bearer_token_type_is_rejected() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "mac", "token_type": "MAC"}));
        });

        let cfg = config(&server);
        let err = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .exchange_code("code", &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedTokenType(t) if t == "MAC"));
    }

    #[tokio::test]
    async fn revoke_posts_token() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/revoke")
                .body_includes("token=rt-1");
            then.status(200);
        });

        let cfg = config(&server);
        AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .revoke(&SecretString::new("rt-1"), &cfg)
            .await
            .unwrap();
        m.assert();
    }

    #[tokio::test]
    async fn revoke_failure_is_reported() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/revoke");
            then.status(400);
        });

        let cfg = config(&server);
        let err = AuthorizationCodeExchanger::new(&cfg)
            .unwrap()
            .revoke(&SecretString::new("gone"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RevokeFailed(msg) if msg.contains("400")));
    }
}
