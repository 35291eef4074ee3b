#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `OAuth2` authorization-code client.
//!
//! Signs outbound requests with a stored bearer token, refreshes the token
//! when a request comes back 401 and replays that request once. Also builds
//! the consent URL, handles the redirect callback and revokes grants.
//!
//! Tokens live behind the [`TokenStore`] trait; [`InMemoryTokenStore`] and
//! [`FileTokenStore`] are provided.

pub mod builder_ext;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod http_error;
pub mod interceptor;
pub mod layer;
pub mod secret;
pub mod store;

pub use builder_ext::HttpClientBuilderExt;
pub use callback::{CallbackHandler, CallbackInput, build_auth_url};
pub use client::AuthCodeClient;
pub use config::{AccessType, ApprovalPrompt, AuthCodeConfig, UserIdResolver};
pub use error::{AuthError, StoreError, auth_error};
pub use exchange::{AuthorizationCodeExchanger, TokenPair};
pub use http_error::format_http_error;
pub use interceptor::AuthInterceptor;
pub use layer::{RefreshAuthLayer, RefreshAuthService};
pub use secret::SecretString;
pub use store::{FileTokenStore, InMemoryTokenStore, RefreshTokenStore, TokenStore, UserId};
