//! Token persistence.
//!
//! The interceptor and callback handler only talk to storage through
//! [`TokenStore`]. Refresh-token support is a separate capability reached via
//! [`TokenStore::refresh_tokens`]; a store that returns `None` there makes
//! every 401 terminal ([`AuthError::KeyExpired`](crate::AuthError::KeyExpired)).
//!
//! All methods take the value first and the optional user id second. A `None`
//! user id addresses the single implicit "current user" slot.

mod file;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::secret::SecretString;

pub use file::FileTokenStore;
pub use memory::InMemoryTokenStore;

/// Opaque identifier selecting a token slot.
///
/// Attach one to a request with
/// [`RequestBuilder::extension`](authkit_http::RequestBuilder::extension) to
/// sign it with that user's tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Access-token storage.
///
/// Implementations are shared between concurrent requests and must do their
/// own locking. Writing the same value twice must be observably identical to
/// writing it once.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_token(&self, user: Option<&UserId>) -> Result<Option<SecretString>, StoreError>;

    async fn set_token(&self, token: SecretString, user: Option<&UserId>)
    -> Result<(), StoreError>;

    /// Refresh-token capability, if this store has one.
    fn refresh_tokens(&self) -> Option<&dyn RefreshTokenStore> {
        None
    }
}

/// Refresh-token storage, exposed through [`TokenStore::refresh_tokens`].
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn get_refresh(&self, user: Option<&UserId>)
    -> Result<Option<SecretString>, StoreError>;

    async fn set_refresh(
        &self,
        token: SecretString,
        user: Option<&UserId>,
    ) -> Result<(), StoreError>;
}
