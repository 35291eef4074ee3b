use async_trait::async_trait;
use dashmap::DashMap;

use super::{RefreshTokenStore, TokenStore, UserId};
use crate::error::StoreError;
use crate::secret::SecretString;

/// Process-local token store.
///
/// [`access_only`](Self::access_only) builds a store without refresh
/// capability, which is what a client that only ever receives short-lived
/// access tokens looks like.
#[derive(Debug)]
pub struct InMemoryTokenStore {
    access: DashMap<Option<UserId>, SecretString>,
    refresh: Option<DashMap<Option<UserId>, SecretString>>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access: DashMap::new(),
            refresh: Some(DashMap::new()),
        }
    }

    /// Store that reports no refresh capability.
    #[must_use]
    pub fn access_only() -> Self {
        Self {
            access: DashMap::new(),
            refresh: None,
        }
    }

    /// Number of populated access-token slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.access.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access.is_empty()
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get_token(&self, user: Option<&UserId>) -> Result<Option<SecretString>, StoreError> {
        Ok(self.access.get(&user.cloned()).map(|t| t.value().clone()))
    }

    async fn set_token(
        &self,
        token: SecretString,
        user: Option<&UserId>,
    ) -> Result<(), StoreError> {
        self.access.insert(user.cloned(), token);
        Ok(())
    }

    fn refresh_tokens(&self) -> Option<&dyn RefreshTokenStore> {
        self.refresh.as_ref().map(|_| self as &dyn RefreshTokenStore)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryTokenStore {
    async fn get_refresh(
        &self,
        user: Option<&UserId>,
    ) -> Result<Option<SecretString>, StoreError> {
        Ok(self
            .refresh
            .as_ref()
            .and_then(|m| m.get(&user.cloned()).map(|t| t.value().clone())))
    }

    async fn set_refresh(
        &self,
        token: SecretString,
        user: Option<&UserId>,
    ) -> Result<(), StoreError> {
        match &self.refresh {
            Some(map) => {
                map.insert(user.cloned(), token);
                Ok(())
            }
            None => Err(StoreError::Backend(
                "store was built without refresh-token support".into(),
            )),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slots_are_separated_by_user() {
        let store = InMemoryTokenStore::new();
        let alice = UserId::new("alice");
        store.set_token(SecretString::new("default-at"), None).await.unwrap();
        store
            .set_token(SecretString::new("alice-at"), Some(&alice))
            .await
            .unwrap();

        assert_eq!(store.get_token(None).await.unwrap().unwrap().expose(), "default-at");
        assert_eq!(
            store.get_token(Some(&alice)).await.unwrap().unwrap().expose(),
            "alice-at"
        );
        assert!(store.get_token(Some(&UserId::new("bob"))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_token_is_idempotent() {
        let once = InMemoryTokenStore::new();
        once.set_token(SecretString::new("t"), None).await.unwrap();

        let twice = InMemoryTokenStore::new();
        twice.set_token(SecretString::new("t"), None).await.unwrap();
        twice.set_token(SecretString::new("t"), None).await.unwrap();

        assert_eq!(once.len(), twice.len());
        assert_eq!(
            once.get_token(None).await.unwrap(),
            twice.get_token(None).await.unwrap()
        );
    }

    #[tokio::test]
    async fn access_only_has_no_refresh_capability() {
        let store = InMemoryTokenStore::access_only();
        assert!(store.refresh_tokens().is_none());
        assert!(store.set_refresh(SecretString::new("rt"), None).await.is_err());
    }

    #[tokio::test]
    async fn refresh_capability_round_trips() {
        let store = InMemoryTokenStore::new();
        let refresh = store.refresh_tokens().unwrap();
        refresh.set_refresh(SecretString::new("rt-1"), None).await.unwrap();
        assert_eq!(refresh.get_refresh(None).await.unwrap().unwrap().expose(), "rt-1");
    }
}
