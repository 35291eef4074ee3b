use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use super::{RefreshTokenStore, TokenStore, UserId};
use crate::error::StoreError;
use crate::secret::SecretString;

#[derive(Default, Serialize, Deserialize)]
struct Slot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

#[derive(Default, Serialize, Deserialize)]
struct Contents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Slot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    users: BTreeMap<UserId, Slot>,
}

impl Contents {
    fn slot(&self, user: Option<&UserId>) -> Option<&Slot> {
        match user {
            Some(id) => self.users.get(id),
            None => self.default.as_ref(),
        }
    }

    fn slot_mut(&mut self, user: Option<&UserId>) -> &mut Slot {
        match user {
            Some(id) => self.users.entry(id.clone()).or_default(),
            None => self.default.get_or_insert_with(Slot::default),
        }
    }
}

/// JSON-file token store with refresh capability.
///
/// Every write rewrites the whole file through a temporary sibling
/// (`<name>.tmp`) and a rename. On unix the sibling is created with mode
/// `0600`, so the token file never exists with wider permissions.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Contents, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Ok(Contents::default()),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Contents::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, contents: &Contents) -> Result<(), StoreError> {
        let json = Zeroizing::new(serde_json::to_vec_pretty(contents)?);
        let tmp = self.path.with_extension("tmp");
        match tokio::fs::remove_file(&tmp).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let mut file = create_private(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update(
        &self,
        user: Option<&UserId>,
        apply: impl FnOnce(&mut Slot),
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut contents = self.load().await?;
        apply(contents.slot_mut(user));
        self.save(&contents).await?;
        tracing::debug!(path = %self.path.display(), user = ?user, "token file updated");
        Ok(())
    }

    async fn read_slot<T>(
        &self,
        user: Option<&UserId>,
        pick: impl FnOnce(&Slot) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        let _guard = self.lock.lock().await;
        let contents = self.load().await?;
        Ok(contents.slot(user).and_then(pick))
    }
}

/// Create `path` exclusively, owner read/write only on unix. The mode is set
/// at creation so token bytes are never readable by other users.
async fn create_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get_token(&self, user: Option<&UserId>) -> Result<Option<SecretString>, StoreError> {
        self.read_slot(user, |s| s.access_token.as_deref().map(SecretString::new))
            .await
    }

    async fn set_token(
        &self,
        token: SecretString,
        user: Option<&UserId>,
    ) -> Result<(), StoreError> {
        self.update(user, |s| s.access_token = Some(token.expose().to_owned()))
            .await
    }

    fn refresh_tokens(&self) -> Option<&dyn RefreshTokenStore> {
        Some(self)
    }
}

#[async_trait]
impl RefreshTokenStore for FileTokenStore {
    async fn get_refresh(
        &self,
        user: Option<&UserId>,
    ) -> Result<Option<SecretString>, StoreError> {
        self.read_slot(user, |s| s.refresh_token.as_deref().map(SecretString::new))
            .await
    }

    async fn set_refresh(
        &self,
        token: SecretString,
        user: Option<&UserId>,
    ) -> Result<(), StoreError> {
        self.update(user, |s| s.refresh_token = Some(token.expose().to_owned()))
            .await
    }
}
