use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::UserProfile;
use storage::Storage;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Credential record as read back from durable storage at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedCredentials {
    pub token: String,
    pub user: UserProfile,
}

/// Durable backend for the credential record.
///
/// Token and user are saved together and cleared together; implementations
/// must never expose a record holding only one of them.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, token: &str, user: &UserProfile) -> Result<()>;
    async fn load(&self) -> Result<Option<PersistedCredentials>>;
    async fn clear(&self) -> Result<()>;
}

/// SQLite-backed credential store; survives process restarts.
pub struct DurableCredentialStore {
    storage: Storage,
}

impl DurableCredentialStore {
    pub async fn initialize(database_url: &str) -> Result<Arc<Self>> {
        let storage = Storage::new(database_url).await.with_context(|| {
            format!("failed to initialize credential storage at '{database_url}'")
        })?;
        Ok(Arc::new(Self { storage }))
    }

    pub fn new(storage: Storage) -> Arc<Self> {
        Arc::new(Self { storage })
    }
}

#[async_trait]
impl CredentialStore for DurableCredentialStore {
    async fn save(&self, token: &str, user: &UserProfile) -> Result<()> {
        let user_json = serde_json::to_string(user).context("failed to serialize user profile")?;
        self.storage.save_credentials(token, &user_json).await
    }

    async fn load(&self) -> Result<Option<PersistedCredentials>> {
        let Some(record) = self.storage.load_credentials().await? else {
            return Ok(None);
        };
        match serde_json::from_str::<UserProfile>(&record.user_json) {
            Ok(user) => Ok(Some(PersistedCredentials {
                token: record.token,
                user,
            })),
            Err(err) => {
                // A malformed profile is treated as no persisted session at all.
                warn!("persisted user profile is malformed, discarding record: {err}");
                self.storage.clear_credentials().await?;
                Ok(None)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear_credentials().await
    }
}

/// Keeps the credential record in memory only; nothing survives a restart.
#[derive(Default)]
pub struct EphemeralCredentialStore {
    record: Mutex<Option<PersistedCredentials>>,
}

impl EphemeralCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_record(token: impl Into<String>, user: UserProfile) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(Some(PersistedCredentials {
                token: token.into(),
                user,
            })),
        })
    }
}

#[async_trait]
impl CredentialStore for EphemeralCredentialStore {
    async fn save(&self, token: &str, user: &UserProfile) -> Result<()> {
        *self.record.lock().await = Some(PersistedCredentials {
            token: token.to_string(),
            user: user.clone(),
        });
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedCredentials>> {
        Ok(self.record.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.record.lock().await = None;
        Ok(())
    }
}

/// In-memory view of the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub token: Option<String>,
    pub user: Option<UserProfile>,
}

/// Single source of truth for the in-memory session, with write-through
/// persistence.
///
/// Only the lifecycle controller and the gateway's 401 handler mutate it;
/// everything else reads snapshots.
pub struct SessionStore {
    credentials: Arc<dyn CredentialStore>,
    inner: RwLock<SessionSnapshot>,
}

impl SessionStore {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Arc<Self> {
        Arc::new(Self {
            credentials,
            inner: RwLock::new(SessionSnapshot::default()),
        })
    }

    pub async fn get(&self) -> SessionSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    /// Replaces token and user together, in memory and then durably.
    ///
    /// A failed durable write is logged, not surfaced: the in-memory pair is
    /// already consistent, and the fail-closed startup validation makes a
    /// missed durable copy safe across restarts.
    pub async fn set(&self, token: String, user: UserProfile) {
        {
            let mut guard = self.inner.write().await;
            guard.token = Some(token.clone());
            guard.user = Some(user.clone());
        }
        if let Err(err) = self.credentials.save(&token, &user).await {
            warn!("failed to persist credentials: {err}");
        }
    }

    /// Clears memory unconditionally; a failed durable delete is logged so
    /// that logout can never be blocked. Idempotent.
    pub async fn clear(&self) {
        {
            let mut guard = self.inner.write().await;
            guard.token = None;
            guard.user = None;
        }
        if let Err(err) = self.credentials.clear().await {
            warn!("failed to clear persisted credentials: {err}");
        }
    }

    pub async fn load_persisted(&self) -> Result<Option<PersistedCredentials>> {
        self.credentials.load().await
    }

    /// Places a persisted credential into memory without re-writing it.
    /// Used only while the startup validation is in flight.
    pub(crate) async fn restore(&self, token: String, user: UserProfile) {
        let mut guard = self.inner.write().await;
        guard.token = Some(token);
        guard.user = Some(user);
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
