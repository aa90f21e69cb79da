use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{PageSummary, PostSummary, UserProfile},
    protocol::{
        ChangePasswordRequest, LoginRequest, LoginResponse, MessageResponse, UpdateProfileRequest,
        UserEnvelope,
    },
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub mod gateway;
pub mod session_store;

pub use gateway::{ApiGateway, GatewayError, RequestOptions};
pub use session_store::{
    CredentialStore, DurableCredentialStore, EphemeralCredentialStore, PersistedCredentials,
    SessionSnapshot, SessionStore,
};

/// Lifecycle of the session, decided exactly once per process by
/// [`SessionClient::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Validating,
    Authenticated,
    Anonymous,
}

/// Snapshot handed to the view layer. `is_loading` is true only while the
/// startup validation is in flight; until it turns false, token presence
/// must not be trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub state: SessionState,
    pub token: Option<String>,
    pub user: Option<UserProfile>,
    pub is_loading: bool,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ProfileUpdated(UserProfile),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Caller bug: the operation requires an authenticated session.
    #[error("operation requires an authenticated session")]
    NotAuthenticated,
    /// Caller bug: `initialize` may run only once per client.
    #[error("session already initialized")]
    AlreadyInitialized,
}

/// Operations the view layer drives the session through.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn initialize(&self) -> Result<SessionState, SessionError>;
    async fn login(&self, username: &str, password: &str) -> Result<UserProfile, SessionError>;
    async fn logout(&self);
    async fn refresh_profile(&self) -> Result<UserProfile, SessionError>;
    async fn update_profile(
        &self,
        update: UpdateProfileRequest,
    ) -> Result<UserProfile, SessionError>;
    async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError>;
    async fn list_pages(&self) -> Result<Vec<PageSummary>, SessionError>;
    async fn list_posts(&self) -> Result<Vec<PostSummary>, SessionError>;
    async fn list_users(&self) -> Result<Vec<UserProfile>, SessionError>;
    async fn fetch(&self, path: &str) -> Result<Value, SessionError>;
    async fn session(&self) -> Session;
    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent>;
}

/// The only component permitted to transition the session between states;
/// composes the gateway and the store.
pub struct SessionClient {
    store: Arc<SessionStore>,
    gateway: ApiGateway,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Arc<Self> {
        let store = SessionStore::new(credentials);
        let gateway = ApiGateway::new(base_url, Arc::clone(&store));
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            gateway,
            state: Mutex::new(SessionState::Uninitialized),
            events,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    /// Current state, reconciled against a store the gateway may have cleared
    /// on 401 since the last read.
    pub async fn current_state(&self) -> SessionState {
        let mut state = self.state.lock().await;
        if *state == SessionState::Authenticated && self.store.token().await.is_none() {
            *state = SessionState::Anonymous;
            let _ = self
                .events
                .send(SessionEvent::StateChanged(SessionState::Anonymous));
        }
        *state
    }

    async fn transition(&self, next: SessionState) {
        *self.state.lock().await = next;
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    async fn require_authenticated(&self) -> Result<(), SessionError> {
        match self.current_state().await {
            SessionState::Authenticated => Ok(()),
            _ => Err(SessionError::NotAuthenticated),
        }
    }

    /// Maps a gateway failure into the public error, observing the 401 side
    /// effect: a cleared store means the session is over.
    async fn surface(&self, err: GatewayError) -> SessionError {
        if matches!(err, GatewayError::SessionExpired) {
            self.transition(SessionState::Anonymous).await;
        }
        SessionError::Gateway(err)
    }

    async fn store_profile(&self, token: String, user: UserProfile) {
        self.store.set(token, user.clone()).await;
        let _ = self.events.send(SessionEvent::ProfileUpdated(user));
    }

    /// Re-validates any persisted credential against the server. Runs exactly
    /// once, at startup, before anything trusts the session.
    pub async fn initialize(&self) -> Result<SessionState, SessionError> {
        {
            let mut state = self.state.lock().await;
            if *state != SessionState::Uninitialized {
                return Err(SessionError::AlreadyInitialized);
            }
            *state = SessionState::Validating;
        }
        let _ = self
            .events
            .send(SessionEvent::StateChanged(SessionState::Validating));

        let persisted = match self.store.load_persisted().await {
            Ok(found) => found,
            Err(err) => {
                // Unreadable local state is the same as no local state.
                warn!("failed to read persisted credentials: {err}");
                None
            }
        };

        let Some(PersistedCredentials { token, user }) = persisted else {
            self.transition(SessionState::Anonymous).await;
            return Ok(SessionState::Anonymous);
        };

        self.store.restore(token.clone(), user).await;

        match self.gateway.get::<UserEnvelope>("/auth/me").await {
            Ok(envelope) => {
                info!(user_id = envelope.user.id.0, "persisted session validated");
                self.store_profile(token, envelope.user).await;
                self.transition(SessionState::Authenticated).await;
                Ok(SessionState::Authenticated)
            }
            Err(err) => {
                // Fail closed: an unreachable server at startup is treated the
                // same as a rejected token.
                warn!("startup validation failed, discarding persisted session: {err}");
                self.store.clear().await;
                self.transition(SessionState::Anonymous).await;
                Ok(SessionState::Anonymous)
            }
        }
    }

    /// Single attempt, no retry; concurrent logins race and the last
    /// successful write to the store wins.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, SessionError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = match self.gateway.post("/auth/login", &request).await {
            Ok(response) => response,
            Err(err) => return Err(self.surface(err).await),
        };

        info!(user_id = response.user.id.0, "login succeeded");
        self.store_profile(response.access_token, response.user.clone())
            .await;
        self.transition(SessionState::Authenticated).await;
        Ok(response.user)
    }

    /// Local-only, so an unreachable server can never block logout.
    pub async fn logout(&self) {
        self.store.clear().await;
        self.transition(SessionState::Anonymous).await;
    }

    pub async fn refresh_profile(&self) -> Result<UserProfile, SessionError> {
        self.require_authenticated().await?;
        let envelope: UserEnvelope = match self.gateway.get("/auth/me").await {
            Ok(envelope) => envelope,
            Err(err) => return Err(self.surface(err).await),
        };
        let Some(token) = self.store.token().await else {
            // The token vanished across the await (e.g. a concurrent logout).
            return Err(SessionError::NotAuthenticated);
        };
        self.store_profile(token, envelope.user.clone()).await;
        Ok(envelope.user)
    }

    pub async fn update_profile(
        &self,
        update: UpdateProfileRequest,
    ) -> Result<UserProfile, SessionError> {
        self.require_authenticated().await?;
        let envelope: UserEnvelope = match self.gateway.put("/auth/update-profile", &update).await {
            Ok(envelope) => envelope,
            Err(err) => return Err(self.surface(err).await),
        };
        let Some(token) = self.store.token().await else {
            return Err(SessionError::NotAuthenticated);
        };
        self.store_profile(token, envelope.user.clone()).await;
        Ok(envelope.user)
    }

    /// Success leaves the session untouched; the token stays valid.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        self.require_authenticated().await?;
        let request = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        match self
            .gateway
            .post::<MessageResponse, _>("/auth/change-password", &request)
            .await
        {
            Ok(response) => {
                info!(message = %response.message, "password changed");
                Ok(())
            }
            Err(err) => Err(self.surface(err).await),
        }
    }

    pub async fn list_pages(&self) -> Result<Vec<PageSummary>, SessionError> {
        self.require_authenticated().await?;
        match self.gateway.get("/pages").await {
            Ok(pages) => Ok(pages),
            Err(err) => Err(self.surface(err).await),
        }
    }

    pub async fn list_posts(&self) -> Result<Vec<PostSummary>, SessionError> {
        self.require_authenticated().await?;
        match self.gateway.get("/posts").await {
            Ok(posts) => Ok(posts),
            Err(err) => Err(self.surface(err).await),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>, SessionError> {
        self.require_authenticated().await?;
        match self.gateway.get("/users").await {
            Ok(users) => Ok(users),
            Err(err) => Err(self.surface(err).await),
        }
    }

    /// Raw passthrough for the module endpoints the dashboard renders
    /// generically (`/financial/*`, `/sales/*`, `/departments/*`).
    pub async fn fetch(&self, path: &str) -> Result<Value, SessionError> {
        self.require_authenticated().await?;
        match self.gateway.request(path, RequestOptions::default()).await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.surface(err).await),
        }
    }

    pub async fn session(&self) -> Session {
        let state = self.current_state().await;
        let snapshot = self.store.get().await;
        Session {
            state,
            token: snapshot.token,
            user: snapshot.user,
            is_loading: state == SessionState::Validating,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl SessionHandle for Arc<SessionClient> {
    async fn initialize(&self) -> Result<SessionState, SessionError> {
        SessionClient::initialize(self).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserProfile, SessionError> {
        SessionClient::login(self, username, password).await
    }

    async fn logout(&self) {
        SessionClient::logout(self).await;
    }

    async fn refresh_profile(&self) -> Result<UserProfile, SessionError> {
        SessionClient::refresh_profile(self).await
    }

    async fn update_profile(
        &self,
        update: UpdateProfileRequest,
    ) -> Result<UserProfile, SessionError> {
        SessionClient::update_profile(self, update).await
    }

    async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        SessionClient::change_password(self, current_password, new_password).await
    }

    async fn list_pages(&self) -> Result<Vec<PageSummary>, SessionError> {
        SessionClient::list_pages(self).await
    }

    async fn list_posts(&self) -> Result<Vec<PostSummary>, SessionError> {
        SessionClient::list_posts(self).await
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, SessionError> {
        SessionClient::list_users(self).await
    }

    async fn fetch(&self, path: &str) -> Result<Value, SessionError> {
        SessionClient::fetch(self, path).await
    }

    async fn session(&self) -> Session {
        SessionClient::session(self).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        SessionClient::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
