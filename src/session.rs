use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Produces the bearer credential attached to the next request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fresh_token(&self) -> AppResult<String>;
}

#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fresh_token(&self) -> AppResult<String> {
        Ok(self.token.clone())
    }
}

/// Reads the signed-in user's token from the OS keyring on every request, so a
/// token rotated by the auth flow is picked up without re-signing in.
#[derive(Clone)]
pub struct KeyringTokenSource {
    service: String,
    account: String,
    keyring_lock: Arc<Mutex<()>>,
}

impl KeyringTokenSource {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            keyring_lock: Arc::new(Mutex::new(())),
        }
    }

    fn entry(&self) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|error| AppError::Credential(error.to_string()))
    }

    pub async fn save_token(&self, token: &str) -> AppResult<()> {
        let _guard = self.keyring_lock.lock().await;
        self.entry()?
            .set_password(token)
            .map_err(|error| AppError::Credential(error.to_string()))
    }

    pub async fn clear_token(&self) -> AppResult<()> {
        let _guard = self.keyring_lock.lock().await;
        match self.entry()?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::Credential(error.to_string())),
        }
    }

    pub async fn has_token(&self) -> AppResult<bool> {
        let _guard = self.keyring_lock.lock().await;
        match self.entry()?.get_password() {
            Ok(value) => Ok(!value.is_empty()),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(error) => Err(AppError::Credential(error.to_string())),
        }
    }
}

#[async_trait]
impl TokenSource for KeyringTokenSource {
    async fn fresh_token(&self) -> AppResult<String> {
        let _guard = self.keyring_lock.lock().await;
        match self.entry()?.get_password() {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) | Err(keyring::Error::NoEntry) => Err(AppError::Credential(format!(
                "No stored credential for {}",
                self.account
            ))),
            Err(error) => Err(AppError::Credential(error.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    source: Arc<dyn TokenSource>,
}

/// Tracks the signed-in identity. Identity changes are published on a watch
/// channel so session-scoped resources can be rebuilt.
#[derive(Clone)]
pub struct SessionManager {
    current: Arc<Mutex<Option<SessionHandle>>>,
    identity: Arc<watch::Sender<Option<String>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            current: Arc::new(Mutex::new(None)),
            identity: Arc::new(identity),
        }
    }

    pub async fn sign_in(&self, user_id: &str, source: Arc<dyn TokenSource>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let handle = SessionHandle {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            source,
        };

        {
            let mut current = self.current.lock().await;
            *current = Some(handle);
        }

        self.identity.send_if_modified(|identity| {
            if identity.as_deref() == Some(user_id) {
                return false;
            }
            *identity = Some(user_id.to_string());
            true
        });
        tracing::info!(user_id, "session signed in");

        session_id
    }

    pub async fn sign_out(&self) {
        let previous = {
            let mut current = self.current.lock().await;
            current.take()
        };
        if let Some(previous) = previous {
            tracing::info!(user_id = %previous.user_id, "session signed out");
        }
        self.identity.send_if_modified(|identity| identity.take().is_some());
    }

    pub async fn current_user(&self) -> Option<String> {
        let current = self.current.lock().await;
        current.as_ref().map(|handle| handle.user_id.clone())
    }

    pub async fn session_id(&self) -> Option<String> {
        let current = self.current.lock().await;
        current.as_ref().map(|handle| handle.session_id.clone())
    }

    /// A fresh bearer token, or `None` when nobody is signed in.
    pub async fn token(&self) -> AppResult<Option<String>> {
        let source = {
            let current = self.current.lock().await;
            let Some(handle) = current.as_ref() else {
                return Ok(None);
            };
            handle.source.clone()
        };

        source.fresh_token().await.map(Some)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.identity.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionManager, StaticTokenSource};
    use std::sync::Arc;

    #[tokio::test]
    async fn anonymous_session_has_no_token() {
        let sessions = SessionManager::new();
        assert_eq!(sessions.token().await.expect("token"), None);
        assert_eq!(sessions.current_user().await, None);
    }

    #[tokio::test]
    async fn identity_changes_are_published_once_per_user() {
        let sessions = SessionManager::new();
        let mut identity = sessions.subscribe();

        sessions
            .sign_in("u1", Arc::new(StaticTokenSource::new("t1")))
            .await;
        assert!(identity.has_changed().expect("sender alive"));
        assert_eq!(identity.borrow_and_update().as_deref(), Some("u1"));

        // Same user with a rotated token: no identity change.
        sessions
            .sign_in("u1", Arc::new(StaticTokenSource::new("t2")))
            .await;
        assert!(!identity.has_changed().expect("sender alive"));
        assert_eq!(sessions.token().await.expect("token").as_deref(), Some("t2"));

        sessions.sign_out().await;
        assert!(identity.has_changed().expect("sender alive"));
        assert_eq!(*identity.borrow_and_update(), None);
        assert_eq!(sessions.token().await.expect("token"), None);
    }
}
