use crate::api::{HttpKnowledgeApi, HttpWorkspaceApi, KnowledgeApi, WorkspaceApi};
use crate::config::ClientConfig;
use crate::errors::{AppError, AppResult};
use crate::gateway::ApiGateway;
use crate::live::{LiveChannel, LiveTransport};
use crate::notify::Notifier;
use crate::session::{KeyringTokenSource, SessionManager, TokenSource};
use crate::store::WorkspaceStore;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

struct Shared {
    session: SessionManager,
    store: Arc<WorkspaceStore>,
    live: Arc<LiveChannel>,
    /// Identity the store and live channel were last aligned with.
    applied: tokio::sync::Mutex<Option<String>>,
}

impl Shared {
    async fn follow_identity(&self) {
        let mut applied = self.applied.lock().await;
        let user = self.session.current_user().await;
        if *applied == user {
            return;
        }

        // The old identity's channel goes first so none of its invalidations
        // land after the reset.
        match &user {
            Some(user_id) => match self.session.token().await {
                Ok(Some(token)) => {
                    if let Err(error) = self.live.bind(user_id, &token).await {
                        tracing::warn!(user_id = %user_id, error = %error, "live channel unavailable");
                    }
                }
                Ok(None) => self.live.unbind(),
                Err(error) => {
                    tracing::warn!(user_id = %user_id, error = %error, "no token for live channel");
                    self.live.unbind();
                }
            },
            None => self.live.unbind(),
        }
        self.store.reset().await;
        *applied = user;
    }
}

pub struct ConsoleContext {
    config: ClientConfig,
    shared: Arc<Shared>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleContext {
    /// Builds the HTTP-backed context described by `config`.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn LiveTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let session = SessionManager::new();
        let gateway = ApiGateway::new(config.api_base()?, session.clone());
        Self::with_parts(
            config,
            session,
            Arc::new(HttpWorkspaceApi::new(gateway.clone())),
            Arc::new(HttpKnowledgeApi::new(gateway)),
            transport,
            notifier,
        )
    }

    pub fn with_parts(
        config: ClientConfig,
        session: SessionManager,
        workspaces_api: Arc<dyn WorkspaceApi>,
        knowledge_api: Arc<dyn KnowledgeApi>,
        transport: Arc<dyn LiveTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let store = Arc::new(WorkspaceStore::new(workspaces_api, knowledge_api, notifier));
        let live = Arc::new(LiveChannel::new(
            transport,
            config.live_endpoint()?,
            store.clone(),
        ));

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                session,
                store,
                live,
                applied: tokio::sync::Mutex::new(None),
            }),
            follower: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.shared.session
    }

    pub fn store(&self) -> &Arc<WorkspaceStore> {
        &self.shared.store
    }

    pub fn live(&self) -> &Arc<LiveChannel> {
        &self.shared.live
    }

    /// Follows identity changes made through the shared [`SessionManager`].
    /// Calling it again while the follower runs does nothing.
    pub fn start(&self) {
        let mut follower = self.follower.lock().unwrap_or_else(PoisonError::into_inner);
        if follower.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let shared = self.shared.clone();
        let mut identity = shared.session.subscribe();
        *follower = Some(tokio::spawn(async move {
            shared.follow_identity().await;
            while identity.changed().await.is_ok() {
                identity.borrow_and_update();
                shared.follow_identity().await;
            }
            tracing::debug!("identity follower stopped");
        }));
    }

    pub async fn sign_in(&self, user_id: &str, source: Arc<dyn TokenSource>) -> String {
        let session_id = self.shared.session.sign_in(user_id, source).await;
        self.shared.follow_identity().await;
        session_id
    }

    /// Signs in with the token stored in the OS keyring for `user_id`.
    pub async fn sign_in_with_keyring(&self, user_id: &str) -> AppResult<String> {
        let source = KeyringTokenSource::new(self.config.keyring_service.clone(), user_id);
        if !source.has_token().await? {
            return Err(AppError::Credential(format!(
                "No stored credential for {}",
                user_id
            )));
        }
        Ok(self.sign_in(user_id, Arc::new(source)).await)
    }

    pub async fn sign_out(&self) {
        self.shared.session.sign_out().await;
        self.shared.follow_identity().await;
    }

    pub async fn shutdown(&self) {
        let follower = self
            .follower
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(follower) = follower {
            follower.abort();
        }
        self.shared.live.unbind();
        self.shared.store.reset().await;
        *self.shared.applied.lock().await = None;
        tracing::info!("console context shut down");
    }
}

impl Drop for ConsoleContext {
    fn drop(&mut self) {
        let follower = self
            .follower
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(follower) = follower {
            follower.abort();
        }
    }
}
