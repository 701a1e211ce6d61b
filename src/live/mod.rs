pub mod memory;

pub use memory::MemoryTransport;

use crate::errors::AppResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use url::Url;

pub type SignalStream = BoxStream<'static, LiveSignal>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveSignal {
    Connected,
    Disconnected,
    ConnectError(String),
    /// Server-side data changed; the optional topic narrows what to refetch.
    Changed(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    All,
    Workspaces,
    Members,
    Knowledge,
}

impl InvalidationScope {
    pub fn from_topic(topic: Option<&str>) -> Self {
        match topic.map(str::trim) {
            Some("workspace") | Some("workspaces") => Self::Workspaces,
            Some("member") | Some("members") => Self::Members,
            Some("knowledge") | Some("item") | Some("items") => Self::Knowledge,
            _ => Self::All,
        }
    }
}

#[async_trait]
pub trait InvalidationHandler: Send + Sync {
    async fn invalidate(&self, scope: InvalidationScope);
}

/// Closes the underlying connection. Must not block.
pub trait LinkHandle: Send {
    fn disconnect(&mut self);
}

pub struct LiveLink {
    pub signals: SignalStream,
    pub handle: Box<dyn LinkHandle>,
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Opens a connection authenticated with `token` at handshake time.
    async fn open(&self, endpoint: &Url, token: &str) -> AppResult<LiveLink>;
}

struct Binding {
    user_id: String,
    connected: Arc<AtomicBool>,
    listener: JoinHandle<()>,
    handle: Box<dyn LinkHandle>,
}

impl Binding {
    /// Detaches the listener before closing so no signal for this identity is
    /// delivered afterwards.
    fn teardown(mut self) {
        self.listener.abort();
        self.connected.store(false, Ordering::SeqCst);
        self.handle.disconnect();
        tracing::info!(user_id = %self.user_id, "live channel closed");
    }
}

pub struct LiveChannel {
    transport: Arc<dyn LiveTransport>,
    endpoint: Url,
    handler: Arc<dyn InvalidationHandler>,
    binding: Mutex<Option<Binding>>,
}

impl LiveChannel {
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        endpoint: Url,
        handler: Arc<dyn InvalidationHandler>,
    ) -> Self {
        Self {
            transport,
            endpoint,
            handler,
            binding: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Binding>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associates the channel with `user_id`. Binding the same user again is a
    /// no-op; a different user replaces the old connection entirely.
    pub async fn bind(&self, user_id: &str, token: &str) -> AppResult<()> {
        {
            let mut binding = self.lock();
            if binding.as_ref().is_some_and(|current| current.user_id == user_id) {
                return Ok(());
            }
            if let Some(previous) = binding.take() {
                previous.teardown();
            }
        }

        let link = self.transport.open(&self.endpoint, token).await?;
        let connected = Arc::new(AtomicBool::new(false));
        let listener = tokio::spawn(listen(
            link.signals,
            self.handler.clone(),
            connected.clone(),
            user_id.to_string(),
        ));
        tracing::info!(user_id, endpoint = %self.endpoint, "live channel opened");

        let replaced = self.lock().replace(Binding {
            user_id: user_id.to_string(),
            connected,
            listener,
            handle: link.handle,
        });
        // A concurrent bind may have landed while this one was connecting.
        if let Some(previous) = replaced {
            previous.teardown();
        }
        Ok(())
    }

    pub fn unbind(&self) {
        let previous = self.lock().take();
        if let Some(previous) = previous {
            previous.teardown();
        }
    }

    pub fn bound_user(&self) -> Option<String> {
        self.lock().as_ref().map(|binding| binding.user_id.clone())
    }

    pub fn is_connected_for(&self, user_id: &str) -> bool {
        self.lock().as_ref().is_some_and(|binding| {
            binding.user_id == user_id && binding.connected.load(Ordering::SeqCst)
        })
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.unbind();
    }
}

async fn listen(
    mut signals: SignalStream,
    handler: Arc<dyn InvalidationHandler>,
    connected: Arc<AtomicBool>,
    user_id: String,
) {
    let mut dropped = false;
    while let Some(signal) = signals.next().await {
        match signal {
            LiveSignal::Connected => {
                connected.store(true, Ordering::SeqCst);
                tracing::debug!(user_id = %user_id, "live channel connected");
                if dropped {
                    dropped = false;
                    handler.invalidate(InvalidationScope::All).await;
                }
            }
            LiveSignal::Disconnected => {
                connected.store(false, Ordering::SeqCst);
                dropped = true;
                tracing::warn!(user_id = %user_id, "live channel disconnected");
            }
            LiveSignal::ConnectError(message) => {
                connected.store(false, Ordering::SeqCst);
                dropped = true;
                tracing::warn!(user_id = %user_id, error = %message, "live channel connect error");
            }
            LiveSignal::Changed(topic) => {
                let scope = InvalidationScope::from_topic(topic.as_deref());
                tracing::debug!(user_id = %user_id, ?scope, "live invalidation");
                handler.invalidate(scope).await;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::{
        InvalidationHandler, InvalidationScope, LiveChannel, LiveSignal, MemoryTransport,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use url::Url;

    #[derive(Default)]
    struct Recorder {
        scopes: Mutex<Vec<InvalidationScope>>,
    }

    impl Recorder {
        fn scopes(&self) -> Vec<InvalidationScope> {
            self.scopes.lock().expect("recorder lock").clone()
        }
    }

    #[async_trait]
    impl InvalidationHandler for Recorder {
        async fn invalidate(&self, scope: InvalidationScope) {
            self.scopes.lock().expect("recorder lock").push(scope);
        }
    }

    fn endpoint() -> Url {
        Url::parse("http://localhost:3001/").expect("endpoint")
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[test]
    fn topics_map_to_scopes() {
        assert_eq!(InvalidationScope::from_topic(None), InvalidationScope::All);
        assert_eq!(
            InvalidationScope::from_topic(Some("members")),
            InvalidationScope::Members
        );
        assert_eq!(
            InvalidationScope::from_topic(Some("items")),
            InvalidationScope::Knowledge
        );
        assert_eq!(
            InvalidationScope::from_topic(Some("something-else")),
            InvalidationScope::All
        );
    }

    #[tokio::test]
    async fn rebinding_same_user_reuses_the_link() {
        let transport = Arc::new(MemoryTransport::new());
        let channel = LiveChannel::new(transport.clone(), endpoint(), Arc::new(Recorder::default()));

        channel.bind("u1", "t1").await.expect("bind");
        channel.bind("u1", "t1").await.expect("bind again");

        assert_eq!(transport.opened_links(), 1);
        assert_eq!(transport.closed_links(), 0);
        assert!(eventually(|| channel.is_connected_for("u1")).await);
    }

    #[tokio::test]
    async fn identity_change_discards_the_old_link() {
        let transport = Arc::new(MemoryTransport::new());
        let channel = LiveChannel::new(transport.clone(), endpoint(), Arc::new(Recorder::default()));

        channel.bind("u1", "t1").await.expect("bind u1");
        channel.bind("u2", "t2").await.expect("bind u2");

        assert_eq!(transport.opened_links(), 2);
        assert_eq!(transport.closed_links(), 1);
        assert_eq!(transport.tokens(), vec!["t1".to_string(), "t2".to_string()]);
        assert!(!channel.is_connected_for("u1"));
        assert!(eventually(|| channel.is_connected_for("u2")).await);

        channel.unbind();
        assert_eq!(transport.closed_links(), 2);
        assert_eq!(channel.bound_user(), None);
    }

    #[tokio::test]
    async fn changed_signal_reaches_handler() {
        let transport = Arc::new(MemoryTransport::new());
        let recorder = Arc::new(Recorder::default());
        let channel = LiveChannel::new(transport.clone(), endpoint(), recorder.clone());

        channel.bind("u1", "t1").await.expect("bind");
        assert!(eventually(|| channel.is_connected_for("u1")).await);

        transport.emit(LiveSignal::Changed(Some("members".to_string())));
        assert!(eventually(|| recorder.scopes() == vec![InvalidationScope::Members]).await);
    }

    #[tokio::test]
    async fn reconnect_after_drop_requests_full_refresh() {
        let transport = Arc::new(MemoryTransport::new());
        let recorder = Arc::new(Recorder::default());
        let channel = LiveChannel::new(transport.clone(), endpoint(), recorder.clone());

        channel.bind("u1", "t1").await.expect("bind");
        assert!(eventually(|| channel.is_connected_for("u1")).await);

        transport.emit(LiveSignal::Disconnected);
        assert!(eventually(|| !channel.is_connected_for("u1")).await);
        transport.emit(LiveSignal::Connected);

        assert!(eventually(|| recorder.scopes() == vec![InvalidationScope::All]).await);
        assert!(channel.is_connected_for("u1"));
    }

    #[tokio::test]
    async fn signals_after_unbind_are_not_delivered() {
        let transport = Arc::new(MemoryTransport::new());
        let recorder = Arc::new(Recorder::default());
        let channel = LiveChannel::new(transport.clone(), endpoint(), recorder.clone());

        channel.bind("u1", "t1").await.expect("bind");
        assert!(eventually(|| channel.is_connected_for("u1")).await);
        channel.unbind();

        transport.emit(LiveSignal::Changed(None));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.scopes().is_empty());
    }

    #[tokio::test]
    async fn refused_connection_leaves_channel_unbound() {
        let transport = Arc::new(MemoryTransport::new());
        transport.refuse_with(Some("unauthorized".to_string()));
        let channel = LiveChannel::new(transport.clone(), endpoint(), Arc::new(Recorder::default()));

        assert!(channel.bind("u1", "bad").await.is_err());
        assert_eq!(channel.bound_user(), None);
        assert_eq!(transport.opened_links(), 0);
    }
}
