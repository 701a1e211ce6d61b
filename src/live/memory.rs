use super::{LinkHandle, LiveLink, LiveSignal, LiveTransport};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use url::Url;

const CHANNEL_CAPACITY: usize = 100;

/// Every open link receives every emitted signal. Each link starts with
/// [`LiveSignal::Connected`].
pub struct MemoryTransport {
    sender: broadcast::Sender<LiveSignal>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    tokens: Mutex<Vec<String>>,
    refusal: Mutex<Option<String>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            tokens: Mutex::new(Vec::new()),
            refusal: Mutex::new(None),
        }
    }

    /// Returns how many open links received the signal.
    pub fn emit(&self, signal: LiveSignal) -> usize {
        // No receivers is fine.
        self.sender.send(signal).unwrap_or(0)
    }

    /// Makes subsequent `open` calls fail with `message`, or succeed again
    /// when `None`.
    pub fn refuse_with(&self, message: Option<String>) {
        *self.refusal.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    pub fn opened_links(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_links(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handshake tokens in the order links were opened.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LiveTransport for MemoryTransport {
    async fn open(&self, endpoint: &Url, token: &str) -> AppResult<LiveLink> {
        let refusal = self
            .refusal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(message) = refusal {
            return Err(AppError::Api(format!(
                "Live connection to {} failed: {}",
                endpoint, message
            )));
        }

        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.to_string());
        self.opened.fetch_add(1, Ordering::SeqCst);

        // Lagged receivers skip ahead; a missed invalidation is covered by the
        // next one.
        let updates = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| result.ok());
        let signals = tokio_stream::once(LiveSignal::Connected).chain(updates);

        Ok(LiveLink {
            signals: Box::pin(signals),
            handle: Box::new(MemoryLinkHandle {
                closed: self.closed.clone(),
                disconnected: false,
            }),
        })
    }
}

struct MemoryLinkHandle {
    closed: Arc<AtomicUsize>,
    disconnected: bool,
}

impl LinkHandle for MemoryLinkHandle {
    fn disconnect(&mut self) {
        if !self.disconnected {
            self.disconnected = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryTransport;
    use crate::live::{LiveSignal, LiveTransport};
    use futures::StreamExt;
    use url::Url;

    #[tokio::test]
    async fn link_starts_connected_then_relays_signals() {
        let transport = MemoryTransport::new();
        let endpoint = Url::parse("http://localhost:3001/").expect("endpoint");
        let mut link = transport.open(&endpoint, "t1").await.expect("open");

        assert_eq!(transport.emit(LiveSignal::Changed(None)), 1);
        assert_eq!(link.signals.next().await, Some(LiveSignal::Connected));
        assert_eq!(link.signals.next().await, Some(LiveSignal::Changed(None)));

        link.handle.disconnect();
        link.handle.disconnect();
        assert_eq!(transport.closed_links(), 1);
    }
}
