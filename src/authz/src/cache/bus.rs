//! Cross-process cache invalidation broadcast
//!
//! Payloads on the wire are either a cache key or the sentinel `ALL`.
//! Delivery is at-least-once; applying a message twice is harmless.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use tokio::sync::broadcast;
use tracing::warn;

/// Sentinel payload that clears every local entry
pub const INVALIDATE_ALL: &str = "ALL";

/// Invalidation message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationMessage {
    /// Purge one cache key
    Key(String),
    /// Purge the entire local tier
    All,
}

impl InvalidationMessage {
    /// Wire payload
    pub fn encode(&self) -> String {
        match self {
            InvalidationMessage::Key(key) => key.clone(),
            InvalidationMessage::All => INVALIDATE_ALL.to_string(),
        }
    }

    /// Parse a wire payload; blank payloads carry nothing and yield `None`
    pub fn decode(payload: &str) -> Option<Self> {
        match payload.trim() {
            "" => None,
            INVALIDATE_ALL => Some(InvalidationMessage::All),
            key => Some(InvalidationMessage::Key(key.to_string())),
        }
    }
}

impl fmt::Display for InvalidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Publish/subscribe channel for invalidation messages
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Broadcast a message to every subscriber, including this process
    async fn publish(&self, message: &InvalidationMessage) -> Result<()>;

    /// Subscribe to messages published after this call returns
    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationMessage>>;
}

/// In-process bus over a tokio broadcast channel
///
/// Clones share the channel, so cache instances built from clones behave
/// like nodes on one Redis topic.
#[derive(Debug, Clone)]
pub struct InMemoryInvalidationBus {
    sender: broadcast::Sender<String>,
}

impl InMemoryInvalidationBus {
    /// Create a bus buffering up to `capacity` undelivered messages per
    /// subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryInvalidationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationBus for InMemoryInvalidationBus {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        // No subscribers is not an error: nobody holds local entries
        let _ = self.sender.send(message.encode());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationMessage>> {
        Ok(receiver_stream(self.sender.subscribe()))
    }
}

/// Turn a broadcast receiver of raw payloads into a message stream
///
/// A lagging receiver has lost messages it cannot name, so the gap is
/// reported as [`InvalidationMessage::All`].
pub(crate) fn receiver_stream(
    receiver: broadcast::Receiver<String>,
) -> BoxStream<'static, InvalidationMessage> {
    stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if let Some(message) = InvalidationMessage::decode(&payload) {
                        return Some((message, rx));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Invalidation subscriber lagged, clearing local tier");
                    return Some((InvalidationMessage::All, rx));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
