//! Redis-backed shared tier and invalidation bus

use super::bus::{receiver_stream, InvalidationBus, InvalidationMessage};
use super::shared::SharedCache;
use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use fred::clients::Client;
use fred::interfaces::{EventInterface, PubsubInterface, SetsInterface};
use fred::prelude::*;
use futures::stream::BoxStream;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

fn degraded(err: impl std::fmt::Display) -> AuthzError {
    AuthzError::CacheDegraded(err.to_string())
}

/// Connect a fred client and wait until it is usable
pub async fn connect(redis_url: &str) -> Result<Client> {
    let config = Config::from_url(redis_url)
        .map_err(|e| AuthzError::Validation(format!("Invalid redis url: {}", e)))?;
    let client = Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await.map_err(degraded)?;
    Ok(client)
}

/// Shared tier stored in Redis string keys
///
/// Keys under the indexed prefix are also recorded in an index set so prefix
/// deletion does not need `KEYS`/`SCAN`. Only those keys can be cleared by
/// [`delete_prefix`](SharedCache::delete_prefix); session epochs and other
/// keys outside the prefix are never indexed. Index members whose key
/// expired are dropped on the next prefix deletion.
#[derive(Clone)]
pub struct RedisSharedCache {
    client: Client,
    index_key: String,
    indexed_prefix: String,
}

impl RedisSharedCache {
    /// Connect to Redis, indexing keys that start with `indexed_prefix`
    pub async fn connect(redis_url: &str, indexed_prefix: &str) -> Result<Self> {
        Ok(Self::from_client(connect(redis_url).await?, indexed_prefix))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, indexed_prefix: &str) -> Self {
        Self {
            client,
            index_key: "authz:cache:keys".to_string(),
            indexed_prefix: indexed_prefix.to_string(),
        }
    }

    fn is_indexed(&self, key: &str) -> bool {
        key.starts_with(&self.indexed_prefix)
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client
            .get::<Option<String>, _>(key)
            .await
            .map_err(degraded)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let seconds = ttl.as_secs().max(1) as i64;
        self.client
            .set::<(), _, _>(key, value, Some(Expiration::EX(seconds)), None, false)
            .await
            .map_err(degraded)?;
        if self.is_indexed(key) {
            let _: () = self
                .client
                .sadd(&self.index_key, key)
                .await
                .map_err(degraded)?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.client.del(key).await.map_err(degraded)?;
        if self.is_indexed(key) {
            let _: () = self
                .client
                .srem(&self.index_key, key)
                .await
                .map_err(degraded)?;
        }
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let members: Vec<String> = self
            .client
            .smembers(&self.index_key)
            .await
            .map_err(degraded)?;
        let matching: Vec<String> = members
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        if matching.is_empty() {
            return Ok(0);
        }

        let removed: i64 = self
            .client
            .del(matching.clone())
            .await
            .map_err(degraded)?;
        let _: () = self
            .client
            .srem(&self.index_key, matching)
            .await
            .map_err(degraded)?;
        Ok(removed.max(0) as u64)
    }
}

/// Invalidation bus on a Redis pub/sub channel
///
/// A dedicated subscriber connection forwards channel payloads into a local
/// broadcast channel; every [`subscribe`](InvalidationBus::subscribe) call
/// reads from that.
pub struct RedisInvalidationBus {
    publisher: Client,
    topic: String,
    local: broadcast::Sender<String>,
}

impl RedisInvalidationBus {
    /// Connect publisher and subscriber clients and start forwarding
    pub async fn connect(redis_url: &str, topic: &str) -> Result<Self> {
        let publisher = connect(redis_url).await?;

        let subscriber = publisher.clone_new();
        subscriber.connect();
        subscriber.wait_for_connect().await.map_err(degraded)?;

        let (local, _) = broadcast::channel(1024);
        let mut messages = subscriber.message_rx();
        subscriber.subscribe(topic).await.map_err(degraded)?;
        info!(topic, "Subscribed to cache invalidation topic");

        let forward = local.clone();
        let channel = topic.to_string();
        tokio::spawn(async move {
            // keep the subscriber connection alive for the task's lifetime
            let _subscriber = subscriber;
            loop {
                match messages.recv().await {
                    Ok(message) => {
                        if message.channel.to_string() != channel {
                            continue;
                        }
                        if let Some(payload) = message.value.as_string() {
                            let _ = forward.send(payload);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Redis subscriber lagged, clearing local tiers");
                        let _ = forward.send(InvalidationMessage::All.encode());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!(topic = %channel, "Redis subscription closed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            publisher,
            topic: topic.to_string(),
            local,
        })
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        self.publisher
            .publish::<(), _, _>(self.topic.as_str(), message.encode())
            .await
            .map_err(degraded)
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationMessage>> {
        Ok(receiver_stream(self.local.subscribe()))
    }
}
