//! TTL cache of delivery tokens for generated artifacts.
//!
//! Entries are advisory: a lost or expired entry only costs a regeneration.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store for artifact tokens.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `token` under `key`, expiring `ttl` after the write.
    async fn set(&self, key: &str, token: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed cache (`GET`, `SET key value EX seconds`).
#[derive(Clone)]
pub struct RedisTokenCache {
    connection: MultiplexedConnection,
}

impl RedisTokenCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("connected to token cache");
        Ok(Self { connection })
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let token: Option<String> = conn.get(key).await?;
        debug!(key, hit = token.is_some(), "token cache lookup");
        Ok(token)
    }

    async fn set(&self, key: &str, token: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(key, token, ttl.as_secs().max(1)).await?;
        Ok(())
    }
}

/// In-process cache; expiry follows tokio's clock so paused-time tests work.
#[derive(Default)]
pub struct MemoryTokenCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires_at)| now < *expires_at)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((token, expires_at)) if Instant::now() < *expires_at => Ok(Some(token.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, token: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), (token.to_string(), Instant::now() + ttl));
        Ok(())
    }
}
