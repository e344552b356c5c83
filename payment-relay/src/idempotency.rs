use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Backing store for payment-intent ids that were already forwarded.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn contains(&self, id: &str) -> Result<bool>;
    /// Atomic per id. Returns `false` when the id was already present.
    async fn insert_if_absent(&self, id: &str) -> Result<bool>;
}

// ---------------- Redis Implementation ----------------

#[derive(Clone)]
pub struct RedisProcessedStore {
    manager: ConnectionManager,
    retention_secs: u64,
    prefix: String,
}

impl RedisProcessedStore {
    pub async fn new(redis_url: &str, retention_secs: u64, prefix: String) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self {
            manager,
            retention_secs,
            prefix,
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }
}

#[async_trait]
impl ProcessedEventStore for RedisProcessedStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let exists: bool = conn
            .exists(self.key(id))
            .await
            .context("Failed to query processed event")?;
        Ok(exists)
    }

    async fn insert_if_absent(&self, id: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.retention_secs)
            .query_async(&mut conn)
            .await
            .context("Failed to record processed event")?;
        Ok(reply.is_some())
    }
}

// ---------------- In-Memory Implementation ----------------

#[derive(Clone, Default)]
pub struct InMemoryProcessedStore {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryProcessedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().await.contains(id))
    }

    async fn insert_if_absent(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().await.insert(id.to_string()))
    }
}

/// Suppresses repeat forwards of the same payment intent.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn ProcessedEventStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn ProcessedEventStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryProcessedStore::new()))
    }

    pub async fn redis(redis_url: &str, retention_secs: u64, prefix: String) -> Result<Self> {
        let store = RedisProcessedStore::new(redis_url, retention_secs, prefix).await?;
        Ok(Self::new(Arc::new(store)))
    }

    pub async fn has(&self, payment_intent_id: &str) -> Result<bool> {
        self.store.contains(payment_intent_id).await
    }

    /// Claims the id for forwarding. Only one concurrent caller gets `true`.
    pub async fn mark_forwarded(&self, payment_intent_id: &str) -> Result<bool> {
        self.store.insert_if_absent(payment_intent_id).await
    }
}
