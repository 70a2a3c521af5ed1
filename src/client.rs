use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::Source;
use crate::pubsub::Message;
use crate::Result;

/// Inbound pub/sub deliveries as produced by a store connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Opens connections to a backing store.
///
/// The default implementation talks to Redis; swapping in another client (for
/// instance the in-process one in [`crate::backend::memory`]) changes the
/// transport without touching the facades.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Establish a connection using the current configuration.
    async fn connect(&self, config: &dyn Source) -> Result<Arc<dyn StoreConnection>>;
}

/// A live connection to the backing store.
///
/// Keys and channels arrive here fully prefixed. Every method maps to one
/// store command and keeps that command's semantics, so the facades can rely
/// on uniform behavior across backends.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<bool>;

    /// Push values to the head, one at a time, leftmost argument pushed
    /// first. Returns the new length.
    async fn lpush(&self, key: &str, values: &[String]) -> Result<i64>;
    /// Push values to the tail in argument order. Returns the new length.
    async fn rpush(&self, key: &str, values: &[String]) -> Result<i64>;
    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>>;
    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<()>;
    async fn llen(&self, key: &str) -> Result<i64>;
    async fn lpop(&self, key: &str) -> Result<Option<String>>;
    async fn lpop_count(&self, key: &str, count: u64) -> Result<Vec<String>>;
    async fn rpop(&self, key: &str) -> Result<Option<String>>;
    async fn rpop_count(&self, key: &str, count: u64) -> Result<Vec<String>>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<i64>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Returns true when the field was newly created, false when it was
    /// overwritten.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    /// One entry per requested field, `None` for absent ones, positions
    /// preserved.
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;
    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;
    async fn hlen(&self, key: &str) -> Result<i64>;

    /// Returns how many connections received the message.
    async fn publish(&self, channel: &str, payload: &str) -> Result<i64>;
    /// Open a dedicated subscription for `channel`. Dropping the stream
    /// tears the subscription down.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;
}

/// Lazily opens and then memoizes a single [`StoreConnection`].
///
/// The first caller connects, concurrent callers wait for that attempt, and
/// every later caller gets the same handle back. A failed attempt leaves the
/// cell empty so the next call starts over.
pub struct ConnectionProvider {
    client: Arc<dyn StoreClient>,
    handle: OnceCell<Arc<dyn StoreConnection>>,
}

impl ConnectionProvider {
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        Self {
            client,
            handle: OnceCell::new(),
        }
    }

    pub async fn connect(&self, config: &dyn Source) -> Result<Arc<dyn StoreConnection>> {
        let conn = self
            .handle
            .get_or_try_init(|| self.establish(config))
            .await?;

        Ok(Arc::clone(conn))
    }

    #[instrument(name = "connect", skip(self, config), fields(connection_id))]
    async fn establish(&self, config: &dyn Source) -> Result<Arc<dyn StoreConnection>> {
        let conn = self.client.connect(config).await?;

        tracing::Span::current().record("connection_id", Uuid::new_v4().to_string());
        debug!("store connection established");

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::memory::MemoryStoreClient;
    use crate::config::Settings;
    use crate::Error;

    struct CountingClient {
        inner: MemoryStoreClient,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl StoreClient for CountingClient {
        async fn connect(&self, config: &dyn Source) -> Result<Arc<dyn StoreConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.inner.connect(config).await
        }
    }

    struct FlakyClient {
        inner: MemoryStoreClient,
        remaining_failures: AtomicUsize,
    }

    #[async_trait]
    impl StoreClient for FlakyClient {
        async fn connect(&self, config: &dyn Source) -> Result<Arc<dyn StoreConnection>> {
            if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Config("transient".to_string()));
            }

            self.inner.connect(config).await
        }
    }

    #[tokio::test]
    async fn connects_once_and_memoizes() {
        let client = Arc::new(CountingClient {
            inner: MemoryStoreClient::default(),
            connects: AtomicUsize::new(0),
        });
        let provider = ConnectionProvider::new(client.clone());
        let config = Settings::new();

        provider.connect(&config).await.unwrap();
        provider.connect(&config).await.unwrap();
        provider.connect(&config).await.unwrap();

        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_connect_retries_on_next_call() {
        let client = Arc::new(FlakyClient {
            inner: MemoryStoreClient::default(),
            remaining_failures: AtomicUsize::new(1),
        });
        let provider = ConnectionProvider::new(client);
        let config = Settings::new();

        assert!(provider.connect(&config).await.is_err());
        assert!(provider.connect(&config).await.is_ok());
        assert!(provider.connect(&config).await.is_ok());
    }
}
