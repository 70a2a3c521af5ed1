use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use crate::client::{MessageStream, StoreClient, StoreConnection};
use crate::config::{Source, CONNECTION};
use crate::pubsub::Message;
use crate::{Error, Result};

/// Store client backed by a Redis server. This is the default client.
///
/// `connect` reads the URL from the configuration source at call time and
/// opens one multiplexed connection; commands clone that handle, which is the
/// cheap and intended way to share it.
#[derive(Debug, Clone, Default)]
pub struct RedisStoreClient;

#[async_trait]
impl StoreClient for RedisStoreClient {
    async fn connect(&self, config: &dyn Source) -> Result<Arc<dyn StoreConnection>> {
        let url = config
            .connection()
            .ok_or_else(|| Error::Config(format!("missing `{CONNECTION}`")))?;

        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        let conn: Arc<dyn StoreConnection> = Arc::new(RedisConnection { client, conn });
        Ok(conn)
    }
}

struct RedisConnection {
    // Kept around to open dedicated pub/sub connections; regular commands go
    // through the multiplexed handle.
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisConnection {
    fn conn(&self) -> redis::aio::MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let _: () = cmd.query_async(&mut conn).await?;

        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;

        Ok(removed > 0)
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<i64> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(values)
            .query_async(&mut conn)
            .await?;

        Ok(len)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<i64> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(values)
            .query_async(&mut conn)
            .await?;

        Ok(len)
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("LINDEX")
            .arg(key)
            .arg(index)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let outcome: std::result::Result<(), redis::RedisError> = redis::cmd("LSET")
            .arg(key)
            .arg(index)
            .arg(value)
            .query_async(&mut conn)
            .await;

        // The server reports both a missing key and a bad index as range
        // errors; keep that shape for callers.
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == redis::ErrorKind::ResponseError => {
                Err(Error::IndexOutOfRange)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;

        Ok(len)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;

        Ok(value)
    }

    async fn lpop_count(&self, key: &str, count: u64) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let values: Vec<String> = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(values)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("RPOP").arg(key).query_async(&mut conn).await?;

        Ok(value)
    }

    async fn rpop_count(&self, key: &str, count: u64) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let values: Vec<String> = redis::cmd("RPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(values)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;

        Ok(values)
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<i64> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("LREM")
            .arg(key)
            .arg(count)
            .arg(value)
            .query_async(&mut conn)
            .await?;

        Ok(removed)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn();
        let created: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;

        Ok(created > 0)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let mut conn = self.conn();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;

        Ok(values)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn();
        let exists: bool = redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;

        Ok(exists)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn();
        let fields: std::collections::HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(fields.into_iter().collect())
    }

    async fn hlen(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("HLEN").arg(key).query_async(&mut conn).await?;

        Ok(len)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let mut conn = self.conn();
        let delivered: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(Message { channel, payload }),
                Err(error) => {
                    warn!(%error, channel, "dropping message with an unreadable payload");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
