use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::backend::redis::RedisStoreClient;
use crate::client::{ConnectionProvider, StoreClient, StoreConnection};
use crate::codec::{Codec, Json};
use crate::config::Source;
use crate::hash::{FieldKey, HashStore, TypedHash};
use crate::list::{ListStore, TypedList};
use crate::pubsub::{PubSub, Topics};
use crate::Result;

/// Entry point to the store: typed get/set/delete on scalar keys plus
/// accessors for the list, hash and pub/sub facades. Connects lazily on
/// first use and is cheap to clone; clones share the connection, the codec
/// and the subscription state.
///
/// Every operation re-reads the configured prefixes, so changing them in a
/// [`crate::config::Dynamic`] source affects the very next call.
pub struct Store<C: Codec = Json> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for Store<C> {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    config: Arc<dyn Source>,
    provider: ConnectionProvider,
    topics: Topics,
    codec: C,
}

impl Store<Json> {
    /// Store over the default Redis client with the default JSON codec.
    pub fn new(config: impl Source + 'static) -> Store<Json> {
        Store::with_client(config, RedisStoreClient)
    }

    /// Store over a caller-provided client, e.g. the in-process one from
    /// [`crate::backend::memory`].
    pub fn with_client(
        config: impl Source + 'static,
        client: impl StoreClient + 'static,
    ) -> Store<Json> {
        Store::with_codec(config, client, Json)
    }
}

impl<C: Codec> Store<C> {
    pub fn with_codec(
        config: impl Source + 'static,
        client: impl StoreClient + 'static,
        codec: C,
    ) -> Store<C> {
        Store {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                provider: ConnectionProvider::new(Arc::new(client)),
                topics: Topics::new(),
                codec,
            }),
        }
    }

    /// Effective key for a data item under the current data prefix.
    pub fn data_key(&self, name: &str) -> String {
        format!("{}{}", self.inner.config.data_prefix(), name)
    }

    /// Effective channel for an event under the current events prefix.
    pub fn events_channel(&self, name: &str) -> String {
        format!("{}{}", self.inner.config.events_prefix(), name)
    }

    pub(crate) async fn connection(&self) -> Result<Arc<dyn StoreConnection>> {
        self.inner.provider.connect(&self.inner.config).await
    }

    pub(crate) fn codec(&self) -> &C {
        &self.inner.codec
    }

    pub(crate) fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    /// Raw payload stored at `key`, `None` when the key is absent.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let key = self.data_key(key);
        let conn = self.connection().await?;

        conn.get(&key).await
    }

    /// Decoded value stored at `key`. Absent keys and empty payloads are
    /// `None`; a payload that fails to decode is an error.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_raw(key).await? {
            Some(payload) if !payload.is_empty() => Ok(Some(self.codec().decode(&payload)?)),
            _ => Ok(None),
        }
    }

    /// Like [`Store::get`], but falls back to `default` when the key is
    /// absent or holds an empty payload.
    pub async fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    pub async fn set_raw(&self, key: &str, value: &str) -> Result<bool> {
        let key = self.data_key(key);
        let conn = self.connection().await?;
        debug!(key, "set");

        conn.set(&key, value, None).await
    }

    pub async fn set_raw_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let key = self.data_key(key);
        let conn = self.connection().await?;
        debug!(key, ttl_ms = ttl.as_millis() as u64, "set");

        conn.set(&key, value, Some(ttl)).await
    }

    pub async fn set<T>(&self, key: &str, value: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let payload = self.codec().encode(value)?;
        self.set_raw(key, &payload).await
    }

    /// Stores the value and schedules its removal after `ttl`.
    pub async fn set_with_ttl<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let payload = self.codec().encode(value)?;
        self.set_raw_with_ttl(key, &payload, ttl).await
    }

    /// Removes `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = self.data_key(key);
        let conn = self.connection().await?;
        debug!(key, "delete");

        conn.del(&key).await
    }

    /// Raw list stored at `key`.
    pub fn list<'a>(&'a self, key: &str) -> ListStore<'a, C> {
        ListStore::new(self, key)
    }

    /// List of `T` values stored at `key`.
    pub fn typed_list<'a, T>(&'a self, key: &str) -> TypedList<'a, T, C>
    where
        T: Serialize + DeserializeOwned,
    {
        TypedList::new(self, key)
    }

    /// Raw hash stored at `key`.
    pub fn hash<'a>(&'a self, key: &str) -> HashStore<'a, C> {
        HashStore::new(self, key)
    }

    /// Hash at `key` with typed fields and values.
    pub fn typed_hash<'a, K, V>(&'a self, key: &str) -> TypedHash<'a, K, V, C>
    where
        K: FieldKey,
        V: Serialize + DeserializeOwned,
    {
        TypedHash::new(self, key)
    }

    /// Publish/subscribe over the events channels.
    pub fn pubsub(&self) -> PubSub<'_, C> {
        PubSub::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dynamic, Settings};

    #[test]
    fn prefixes_are_resolved_per_call() {
        let config = Arc::new(Dynamic::new(
            Settings::new()
                .with_data_prefix("data:")
                .with_events_prefix("events:"),
        ));
        let store = Store::with_client(
            config.clone(),
            crate::backend::memory::MemoryStoreClient::default(),
        );

        assert_eq!(store.data_key("user"), "data:user");
        assert_eq!(store.events_channel("user"), "events:user");

        config.set_data_prefix("other:");
        assert_eq!(store.data_key("user"), "other:user");
        assert_eq!(store.events_channel("user"), "events:user");
    }

    #[test]
    fn empty_prefix_leaves_names_untouched() {
        let store = Store::with_client(
            Settings::new(),
            crate::backend::memory::MemoryStoreClient::default(),
        );

        assert_eq!(store.data_key("plain"), "plain");
        assert_eq!(store.events_channel("plain"), "plain");
    }
}
