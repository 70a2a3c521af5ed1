use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::client::StoreConnection;
use crate::codec::{Codec, Json};
use crate::store::Store;
use crate::Result;

/// List of raw string values stored at one key.
///
/// Indexes follow the store's list commands: zero-based from the head,
/// negative values count back from the tail. Range bounds are inclusive.
/// Ref: <https://redis.io/docs/latest/commands/lrange/>
pub struct ListStore<'a, C: Codec = Json> {
    store: &'a Store<C>,
    key: String,
}

impl<'a, C: Codec> ListStore<'a, C> {
    pub(crate) fn new(store: &'a Store<C>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }

    fn effective_key(&self) -> String {
        self.store.data_key(&self.key)
    }

    async fn conn(&self) -> Result<Arc<dyn StoreConnection>> {
        self.store.connection().await
    }

    /// Inserts values at the head, keeping their argument order. Returns the
    /// new length.
    pub async fn prepend<I, S>(&self, values: I) -> Result<i64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // The head-push command inserts one value at a time, each in front
        // of the previous one; push in reverse so the argument order wins.
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self.len().await;
        }
        values.reverse();

        let key = self.effective_key();
        self.conn().await?.lpush(&key, &values).await
    }

    /// Appends values at the tail. Returns the new length.
    pub async fn append<I, S>(&self, values: I) -> Result<i64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self.len().await;
        }

        let key = self.effective_key();
        self.conn().await?.rpush(&key, &values).await
    }

    /// Value at `index`, `None` when the index falls outside the list.
    pub async fn at(&self, index: i64) -> Result<Option<String>> {
        let key = self.effective_key();
        self.conn().await?.lindex(&key, index).await
    }

    /// Overwrites the value at `index`; errors when the index falls outside
    /// the list.
    pub async fn set(&self, index: i64, value: &str) -> Result<()> {
        let key = self.effective_key();
        self.conn().await?.lset(&key, index, value).await
    }

    /// Current length; an absent key counts as empty.
    pub async fn len(&self) -> Result<i64> {
        let key = self.effective_key();
        self.conn().await?.llen(&key).await
    }

    /// Removes and returns the head value.
    pub async fn pop(&self) -> Result<Option<String>> {
        let key = self.effective_key();
        self.conn().await?.lpop(&key).await
    }

    /// Removes and returns up to `count` values from the head.
    pub async fn pop_many(&self, count: u64) -> Result<Vec<String>> {
        let key = self.effective_key();
        self.conn().await?.lpop_count(&key, count).await
    }

    /// Removes and returns the tail value.
    pub async fn pop_tail(&self) -> Result<Option<String>> {
        let key = self.effective_key();
        self.conn().await?.rpop(&key).await
    }

    /// Removes and returns up to `count` values from the tail, nearest to
    /// the tail first.
    pub async fn pop_tail_many(&self, count: u64) -> Result<Vec<String>> {
        let key = self.effective_key();
        self.conn().await?.rpop_count(&key, count).await
    }

    /// Values between `start` and `stop`, both inclusive, both possibly
    /// negative. An inverted or out-of-range window yields an empty list.
    pub async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>> {
        let key = self.effective_key();
        self.conn().await?.lrange(&key, start, stop).await
    }

    /// The whole list, head to tail.
    pub async fn all(&self) -> Result<Vec<String>> {
        self.range(0, -1).await
    }

    /// Removes occurrences of `value`. A positive `count` removes that many
    /// scanning from the head, a negative one scans from the tail, zero
    /// removes all. Returns how many were removed.
    /// Ref: <https://redis.io/docs/latest/commands/lrem/>
    pub async fn remove(&self, value: &str, count: i64) -> Result<i64> {
        let key = self.effective_key();
        self.conn().await?.lrem(&key, count, value).await
    }

    /// Keeps only the values between `start` and `stop`, both inclusive.
    pub async fn trim(&self, start: i64, stop: i64) -> Result<()> {
        let key = self.effective_key();
        self.conn().await?.ltrim(&key, start, stop).await
    }
}

/// List of `T` values encoded through the store's codec.
///
/// Single-value reads propagate decode failures. Batch reads instead skip
/// values that fail to decode, logging each skip, so one bad entry does not
/// hide the rest of the list.
pub struct TypedList<'a, T, C: Codec = Json> {
    raw: ListStore<'a, C>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, C> TypedList<'a, T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    pub(crate) fn new(store: &'a Store<C>, key: &str) -> Self {
        Self {
            raw: ListStore::new(store, key),
            _marker: PhantomData,
        }
    }

    fn codec(&self) -> &C {
        self.raw.store.codec()
    }

    fn encode_all(&self, values: &[T]) -> Result<Vec<String>> {
        values.iter().map(|value| self.codec().encode(value)).collect()
    }

    fn decode_one(&self, payload: Option<String>) -> Result<Option<T>> {
        match payload {
            Some(payload) if !payload.is_empty() => Ok(Some(self.codec().decode(&payload)?)),
            _ => Ok(None),
        }
    }

    fn decode_all(&self, payloads: Vec<String>) -> Vec<T> {
        payloads
            .iter()
            .filter_map(|payload| match self.codec().decode(payload) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(%error, key = %self.raw.key, "skipping list value that failed to decode");
                    None
                }
            })
            .collect()
    }

    pub async fn prepend(&self, values: &[T]) -> Result<i64> {
        self.raw.prepend(self.encode_all(values)?).await
    }

    pub async fn append(&self, values: &[T]) -> Result<i64> {
        self.raw.append(self.encode_all(values)?).await
    }

    pub async fn at(&self, index: i64) -> Result<Option<T>> {
        let payload = self.raw.at(index).await?;
        self.decode_one(payload)
    }

    pub async fn set(&self, index: i64, value: &T) -> Result<()> {
        let payload = self.codec().encode(value)?;
        self.raw.set(index, &payload).await
    }

    pub async fn len(&self) -> Result<i64> {
        self.raw.len().await
    }

    pub async fn pop(&self) -> Result<Option<T>> {
        let payload = self.raw.pop().await?;
        self.decode_one(payload)
    }

    pub async fn pop_many(&self, count: u64) -> Result<Vec<T>> {
        let payloads = self.raw.pop_many(count).await?;
        Ok(self.decode_all(payloads))
    }

    pub async fn pop_tail(&self) -> Result<Option<T>> {
        let payload = self.raw.pop_tail().await?;
        self.decode_one(payload)
    }

    pub async fn pop_tail_many(&self, count: u64) -> Result<Vec<T>> {
        let payloads = self.raw.pop_tail_many(count).await?;
        Ok(self.decode_all(payloads))
    }

    pub async fn range(&self, start: i64, stop: i64) -> Result<Vec<T>> {
        let payloads = self.raw.range(start, stop).await?;
        Ok(self.decode_all(payloads))
    }

    pub async fn all(&self) -> Result<Vec<T>> {
        self.range(0, -1).await
    }

    /// Removes occurrences of `value`, with the same `count` semantics as
    /// [`ListStore::remove`]. Matching happens on the encoded form.
    pub async fn remove(&self, value: &T, count: i64) -> Result<i64> {
        let payload = self.codec().encode(value)?;
        self.raw.remove(&payload, count).await
    }

    pub async fn trim(&self, start: i64, stop: i64) -> Result<()> {
        self.raw.trim(start, stop).await
    }
}
