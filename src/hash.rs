use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::client::StoreConnection;
use crate::codec::{Codec, Json};
use crate::store::Store;
use crate::Result;

/// A hash field name and its typed form.
///
/// Field names live in the store as plain strings; this trait pins down the
/// conversion both ways. The blanket implementation covers every type that
/// round-trips through its string form, which includes `String`, integers,
/// `Uuid` and the like.
pub trait FieldKey: Sized {
    fn to_field(&self) -> String;

    /// `None` when the stored field name does not parse back.
    fn from_field(field: &str) -> Option<Self>;
}

impl<T> FieldKey for T
where
    T: ToString + FromStr,
{
    fn to_field(&self) -> String {
        self.to_string()
    }

    fn from_field(field: &str) -> Option<Self> {
        field.parse().ok()
    }
}

/// Hash of raw string fields stored at one key.
pub struct HashStore<'a, C: Codec = Json> {
    store: &'a Store<C>,
    key: String,
}

impl<'a, C: Codec> HashStore<'a, C> {
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

    /// Creates or overwrites `field`.
    pub async fn set(&self, field: &str, value: &str) -> Result<()> {
        let key = self.effective_key();
        self.conn().await?.hset(&key, field, value).await?;

        Ok(())
    }

    pub async fn get(&self, field: &str) -> Result<Option<String>> {
        let key = self.effective_key();
        self.conn().await?.hget(&key, field).await
    }

    /// Values for several fields in one round trip. The result has one entry
    /// per requested field, `None` for absent ones, positions preserved.
    pub async fn get_many<I, S>(&self, fields: I) -> Result<Vec<Option<String>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let key = self.effective_key();
        self.conn().await?.hmget(&key, &fields).await
    }

    /// Removes `field`. Returns whether it existed.
    pub async fn delete(&self, field: &str) -> Result<bool> {
        let key = self.effective_key();
        self.conn().await?.hdel(&key, field).await
    }

    pub async fn exists(&self, field: &str) -> Result<bool> {
        let key = self.effective_key();
        self.conn().await?.hexists(&key, field).await
    }

    /// Reads `field` and, when present, removes it. The two steps are
    /// separate commands, not one atomic operation.
    pub async fn get_delete(&self, field: &str) -> Result<Option<String>> {
        let key = self.effective_key();
        let conn = self.conn().await?;

        let value = conn.hget(&key, field).await?;
        if value.is_some() {
            conn.hdel(&key, field).await?;
        }

        Ok(value)
    }

    /// Every field and value, in no particular order.
    pub async fn all(&self) -> Result<Vec<(String, String)>> {
        let key = self.effective_key();
        self.conn().await?.hgetall(&key).await
    }

    /// Number of fields; an absent key counts as empty.
    pub async fn len(&self) -> Result<i64> {
        let key = self.effective_key();
        self.conn().await?.hlen(&key).await
    }

    /// Drops the hash and every field in it.
    pub async fn clear(&self) -> Result<()> {
        let key = self.effective_key();
        self.conn().await?.del(&key).await?;

        Ok(())
    }
}

/// Hash with typed field names and values.
///
/// Values go through the store's codec; field names go through [`FieldKey`].
/// Single-field reads propagate decode failures, batch reads replace them
/// with `None` (and log the skip) so one bad entry does not hide the rest.
pub struct TypedHash<'a, K, V, C: Codec = Json> {
    raw: HashStore<'a, C>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K, V, C> TypedHash<'a, K, V, C>
where
    K: FieldKey,
    V: Serialize + DeserializeOwned,
    C: Codec,
{
    pub(crate) fn new(store: &'a Store<C>, key: &str) -> Self {
        Self {
            raw: HashStore::new(store, key),
            _marker: PhantomData,
        }
    }

    fn codec(&self) -> &C {
        self.raw.store.codec()
    }

    fn decode_strict(&self, payload: Option<String>) -> Result<Option<V>> {
        match payload {
            Some(payload) if !payload.is_empty() => Ok(Some(self.codec().decode(&payload)?)),
            _ => Ok(None),
        }
    }

    fn decode_lenient(&self, payload: &str) -> Option<V> {
        if payload.is_empty() {
            return None;
        }
        match self.codec().decode(payload) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%error, key = %self.raw.key, "skipping hash value that failed to decode");
                None
            }
        }
    }

    pub async fn set(&self, field: &K, value: &V) -> Result<()> {
        let payload = self.codec().encode(value)?;
        self.raw.set(&field.to_field(), &payload).await
    }

    pub async fn get(&self, field: &K) -> Result<Option<V>> {
        let payload = self.raw.get(&field.to_field()).await?;
        self.decode_strict(payload)
    }

    /// Values for several fields, positions preserved. Absent fields and
    /// values that fail to decode both come back as `None`.
    pub async fn get_many(&self, fields: &[K]) -> Result<Vec<Option<V>>> {
        let names: Vec<String> = fields.iter().map(FieldKey::to_field).collect();
        let payloads = self.raw.get_many(names).await?;

        Ok(payloads
            .into_iter()
            .map(|payload| payload.and_then(|payload| self.decode_lenient(&payload)))
            .collect())
    }

    pub async fn delete(&self, field: &K) -> Result<bool> {
        self.raw.delete(&field.to_field()).await
    }

    pub async fn exists(&self, field: &K) -> Result<bool> {
        self.raw.exists(&field.to_field()).await
    }

    pub async fn get_delete(&self, field: &K) -> Result<Option<V>> {
        let payload = self.raw.get_delete(&field.to_field()).await?;
        self.decode_strict(payload)
    }

    /// Every entry, in no particular order. Fields whose name does not parse
    /// back into `K` are skipped; values that fail to decode keep their field
    /// and come back as `None`.
    pub async fn all(&self) -> Result<Vec<(K, Option<V>)>> {
        let entries = self.raw.all().await?;

        Ok(entries
            .into_iter()
            .filter_map(|(field, payload)| match K::from_field(&field) {
                Some(key) => Some((key, self.decode_lenient(&payload))),
                None => {
                    warn!(field, key = %self.raw.key, "skipping hash field that failed to parse");
                    None
                }
            })
            .collect())
    }

    pub async fn len(&self) -> Result<i64> {
        self.raw.len().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.raw.clear().await
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn field_keys_round_trip_through_strings() {
        assert_eq!(42u32.to_field(), "42");
        assert_eq!(u32::from_field("42"), Some(42));
        assert_eq!(u32::from_field("not-a-number"), None);

        assert_eq!("name".to_string().to_field(), "name");
        assert_eq!(String::from_field("name"), Some("name".to_string()));

        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_field(&id.to_field()), Some(id));
    }
}
