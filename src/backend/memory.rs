use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::sync::{broadcast, Notify, OnceCell};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::warn;

use crate::client::{MessageStream, StoreClient, StoreConnection};
use crate::config::Source;
use crate::pubsub::Message;
use crate::{Error, Result};

const HUB_CAPACITY: usize = 256;

/// In-process store client.
///
/// Speaks the same seam as the Redis client, with matching command semantics,
/// so the facades can run without a server. Clones share one connection and
/// therefore one data set; independent instances are fully isolated.
#[derive(Clone, Default)]
pub struct MemoryStoreClient {
    conn: Arc<OnceCell<Arc<MemoryConnection>>>,
}

#[async_trait]
impl StoreClient for MemoryStoreClient {
    async fn connect(&self, _config: &dyn Source) -> Result<Arc<dyn StoreConnection>> {
        let conn = self
            .conn
            .get_or_init(|| async { MemoryConnection::new() })
            .await;

        let conn = Arc::clone(conn);
        let conn: Arc<dyn StoreConnection> = conn;
        Ok(conn)
    }
}

/// Keys live in a single map, each holding one kind of value. Scalars may
/// carry a deadline; an ordered index over deadlines drives the sweeper task
/// that removes keys when their time-to-live elapses.
struct MemoryConnection {
    state: Mutex<State>,
    waker: Notify,
    channels: Mutex<HashMap<String, broadcast::Sender<Message>>>,
}

impl MemoryConnection {
    fn new() -> Arc<Self> {
        let conn = Arc::new(MemoryConnection {
            state: Mutex::new(State::default()),
            waker: Notify::new(),
            channels: Mutex::new(HashMap::new()),
        });

        tokio::spawn({
            let conn = conn.clone();
            async move { sweep(conn).await }
        });

        conn
    }

    fn remove_expired_keys(&self) -> Option<Instant> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let now = Instant::now();

        let expired: Vec<(Instant, Key)> = state
            .ttls
            .iter()
            .take_while(|(expires_at, _)| expires_at <= &now)
            .cloned()
            .collect();

        for (when, key) in expired {
            state.ttls.remove(&(when, key.clone()));

            // The key may have been overwritten since this deadline was
            // scheduled; only drop it if the deadline is still the live one.
            let still_current = matches!(
                state.keys.get(&key),
                Some(Entry::Scalar(scalar)) if scalar.expires_at == Some(when)
            );
            if still_current {
                state.keys.remove(&key);
            }
        }

        state.ttls.iter().next().map(|&(expires_at, _)| expires_at)
    }
}

async fn sweep(conn: Arc<MemoryConnection>) {
    loop {
        let next_expiration = conn.remove_expired_keys();

        if let Some(next_expiration) = next_expiration {
            tokio::select! {
                _ = sleep_until(next_expiration) => {}
                _ = conn.waker.notified() => {}
            }
        } else {
            conn.waker.notified().await;
        }
    }
}

type Key = String;

struct Scalar {
    data: Bytes,
    expires_at: Option<Instant>,
}

enum Entry {
    Scalar(Scalar),
    List(Vec<Bytes>),
    Hash(HashMap<String, Bytes>),
}

#[derive(Default)]
struct State {
    keys: HashMap<Key, Entry>,
    ttls: BTreeSet<(Instant, Key)>,
}

impl State {
    /// Lazy expiry, so reads never observe a scalar past its deadline even
    /// before the sweeper runs.
    fn drop_if_expired(&mut self, key: &str) {
        let deadline = match self.keys.get(key) {
            Some(Entry::Scalar(scalar)) => match scalar.expires_at {
                Some(when) if when <= Instant::now() => when,
                _ => return,
            },
            _ => return,
        };

        self.keys.remove(key);
        self.ttls.remove(&(deadline, key.to_string()));
    }

    /// Drops the deadline scheduled for `key`, if any. Called before every
    /// overwrite or removal so the ttl index never outlives its entry.
    fn unschedule(&mut self, key: &str) {
        if let Some(Entry::Scalar(scalar)) = self.keys.get(key) {
            if let Some(when) = scalar.expires_at {
                self.ttls.remove(&(when, key.to_string()));
            }
        }
    }

    fn list(&mut self, key: &str) -> Result<Option<&Vec<Bytes>>> {
        self.drop_if_expired(key);
        match self.keys.get(key) {
            Some(Entry::List(items)) => Ok(Some(items)),
            Some(_) => Err(wrong_kind(key)),
            None => Ok(None),
        }
    }

    fn existing_list_mut(&mut self, key: &str) -> Result<Option<&mut Vec<Bytes>>> {
        self.drop_if_expired(key);
        match self.keys.get_mut(key) {
            Some(Entry::List(items)) => Ok(Some(items)),
            Some(_) => Err(wrong_kind(key)),
            None => Ok(None),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut Vec<Bytes>> {
        self.drop_if_expired(key);
        match self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()))
        {
            Entry::List(items) => Ok(items),
            _ => Err(wrong_kind(key)),
        }
    }

    fn drop_list_if_empty(&mut self, key: &str) {
        if matches!(self.keys.get(key), Some(Entry::List(items)) if items.is_empty()) {
            self.keys.remove(key);
        }
    }

    fn hash(&mut self, key: &str) -> Result<Option<&HashMap<String, Bytes>>> {
        self.drop_if_expired(key);
        match self.keys.get(key) {
            Some(Entry::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(wrong_kind(key)),
            None => Ok(None),
        }
    }

    fn existing_hash_mut(&mut self, key: &str) -> Result<Option<&mut HashMap<String, Bytes>>> {
        self.drop_if_expired(key);
        match self.keys.get_mut(key) {
            Some(Entry::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(wrong_kind(key)),
            None => Ok(None),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, Bytes>> {
        self.drop_if_expired(key);
        match self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(fields) => Ok(fields),
            _ => Err(wrong_kind(key)),
        }
    }

    fn drop_hash_if_empty(&mut self, key: &str) {
        if matches!(self.keys.get(key), Some(Entry::Hash(fields)) if fields.is_empty()) {
            self.keys.remove(key);
        }
    }
}

fn blob(value: &str) -> Bytes {
    Bytes::copy_from_slice(value.as_bytes())
}

// Values only enter the map through `blob`, so they are always valid UTF-8.
fn text(data: &Bytes) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn wrong_kind(key: &str) -> Error {
    Error::WrongKind {
        key: key.to_string(),
    }
}

/// Clamps a possibly negative inclusive range to `start..stop` bounds.
fn range_bounds(len: usize, start: i64, stop: i64) -> (usize, usize) {
    let len = len as i64;
    let start = if start < 0 {
        (len + start).max(0)
    } else {
        start.min(len)
    };
    let stop = if stop < 0 {
        (len + stop + 1).max(0)
    } else {
        stop.saturating_add(1).min(len)
    };

    (start as usize, stop as usize)
}

/// Resolves a possibly negative index to a concrete position, if in range.
fn position(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };

    (0..len).contains(&resolved).then(|| resolved as usize)
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.drop_if_expired(key);

        match state.keys.get(key) {
            Some(Entry::Scalar(scalar)) => Ok(Some(text(&scalar.data))),
            Some(_) => Err(wrong_kind(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.unschedule(key);

        match ttl {
            Some(ttl) => {
                let expires_at = Instant::now() + ttl;
                let scalar = Scalar {
                    data: blob(value),
                    expires_at: Some(expires_at),
                };

                state.keys.insert(key.to_string(), Entry::Scalar(scalar));
                state.ttls.insert((expires_at, key.to_string()));

                let expires_next = state
                    .ttls
                    .iter()
                    .next()
                    .map(|(_, next)| next.as_str() == key)
                    .unwrap_or(false);
                if expires_next {
                    self.waker.notify_one();
                }
            }
            None => {
                let scalar = Scalar {
                    data: blob(value),
                    expires_at: None,
                };
                state.keys.insert(key.to_string(), Entry::Scalar(scalar));
            }
        }

        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.drop_if_expired(key);
        state.unschedule(key);

        Ok(state.keys.remove(key).is_some())
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<i64> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let items = state.list_mut(key)?;
        for value in values {
            items.insert(0, blob(value));
        }
        let len = items.len() as i64;

        state.drop_list_if_empty(key);
        Ok(len)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<i64> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let items = state.list_mut(key)?;
        items.extend(values.iter().map(|value| blob(value)));
        let len = items.len() as i64;

        state.drop_list_if_empty(key);
        Ok(len)
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.list(key)? else {
            return Ok(None);
        };

        Ok(position(items.len(), index).map(|at| text(&items[at])))
    }

    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Err(Error::IndexOutOfRange);
        };

        match position(items.len(), index) {
            Some(at) => {
                items[at] = blob(value);
                Ok(())
            }
            None => Err(Error::IndexOutOfRange),
        }
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        Ok(state.list(key)?.map(|items| items.len() as i64).unwrap_or(0))
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Ok(None);
        };
        let popped = if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        };

        state.drop_list_if_empty(key);
        Ok(popped.map(|data| text(&data)))
    }

    async fn lpop_count(&self, key: &str, count: u64) -> Result<Vec<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Ok(Vec::new());
        };
        let take = (count as usize).min(items.len());
        let popped: Vec<String> = items.drain(..take).map(|data| text(&data)).collect();

        state.drop_list_if_empty(key);
        Ok(popped)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Ok(None);
        };
        let popped = items.pop();

        state.drop_list_if_empty(key);
        Ok(popped.map(|data| text(&data)))
    }

    async fn rpop_count(&self, key: &str, count: u64) -> Result<Vec<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Ok(Vec::new());
        };
        let take = (count as usize).min(items.len());
        let from = items.len() - take;
        let popped: Vec<String> = items.drain(from..).rev().map(|data| text(&data)).collect();

        state.drop_list_if_empty(key);
        Ok(popped)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.list(key)? else {
            return Ok(Vec::new());
        };

        let (start, stop) = range_bounds(items.len(), start, stop);
        if start >= stop {
            return Ok(Vec::new());
        }

        Ok(items[start..stop].iter().map(text).collect())
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<i64> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Ok(0);
        };

        let target = blob(value);
        let mut removed = 0i64;

        if count == 0 {
            let before = items.len();
            items.retain(|item| item != &target);
            removed = (before - items.len()) as i64;
        } else if count > 0 {
            let mut remaining = count;
            let mut index = 0;
            while index < items.len() && remaining > 0 {
                if items[index] == target {
                    items.remove(index);
                    removed += 1;
                    remaining -= 1;
                } else {
                    index += 1;
                }
            }
        } else {
            let mut remaining = -count;
            let mut index = items.len();
            while index > 0 && remaining > 0 {
                index -= 1;
                if items[index] == target {
                    items.remove(index);
                    removed += 1;
                    remaining -= 1;
                }
            }
        }

        state.drop_list_if_empty(key);
        Ok(removed)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(items) = state.existing_list_mut(key)? else {
            return Ok(());
        };

        let (start, stop) = range_bounds(items.len(), start, stop);
        if start >= stop {
            items.clear();
        } else {
            items.truncate(stop);
            items.drain(..start);
        }

        state.drop_list_if_empty(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let fields = state.hash_mut(key)?;
        let created = fields.insert(field.to_string(), blob(value)).is_none();

        Ok(created)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(fields) = state.hash(key)? else {
            return Ok(None);
        };

        Ok(fields.get(field).map(text))
    }

    async fn hmget(&self, key: &str, wanted: &[String]) -> Result<Vec<Option<String>>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(fields) = state.hash(key)? else {
            return Ok(vec![None; wanted.len()]);
        };

        Ok(wanted
            .iter()
            .map(|field| fields.get(field).map(text))
            .collect())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(fields) = state.existing_hash_mut(key)? else {
            return Ok(false);
        };
        let removed = fields.remove(field).is_some();

        state.drop_hash_if_empty(key);
        Ok(removed)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        Ok(state
            .hash(key)?
            .map(|fields| fields.contains_key(field))
            .unwrap_or(false))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let Some(fields) = state.hash(key)? else {
            return Ok(Vec::new());
        };

        Ok(fields
            .iter()
            .map(|(field, data)| (field.clone(), text(data)))
            .collect())
    }

    async fn hlen(&self, key: &str) -> Result<i64> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        Ok(state
            .hash(key)?
            .map(|fields| fields.len() as i64)
            .unwrap_or(0))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let channels = self.channels.lock().unwrap();

        let delivered = channels
            .get(channel)
            .map(|sender| {
                sender
                    .send(Message {
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    })
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        Ok(delivered as i64)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let receiver = {
            let mut channels = self.channels.lock().unwrap();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(HUB_CAPACITY).0)
                .subscribe()
        };

        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "in-memory subscriber lagged, dropping messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::time;

    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn client_clones_share_one_connection() {
        let client = MemoryStoreClient::default();
        let twin = client.clone();

        let conn = client.connect(&Settings::new()).await.unwrap();
        let twin_conn = twin.connect(&Settings::new()).await.unwrap();

        conn.set("key", "value", None).await.unwrap();
        assert_eq!(
            twin_conn.get("key").await.unwrap().as_deref(),
            Some("value")
        );
    }

    #[tokio::test]
    async fn ttl() {
        time::pause();

        let conn = MemoryConnection::new();

        conn.set("key1", "value1", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        conn.set("key2", "value2", Some(Duration::from_secs(20)))
            .await
            .unwrap();

        assert_eq!(conn.get("key1").await.unwrap().as_deref(), Some("value1"));
        assert_eq!(conn.get("key2").await.unwrap().as_deref(), Some("value2"));

        time::advance(Duration::from_secs(10)).await;
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(conn.get("key1").await.unwrap(), None);
        assert_eq!(conn.get("key2").await.unwrap().as_deref(), Some("value2"));

        time::advance(Duration::from_secs(10)).await;
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(conn.get("key2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent_before_the_sweeper_runs() {
        time::pause();

        let conn = MemoryConnection::new();
        conn.set("key", "value", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        time::advance(Duration::from_secs(5)).await;

        assert_eq!(conn.get("key").await.unwrap(), None);
        assert!(!conn.del("key").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_drops_the_pending_deadline() {
        time::pause();

        let conn = MemoryConnection::new();
        conn.set("key", "short-lived", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        conn.set("key", "persistent", None).await.unwrap();

        time::advance(Duration::from_secs(10)).await;
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            conn.get("key").await.unwrap().as_deref(),
            Some("persistent")
        );
    }

    #[tokio::test]
    async fn lpush_inserts_values_at_the_head_one_at_a_time() {
        let conn = MemoryConnection::new();

        let len = conn
            .lpush("list", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(len, 2);

        let all = conn.lrange("list", 0, -1).await.unwrap();
        assert_eq!(all, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn lrange_resolves_negative_bounds() {
        let conn = MemoryConnection::new();
        let values: Vec<String> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        conn.rpush("list", &values).await.unwrap();

        assert_eq!(conn.lrange("list", 1, 3).await.unwrap(), vec!["b", "c", "d"]);
        assert_eq!(conn.lrange("list", -2, -1).await.unwrap(), vec!["d", "e"]);
        assert_eq!(conn.lrange("list", 3, 1).await.unwrap(), Vec::<String>::new());
        assert_eq!(conn.lrange("absent", 0, -1).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn lrem_honors_count_sign_and_zero() {
        let conn = MemoryConnection::new();
        let values: Vec<String> = ["a", "b", "a", "c", "a"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        conn.rpush("zero", &values).await.unwrap();
        assert_eq!(conn.lrem("zero", 0, "a").await.unwrap(), 3);
        assert_eq!(conn.lrange("zero", 0, -1).await.unwrap(), vec!["b", "c"]);

        conn.rpush("head", &values).await.unwrap();
        assert_eq!(conn.lrem("head", 2, "a").await.unwrap(), 2);
        assert_eq!(conn.lrange("head", 0, -1).await.unwrap(), vec!["b", "c", "a"]);

        conn.rpush("tail", &values).await.unwrap();
        assert_eq!(conn.lrem("tail", -2, "a").await.unwrap(), 2);
        assert_eq!(conn.lrange("tail", 0, -1).await.unwrap(), vec!["a", "b", "c"]);

        assert_eq!(conn.lrem("absent", 0, "a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rpop_count_returns_tail_first() {
        let conn = MemoryConnection::new();
        let values: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        conn.rpush("list", &values).await.unwrap();

        assert_eq!(conn.rpop_count("list", 2).await.unwrap(), vec!["c", "b"]);
        assert_eq!(conn.llen("list").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn popping_the_last_value_removes_the_key() {
        let conn = MemoryConnection::new();
        conn.rpush("list", &["only".to_string()]).await.unwrap();

        assert_eq!(conn.lpop("list").await.unwrap().as_deref(), Some("only"));
        assert_eq!(conn.lpop("list").await.unwrap(), None);

        // The slot is free again for other kinds.
        conn.set("list", "scalar", None).await.unwrap();
        assert_eq!(conn.get("list").await.unwrap().as_deref(), Some("scalar"));
    }

    #[tokio::test]
    async fn lset_rejects_out_of_range_indexes() {
        let conn = MemoryConnection::new();
        let values: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        conn.rpush("list", &values).await.unwrap();

        conn.lset("list", -1, "z").await.unwrap();
        assert_eq!(conn.lrange("list", 0, -1).await.unwrap(), vec!["a", "z"]);

        assert!(matches!(
            conn.lset("list", 5, "nope").await,
            Err(Error::IndexOutOfRange)
        ));
        assert!(matches!(
            conn.lset("absent", 0, "nope").await,
            Err(Error::IndexOutOfRange)
        ));
    }

    #[tokio::test]
    async fn ltrim_clears_the_list_when_the_range_is_empty() {
        let conn = MemoryConnection::new();
        let values: Vec<String> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        conn.rpush("list", &values).await.unwrap();

        conn.ltrim("list", 1, 3).await.unwrap();
        assert_eq!(conn.lrange("list", 0, -1).await.unwrap(), vec!["b", "c", "d"]);

        conn.ltrim("list", 5, 10).await.unwrap();
        assert_eq!(conn.llen("list").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lrange_and_ltrim_clamp_a_stop_past_the_end() {
        let conn = MemoryConnection::new();
        let values: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        conn.rpush("list", &values).await.unwrap();

        assert_eq!(
            conn.lrange("list", 0, i64::MAX).await.unwrap(),
            vec!["a", "b", "c"]
        );

        conn.ltrim("list", 1, i64::MAX).await.unwrap();
        assert_eq!(conn.lrange("list", 0, -1).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn operations_reject_keys_of_another_kind() {
        let conn = MemoryConnection::new();
        conn.set("scalar", "value", None).await.unwrap();

        assert!(matches!(
            conn.lpush("scalar", &["x".to_string()]).await,
            Err(Error::WrongKind { .. })
        ));
        assert!(matches!(
            conn.hset("scalar", "f", "v").await,
            Err(Error::WrongKind { .. })
        ));

        conn.rpush("list", &["x".to_string()]).await.unwrap();
        assert!(matches!(conn.get("list").await, Err(Error::WrongKind { .. })));

        // SET replaces values of any kind.
        conn.set("list", "now-a-scalar", None).await.unwrap();
        assert_eq!(
            conn.get("list").await.unwrap().as_deref(),
            Some("now-a-scalar")
        );
    }

    #[tokio::test]
    async fn hash_fields_round_trip() {
        let conn = MemoryConnection::new();

        assert!(conn.hset("hash", "f1", "v1").await.unwrap());
        assert!(!conn.hset("hash", "f1", "v2").await.unwrap());
        assert!(conn.hset("hash", "f2", "v3").await.unwrap());

        assert_eq!(conn.hget("hash", "f1").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(conn.hlen("hash").await.unwrap(), 2);
        assert!(conn.hexists("hash", "f2").await.unwrap());
        assert!(!conn.hexists("hash", "missing").await.unwrap());

        let wanted: Vec<String> = ["f1", "missing", "f2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            conn.hmget("hash", &wanted).await.unwrap(),
            vec![Some("v2".to_string()), None, Some("v3".to_string())]
        );

        assert!(conn.hdel("hash", "f1").await.unwrap());
        assert!(!conn.hdel("hash", "f1").await.unwrap());
        assert_eq!(conn.hlen("hash").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_the_last_field_removes_the_hash() {
        let conn = MemoryConnection::new();
        conn.hset("hash", "f", "v").await.unwrap();
        conn.hdel("hash", "f").await.unwrap();

        conn.set("hash", "scalar", None).await.unwrap();
        assert_eq!(conn.get("hash").await.unwrap().as_deref(), Some("scalar"));
    }

    #[tokio::test]
    async fn publish_counts_only_active_subscribers() {
        let conn = MemoryConnection::new();

        assert_eq!(conn.publish("news", "nobody").await.unwrap(), 0);

        let mut stream = conn.subscribe("news").await.unwrap();
        assert_eq!(conn.publish("news", "hello").await.unwrap(), 1);

        let message = stream.next().await.unwrap();
        assert_eq!(message.channel, "news");
        assert_eq!(message.payload, "hello");

        drop(stream);
        assert_eq!(conn.publish("news", "gone").await.unwrap(), 0);
    }
}
