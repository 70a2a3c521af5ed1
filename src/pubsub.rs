use std::collections::HashMap;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{MessageStream, StoreConnection};
use crate::codec::{Codec, Json};
use crate::store::Store;
use crate::Result;

const TOPIC_CAPACITY: usize = 256;
const LISTENER_CAPACITY: usize = 64;

/// One inbound delivery: the effective channel it arrived on plus the raw
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Publish/subscribe over the store's events channels.
///
/// Logical channel names gain the current events prefix on every call. Each
/// distinct effective channel gets one transport subscription, fanned out to
/// any number of local listeners.
pub struct PubSub<'a, C: Codec = Json> {
    store: &'a Store<C>,
}

impl<'a, C: Codec> PubSub<'a, C> {
    pub(crate) fn new(store: &'a Store<C>) -> Self {
        Self { store }
    }

    /// Sends `value` encoded through the store's codec. Returns how many
    /// connections received it; zero subscribers is not an error.
    pub async fn publish<T>(&self, channel: &str, value: &T) -> Result<i64>
    where
        T: Serialize + ?Sized,
    {
        let payload = self.store.codec().encode(value)?;
        self.publish_raw(channel, &payload).await
    }

    /// Sends a raw payload without going through the codec.
    pub async fn publish_raw(&self, channel: &str, payload: &str) -> Result<i64> {
        let channel = self.store.events_channel(channel);
        let conn = self.store.connection().await?;

        conn.publish(&channel, payload).await
    }

    /// Opens a stream of raw messages from `channel`.
    ///
    /// The stream keeps its buffered messages through an [`unsubscribe`]; it
    /// goes quiet rather than ending, and picks up again if the channel is
    /// subscribed anew. It ends only when the store itself is dropped.
    ///
    /// [`unsubscribe`]: PubSub::unsubscribe
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let channel = self.store.events_channel(channel);
        let conn = self.store.connection().await?;
        let topic = self.store.topics().listen(&conn, &channel).await?;

        let id = Uuid::new_v4();
        let (tx, receiver) = mpsc::channel(LISTENER_CAPACITY);
        let forward = tokio::spawn(forward(id, topic, tx));
        debug!(channel, listener = %id, "subscribed");

        Ok(Subscription {
            id,
            channel,
            receiver,
            forward,
        })
    }

    /// Like [`PubSub::subscribe`], with payloads decoded into `T`.
    ///
    /// Empty payloads decode to `T::default()`; payloads that fail to decode
    /// are logged and skipped.
    pub async fn subscribe_typed<T>(&self, channel: &str) -> Result<TypedSubscription<T, C>>
    where
        T: DeserializeOwned + Default,
    {
        Ok(TypedSubscription {
            inner: self.subscribe(channel).await?,
            store: self.store.clone(),
            _marker: PhantomData,
        })
    }

    /// Stream of raw payloads only, for callers that do not care which
    /// channel a message arrived on.
    pub async fn observe(&self, channel: &str) -> Result<Payloads> {
        Ok(Payloads {
            inner: self.subscribe(channel).await?,
        })
    }

    /// Stream of decoded payloads only.
    pub async fn observe_typed<T>(&self, channel: &str) -> Result<TypedPayloads<T, C>>
    where
        T: DeserializeOwned + Default,
    {
        Ok(TypedPayloads {
            inner: self.subscribe_typed(channel).await?,
        })
    }

    /// Invokes `callback` with the effective channel and raw payload of
    /// every message, until the channel is unsubscribed.
    pub async fn subscribe_callback<F>(&self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(String, String) + Send + 'static,
    {
        let channel = self.store.events_channel(channel);
        let conn = self.store.connection().await?;
        let topic = self.store.topics().listen(&conn, &channel).await?;

        let handle = tokio::spawn(run_callback(topic, move |message| {
            callback(message.channel, message.payload);
        }));
        self.store.topics().track(&channel, handle).await;

        Ok(())
    }

    /// Invokes `callback` with the effective channel and decoded payload of
    /// every message. Empty payloads decode to `T::default()`; payloads that
    /// fail to decode are logged and skipped.
    pub async fn subscribe_typed_callback<T, F>(&self, channel: &str, callback: F) -> Result<()>
    where
        T: DeserializeOwned + Default + Send + 'static,
        F: Fn(String, T) + Send + 'static,
    {
        let channel = self.store.events_channel(channel);
        let conn = self.store.connection().await?;
        let topic = self.store.topics().listen(&conn, &channel).await?;

        let store = self.store.clone();
        let handle = tokio::spawn(run_callback(topic, move |message| {
            if let Some(value) = decode_payload(store.codec(), &message.payload) {
                callback(message.channel, value);
            }
        }));
        self.store.topics().track(&channel, handle).await;

        Ok(())
    }

    /// Stops delivery on `channel`: the transport subscription is closed and
    /// callback tasks are cancelled. Open subscription streams are left open
    /// and resume if the channel is subscribed again.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let channel = self.store.events_channel(channel);
        self.store.topics().stop(&channel).await;
        debug!(channel, "unsubscribed");

        Ok(())
    }
}

fn decode_payload<C: Codec, T>(codec: &C, payload: &str) -> Option<T>
where
    T: DeserializeOwned + Default,
{
    if payload.is_empty() {
        return Some(T::default());
    }
    match codec.decode(payload) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(%error, "skipping message that failed to decode");
            None
        }
    }
}

/// Per-channel fan-out state, keyed by effective channel name.
///
/// Each topic owns the single transport subscription for its channel (the
/// pump task) and the broadcast sender local listeners hang off. The sender
/// outlives an unsubscribe so that idle listeners survive it.
pub(crate) struct Topics {
    inner: Mutex<HashMap<String, Topic>>,
}

struct Topic {
    sender: broadcast::Sender<Message>,
    pump: Option<JoinHandle<()>>,
    callbacks: Vec<JoinHandle<()>>,
}

// The pump and callback tasks are detached, so they would outlive the
// registry unless aborted here. With the pump gone and the sender dropped,
// listener streams see a closed topic and end.
impl Drop for Topic {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        for callback in self.callbacks.drain(..) {
            callback.abort();
        }
    }
}

impl Topics {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Receiver for `channel`, starting the transport pump when it is not
    /// already running.
    async fn listen(
        &self,
        conn: &Arc<dyn StoreConnection>,
        channel: &str,
    ) -> Result<broadcast::Receiver<Message>> {
        let mut topics = self.inner.lock().await;

        let topic = topics.entry(channel.to_string()).or_insert_with(|| Topic {
            sender: broadcast::channel(TOPIC_CAPACITY).0,
            pump: None,
            callbacks: Vec::new(),
        });

        let running = topic
            .pump
            .as_ref()
            .map(|pump| !pump.is_finished())
            .unwrap_or(false);
        if !running {
            let stream = conn.subscribe(channel).await?;
            topic.pump = Some(tokio::spawn(pump(
                channel.to_string(),
                stream,
                topic.sender.clone(),
            )));
        }

        Ok(topic.sender.subscribe())
    }

    /// Ties a callback task's lifetime to its channel.
    async fn track(&self, channel: &str, handle: JoinHandle<()>) {
        let mut topics = self.inner.lock().await;
        if let Some(topic) = topics.get_mut(channel) {
            topic.callbacks.push(handle);
        } else {
            // No topic means the channel was never listened to; nothing will
            // ever reach the task, so end it.
            handle.abort();
        }
    }

    /// Tears down the transport subscription and callback tasks for
    /// `channel`. The broadcast sender stays, keeping listener streams open.
    async fn stop(&self, channel: &str) {
        let mut topics = self.inner.lock().await;
        if let Some(topic) = topics.get_mut(channel) {
            if let Some(pump) = topic.pump.take() {
                pump.abort();
            }
            for callback in topic.callbacks.drain(..) {
                callback.abort();
            }
        }
    }
}

/// Moves messages from the transport stream onto the topic's broadcast
/// sender. Aborted on unsubscribe, which also drops the transport stream.
async fn pump(channel: String, mut stream: MessageStream, sender: broadcast::Sender<Message>) {
    while let Some(message) = stream.next().await {
        // A send error only means nobody is listening right now.
        if sender.send(message).is_err() {
            debug!(channel, "no listeners for inbound message");
        }
    }
    debug!(channel, "transport subscription ended");
}

async fn run_callback<F>(mut topic: broadcast::Receiver<Message>, callback: F)
where
    F: Fn(Message) + Send + 'static,
{
    loop {
        match topic.recv().await {
            Ok(message) => callback(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "callback lagged behind its topic");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Moves messages from the topic onto a listener's private queue, so a slow
/// listener backs up its own buffer instead of the topic.
async fn forward(id: Uuid, mut topic: broadcast::Receiver<Message>, tx: mpsc::Sender<Message>) {
    loop {
        match topic.recv().await {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    debug!(listener = %id, "listener dropped");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(listener = %id, skipped, "listener lagged behind its topic");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Stream of raw [`Message`]s from one channel.
pub struct Subscription {
    id: Uuid,
    channel: String,
    receiver: mpsc::Receiver<Message>,
    forward: JoinHandle<()>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Effective channel this subscription was opened on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

/// Stream of `(effective channel, decoded payload)` pairs.
pub struct TypedSubscription<T, C: Codec = Json> {
    inner: Subscription,
    store: Store<C>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: Codec> TypedSubscription<T, C> {
    pub fn id(&self) -> Uuid {
        self.inner.id()
    }

    pub fn channel(&self) -> &str {
        self.inner.channel()
    }
}

impl<T, C> Stream for TypedSubscription<T, C>
where
    T: DeserializeOwned + Default,
    C: Codec,
{
    type Item = (String, T);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(message)) => {
                    match decode_payload(this.store.codec(), &message.payload) {
                        Some(value) => return Poll::Ready(Some((message.channel, value))),
                        None => continue,
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream of raw payloads from one channel.
pub struct Payloads {
    inner: Subscription,
}

impl Stream for Payloads {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|message| message.map(|message| message.payload))
    }
}

/// Stream of decoded payloads from one channel.
pub struct TypedPayloads<T, C: Codec = Json> {
    inner: TypedSubscription<T, C>,
}

impl<T, C> Stream for TypedPayloads<T, C>
where
    T: DeserializeOwned + Default,
    C: Codec,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|next| next.map(|(_, value)| value))
    }
}
