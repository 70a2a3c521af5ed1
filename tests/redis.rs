//! End-to-end tests against a real Redis server.
//!
//! They expect a server at `redis://127.0.0.1:6379/` and are ignored by
//! default; run them with `cargo test -- --ignored`. Every run works under a
//! fresh random prefix, so no cleanup is needed between runs.

use std::sync::Arc;

use rediskit::config::{Dynamic, Settings, Source};
use rediskit::Store;
use serde::{Deserialize, Serialize};
use serial_test::serial;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

const URL: &str = "redis://127.0.0.1:6379/";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Player {
    name: String,
    score: u32,
}

fn store() -> (Store, Arc<Dynamic>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let run = Uuid::new_v4();
    let config = Arc::new(Dynamic::new(
        Settings::new()
            .with_connection(URL)
            .with_data_prefix(format!("rediskit-test:{run}:"))
            .with_events_prefix(format!("rediskit-test-events:{run}:")),
    ));

    (Store::new(config.clone()), config)
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis server"]
async fn scalars_round_trip() {
    let (store, _config) = store();
    let alice = Player {
        name: "alice".to_string(),
        score: 7,
    };

    store.set("player", &alice).await.unwrap();
    assert_eq!(store.get::<Player>("player").await.unwrap(), Some(alice));

    assert!(store.delete("player").await.unwrap());
    assert_eq!(store.get::<Player>("player").await.unwrap(), None);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis server"]
async fn scalar_ttl_expires_server_side() {
    let (store, _config) = store();

    store
        .set_with_ttl("flash", "gone-soon", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(store.get::<String>("flash").await.unwrap().is_some());

    sleep(Duration::from_millis(400)).await;
    assert_eq!(store.get::<String>("flash").await.unwrap(), None);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis server"]
async fn lists_round_trip() {
    let (store, _config) = store();
    let list = store.list("queue");

    assert_eq!(list.append(["a", "b", "c"]).await.unwrap(), 3);
    list.prepend(["x", "y"]).await.unwrap();
    assert_eq!(list.all().await.unwrap(), vec!["x", "y", "a", "b", "c"]);

    assert_eq!(list.range(0, -1).await.unwrap(), list.all().await.unwrap());
    assert_eq!(list.pop().await.unwrap().as_deref(), Some("x"));
    assert_eq!(list.pop_tail_many(2).await.unwrap(), vec!["c", "b"]);

    list.trim(0, 0).await.unwrap();
    assert_eq!(list.len().await.unwrap(), 1);

    // Leave nothing behind.
    list.trim(1, 0).await.unwrap();
    assert_eq!(list.len().await.unwrap(), 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis server"]
async fn hashes_round_trip() {
    let (store, _config) = store();
    let hash = store.typed_hash::<u32, Player>("roster");

    hash.set(
        &1,
        &Player {
            name: "alice".to_string(),
            score: 7,
        },
    )
    .await
    .unwrap();
    hash.set(
        &2,
        &Player {
            name: "bob".to_string(),
            score: 3,
        },
    )
    .await
    .unwrap();

    assert_eq!(hash.len().await.unwrap(), 2);
    assert_eq!(
        hash.get(&1).await.unwrap().map(|p| p.name),
        Some("alice".to_string())
    );

    assert!(hash.delete(&1).await.unwrap());
    assert_eq!(hash.len().await.unwrap(), 1);

    hash.clear().await.unwrap();
    assert_eq!(hash.len().await.unwrap(), 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis server"]
async fn pubsub_round_trip() {
    let (store, _config) = store();
    let pubsub = store.pubsub();

    let mut sub = pubsub.subscribe("news").await.unwrap();
    // Give the server a beat to register the subscriber.
    sleep(Duration::from_millis(100)).await;

    assert_eq!(pubsub.publish("news", "hello").await.unwrap(), 1);

    let message = timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for the message")
        .expect("subscription ended unexpectedly");
    assert!(message.channel.ends_with(":news"));
    assert_eq!(message.payload, "\"hello\"");

    pubsub.unsubscribe("news").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(pubsub.publish("news", "nobody").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis server"]
async fn prefix_changes_reach_the_server() {
    let (store, config) = store();

    store.set("key", "value").await.unwrap();

    let original = config.data_prefix();
    config.set_data_prefix(format!("{original}elsewhere:"));
    assert_eq!(store.get::<String>("key").await.unwrap(), None);

    config.set_data_prefix(original);
    assert_eq!(
        store.get::<String>("key").await.unwrap().as_deref(),
        Some("value")
    );
}
