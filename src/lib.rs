//! Typed, prefix-aware convenience layer over a Redis-class key-value and
//! pub/sub store.
//!
//! A [`Store`] wraps one lazily opened connection and exposes scalar values,
//! lists, hashes and publish/subscribe, each in a raw string form and a typed
//! form going through a pluggable codec (JSON by default). Key prefixes come
//! from a [`config::Source`] and are re-read on every call, so configuration
//! changes apply to the next operation without rebuilding anything.
//!
//! ```
//! use rediskit::backend::memory::MemoryStoreClient;
//! use rediskit::config::Settings;
//! use rediskit::Store;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rediskit::Result<()> {
//! let config = Settings::new().with_data_prefix("app:");
//! let store = Store::with_client(config, MemoryStoreClient::default());
//!
//! store.set("greeting", "hello").await?;
//! assert_eq!(store.get::<String>("greeting").await?.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! Against a real server, build the store with [`Store::new`] and a
//! configuration source whose `store.connection` entry holds the Redis URL.

pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod list;
pub mod pubsub;
pub mod store;

pub use error::{Error, Result};
pub use store::Store;
