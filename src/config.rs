use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Configuration key holding the store connection URL.
pub const CONNECTION: &str = "store.connection";
/// Configuration key holding the prefix applied to data keys.
pub const DATA_PREFIX: &str = "store.prefix.data";
/// Configuration key holding the prefix applied to pub/sub channels.
pub const EVENTS_PREFIX: &str = "store.prefix.events";

/// Where the store reads its settings from.
///
/// Implementations are consulted on every operation, never cached, so a
/// source whose answers change at runtime (see [`Dynamic`]) takes effect on
/// the next call.
pub trait Source: Send + Sync {
    /// Connection URL for the backing store, if one is configured.
    fn connection(&self) -> Option<String>;

    /// Prefix prepended to every data key. Empty means no prefix.
    fn data_prefix(&self) -> String;

    /// Prefix prepended to every pub/sub channel. Empty means no prefix.
    fn events_prefix(&self) -> String;
}

impl<T: Source + ?Sized> Source for Arc<T> {
    fn connection(&self) -> Option<String> {
        (**self).connection()
    }

    fn data_prefix(&self) -> String {
        (**self).data_prefix()
    }

    fn events_prefix(&self) -> String {
        (**self).events_prefix()
    }
}

/// Fixed settings, built in code.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub connection: Option<String>,
    pub data_prefix: String,
    pub events_prefix: String,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, url: impl Into<String>) -> Self {
        self.connection = Some(url.into());
        self
    }

    pub fn with_data_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.data_prefix = prefix.into();
        self
    }

    pub fn with_events_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.events_prefix = prefix.into();
        self
    }
}

impl Source for Settings {
    fn connection(&self) -> Option<String> {
        self.connection.clone()
    }

    fn data_prefix(&self) -> String {
        self.data_prefix.clone()
    }

    fn events_prefix(&self) -> String {
        self.events_prefix.clone()
    }
}

/// Settings read from a flat key/value table, e.g. one loaded from a
/// configuration file. Unset prefixes resolve to the empty string.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: HashMap<String, String>,
}

impl Table {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl From<HashMap<String, String>> for Table {
    fn from(entries: HashMap<String, String>) -> Self {
        Self::new(entries)
    }
}

impl Source for Table {
    fn connection(&self) -> Option<String> {
        self.entries.get(CONNECTION).cloned()
    }

    fn data_prefix(&self) -> String {
        self.entries.get(DATA_PREFIX).cloned().unwrap_or_default()
    }

    fn events_prefix(&self) -> String {
        self.entries.get(EVENTS_PREFIX).cloned().unwrap_or_default()
    }
}

/// Settings behind a lock, for deployments where prefixes change while the
/// store is in use. Share one instance between the store and whatever mutates
/// it by wrapping it in an [`Arc`].
#[derive(Debug, Default)]
pub struct Dynamic {
    inner: RwLock<Settings>,
}

impl Dynamic {
    pub fn new(initial: Settings) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn set_connection(&self, url: impl Into<String>) {
        self.inner.write().unwrap().connection = Some(url.into());
    }

    pub fn set_data_prefix(&self, prefix: impl Into<String>) {
        self.inner.write().unwrap().data_prefix = prefix.into();
    }

    pub fn set_events_prefix(&self, prefix: impl Into<String>) {
        self.inner.write().unwrap().events_prefix = prefix.into();
    }
}

impl Source for Dynamic {
    fn connection(&self) -> Option<String> {
        self.inner.read().unwrap().connection.clone()
    }

    fn data_prefix(&self) -> String {
        self.inner.read().unwrap().data_prefix.clone()
    }

    fn events_prefix(&self) -> String {
        self.inner.read().unwrap().events_prefix.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_builder() {
        let settings = Settings::new()
            .with_connection("redis://127.0.0.1:6379/")
            .with_data_prefix("app:")
            .with_events_prefix("app-events:");

        assert_eq!(
            settings.connection(),
            Some("redis://127.0.0.1:6379/".to_string())
        );
        assert_eq!(settings.data_prefix(), "app:");
        assert_eq!(settings.events_prefix(), "app-events:");
    }

    #[test]
    fn settings_default_to_no_prefixes() {
        let settings = Settings::new();

        assert_eq!(settings.connection(), None);
        assert_eq!(settings.data_prefix(), "");
        assert_eq!(settings.events_prefix(), "");
    }

    #[test]
    fn table_reads_well_known_keys() {
        let mut entries = HashMap::new();
        entries.insert(CONNECTION.to_string(), "redis://localhost/".to_string());
        entries.insert(DATA_PREFIX.to_string(), "data:".to_string());
        let table = Table::from(entries);

        assert_eq!(table.connection(), Some("redis://localhost/".to_string()));
        assert_eq!(table.data_prefix(), "data:");
        assert_eq!(table.events_prefix(), "");
    }

    #[test]
    fn dynamic_reflects_updates() {
        let dynamic = Dynamic::new(Settings::new().with_data_prefix("before:"));
        assert_eq!(dynamic.data_prefix(), "before:");

        dynamic.set_data_prefix("after:");
        dynamic.set_events_prefix("events:");

        assert_eq!(dynamic.data_prefix(), "after:");
        assert_eq!(dynamic.events_prefix(), "events:");
    }

    #[test]
    fn arc_source_delegates() {
        let shared = Arc::new(Dynamic::new(Settings::new()));
        let as_source: Arc<dyn Source> = shared.clone();

        shared.set_data_prefix("shared:");
        assert_eq!(as_source.data_prefix(), "shared:");
    }
}
