//! Transport configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    error::{TransportError, TransportResult},
    level::Level,
};

pub const DEFAULT_COLLECTION: &str = "log";
pub const DEFAULT_META_KEY: &str = "meta";
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;


/// Options for a MongoDB log transport.
///
/// Every field has a default, so partial configurations deserialize cleanly:
///
/// ```ignore
/// let options: TransportOptions = serde_json::from_str(r#"{
///     "db": "mongodb://localhost:27017/app",
///     "collection": "audit",
///     "level": "warn",
///     "expire_after_secs": 604800
/// }"#)?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Connection string. Required when the transport dials its own connection.
    pub db: Option<String>,
    /// Database to write to, overriding the one named in the connection string.
    pub database: Option<String>,
    /// Target collection.
    pub collection: String,
    /// Least severe level this transport persists.
    pub level: Level,
    /// Accept records without persisting them.
    pub silent: bool,
    /// Document field the sanitized metadata is stored under.
    pub meta_key: String,
    /// Store the local hostname on every entry.
    pub store_host: bool,
    /// Label stored on every entry.
    pub label: Option<String>,
    /// Strip ANSI color sequences from messages.
    pub decolorize: bool,
    /// Expire entries this many seconds after their timestamp.
    pub expire_after_secs: Option<u64>,
    /// Delay before a failed connection may be retried. `None` leaves the
    /// transport failed until it is reset.
    pub retry_delay_ms: Option<u64>,
    /// Release an open connection this long after it was established. The next
    /// record reconnects. `None` keeps it open until the transport is closed.
    pub keep_alive_ms: Option<u64>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            db: None,
            database: None,
            collection: DEFAULT_COLLECTION.to_string(),
            level: Level::default(),
            silent: false,
            meta_key: DEFAULT_META_KEY.to_string(),
            store_host: false,
            label: None,
            decolorize: false,
            expire_after_secs: None,
            retry_delay_ms: Some(DEFAULT_RETRY_DELAY_MS),
            keep_alive_ms: None,
        }
    }
}

impl TransportOptions {
    /// Options targeting the given connection string, everything else defaulted.
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: Some(db.into()),
            ..Self::default()
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_meta_key(mut self, meta_key: impl Into<String>) -> Self {
        self.meta_key = meta_key.into();
        self
    }

    pub fn with_expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after_secs = Some(expire_after.as_secs());
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Option<Duration>) -> Self {
        self.retry_delay_ms = retry_delay.map(saturating_millis);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive_ms = keep_alive.map(saturating_millis);
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn store_host(mut self, store_host: bool) -> Self {
        self.store_host = store_host;
        self
    }

    pub fn decolorize(mut self, decolorize: bool) -> Self {
        self.decolorize = decolorize;
        self
    }

    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after_secs.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_ms.map(Duration::from_millis)
    }

    /// The connection string, if one is configured and not blank.
    pub fn connection_uri(&self) -> Option<&str> {
        self.db
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
    }

    /// Checks the options that do not depend on the connection target.
    pub fn validate(&self) -> TransportResult<()> {
        if self.collection.trim().is_empty() {
            return Err(TransportError::Configuration("collection name must not be empty".to_string()));
        }
        if self.meta_key.trim().is_empty() {
            return Err(TransportError::Configuration("metadata key must not be empty".to_string()));
        }
        if self.expire_after_secs == Some(0) {
            return Err(TransportError::Configuration("expiry must be at least one second".to_string()));
        }
        if self.keep_alive_ms == Some(0) {
            return Err(TransportError::Configuration("keep-alive must be at least one millisecond".to_string()));
        }

        Ok(())
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_options_deserialize_with_defaults() {
        let options: TransportOptions = serde_json::from_str(
            r#"{ "db": "mongodb://localhost/app", "level": "warn", "store_host": true }"#,
        )
        .unwrap();

        assert_eq!(options.connection_uri(), Some("mongodb://localhost/app"));
        assert_eq!(options.level, Level::Warn);
        assert!(options.store_host);
        assert_eq!(options.collection, DEFAULT_COLLECTION);
        assert_eq!(options.meta_key, DEFAULT_META_KEY);
        assert_eq!(options.retry_delay(), Some(Duration::from_secs(10)));
        assert_eq!(options.expire_after(), None);
    }

    #[test]
    fn test_blank_connection_uri_is_missing() {
        assert_eq!(TransportOptions::default().connection_uri(), None);
        assert_eq!(TransportOptions::new("   ").connection_uri(), None);
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        assert!(TransportOptions::new("mongodb://localhost").validate().is_ok());
        assert!(matches!(
            TransportOptions::new("mongodb://localhost").with_collection("").validate(),
            Err(TransportError::Configuration(_))
        ));
        assert!(matches!(
            TransportOptions::new("mongodb://localhost").with_meta_key(" ").validate(),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_builders() {
        let options = TransportOptions::new("mongodb://localhost")
            .with_expire_after(Duration::from_secs(3600))
            .with_retry_delay(None)
            .with_label("api");

        assert_eq!(options.expire_after(), Some(Duration::from_secs(3600)));
        assert_eq!(options.retry_delay(), None);
        assert_eq!(options.label.as_deref(), Some("api"));
    }

    #[test]
    fn test_durations_saturate() {
        let options = TransportOptions::new("mongodb://localhost")
            .with_retry_delay(Some(Duration::MAX))
            .with_keep_alive(Some(Duration::MAX));

        assert_eq!(options.retry_delay_ms, Some(u64::MAX));
        assert_eq!(options.keep_alive_ms, Some(u64::MAX));
    }

    #[test]
    fn test_keep_alive() {
        assert_eq!(TransportOptions::default().keep_alive(), None);

        let options: TransportOptions = serde_json::from_str(r#"{ "keep_alive_ms": 1500 }"#).unwrap();
        assert_eq!(options.keep_alive(), Some(Duration::from_millis(1500)));

        assert!(matches!(
            TransportOptions::new("mongodb://localhost").with_keep_alive(Some(Duration::ZERO)).validate(),
            Err(TransportError::Configuration(_))
        ));
    }
}
