//! Storage backend abstraction for the log transport.
//!
//! The transport never talks to a database driver directly. It goes through
//! [`LogBackend`], which covers exactly what persisting log records needs: opening
//! a connection, inserting entries and managing the expiry index on the target
//! collection.
//!
//! # Traits
//!
//! - [`LogBackend`]: a connected handle to a log store
//! - [`LogBackendBuilder`]: factory trait for creating backend instances
//!
//! # Connection targets
//!
//! [`ConnectionSpec`] describes where the transport gets its connection from: a URI
//! to dial, a connection that is still being established elsewhere, or an already
//! connected handle. It is resolved once, when the transport is built, into an
//! [`Opener`] used for every connection attempt.

use async_trait::async_trait;
use bson::{Document, doc};
use futures::future::{self, BoxFuture, FutureExt};
use std::{fmt::{self, Debug}, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    error::{TransportError, TransportResult},
    lifecycle::Opener,
};


/// Abstract interface for log storage backends.
///
/// Backends are cheap handles: cloning one shares the underlying connection.
///
/// # Error Handling
///
/// `connect` reports failures as [`TransportError::Connection`]; every other
/// method reports persistence failures as [`TransportError::Write`].
#[async_trait]
pub trait LogBackend: Clone + Send + Sync + Debug + 'static {
    /// Establishes a connection to the store identified by `uri`.
    ///
    /// # Arguments
    ///
    /// * `uri` - The connection string
    /// * `database` - The database to use, if the URI does not say or should be overridden
    async fn connect(uri: &str, database: Option<&str>) -> TransportResult<Self>;

    /// Inserts a single log entry into a collection, creating the collection if needed.
    async fn insert_entry(&self, collection: &str, entry: Document) -> TransportResult<()>;

    /// Lists the indexes defined on a collection.
    ///
    /// A collection that does not exist yet has no indexes.
    async fn list_indexes(&self, collection: &str) -> TransportResult<Vec<IndexInfo>>;

    /// Creates a time-based expiry index on a collection.
    async fn create_expiry_index(&self, collection: &str, index: &ExpiryIndex) -> TransportResult<()>;

    /// Removes an index from a collection by name.
    async fn drop_index(&self, collection: &str, name: &str) -> TransportResult<()>;

    /// Makes sure `index` exists on `collection` with the requested expiry.
    ///
    /// An index with the same name but a different expiry is dropped and recreated;
    /// a matching one is left alone.
    async fn ensure_expiry_index(&self, collection: &str, index: &ExpiryIndex) -> TransportResult<()> {
        let existing = self
            .list_indexes(collection)
            .await?
            .into_iter()
            .find(|info| info.name == index.name);

        match existing {
            Some(info) if info.expire_after == Some(index.expire_after) => {
                debug!(collection, index = %index.name, "expiry index is up to date");
                return Ok(());
            }
            Some(_) => {
                info!(collection, index = %index.name, "replacing expiry index with a new expiry");
                self.drop_index(collection, &index.name).await?;
            }
            None => {
                info!(collection, index = %index.name, "creating expiry index");
            }
        }

        self.create_expiry_index(collection, index).await
    }

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> TransportResult<()> {
        Ok(())
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait LogBackendBuilder: Send {
    type Backend: LogBackend;

    /// Builds and connects the backend.
    async fn build(self) -> TransportResult<Self::Backend>;
}

/// An index as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub expire_after: Option<Duration>,
}

/// A single-field ascending index that expires documents a fixed time after the
/// indexed date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryIndex {
    pub name: String,
    pub field: String,
    pub expire_after: Duration,
}

impl ExpiryIndex {
    /// Builds the index for `field`, named the way MongoDB names it by default (`<field>_1`).
    pub fn on_field(field: impl Into<String>, expire_after: Duration) -> Self {
        let field = field.into();

        Self {
            name: format!("{field}_1"),
            field,
            expire_after,
        }
    }

    pub fn keys(&self) -> Document {
        doc! { self.field.as_str(): 1 }
    }
}

/// Where a transport gets its connection from.
pub enum ConnectionSpec<B: LogBackend> {
    /// Dial this URI with [`LogBackend::connect`] on every attempt.
    Uri(String),
    /// A connection being established elsewhere. Every attempt observes its single outcome.
    Pending(BoxFuture<'static, TransportResult<B>>),
    /// An already connected handle.
    Connected(B),
}

impl<B: LogBackend> ConnectionSpec<B> {
    /// Checks the connection target without connecting.
    pub fn validate(&self) -> TransportResult<()> {
        match self {
            ConnectionSpec::Uri(uri) if uri.trim().is_empty() => Err(TransportError::Configuration(
                "cannot log to MongoDB without a connection target".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether connections are dialed by the transport itself. Only those are shut
    /// down when the transport closes; caller-supplied handles are left open.
    pub fn is_owned(&self) -> bool {
        matches!(self, ConnectionSpec::Uri(_))
    }

    /// Resolves the connection target into an opener producing one connection attempt per call.
    pub fn into_opener(self, database: Option<String>) -> Opener<B> {
        match self {
            ConnectionSpec::Uri(uri) => Arc::new(move || {
                let uri = uri.clone();
                let database = database.clone();
                async move { B::connect(&uri, database.as_deref()).await }.boxed()
            }),
            ConnectionSpec::Pending(pending) => {
                let shared = pending.shared();
                Arc::new(move || shared.clone().boxed())
            }
            ConnectionSpec::Connected(backend) => Arc::new(move || {
                let connected: TransportResult<B> = Ok(backend.clone());
                future::ready(connected).boxed()
            }),
        }
    }
}

impl<B: LogBackend> Debug for ConnectionSpec<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionSpec::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            ConnectionSpec::Pending(_) => f.write_str("Pending"),
            ConnectionSpec::Connected(backend) => f.debug_tuple("Connected").field(backend).finish(),
        }
    }
}

impl<B: LogBackend> From<&str> for ConnectionSpec<B> {
    fn from(uri: &str) -> Self {
        ConnectionSpec::Uri(uri.to_string())
    }
}

impl<B: LogBackend> From<String> for ConnectionSpec<B> {
    fn from(uri: String) -> Self {
        ConnectionSpec::Uri(uri)
    }
}
