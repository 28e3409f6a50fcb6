//! In-memory log store.
//!
//! Entries are kept as BSON documents per collection, behind an async-aware
//! read-write lock. Indexes are recorded but never enforced; expiry indexes do not
//! remove anything.

use async_trait::async_trait;
use bson::Document;
use mea::rwlock::RwLock;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tracing::debug;

use mongolog_core::{
    backend::{ExpiryIndex, IndexInfo, LogBackend, LogBackendBuilder},
    error::{TransportError, TransportResult},
};

/// Scheme of the connection strings [`InMemoryBackend::connect`] understands.
pub const SCHEME: &str = "memory://";

/// Named instances shared by every `memory://<name>` connection.
static INSTANCES: LazyLock<Mutex<HashMap<String, InMemoryBackend>>> = LazyLock::new(Default::default);

type CollectionMap = HashMap<String, CollectionData>;


#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

#[derive(Debug, Default)]
struct Faults {
    refuse_connections: AtomicBool,
    fail_writes: AtomicBool,
    reject_indexes: AtomicBool,
}

/// Thread-safe in-memory log store.
///
/// Clones share the same data. Connecting to `memory://<name>` always yields a
/// handle on the same named instance, so a test can grab the instance with
/// [`InMemoryBackend::named`] and inspect what a transport wrote to it.
///
/// Failures can be injected with [`InMemoryBackend::refuse_connections`],
/// [`InMemoryBackend::fail_writes`] and [`InMemoryBackend::reject_indexes`].
///
/// # Example
///
/// ```ignore
/// use mongolog_memory::InMemoryBackend;
///
/// let backend = InMemoryBackend::named("app");
/// let transport = MongoTransport::<InMemoryBackend>::from_options(TransportOptions::new("memory://app"))?;
///
/// transport.log(LogRecord::new(Level::Info, "hello")).await?;
/// assert_eq!(backend.documents("log").await.len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
    collections: Arc<RwLock<CollectionMap>>,
    faults: Arc<Faults>,
    connections: Arc<AtomicUsize>,
    shut_down: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates a new, empty, unnamed store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared instance registered under `name`, creating it if needed.
    pub fn named(name: &str) -> Self {
        INSTANCES
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Forgets the shared instance registered under `name`, returning it.
    ///
    /// Handles already given out keep working; the next connection to `name`
    /// starts from an empty store.
    pub fn remove_named(name: &str) -> Option<Self> {
        INSTANCES.lock().remove(name)
    }

    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder::default()
    }

    /// Makes [`LogBackend::connect`] fail for this instance until turned off.
    pub fn refuse_connections(&self, refuse: bool) {
        self.faults.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Makes every write fail until turned off.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes index creation and removal fail until turned off. Entries are still written.
    pub fn reject_indexes(&self, reject: bool) {
        self.faults.reject_indexes.store(reject, Ordering::SeqCst);
    }

    /// Number of successful connections made to this instance.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Whether the instance was shut down since it was last connected to.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Entries written to `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|data| data.documents.clone())
            .unwrap_or_default()
    }

    /// Indexes defined on `collection`.
    pub async fn indexes(&self, collection: &str) -> Vec<IndexInfo> {
        self.list_indexes(collection).await.unwrap_or_default()
    }

    fn check_writable(&self, collection: &str) -> TransportResult<()> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write(format!("write to collection {collection} rejected")));
        }

        Ok(())
    }

    fn check_indexable(&self, collection: &str) -> TransportResult<()> {
        self.check_writable(collection)?;

        if self.faults.reject_indexes.load(Ordering::SeqCst) {
            return Err(TransportError::Write(format!("index change on collection {collection} rejected")));
        }

        Ok(())
    }
}

/// Extracts the instance name from a `memory://<name>` connection string.
fn instance_name(uri: &str) -> TransportResult<&str> {
    uri.trim()
        .strip_prefix(SCHEME)
        .map(|name| name.trim_end_matches('/'))
        .ok_or_else(|| TransportError::Connection(format!("unsupported connection string: {uri}")))
}

#[async_trait]
impl LogBackend for InMemoryBackend {
    async fn connect(uri: &str, _database: Option<&str>) -> TransportResult<Self> {
        let name = instance_name(uri)?;
        let backend = Self::named(name);

        if backend.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!("connection to {uri} refused")));
        }

        backend.connections.fetch_add(1, Ordering::SeqCst);
        backend.shut_down.store(false, Ordering::SeqCst);
        debug!(instance = name, "connected to in-memory store");

        Ok(backend)
    }

    async fn insert_entry(&self, collection: &str, entry: Document) -> TransportResult<()> {
        self.check_writable(collection)?;

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .documents
            .push(entry);

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> TransportResult<Vec<IndexInfo>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|data| data.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_expiry_index(&self, collection: &str, index: &ExpiryIndex) -> TransportResult<()> {
        self.check_indexable(collection)?;

        let mut collections = self.collections.write().await;
        let data = collections.entry(collection.to_string()).or_default();

        if data.indexes.iter().any(|existing| existing.name == index.name) {
            return Err(TransportError::Write(format!(
                "index {} already exists on collection {collection}",
                index.name
            )));
        }

        data.indexes.push(IndexInfo {
            name: index.name.clone(),
            keys: index.keys(),
            expire_after: Some(index.expire_after),
        });

        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> TransportResult<()> {
        self.check_indexable(collection)?;

        let mut collections = self.collections.write().await;
        let indexes = collections
            .get_mut(collection)
            .map(|data| &mut data.indexes)
            .ok_or_else(|| TransportError::Write(format!("collection {collection} does not exist")))?;

        let before = indexes.len();
        indexes.retain(|index| index.name != name);

        if indexes.len() == before {
            return Err(TransportError::Write(format!("index {name} not found on collection {collection}")));
        }

        Ok(())
    }

    async fn shutdown(self) -> TransportResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}


/// Builder for [`InMemoryBackend`] instances.
#[derive(Default)]
pub struct InMemoryBackendBuilder {
    name: Option<String>,
}

impl InMemoryBackendBuilder {
    /// Builds a handle on the shared instance `name` instead of a fresh store.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl LogBackendBuilder for InMemoryBackendBuilder {
    type Backend = InMemoryBackend;

    async fn build(self) -> TransportResult<Self::Backend> {
        Ok(match self.name {
            Some(name) => InMemoryBackend::named(&name),
            None => InMemoryBackend::new(),
        })
    }
}
