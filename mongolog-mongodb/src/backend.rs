use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, IndexModel,
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, IndexOptions},
};
use tracing::debug;

use mongolog_core::{
    backend::{ExpiryIndex, IndexInfo, LogBackend, LogBackendBuilder},
    error::{TransportError, TransportResult},
};

/// Database used when neither the options nor the connection string name one.
pub const DEFAULT_DATABASE: &str = "logs";

/// Server error code for a namespace that does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;


#[derive(Debug, Clone)]
pub struct MongoDbBackend {
    client: Client,
    database: String,
}

impl MongoDbBackend {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self { client, database: database.into() }
    }

    pub fn builder(uri: &str) -> MongoDbBackendBuilder {
        MongoDbBackendBuilder::new(uri)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.database).collection(name)
    }

    async fn open(uri: &str, database: Option<&str>) -> TransportResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let database = resolve_database(database, options.default_database.as_deref());
        let client = Client::with_options(options).map_err(|e| TransportError::Connection(e.to_string()))?;

        client
            .database(&database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        debug!(database = %database, "connected to MongoDB");

        Ok(Self::new(client, database))
    }
}

/// Picks the database: the explicit one, else the one in the connection string,
/// else [`DEFAULT_DATABASE`].
pub fn resolve_database(explicit: Option<&str>, from_uri: Option<&str>) -> String {
    explicit
        .or(from_uri)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_DATABASE)
        .to_string()
}

fn is_namespace_not_found(err: &MongoError) -> bool {
    matches!(&*err.kind, ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND)
}

fn index_info(model: IndexModel) -> IndexInfo {
    let options = model.options.unwrap_or_default();

    IndexInfo {
        name: options.name.unwrap_or_default(),
        keys: model.keys,
        expire_after: options.expire_after,
    }
}

#[async_trait]
impl LogBackend for MongoDbBackend {
    async fn connect(uri: &str, database: Option<&str>) -> TransportResult<Self> {
        Self::open(uri, database).await
    }

    async fn insert_entry(&self, collection: &str, entry: Document) -> TransportResult<()> {
        self.collection(collection)
            .insert_one(entry)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> TransportResult<Vec<IndexInfo>> {
        let cursor = match self.collection(collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(err) if is_namespace_not_found(&err) => return Ok(Vec::new()),
            Err(err) => return Err(TransportError::Write(err.to_string())),
        };

        Ok(cursor
            .try_collect::<Vec<IndexModel>>()
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?
            .into_iter()
            .map(index_info)
            .collect())
    }

    async fn create_expiry_index(&self, collection: &str, index: &ExpiryIndex) -> TransportResult<()> {
        self.collection(collection)
            .create_index(
                IndexModel::builder()
                .keys(index.keys())
                .options(
                    IndexOptions::builder()
                    .name(index.name.clone())
                    .expire_after(index.expire_after)
                    .build()
                )
                .build()
            )
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;

        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> TransportResult<()> {
        self.collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;

        Ok(())
    }

    async fn shutdown(self) -> TransportResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbBackendBuilder {
    uri: String,
    database: Option<String>,
}

impl MongoDbBackendBuilder {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            database: None,
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }
}

#[async_trait]
impl LogBackendBuilder for MongoDbBackendBuilder {
    type Backend = MongoDbBackend;

    async fn build(self) -> TransportResult<Self::Backend> {
        MongoDbBackend::open(&self.uri, self.database.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_resolve_database() {
        assert_eq!(resolve_database(Some("audit"), Some("app")), "audit");
        assert_eq!(resolve_database(None, Some("app")), "app");
        assert_eq!(resolve_database(None, None), DEFAULT_DATABASE);
        assert_eq!(resolve_database(Some("  "), Some("app")), DEFAULT_DATABASE);
    }

    #[test]
    fn test_index_info_from_model() {
        let model = IndexModel::builder()
            .keys(doc! { "timestamp": 1 })
            .options(
                IndexOptions::builder()
                .name("timestamp_1".to_string())
                .expire_after(Duration::from_secs(30))
                .build()
            )
            .build();

        assert_eq!(
            index_info(model),
            IndexInfo {
                name: "timestamp_1".to_string(),
                keys: doc! { "timestamp": 1 },
                expire_after: Some(Duration::from_secs(30)),
            },
        );

        let unnamed = index_info(IndexModel::builder().keys(doc! { "_id": 1 }).build());
        assert_eq!(unnamed.name, "");
        assert_eq!(unnamed.expire_after, None);
    }
}
