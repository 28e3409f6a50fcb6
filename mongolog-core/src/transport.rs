//! The MongoDB log transport.
//!
//! [`MongoTransport`] turns [`LogRecord`]s into documents and writes them through a
//! [`LogBackend`]. The connection is opened lazily by a [`ConnectionLifecycle`]:
//! records logged before it is ready are queued and written in order once it opens.
//!
//! Every outcome is also published on a broadcast side channel, see
//! [`MongoTransport::subscribe`].
//!
//! Connections dialed from a URI belong to the transport and are shut down when it
//! closes or when the keep-alive releases them. Handles passed in with
//! [`ConnectionSpec::Connected`] or [`ConnectionSpec::Pending`] stay open; the caller
//! owns them.
//!
//! # Example
//!
//! ```ignore
//! use mongolog::{prelude::*, memory::InMemoryBackend};
//!
//! let transport = MongoTransport::<InMemoryBackend>::from_options(
//!     TransportOptions::new("memory://app").with_level(Level::Info),
//! )?;
//!
//! transport
//!     .log(LogRecord::new(Level::Warn, "cache miss").with_meta(Meta::from_serialize(&key)?))
//!     .await?;
//! ```

use async_trait::async_trait;
use futures::future::FutureExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    backend::{ConnectionSpec, ExpiryIndex, LogBackend},
    entry::{EntryFormat, EntryFormatter, LogRecord},
    error::{TransportError, TransportResult},
    level::Level,
    lifecycle::{ConnectionLifecycle, ConnectionState, Opener, Release},
    options::TransportOptions,
};

/// Capacity of the event side channel. Slow subscribers miss the oldest events.
const EVENT_CAPACITY: usize = 256;

/// Field the expiry index is built on.
const TIMESTAMP_FIELD: &str = "timestamp";


/// Outcome notifications published by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A record was persisted.
    Logged { level: Level },
    /// An operation failed. The same error is also returned to its caller, if any.
    Error(TransportError),
}

/// The contract a logging framework uses to drive a transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name the transport is registered under.
    fn name(&self) -> &str;

    /// Least severe level the transport persists.
    fn level(&self) -> Level;

    /// Persists a record.
    async fn log(&self, record: LogRecord) -> TransportResult<()>;

    /// Releases the connection. Records still waiting for it fail with
    /// [`TransportError::Closed`].
    async fn close(&self) -> TransportResult<()>;

    /// Subscribes to the transport's outcome notifications.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// A log transport writing to a MongoDB collection through a [`LogBackend`].
pub struct MongoTransport<B: LogBackend> {
    options: Arc<TransportOptions>,
    format: EntryFormat,
    formatter: Option<EntryFormatter>,
    lifecycle: ConnectionLifecycle<B>,
    owns_connection: bool,
    events: broadcast::Sender<TransportEvent>,
}

impl<B: LogBackend> MongoTransport<B> {
    /// Name used when registering the transport.
    pub const NAME: &'static str = "mongodb";

    /// Builds a transport for the given connection.
    ///
    /// Nothing is connected until the first record is logged.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the options or the connection
    /// target are unusable.
    pub fn new(options: TransportOptions, connection: ConnectionSpec<B>) -> TransportResult<Self> {
        options.validate()?;
        connection.validate()?;

        let options = Arc::new(options);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let hostname = options
            .store_host
            .then(|| gethostname::gethostname().to_string_lossy().into_owned());
        let format = EntryFormat {
            meta_key: options.meta_key.clone(),
            hostname,
            label: options.label.clone(),
            decolorize: options.decolorize,
        };

        let owns_connection = connection.is_owned();
        let opener = Self::opener(
            connection.into_opener(options.database.clone()),
            options.clone(),
            events.clone(),
        );
        let mut lifecycle = ConnectionLifecycle::new(opener)
            .with_retry_delay(options.retry_delay())
            .with_keep_alive(options.keep_alive());
        if owns_connection {
            lifecycle = lifecycle.with_release(Self::release());
        }

        Ok(Self {
            options,
            format,
            formatter: None,
            lifecycle,
            owns_connection,
            events,
        })
    }

    /// Replaces the default entry shape with documents built by `formatter`.
    ///
    /// Formatted documents are stored as returned; they are not sanitized.
    pub fn with_formatter(mut self, formatter: EntryFormatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Builds a transport that dials the connection string in `options.db`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if no connection string is set.
    pub fn from_options(options: TransportOptions) -> TransportResult<Self> {
        let uri = options
            .connection_uri()
            .ok_or_else(|| TransportError::Configuration(
                "cannot log to MongoDB without a connection target".to_string(),
            ))?
            .to_string();

        Self::new(options, ConnectionSpec::Uri(uri))
    }

    /// Wraps the backend opener so that every fresh connection brings the expiry
    /// index up to date before queued records are written.
    fn opener(
        connect: Opener<B>,
        options: Arc<TransportOptions>,
        events: broadcast::Sender<TransportEvent>,
    ) -> Opener<B> {
        Arc::new(move || {
            let connect = connect.clone();
            let options = options.clone();
            let events = events.clone();

            async move {
                let backend = connect().await?;

                if let Some(expire_after) = options.expire_after() {
                    let index = ExpiryIndex::on_field(TIMESTAMP_FIELD, expire_after);
                    if let Err(err) = backend.ensure_expiry_index(&options.collection, &index).await {
                        warn!(collection = %options.collection, error = %err, "failed to maintain expiry index");
                        let _ = events.send(TransportEvent::Error(err));
                    }
                }

                Ok::<_, TransportError>(backend)
            }
            .boxed()
        })
    }

    /// Shuts down connections released by the keep-alive timer.
    fn release() -> Release<B> {
        Arc::new(|backend: B| {
            async move {
                if let Err(err) = backend.shutdown().await {
                    warn!(error = %err, "failed to shut down released connection");
                }
            }
            .boxed()
        })
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Moves a failed connection back to unopened so the next record retries it.
    pub fn reset(&self) -> bool {
        self.lifecycle.reset()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Persists a record.
    ///
    /// Silent transports and records below the configured level succeed without
    /// writing. Write failures leave the connection open.
    pub async fn log(&self, record: LogRecord) -> TransportResult<()> {
        if self.options.silent || !self.options.level.enables(record.level) {
            return Ok(());
        }

        let level = record.level;
        let document = match &self.formatter {
            Some(formatter) => formatter(&record),
            None => self.format.to_document(&record),
        };
        let collection = self.options.collection.clone();

        let result = self
            .lifecycle
            .submit("insert_entry", move |backend: B| async move {
                backend.insert_entry(&collection, document).await
            })
            .await;

        match &result {
            Ok(()) => {
                debug!(collection = %self.options.collection, %level, "log entry written");
                let _ = self.events.send(TransportEvent::Logged { level });
            }
            Err(err) => {
                warn!(collection = %self.options.collection, error = %err, "failed to write log entry");
                let _ = self.events.send(TransportEvent::Error(err.clone()));
            }
        }

        result
    }

    /// Closes the connection. A connection the transport dialed is shut down; a
    /// caller-supplied one is left open and handed out again on the next record.
    pub async fn close(&self) -> TransportResult<()> {
        match self.lifecycle.close().await {
            Some(backend) if self.owns_connection => {
                debug!(collection = %self.options.collection, "shutting down backend");
                backend.shutdown().await?;
            }
            Some(_) => {
                debug!(collection = %self.options.collection, "leaving caller-supplied connection open");
            }
            None => {}
        }

        Ok(())
    }
}

#[async_trait]
impl<B: LogBackend> Transport for MongoTransport<B> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn level(&self) -> Level {
        self.options.level
    }

    async fn log(&self, record: LogRecord) -> TransportResult<()> {
        MongoTransport::log(self, record).await
    }

    async fn close(&self) -> TransportResult<()> {
        MongoTransport::close(self).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        MongoTransport::subscribe(self)
    }
}
