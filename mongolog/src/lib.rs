//! A MongoDB transport for structured logging.
//!
//! This crate is the entry point of mongolog. It re-exports the core types and
//! gives access to the available storage backends.
//!
//! # Features
//!
//! - **Safe metadata** - Arbitrary, possibly cyclic, metadata is turned into documents MongoDB accepts
//! - **Lazy connection** - Records logged before the connection is up are queued and written in order
//! - **Expiring entries** - An optional TTL index on the entry timestamp, kept in sync with the configuration
//! - **Explicit registration** - Transports are registered by name with a [`registry::TransportRegistry`]
//!
//! # Quick Start
//!
//! ```ignore
//! use mongolog::{prelude::*, memory::InMemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = MongoTransport::<InMemoryBackend>::from_options(
//!         TransportOptions::new("memory://app")
//!             .with_level(Level::Info)
//!             .with_label("api"),
//!     )?;
//!
//!     let meta = MetaMap::new();
//!     meta.insert("request.id", "c0ffee");
//!     meta.insert("attempt", 3);
//!
//!     // Stored as { ..., "meta": { "request[dot]id": "c0ffee", "attempt": 3 }, "label": "api" }
//!     transport.log(LogRecord::new(Level::Warn, "upstream timed out").with_meta(meta)).await?;
//!     transport.close().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Registration
//!
//! ```ignore
//! use mongolog::{prelude::*, mongodb::MongoDbBackend};
//!
//! let mut registry = TransportRegistry::new();
//! MongoTransport::<MongoDbBackend>::register(&mut registry);
//!
//! let options: TransportOptions = serde_json::from_str(r#"{ "db": "mongodb://localhost/app", "level": "warn" }"#)?;
//! let transport = registry.build("mongodb", options)?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory store for development and testing
//! - [`mongodb`] - MongoDB through the official driver (requires `mongodb` feature)

pub mod prelude;

pub use mongolog_core::{backend, entry, error, level, lifecycle, meta, options, registry, sanitizer, transport};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use mongolog_memory::{InMemoryBackend, InMemoryBackendBuilder};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use mongolog_mongodb::{MongoDbBackend, MongoDbBackendBuilder};
}
