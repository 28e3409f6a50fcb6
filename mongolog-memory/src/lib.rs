//! In-memory log store for mongolog.
//!
//! This crate provides an implementation of the `LogBackend` trait that keeps
//! entries in memory. It is meant for development and tests: named instances are
//! shared across connections, and connection or write failures can be injected.
//!
//! # Quick Start
//!
//! ```ignore
//! use mongolog::{prelude::*, memory::InMemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = MongoTransport::<InMemoryBackend>::from_options(
//!         TransportOptions::new("memory://app").with_collection("audit"),
//!     )?;
//!
//!     transport.log(LogRecord::new(Level::Info, "user signed in")).await?;
//!
//!     let entries = InMemoryBackend::named("app").documents("audit").await;
//!     assert_eq!(entries.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongolog_memory;

pub mod backend;

pub use backend::{InMemoryBackend, InMemoryBackendBuilder};
