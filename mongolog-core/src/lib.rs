//! Core of a MongoDB transport for structured log records.
//!
//! This crate provides:
//!
//! - **Metadata** ([`meta`]) - The value tree attached to log records, including shared containers that may form cycles
//! - **Sanitization** ([`sanitizer`]) - Cycle-free, key-safe copies of metadata ready for MongoDB
//! - **Connection lifecycle** ([`lifecycle`]) - Lazy connection with a FIFO queue of pending operations
//! - **Backend abstraction** ([`backend`]) - Traits for the stores records are written to
//! - **Transport** ([`transport`]) - Turning records into documents and writing them
//! - **Registry** ([`registry`]) - Explicit registration of transports by name
//! - **Configuration** ([`options`], [`level`]) - Transport options and severity levels
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use mongolog_core::{meta::MetaMap, sanitizer::sanitize};
//!
//! let meta = MetaMap::new();
//! meta.insert("user.id", 42);
//! meta.insert("self", meta.clone());
//!
//! // { "user[dot]id": 42, "self": "[Circular]" }
//! let document = sanitize(&meta.clone().into());
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongolog_core;

pub mod backend;
pub mod entry;
pub mod error;
pub mod level;
pub mod lifecycle;
pub mod meta;
pub mod options;
pub mod registry;
pub mod sanitizer;
pub mod transport;
