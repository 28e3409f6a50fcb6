//! Convenient re-exports of commonly used types from mongolog.
//!
//! ```ignore
//! use mongolog::prelude::*;
//! ```

pub use mongolog_core::{
    backend::{ConnectionSpec, ExpiryIndex, IndexInfo, LogBackend, LogBackendBuilder},
    entry::{EntryFormatter, LogRecord},
    error::{TransportError, TransportResult},
    level::Level,
    lifecycle::{ConnectionLifecycle, ConnectionState, Release},
    meta::{Meta, MetaArray, MetaError, MetaMap},
    options::TransportOptions,
    registry::TransportRegistry,
    sanitizer::MetadataSanitizer,
    transport::{MongoTransport, Transport, TransportEvent},
};
