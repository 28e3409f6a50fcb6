//! MongoDB backend for mongolog.
//!
//! This crate provides the `LogBackend` implementation that writes log entries to a
//! MongoDB collection through the official async driver.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mongolog = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! Connecting parses the connection string, picks the database (the explicit one,
//! else the one named in the string, else `logs`) and pings the server, so a
//! transport only reports itself connected once the server answered.
//!
//! # Example
//!
//! ```ignore
//! use mongolog::{prelude::*, mongodb::MongoDbBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = MongoTransport::<MongoDbBackend>::from_options(
//!         TransportOptions::new("mongodb://localhost:27017/app")
//!             .with_expire_after(std::time::Duration::from_secs(7 * 24 * 3600)),
//!     )?;
//!
//!     transport.log(LogRecord::new(Level::Error, "payment failed")).await?;
//!     transport.close().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongolog_mongodb;

pub mod backend;

pub use backend::{MongoDbBackend, MongoDbBackendBuilder};
