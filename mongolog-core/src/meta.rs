//! Log metadata values.
//!
//! [`Meta`] is the value tree attached to a log record. Containers ([`MetaMap`],
//! [`MetaArray`]) are shared handles with interior mutability, so a nested value can
//! refer back to one of its ancestors. Two handles are the *same* container when they
//! point at the same allocation, regardless of their contents.
//!
//! Cyclic trees are never freed while the cycle exists; call [`MetaMap::clear`] or
//! [`MetaArray::clear`] on a member of the cycle to release it.
//!
//! # Example
//!
//! ```ignore
//! use mongolog_core::meta::{Meta, MetaMap};
//!
//! let request = MetaMap::new();
//! request.insert("path", "/health");
//! request.insert("status", 200);
//! request.insert("self", request.clone());
//!
//! let meta = Meta::from(request);
//! ```

use bson::{Binary, Bson, oid::ObjectId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::{any::Any, error::Error as StdError, fmt, fmt::Write, sync::Arc};

use crate::error::TransportResult;


/// A metadata value attached to a log record.
#[derive(Clone, Debug, Default)]
pub enum Meta {
    #[default]
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    /// A point in time. Persisted unchanged.
    DateTime(bson::DateTime),
    /// A binary blob. Persisted unchanged.
    Binary(Binary),
    /// A database identifier. Persisted unchanged.
    ObjectId(ObjectId),
    /// Any other scalar BSON value (timestamps, decimals, regexes, ...). Persisted unchanged.
    Raw(Bson),
    Array(MetaArray),
    Map(MetaMap),
    /// An error value, persisted as a plain document.
    Error(MetaError),
    /// A callable or other host value with no data representation.
    Function(Arc<dyn Any + Send + Sync>),
}

impl Meta {
    /// Builds a metadata tree from any serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> TransportResult<Self> {
        Ok(Meta::from(serde_json::to_value(value)?))
    }

    /// Wraps a host value that has no data representation.
    pub fn function<T: Any + Send + Sync>(value: T) -> Self {
        Meta::Function(Arc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Meta::Null)
    }

    /// Identity of the container behind this value, if it is one.
    ///
    /// Error values are identified by their field map.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Meta::Array(array) => Some(array.identity()),
            Meta::Map(map) => Some(map.identity()),
            Meta::Error(error) => Some(error.fields.identity()),
            _ => None,
        }
    }
}

/// A shared, keyed metadata mapping.
///
/// Cloning a `MetaMap` clones the handle, not the entries.
#[derive(Clone, Default)]
pub struct MetaMap(Arc<RwLock<Vec<(String, Meta)>>>);

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, returning the previous value stored under `key`.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Meta>) -> Option<Meta> {
        let key = key.into();
        let value = value.into();
        let mut entries = self.0.write();

        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Meta> {
        self.0
            .read()
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<Meta> {
        let mut entries = self.0.write();
        let position = entries.iter().position(|(existing, _)| existing == key)?;

        Some(entries.remove(position).1)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn clear(&self) {
        self.0.write().clear();
    }

    /// Snapshot of the entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Meta)> {
        self.0.read().clone()
    }

    /// Returns `true` if both handles refer to the same mapping.
    pub fn ptr_eq(&self, other: &MetaMap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for MetaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self.0
            .read()
            .iter()
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        f.debug_struct("MetaMap")
            .field("id", &format_args!("{:#x}", self.identity()))
            .field("keys", &keys)
            .finish()
    }
}

impl<K: Into<String>, V: Into<Meta>> FromIterator<(K, V)> for MetaMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = MetaMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// A shared, ordered metadata sequence.
///
/// Cloning a `MetaArray` clones the handle, not the elements.
#[derive(Clone, Default)]
pub struct MetaArray(Arc<RwLock<Vec<Meta>>>);

impl MetaArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: impl Into<Meta>) {
        self.0.write().push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<Meta> {
        self.0.read().get(index).cloned()
    }

    /// Replaces the element at `index`, returning the old one.
    pub fn set(&self, index: usize, value: impl Into<Meta>) -> Option<Meta> {
        self.0
            .write()
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value.into()))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn clear(&self) {
        self.0.write().clear();
    }

    /// Snapshot of the elements in order.
    pub fn elements(&self) -> Vec<Meta> {
        self.0.read().clone()
    }

    /// Returns `true` if both handles refer to the same sequence.
    pub fn ptr_eq(&self, other: &MetaArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for MetaArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaArray")
            .field("id", &format_args!("{:#x}", self.identity()))
            .field("len", &self.len())
            .finish()
    }
}

impl<V: Into<Meta>> FromIterator<V> for MetaArray {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        MetaArray(Arc::new(RwLock::new(iter.into_iter().map(Into::into).collect())))
    }
}

/// An error captured as metadata.
///
/// Carries the error's message, its kind name and a stack text, plus any extra
/// fields the caller attaches.
#[derive(Clone, Debug)]
pub struct MetaError {
    name: String,
    message: String,
    stack: String,
    fields: MetaMap,
}

impl MetaError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let stack = format!("{name}: {message}");

        Self { name, message, stack, fields: MetaMap::new() }
    }

    /// Captures a Rust error. The stack text lists the error's source chain.
    pub fn from_error<E: StdError + ?Sized>(err: &E) -> Self {
        let name = short_type_name(std::any::type_name::<E>());
        let mut error = Self::new(name, err.to_string());

        let mut source = err.source();
        while let Some(cause) = source {
            let _ = write!(error.stack, "\n    caused by: {cause}");
            source = cause.source();
        }

        error
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Attaches an extra field.
    pub fn with_field(self, key: impl Into<String>, value: impl Into<Meta>) -> Self {
        self.fields.insert(key, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Extra fields. Shared with every clone of this error.
    pub fn fields(&self) -> &MetaMap {
        &self.fields
    }
}

// `core::fmt::Error` -> `Error`, `foo::Wrapper<bar::Inner>` -> `Wrapper`
fn short_type_name(full: &str) -> &str {
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

macro_rules! impl_from_scalar {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Meta {
                fn from(value: $source) -> Self {
                    Meta::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    u32 => Int64,
    f64 => Double,
    String => String,
    &str => String,
    bson::DateTime => DateTime,
    Binary => Binary,
    ObjectId => ObjectId,
    MetaArray => Array,
    MetaMap => Map,
    MetaError => Error,
}

impl From<DateTime<Utc>> for Meta {
    fn from(value: DateTime<Utc>) -> Self {
        Meta::DateTime(bson::DateTime::from_chrono(value))
    }
}

impl<T: Into<Meta>> From<Option<T>> for Meta {
    fn from(value: Option<T>) -> Self {
        value.map_or(Meta::Null, Into::into)
    }
}

impl<T: Into<Meta>> From<Vec<T>> for Meta {
    fn from(value: Vec<T>) -> Self {
        Meta::Array(value.into_iter().collect())
    }
}

impl From<Value> for Meta {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Meta::Null,
            Value::Bool(b) => Meta::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Meta::Int64(i),
                None => Meta::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Meta::String(s),
            Value::Array(values) => Meta::Array(values.into_iter().collect()),
            Value::Object(object) => Meta::Map(object.into_iter().collect()),
        }
    }
}

impl From<Bson> for Meta {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Null | Bson::Undefined => Meta::Null,
            Bson::Boolean(b) => Meta::Bool(b),
            Bson::Int32(i) => Meta::Int32(i),
            Bson::Int64(i) => Meta::Int64(i),
            Bson::Double(d) => Meta::Double(d),
            Bson::String(s) => Meta::String(s),
            Bson::DateTime(dt) => Meta::DateTime(dt),
            Bson::Binary(binary) => Meta::Binary(binary),
            Bson::ObjectId(id) => Meta::ObjectId(id),
            Bson::Array(values) => Meta::Array(values.into_iter().collect()),
            Bson::Document(document) => Meta::Map(document.into_iter().collect()),
            other => Meta::Raw(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("request failed")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_map_insert_replaces_existing_key() {
        let map = MetaMap::new();
        assert!(map.insert("a", 1).is_none());
        assert!(matches!(map.insert("a", 2), Some(Meta::Int32(1))));
        assert_eq!(map.len(), 1);
        assert!(matches!(map.get("a"), Some(Meta::Int32(2))));
        assert!(matches!(map.remove("a"), Some(Meta::Int32(2))));
        assert!(map.is_empty());
    }

    #[test]
    fn test_clone_shares_identity() {
        let map = MetaMap::new();
        let alias = map.clone();
        alias.insert("key", true);

        assert!(map.ptr_eq(&alias));
        assert!(!map.ptr_eq(&MetaMap::new()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_self_reference_debug_does_not_recurse() {
        let map = MetaMap::new();
        map.insert("self", map.clone());

        let rendered = format!("{:?}", Meta::Map(map.clone()));
        assert!(rendered.contains("self"));

        map.clear();
    }

    #[test]
    fn test_from_json_value() {
        let meta = Meta::from(json!({ "user": { "id": 7, "tags": ["a", "b"] }, "ratio": 0.5 }));

        let Meta::Map(map) = meta else { panic!("expected map") };
        let Some(Meta::Map(user)) = map.get("user") else { panic!("expected nested map") };
        assert!(matches!(user.get("id"), Some(Meta::Int64(7))));
        assert!(matches!(user.get("tags"), Some(Meta::Array(tags)) if tags.len() == 2));
        assert!(matches!(map.get("ratio"), Some(Meta::Double(r)) if r == 0.5));
    }

    #[test]
    fn test_from_bson_keeps_scalars_opaque() {
        let meta = Meta::from(Bson::Document(doc! {
            "ts": Bson::Timestamp(bson::Timestamp { time: 1, increment: 2 }),
            "id": ObjectId::new(),
        }));

        let Meta::Map(map) = meta else { panic!("expected map") };
        assert!(matches!(map.get("ts"), Some(Meta::Raw(Bson::Timestamp(_)))));
        assert!(matches!(map.get("id"), Some(Meta::ObjectId(_))));
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct Request<'a> {
            method: &'a str,
            status: u16,
        }

        let meta = Meta::from_serialize(&Request { method: "GET", status: 404 }).unwrap();
        let Meta::Map(map) = meta else { panic!("expected map") };
        assert!(matches!(map.get("method"), Some(Meta::String(m)) if m == "GET"));
        assert!(matches!(map.get("status"), Some(Meta::Int64(404))));
    }

    #[test]
    fn test_error_from_source_chain() {
        let err = Outer(std::io::Error::other("connection reset"));
        let captured = MetaError::from_error(&err);

        assert_eq!(captured.name(), "Outer");
        assert_eq!(captured.message(), "request failed");
        assert!(captured.stack().starts_with("Outer: request failed"));
        assert!(captured.stack().contains("caused by: connection reset"));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("std::io::error::Error"), "Error");
        assert_eq!(short_type_name("app::Wrapper<core::fmt::Error>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
