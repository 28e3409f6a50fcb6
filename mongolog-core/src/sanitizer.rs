//! Metadata sanitization for MongoDB persistence.
//!
//! Log metadata is caller-owned and may be arbitrarily shaped: it can refer back to
//! itself, carry keys MongoDB refuses, or embed errors and host values that have no
//! document form. [`MetadataSanitizer`] turns any [`Meta`] tree into a fresh BSON
//! value that is safe to insert, without touching the input:
//!
//! - containers are copied; a container that is its own ancestor becomes `"[Circular]"`
//! - every `.` in a key becomes `[dot]`, every `$` becomes `[$]` and every NUL becomes `[null]`
//! - containers nested deeper than [`MAX_DEPTH`] become `"[Truncated]"`
//! - dates, binaries and object ids are copied through unchanged
//! - errors become `{ message, name, stack, ...fields }`
//! - callables become `{}`
//!
//! Sanitization is total and synchronous.

use bson::{Bson, Document, doc};

use crate::meta::Meta;

/// Marker stored in place of a reference back to an ancestor.
pub const CIRCULAR: &str = "[Circular]";

/// Marker stored in place of a container nested deeper than [`MAX_DEPTH`].
pub const TRUNCATED: &str = "[Truncated]";

/// Deepest container nesting that is copied. MongoDB rejects documents nested
/// more than 100 levels, and the entry itself adds one.
pub const MAX_DEPTH: usize = 64;


/// Produces storage-safe copies of log metadata.
pub struct MetadataSanitizer;

impl MetadataSanitizer {
    /// Key replacements, applied to every occurrence.
    const REPLACEMENTS: [(&'static str, &'static str); 3] = [
        (".", "[dot]"),
        ("$", "[$]"),
        ("\0", "[null]"),
    ];

    /// Returns a cycle-free, key-safe copy of `value`.
    pub fn sanitize(value: &Meta) -> Bson {
        Self::clone_value(value, &mut Vec::new())
    }

    /// Rewrites a document key so it contains no `.`, `$` or NUL.
    pub fn sanitize_key(key: &str) -> String {
        let mut sanitized = key.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter() {
            if sanitized.contains(target) {
                sanitized = sanitized.replace(*target, *replacement);
            }
        }
        sanitized
    }

    /// Copies `value`. `ancestors` holds the identities of the containers on the path
    /// from the root to `value`, excluding `value` itself.
    fn clone_value(value: &Meta, ancestors: &mut Vec<usize>) -> Bson {
        match value {
            Meta::Null => Bson::Null,
            Meta::Bool(b) => Bson::Boolean(*b),
            Meta::Int32(i) => Bson::Int32(*i),
            Meta::Int64(i) => Bson::Int64(*i),
            Meta::Double(d) => Bson::Double(*d),
            Meta::String(s) => Bson::String(s.clone()),
            Meta::DateTime(dt) => Bson::DateTime(*dt),
            Meta::Binary(binary) => Bson::Binary(binary.clone()),
            Meta::ObjectId(id) => Bson::ObjectId(*id),
            Meta::Raw(raw) => raw.clone(),
            Meta::Function(_) => Bson::Document(Document::new()),
            Meta::Array(array) => {
                ancestors.push(array.identity());
                let copy = array
                    .elements()
                    .iter()
                    .map(|element| Self::clone_entry(element, ancestors))
                    .collect();
                ancestors.pop();

                Bson::Array(copy)
            }
            Meta::Map(map) => {
                ancestors.push(map.identity());
                let mut copy = Document::new();
                for (key, entry) in map.entries() {
                    copy.insert(Self::sanitize_key(&key), Self::clone_entry(&entry, ancestors));
                }
                ancestors.pop();

                Bson::Document(copy)
            }
            Meta::Error(error) => {
                ancestors.push(error.fields().identity());
                let mut copy = doc! {
                    "message": error.message(),
                    "name": error.name(),
                    "stack": error.stack(),
                };
                for (key, entry) in error.fields().entries() {
                    copy.insert(Self::sanitize_key(&key), Self::clone_entry(&entry, ancestors));
                }
                ancestors.pop();

                Bson::Document(copy)
            }
        }
    }

    fn clone_entry(entry: &Meta, ancestors: &mut Vec<usize>) -> Bson {
        match entry.identity() {
            Some(id) if ancestors.contains(&id) => Bson::String(CIRCULAR.to_string()),
            Some(_) if ancestors.len() >= MAX_DEPTH => Bson::String(TRUNCATED.to_string()),
            _ => Self::clone_value(entry, ancestors),
        }
    }
}

/// Shorthand for [`MetadataSanitizer::sanitize`].
pub fn sanitize(value: &Meta) -> Bson {
    MetadataSanitizer::sanitize(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Binary, oid::ObjectId, spec::BinarySubtype};

    use crate::meta::{MetaArray, MetaError, MetaMap};

    fn map(entries: Vec<(&str, Meta)>) -> MetaMap {
        entries.into_iter().collect()
    }

    #[test]
    fn test_acyclic_input_is_copied() {
        let input = map(vec![
            ("a", Meta::Map(map(vec![("b", Meta::from(1))]))),
            ("x.y", Meta::from(true)),
        ]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! { "a": { "b": 1 }, "x[dot]y": true }),
        );
    }

    #[test]
    fn test_self_reference_becomes_circular() {
        let input = MetaMap::new();
        input.insert("self", input.clone());

        assert_eq!(
            sanitize(&Meta::Map(input.clone())),
            Bson::Document(doc! { "self": "[Circular]" }),
        );

        input.clear();
    }

    #[test]
    fn test_nested_cycles_through_maps_and_arrays() {
        let root = MetaMap::new();
        root.insert("nestedObjectValue", map(vec![("nestedKey", Meta::Map(root.clone()))]));
        root.insert(
            "arrayValue",
            Meta::from(vec![
                Meta::Map(root.clone()),
                Meta::from("test"),
                Meta::Map(map(vec![("nestedKey", Meta::Map(root.clone()))])),
            ]),
        );

        assert_eq!(
            sanitize(&Meta::Map(root.clone())),
            Bson::Document(doc! {
                "nestedObjectValue": { "nestedKey": "[Circular]" },
                "arrayValue": ["[Circular]", "test", { "nestedKey": "[Circular]" }],
            }),
        );

        root.clear();
    }

    #[test]
    fn test_array_containing_itself() {
        let array = MetaArray::new();
        array.push(1);
        array.push(array.clone());

        assert_eq!(
            sanitize(&Meta::Array(array.clone())),
            Bson::Array(vec![Bson::Int32(1), Bson::String(CIRCULAR.to_string())]),
        );

        array.clear();
    }

    #[test]
    fn test_structurally_equal_siblings_are_not_circular() {
        let shared = map(vec![("k", Meta::from(1))]);
        let input = map(vec![
            ("first", Meta::Map(shared.clone())),
            ("second", Meta::Map(shared)),
            ("third", Meta::Map(map(vec![("k", Meta::from(1))]))),
        ]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! { "first": { "k": 1 }, "second": { "k": 1 }, "third": { "k": 1 } }),
        );
    }

    #[test]
    fn test_keys_replace_every_dot_and_dollar() {
        assert_eq!(MetadataSanitizer::sanitize_key("a.b.c"), "a[dot]b[dot]c");
        assert_eq!(MetadataSanitizer::sanitize_key("$test$"), "[$]test[$]");
        assert_eq!(MetadataSanitizer::sanitize_key("$a.b$"), "[$]a[dot]b[$]");
        assert_eq!(MetadataSanitizer::sanitize_key("plain"), "plain");
        assert_eq!(MetadataSanitizer::sanitize_key("nul\0key"), "nul[null]key");

        let input = map(vec![
            ("key.with.dots", Meta::from(true)),
            ("$test$", Meta::from(true)),
        ]);
        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! { "key[dot]with[dot]dots": true, "[$]test[$]": true }),
        );
    }

    #[test]
    fn test_nested_keys_are_rewritten() {
        let input = map(vec![
            ("outer", Meta::Map(map(vec![("in.ner", Meta::Map(map(vec![("$deep", Meta::from(1))])))]))),
        ]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! { "outer": { "in[dot]ner": { "[$]deep": 1 } } }),
        );
    }

    #[test]
    fn test_opaque_leaves_pass_through() {
        let date = bson::DateTime::now();
        let id = ObjectId::new();
        let blob = Binary { subtype: BinarySubtype::Generic, bytes: b"test".to_vec() };
        let input = map(vec![
            ("customDate", Meta::from(date)),
            ("objectId", Meta::from(id)),
            ("buffer", Meta::from(blob.clone())),
        ]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! { "customDate": date, "objectId": id, "buffer": blob }),
        );
    }

    #[test]
    fn test_errors_become_plain_documents() {
        let error = MetaError::new("CustomError", "some error")
            .with_stack("CustomError: some error\n    at handler")
            .with_field("testField", "custom error")
            .with_field("detail.code", 42);
        let input = map(vec![("customError", Meta::from(error))]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! {
                "customError": {
                    "message": "some error",
                    "name": "CustomError",
                    "stack": "CustomError: some error\n    at handler",
                    "testField": "custom error",
                    "detail[dot]code": 42,
                },
            }),
        );
    }

    #[test]
    fn test_error_referring_to_itself() {
        let error = MetaError::new("Error", "loop");
        error.fields().insert("cause", error.clone());

        let Bson::Document(copy) = sanitize(&Meta::from(error.clone())) else {
            panic!("expected document");
        };
        assert_eq!(copy.get_str("cause").unwrap(), CIRCULAR);

        error.fields().clear();
    }

    #[test]
    fn test_all_kinds_of_values() {
        let input = map(vec![
            ("nullValue", Meta::Null),
            ("booleanValue", Meta::from(true)),
            ("numberValue", Meta::from(1)),
            ("bigIntValue", Meta::from(9_007_199_254_740_991_i64)),
            ("doubleValue", Meta::from(1.5)),
            ("stringValue", Meta::from("test")),
            ("arrayValue", Meta::from(vec!["this", "is", "an", "array"])),
            ("nestedObjectValue", Meta::Map(map(vec![("objectKey", Meta::from(true))]))),
            ("functionValue", Meta::function(|a: i32, b: i32| a + b)),
        ]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! {
                "nullValue": Bson::Null,
                "booleanValue": true,
                "numberValue": 1,
                "bigIntValue": 9_007_199_254_740_991_i64,
                "doubleValue": 1.5,
                "stringValue": "test",
                "arrayValue": ["this", "is", "an", "array"],
                "nestedObjectValue": { "objectKey": true },
                "functionValue": {},
            }),
        );
    }

    #[test]
    fn test_array_of_mixed_values() {
        let input = Meta::from(vec![
            Meta::Null,
            Meta::from(true),
            Meta::from("test"),
            Meta::Map(map(vec![("objectKey", Meta::from(true))])),
            Meta::from(vec!["nested"]),
            Meta::function(()),
        ]);

        assert_eq!(
            sanitize(&input),
            Bson::Array(vec![
                Bson::Null,
                Bson::Boolean(true),
                Bson::String("test".into()),
                Bson::Document(doc! { "objectKey": true }),
                Bson::Array(vec![Bson::String("nested".into())]),
                Bson::Document(Document::new()),
            ]),
        );
    }

    #[test]
    fn test_scalar_roots_are_returned_as_is() {
        assert_eq!(sanitize(&Meta::Null), Bson::Null);
        assert_eq!(sanitize(&Meta::from("message")), Bson::String("message".into()));
        assert_eq!(sanitize(&Meta::function(())), Bson::Document(Document::new()));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = map(vec![("a.b", Meta::from(1))]);
        input.insert("loop", input.clone());

        let _ = sanitize(&Meta::Map(input.clone()));

        assert!(input.get("a.b").is_some());
        assert!(matches!(input.get("loop"), Some(Meta::Map(inner)) if inner.ptr_eq(&input)));

        input.clear();
    }

    #[test]
    fn test_deep_nesting_is_truncated() {
        let root = MetaMap::new();
        let mut current = root.clone();
        for _ in 0..1_000 {
            let child = MetaMap::new();
            current.insert("child", child.clone());
            current = child;
        }

        let sanitized = sanitize(&Meta::Map(root));

        let mut depth = 0;
        let mut node = &sanitized;
        loop {
            match node {
                Bson::Document(document) => {
                    depth += 1;
                    node = document.get("child").unwrap();
                }
                other => {
                    assert_eq!(other, &Bson::String(TRUNCATED.to_string()));
                    break;
                }
            }
        }
        assert_eq!(depth, MAX_DEPTH);
    }

    #[test]
    fn test_nul_in_nested_keys_is_replaced() {
        let input = map(vec![("outer\0", Meta::Map(map(vec![("in\0ner", Meta::from(1))])))]);

        assert_eq!(
            sanitize(&Meta::Map(input)),
            Bson::Document(doc! { "outer[null]": { "in[null]ner": 1 } }),
        );
    }
}
