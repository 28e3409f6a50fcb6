//! Log records and the documents they are persisted as.

use bson::{Document, doc};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::{level::Level, meta::Meta, sanitizer::MetadataSanitizer};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI escape pattern"));


/// A single log call as handed to the transport.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub meta: Meta,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// A record without metadata, stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            meta: Meta::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_meta(mut self, meta: impl Into<Meta>) -> Self {
        self.meta = meta.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Builds the persisted document for a record, replacing the default shape.
pub type EntryFormatter = Arc<dyn Fn(&LogRecord) -> Document + Send + Sync>;

/// Per-transport settings applied when turning records into documents.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntryFormat {
    pub meta_key: String,
    pub hostname: Option<String>,
    pub label: Option<String>,
    pub decolorize: bool,
}

impl EntryFormat {
    /// Builds `{timestamp, level, message, <meta_key>, hostname?, label?}`.
    pub fn to_document(&self, record: &LogRecord) -> Document {
        let message = if self.decolorize {
            decolorize(&record.message)
        } else {
            record.message.clone()
        };

        let mut document = doc! {
            "timestamp": bson::DateTime::from_chrono(record.timestamp),
            "level": record.level.as_str(),
            "message": message,
        };
        document.insert(self.meta_key.as_str(), MetadataSanitizer::sanitize(&record.meta));

        if let Some(hostname) = &self.hostname {
            document.insert("hostname", hostname.as_str());
        }
        if let Some(label) = &self.label {
            document.insert("label", label.as_str());
        }

        document
    }
}

/// Removes ANSI color sequences.
pub fn decolorize(message: &str) -> String {
    ANSI_ESCAPE.replace_all(message, "").into_owned()
}
