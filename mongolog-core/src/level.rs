//! Log severity levels.
//!
//! Levels follow the npm ordering used by common logging frameworks: a lower
//! priority is more severe, and a transport configured at a given level accepts
//! every record at that level or a more severe one.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::TransportError;


/// Severity of a log record, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    #[default]
    Info,
    Http,
    Verbose,
    Debug,
    Silly,
}

impl Level {
    /// All levels, most severe first.
    pub const ALL: [Level; 7] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Http,
        Level::Verbose,
        Level::Debug,
        Level::Silly,
    ];

    /// Numeric priority; `0` is the most severe.
    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Http => "http",
            Level::Verbose => "verbose",
            Level::Debug => "debug",
            Level::Silly => "silly",
        }
    }

    /// Returns `true` if a transport configured at `self` accepts a record at `record`.
    pub fn enables(self, record: Level) -> bool {
        record.priority() <= self.priority()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TransportError::Configuration(format!("Unknown log level: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enables_more_severe_levels() {
        assert!(Level::Info.enables(Level::Error));
        assert!(Level::Info.enables(Level::Info));
        assert!(!Level::Info.enables(Level::Debug));
        assert!(Level::Silly.enables(Level::Verbose));
    }

    #[test]
    fn test_parse_level_names() {
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!(" VERBOSE ".parse::<Level>().unwrap(), Level::Verbose);
        assert!(matches!("loud".parse::<Level>(), Err(TransportError::Configuration(_))));
    }

    #[test]
    fn test_deserialize_lowercase() {
        let level: Level = serde_json::from_str("\"http\"").unwrap();
        assert_eq!(level, Level::Http);
        assert_eq!(serde_json::to_string(&Level::Silly).unwrap(), "\"silly\"");
    }
}
