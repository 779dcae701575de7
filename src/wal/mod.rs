//! WAL segment naming and validation
//!
//! PostgreSQL names segments with 24 hex digits (timeline, log, segment), so
//! plain string order is chronological order within a timeline history.
//! Archived objects carry extra suffixes (`.zst`, `.gpg`, ...) and the archive
//! also receives backup labels and timeline history files; [`ArchivedWal`]
//! classifies all of them.

pub mod archive;
pub mod validate;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;

pub use archive::{WalArchive, WalCollection};
pub use validate::{validate, WalLimits, WalSegment};

/// Length of a segment name in hex digits
pub const WAL_NAME_LEN: usize = 24;

/// A validated WAL segment name, ordered chronologically
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalName(String);

impl WalName {
    pub fn parse(name: &str) -> Result<Self, KeeperError> {
        if name.len() == WAL_NAME_LEN && name.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(name.to_ascii_uppercase()))
        } else {
            Err(KeeperError::Validation(format!(
                "'{}' is not a WAL segment name",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Timeline the segment belongs to
    pub fn timeline(&self) -> u32 {
        u32::from_str_radix(&self.0[..8], 16).unwrap_or(0)
    }
}

impl fmt::Display for WalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WalName {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalName {
    type Error = KeeperError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalName> for String {
    fn from(name: WalName) -> Self {
        name.0
    }
}

/// What an object in the WAL archive holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivedWal {
    /// A regular segment
    Segment(WalName),
    /// Backup history file (`<segment>.<offset>.backup`)
    BackupLabel(WalName),
    /// Timeline history file (`<timeline>.history`)
    History,
    /// Anything else found in the archive
    Other,
}

impl ArchivedWal {
    /// Classify an archive object name such as `000000010000000000000003.zst`
    pub fn classify(object_name: &str) -> Self {
        let prefix = object_name.get(..WAL_NAME_LEN).and_then(|p| WalName::parse(p).ok());
        let rest = object_name.get(WAL_NAME_LEN..).unwrap_or("");

        match prefix {
            Some(name) if rest.is_empty() || rest.starts_with(".zst") => Self::Segment(name),
            Some(name) if rest.contains(".backup") => Self::BackupLabel(name),
            _ if object_name.contains(".history") => Self::History,
            _ => Self::Other,
        }
    }

    /// Segment this object is tied to, if any
    pub fn segment(&self) -> Option<&WalName> {
        match self {
            Self::Segment(name) | Self::BackupLabel(name) => Some(name),
            Self::History | Self::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_name() {
        let name = WalName::parse("000000010000000A000000FF").unwrap();
        assert_eq!(name.as_str(), "000000010000000A000000FF");
        assert_eq!(name.timeline(), 1);
    }

    #[test]
    fn test_parse_normalizes_case() {
        let name = WalName::parse("000000010000000a000000ff").unwrap();
        assert_eq!(name.as_str(), "000000010000000A000000FF");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(WalName::parse("").is_err());
        assert!(WalName::parse("00000001000000000000000").is_err());
        assert!(WalName::parse("00000001000000000000000G").is_err());
        assert!(WalName::parse("00000002.history").is_err());
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = WalName::parse("000000010000000000000009").unwrap();
        let b = WalName::parse("00000001000000000000000A").unwrap();
        let c = WalName::parse("000000010000000100000000").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_classify_archive_objects() {
        let seg = WalName::parse("000000010000000000000003").unwrap();

        assert_eq!(
            ArchivedWal::classify("000000010000000000000003.zst"),
            ArchivedWal::Segment(seg.clone())
        );
        assert_eq!(
            ArchivedWal::classify("000000010000000000000003.zst.gpg"),
            ArchivedWal::Segment(seg.clone())
        );
        assert_eq!(
            ArchivedWal::classify("000000010000000000000003.00000028.backup.zst"),
            ArchivedWal::BackupLabel(seg)
        );
        assert_eq!(
            ArchivedWal::classify("00000002.history.zst"),
            ArchivedWal::History
        );
        assert_eq!(ArchivedWal::classify("README"), ArchivedWal::Other);
    }

    #[test]
    fn test_serde_rejects_invalid_name() {
        let ok: WalName = serde_json::from_str("\"000000010000000000000001\"").unwrap();
        assert_eq!(ok.as_str(), "000000010000000000000001");
        assert!(serde_json::from_str::<WalName>("\"nope\"").is_err());
    }
}
