//! Partition (stream) identity.
//!
//! A partition is an independently ordered append log. It is named by a
//! stream name plus a partition index, and every journal operation is scoped
//! to exactly one partition.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

const MAX_STREAM_NAME_LEN: usize = 128;

/// Validated name of a logical stream.
///
/// Restricted to `[A-Za-z0-9_.-]` so it can be used verbatim as a file name
/// or key prefix by storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::invalid_id("StreamName: must not be empty"));
        }
        if name.len() > MAX_STREAM_NAME_LEN {
            return Err(DomainError::invalid_id(format!(
                "StreamName: longer than {MAX_STREAM_NAME_LEN} characters"
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(DomainError::invalid_id(format!(
                "StreamName: unsupported character {c:?}"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for StreamName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamName> for String {
    fn from(value: StreamName) -> Self {
        value.0
    }
}

/// One independently ordered append log: a stream name plus a partition index.
///
/// Positions inside a partition are zero-based, contiguous and unique. At most
/// one writer may be active for a partition at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    stream: StreamName,
    index: u32,
}

impl Partition {
    pub fn new(stream: StreamName, index: u32) -> Self {
        Self { stream, index }
    }

    /// Partition `0` of the named stream.
    pub fn of(stream: impl Into<String>) -> DomainResult<Self> {
        Ok(Self::new(StreamName::new(stream)?, 0))
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl core::fmt::Display for Partition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.stream, self.index)
    }
}

impl FromStr for Partition {
    type Err = DomainError;

    /// Parses the `Display` form, `"<stream>.<index>"`.
    ///
    /// Stream names may themselves contain dots, so the index is whatever
    /// follows the last one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stream, index) = s
            .rsplit_once('.')
            .ok_or_else(|| DomainError::invalid_id(format!("Partition: missing index in {s:?}")))?;
        let index = index
            .parse::<u32>()
            .map_err(|e| DomainError::invalid_id(format!("Partition: {e}")))?;
        Ok(Self::new(StreamName::new(stream)?, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_empty_and_path_like_names() {
        assert!(StreamName::new("").is_err());
        assert!(StreamName::new("../etc").is_err());
        assert!(StreamName::new("a/b").is_err());
        assert!(StreamName::new("x".repeat(129)).is_err());
        assert!(StreamName::new("orders_v2.eu-west").is_ok());
    }

    #[test]
    fn display_uses_last_dot_for_index() {
        let p = Partition::new(StreamName::new("orders.eu").unwrap(), 3);
        assert_eq!(p.to_string(), "orders.eu.3");
        assert_eq!("orders.eu.3".parse::<Partition>().unwrap(), p);
    }

    #[test]
    fn parse_requires_numeric_index() {
        assert!("orders".parse::<Partition>().is_err());
        assert!("orders.x".parse::<Partition>().is_err());
    }

    #[test]
    fn serde_rejects_invalid_stream_name() {
        let json = r#"{"stream":"bad name","index":0}"#;
        assert!(serde_json::from_str::<Partition>(json).is_err());
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(name in "[A-Za-z0-9_.-]{1,64}", index in any::<u32>()) {
            let p = Partition::new(StreamName::new(name).unwrap(), index);
            prop_assert_eq!(p.to_string().parse::<Partition>().unwrap(), p);
        }
    }
}
