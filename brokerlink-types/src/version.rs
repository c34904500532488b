//! Layout stamp for stats snapshots.

use std::fmt;

use crate::SCHEMA_VERSION;

/// `major.minor` layout of a [`StatsSnapshot`](crate::StatsSnapshot).
///
/// Fields are only ever added within a major, so any snapshot sharing this
/// build's major can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    /// The layout written by this build.
    pub const CURRENT: SchemaVersion = SchemaVersion {
        major: SCHEMA_VERSION,
        minor: 0,
    };

    pub fn is_readable(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_across_minor_versions_only() {
        let newer_minor = SchemaVersion {
            minor: 7,
            ..SchemaVersion::CURRENT
        };
        let newer_major = SchemaVersion {
            major: SCHEMA_VERSION + 1,
            minor: 0,
        };

        assert!(newer_minor.is_readable());
        assert!(!newer_major.is_readable());
        assert_eq!(SchemaVersion::CURRENT.to_string(), format!("{}.0", SCHEMA_VERSION));
    }
}
