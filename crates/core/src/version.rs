//! Record versioning for optimistic concurrency.
//!
//! Every durable inventory record carries a version that the storage layer
//! advances on each committed update. Writers state which version they read;
//! a mismatch at commit time means another writer got there first.

use serde::{Deserialize, Serialize};

/// Opaque-ish version token for a stored record.
///
/// Internally a counter, but callers should treat it as a value to be read,
/// carried, and handed back — never computed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordVersion(u64);

impl RecordVersion {
    /// Version of a freshly created record (no committed updates yet).
    pub const fn initial() -> Self {
        Self(0)
    }

    /// The version the record will carry after one more committed update.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Optimistic concurrency expectation for a conditional update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for seeding and migrations).
    Any,
    /// Require the record to be at an exact version.
    Exact(RecordVersion),
}

impl ExpectedVersion {
    pub fn matches(self, actual: RecordVersion) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
