// flagforge-core/src/model/time.rs
// ============================================================================
// Module: Flagforge Timestamps
// Description: Canonical RFC 3339 timestamp newtype.
// Purpose: Give every record a stable, serializable point in time.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! `Timestamp` wraps `time::OffsetDateTime` and always serializes as RFC
//! 3339, matching the `ts:iso8601` wire fields named in the specification.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// A point in time, serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Wraps an existing `OffsetDateTime`.
    #[must_use]
    pub const fn new(inner: OffsetDateTime) -> Self {
        Self(inner)
    }

    /// Returns the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Returns the inner `OffsetDateTime`.
    #[must_use]
    pub const fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    /// Returns the duration elapsed between `self` and `other`, as a
    /// non-negative number of whole milliseconds. Returns `0` if `other`
    /// is not after `self`.
    #[must_use]
    pub fn millis_since(self, other: Self) -> u64 {
        let delta = self.0 - other.0;
        u64::try_from(delta.whole_milliseconds()).unwrap_or(0)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = time::error::Parse;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OffsetDateTime::parse(&value, &Rfc3339).map(Self)
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value
            .0
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}
