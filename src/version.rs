/// Document versions and the CAS predicate.
///
/// A version is an ordered `(major, minor)` pair. `major` is minted from a
/// high-resolution timestamp when a lineage starts (first write into an
/// absent or tombstoned key); `minor` increments by one on every in-place
/// mutation of the same live lineage. The pair orders lexicographically,
/// which the derived `Ord` provides.
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A `(major, minor)` document version.
///
/// `Version::ZERO` is the sentinel for "no document": a CAS against an
/// absent key must carry it as the expected version.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    /// Creation-time component, monotonically increasing across lineages
    pub major: u64,
    /// In-place mutation counter within a lineage
    pub minor: u64,
}

impl Version {
    /// The absent-document sentinel, `(0, 0)`.
    pub const ZERO: Version = Version { major: 0, minor: 0 };

    /// Create a version from its parts.
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Mint the first version of a fresh lineage: `(now_hrnano(), 1)`.
    pub fn initial() -> Self {
        Self {
            major: now_hrnano(),
            minor: 1,
        }
    }

    /// The next version of the same lineage: `(major, minor + 1)`.
    pub fn successor(self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
        }
    }

    /// True for the `(0, 0)` sentinel.
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// CAS predicate: does this expected version match the current state?
    ///
    /// `current` is the stored envelope's version, or `None` when no
    /// envelope exists. An absent envelope matches only `Version::ZERO`;
    /// a stored envelope (tombstones included) matches only its own version.
    pub fn matches(self, current: Option<Version>) -> bool {
        current.unwrap_or(Version::ZERO) == self
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Current time as nanoseconds since the epoch.
///
/// Used for `Version::initial` majors and envelope `updatedAt` stamps.
pub(crate) fn now_hrnano() -> u64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64
}
