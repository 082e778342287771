/// The persisted data model and its codec.
///
/// Every key stores one `Envelope`: the current value (absent for
/// tombstones), the version, a bounded suffix of the key's patch history,
/// and the commit timestamp. Envelopes are written whole as canonical JSON,
/// so a concurrent reader sees either the pre- or post-commit record, never
/// a torn one.
///
/// Patch operations are JSON-patch sequences rooted under a synthetic
/// `"root"` field: the diff compares `{"root": prev}` against
/// `{"root": next}`, with an absent side represented by `{}`. That makes
/// transitions to and from absence ordinary `add`/`remove` operations on
/// `/root`.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::SiltResult;
use crate::version::Version;

/// How many patches an envelope retains. Older patches are dropped and are
/// not reconstructable; subscribers that fall further behind than this must
/// re-fetch the value with its version.
pub const NUM_PATCHES_TO_KEEP: usize = 20;

/// The synthetic field patches are rooted under.
pub(crate) const ROOT_FIELD: &str = "root";

/// A versioned JSON-patch describing one transition of a key's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// The version this transition produced
    pub version: Version,
    /// Root-wrapped JSON-patch operations from the previous value
    pub ops: json_patch::Patch,
    /// Caller-supplied metadata attached at commit time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

/// The full persisted record for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Current version of this key's lineage
    pub version: Version,
    /// The live value; absent for tombstones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    /// Bounded suffix of this key's patch history, newest last
    #[serde(default)]
    pub patches: Vec<Patch>,
    /// Commit timestamp, nanoseconds since the epoch
    pub updated_at: u64,
}

impl Envelope {
    /// A tombstone marks a removed key while preserving its version lineage.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Canonical JSON encoding of this envelope.
    pub fn encode(&self) -> SiltResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an envelope from stored bytes.
    ///
    /// Does not validate invariants; callers treat failures here as storage
    /// corruption.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A read result pairing a value (absent for tombstones and missing keys)
/// with the version to CAS against. Missing keys carry `Version::ZERO`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// The version to pass as `expected` in a subsequent CAS
    pub version: Version,
    /// The live value, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl VersionedValue {
    /// The absent-key result: `Version::ZERO` and no value.
    pub fn absent() -> Self {
        Self {
            version: Version::ZERO,
            value: None,
        }
    }
}

/// Compute the root-wrapped JSON-patch between two optional values.
///
/// Returns an empty patch iff the two sides are structurally equal
/// (including both absent).
pub fn diff(prev: Option<&JsonValue>, next: Option<&JsonValue>) -> json_patch::Patch {
    json_patch::diff(&wrap(prev), &wrap(next))
}

fn wrap(value: Option<&JsonValue>) -> JsonValue {
    match value {
        Some(v) => json!({ ROOT_FIELD: v }),
        None => json!({}),
    }
}
