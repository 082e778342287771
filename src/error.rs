/// Error types for silt operations.
///
/// Every fallible operation returns `Result<T, SiltError>`. Two conditions
/// are deliberately *not* errors: a missing key reads as absent, and a
/// version mismatch is the `false` return of the CAS operation that
/// observed it.
use thiserror::Error;

/// The main error type for silt operations.
#[derive(Error, Debug)]
pub enum SiltError {
    /// The caller handed us something the data model rejects: a top-level
    /// value that is not an object, boolean, number, or string, or a
    /// filter operator the algebra does not define.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected
        reason: String,
    },

    /// The KV engine failed on something other than not-found.
    ///
    /// Carries the operation that was running and the debug label of the
    /// database instance so hosts with several open databases can tell
    /// failures apart.
    #[error("storage failure during {op} on '{label}': {message}")]
    Storage {
        /// The core operation in flight (e.g. "create", "find")
        op: String,
        /// The instance's debug label (usually the database path)
        label: String,
        /// Backend error text
        message: String,
    },

    /// A stored envelope failed to decode. The bytes under this key are not
    /// a valid envelope; callers may choose to quarantine the key.
    #[error("corrupt envelope for key '{key}': {message}")]
    Corruption {
        /// The key whose envelope failed to parse
        key: String,
        /// Parse error text
        message: String,
    },

    /// Serialization error when converting data to/from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SiltError {
    /// Build an `InvalidInput` error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Result type alias for silt operations.
pub type SiltResult<T> = Result<T, SiltError>;
