//! # silt - an embedded versioned document database
//!
//! silt stores JSON documents keyed by opaque strings on top of an ordered
//! key-value engine, and gives you:
//!
//! - **Versioned optimistic concurrency** - every document carries a
//!   `(major, minor)` version used as a compare-and-set token
//! - **Change subscriptions** - long-poll for patches newer than a version
//!   you already hold
//! - **Structured queries** - filter, order, and paginate over a full scan
//!
//! ## Quick Start
//!
//! ```ignore
//! use silt::{Silt, Version};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> silt::SiltResult<()> {
//!     let db = Silt::open("./my-data.redb")?;
//!
//!     // Create a document
//!     db.create("user:alice", json!({"name": "Alice", "age": 30})).await?;
//!
//!     // Version-guarded update
//!     let current = db.get_with_version("user:alice").await?;
//!     let updated = db
//!         .set_if_version(
//!             "user:alice",
//!             current.version,
//!             Some(json!({"name": "Alice", "age": 31})),
//!             None,
//!         )
//!         .await?;
//!     assert!(updated);
//!
//!     // Long-poll for the next change
//!     let changes = db
//!         .poll(
//!             &[("user:alice".to_string(), current.version)],
//!             Default::default(),
//!         )
//!         .await?;
//!     println!("{changes:?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Writes funnel through a single commit primitive under a process-wide
//! write mutex: read the stored envelope, validate the precondition, diff
//! the values into a JSON-patch, write the new envelope whole, publish the
//! patch to the in-process subscription bus. Reads bypass the lock and see
//! either the pre- or post-commit envelope, never a torn one.
//!
//! Each envelope retains the most recent [`NUM_PATCHES_TO_KEEP`] patches of
//! its key's history. A poll whose floor is older than the retained window
//! receives whatever suffix remains; older states are not reconstructable,
//! so callers that fall behind re-fetch the value with its version.
//!
//! The backing store is anything implementing [`kv::KvEngine`]: the bundled
//! [`kv::RedbKv`] for durable databases, [`kv::MemoryKv`] for tests and
//! ephemeral use.
//!
//! ## Thread Safety
//!
//! [`Silt`] is cheaply clonable and fully thread-safe; clones share the
//! engine, write mutex, and subscription bus.

// Internal modules
mod error;
mod store;
mod version;

// Data model and codec
pub mod envelope;

// Ordered KV engine adapter
pub mod kv;

// Subscription bus
pub mod bus;

// Long-poll engine
pub mod poll;

// Query evaluator
pub mod query;

// Public API exports
pub use envelope::{Envelope, Patch, VersionedValue, NUM_PATCHES_TO_KEEP};
pub use error::{SiltError, SiltResult};
pub use store::{Silt, StoreStats};
pub use version::Version;

// Bus exports
pub use bus::{ChangeBus, PatchEvent, SubscriptionId};

// Poll exports
pub use poll::{KeyedPatches, PollOptions, DEFAULT_READ_BLOCK_TIME_MS};

// Query exports
pub use query::{Direction, Document, FieldPath, Filter, OrderBy, Query, QueryExecutor};

// Re-export commonly used external types for convenience
pub use serde_json::{json, Value as JsonValue};

/// Prelude module for convenient imports.
///
/// Import everything you need with:
/// ```ignore
/// use silt::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bus::{ChangeBus, PatchEvent, SubscriptionId};
    pub use crate::envelope::{Envelope, Patch, VersionedValue};
    pub use crate::error::{SiltError, SiltResult};
    pub use crate::poll::{KeyedPatches, PollOptions};
    pub use crate::query::{Direction, Document, Filter, OrderBy, Query};
    pub use crate::store::{Silt, StoreStats};
    pub use crate::version::Version;
    pub use serde_json::{json, Value as JsonValue};
}
