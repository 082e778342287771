/// The commit core and the public database handle.
///
/// All writes funnel through one primitive under a process-wide write
/// mutex: read the current envelope, validate the precondition, diff,
/// write the new envelope whole, publish the patch. Reads bypass the lock;
/// because envelopes are written atomically by the KV engine, a concurrent
/// reader sees either the pre- or post-commit record.
///
/// The commit path awaits nothing but the mutex itself while holding it,
/// and bus delivery inside a commit is synchronous; handlers must not
/// re-enter the write path.
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bus::{ChangeBus, PatchEvent};
use crate::envelope::{diff, Envelope, Patch, VersionedValue, NUM_PATCHES_TO_KEEP};
use crate::error::{SiltError, SiltResult};
use crate::kv::{KvEngine, KvError, MemoryKv, RedbKv};
use crate::poll::{KeyedPatches, PatchWaiter, PollOptions, PollOutcome};
use crate::query::{Document, Query, QueryExecutor};
use crate::version::{now_hrnano, Version};

/// Scan-derived document counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Keys with a live value
    pub live: usize,
    /// Keys holding a tombstone
    pub tombstones: usize,
}

/// The database handle.
///
/// Cheap to clone; clones share the engine, the write mutex, and the
/// subscription bus. Hosts are expected to create one instance per
/// database path.
#[derive(Clone)]
pub struct Silt {
    engine: Arc<dyn KvEngine>,
    bus: Arc<ChangeBus>,
    write_lock: Arc<Mutex<()>>,
    label: Arc<str>,
}

impl std::fmt::Debug for Silt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Silt")
            .field("label", &self.label)
            .field("bus", &self.bus)
            .finish()
    }
}

impl Silt {
    /// Open (or create) a durable database at `path`.
    ///
    /// The path doubles as the debug label attached to storage errors.
    pub fn open(path: impl AsRef<Path>) -> SiltResult<Self> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let engine = RedbKv::open(path).map_err(|e| SiltError::Storage {
            op: "open".to_string(),
            label: label.clone(),
            message: e.to_string(),
        })?;
        info!(db = %label, "opened document store");
        Ok(Self::with_engine(Arc::new(engine), label))
    }

    /// An ephemeral in-memory database.
    pub fn in_memory() -> Self {
        Self::with_engine(Arc::new(MemoryKv::new()), "memory")
    }

    /// Run on a host-supplied engine. `label` is the debug identifier
    /// attached to storage errors from this instance.
    pub fn with_engine(engine: Arc<dyn KvEngine>, label: impl Into<String>) -> Self {
        Self {
            engine,
            bus: Arc::new(ChangeBus::new()),
            write_lock: Arc::new(Mutex::new(())),
            label: label.into().into(),
        }
    }

    /// The subscription bus this instance publishes commits to.
    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    // ---- reads ------------------------------------------------------

    /// Current value of a key, absent for missing keys and tombstones.
    pub async fn get(&self, key: &str) -> SiltResult<Option<JsonValue>> {
        Ok(self.read_envelope(key, "get")?.and_then(|env| env.value))
    }

    /// The full stored envelope, or absent if the key was never written.
    pub async fn get_with_meta(&self, key: &str) -> SiltResult<Option<Envelope>> {
        self.read_envelope(key, "getWithMeta")
    }

    /// Value and version in one read. Missing keys report `Version::ZERO`;
    /// tombstones report their real version (the CAS token to recreate).
    pub async fn get_with_version(&self, key: &str) -> SiltResult<VersionedValue> {
        Ok(match self.read_envelope(key, "getWithVersion")? {
            Some(env) => VersionedValue {
                version: env.version,
                value: env.value,
            },
            None => VersionedValue::absent(),
        })
    }

    /// Snapshot to start a poll loop from: the current value and the
    /// version to pass as the poll floor.
    pub async fn start_polling(&self, key: &str) -> SiltResult<VersionedValue> {
        self.get_with_version(key).await
    }

    /// The retained patch suffix for a key, oldest first.
    pub async fn history(&self, key: &str) -> SiltResult<Vec<Patch>> {
        Ok(self
            .read_envelope(key, "history")?
            .map(|env| env.patches)
            .unwrap_or_default())
    }

    /// True iff the key holds a live document.
    pub async fn contains_key(&self, key: &str) -> SiltResult<bool> {
        Ok(self
            .read_envelope(key, "containsKey")?
            .is_some_and(|env| !env.is_tombstone()))
    }

    /// Ascending keys of all live documents.
    pub async fn list_keys(&self) -> SiltResult<Vec<String>> {
        let mut keys = Vec::new();
        for (key, bytes) in self.scan("listKeys")? {
            if !self.decode(&key, &bytes)?.is_tombstone() {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Live and tombstone counts over a full scan.
    pub async fn stats(&self) -> SiltResult<StoreStats> {
        let mut stats = StoreStats::default();
        for (key, bytes) in self.scan("stats")? {
            if self.decode(&key, &bytes)?.is_tombstone() {
                stats.tombstones += 1;
            } else {
                stats.live += 1;
            }
        }
        Ok(stats)
    }

    /// Evaluate a query over a full scan of live documents.
    pub async fn find(&self, query: &Query) -> SiltResult<Vec<Document>> {
        let mut documents = Vec::new();
        for (key, bytes) in self.scan("find")? {
            let env = self.decode(&key, &bytes)?;
            if let Some(value) = env.value {
                documents.push(Document { key, value });
            }
        }
        Ok(QueryExecutor::execute(query, documents))
    }

    // ---- writes -----------------------------------------------------

    /// Create a document. Returns false if the key already holds a live
    /// document; succeeds over absent keys and tombstones. The value must
    /// be an object, boolean, number, or string at the top level.
    pub async fn create(&self, key: &str, value: JsonValue) -> SiltResult<bool> {
        validate_top_level(&value)?;
        let _guard = self.write_lock.lock().await;

        let prev = self.read_envelope(key, "create")?;
        if prev.as_ref().is_some_and(|env| !env.is_tombstone()) {
            return Ok(false);
        }
        self.commit(key, prev, Some(value), None, "create")?;
        Ok(true)
    }

    /// Remove a document, writing a tombstone. Returns false if there was
    /// no live value.
    pub async fn remove(&self, key: &str) -> SiltResult<bool> {
        let _guard = self.write_lock.lock().await;

        let prev = self.read_envelope(key, "remove")?;
        if !prev.as_ref().is_some_and(|env| !env.is_tombstone()) {
            return Ok(false);
        }
        self.commit(key, prev, None, None, "remove")?;
        Ok(true)
    }

    /// Compare-and-set: write `value` iff `expected` matches the current
    /// version (`Version::ZERO` for an absent key). `value: None` is a
    /// version-guarded remove. Returns false on mismatch, leaving state
    /// untouched. `options` rides along as the patch's metadata.
    pub async fn set_if_version(
        &self,
        key: &str,
        expected: Version,
        value: Option<JsonValue>,
        options: Option<JsonValue>,
    ) -> SiltResult<bool> {
        if let Some(v) = &value {
            validate_top_level(v)?;
        }
        let _guard = self.write_lock.lock().await;

        let prev = self.read_envelope(key, "setIfVersion")?;
        if !expected.matches(prev.as_ref().map(|env| env.version)) {
            return Ok(false);
        }
        self.commit(key, prev, value, options, "setIfVersion")?;
        Ok(true)
    }

    /// Long-poll for patches newer than the caller's per-key floors.
    ///
    /// The live handler is registered before the stored-history scan, so a
    /// commit landing during the scan cannot be missed. The scan path may
    /// return several keys with several patches each; the live path returns
    /// one key with one patch. Timeout yields an empty list.
    pub async fn poll(
        &self,
        watches: &[(String, Version)],
        options: PollOptions,
    ) -> SiltResult<Vec<KeyedPatches>> {
        let waiter = PatchWaiter::register(&self.bus, watches);

        let scanned = match self.scan_watches(watches) {
            Ok(found) => found,
            Err(e) => {
                waiter.cancel();
                return Err(e);
            }
        };
        if !scanned.is_empty() {
            waiter.cancel();
            return Ok(scanned);
        }

        match waiter.wait(options.read_block_time).await {
            PollOutcome::Resolved(found) => Ok(found),
            PollOutcome::TimedOut => Ok(Vec::new()),
        }
    }

    // ---- internals --------------------------------------------------

    /// The write primitive. Caller holds the write mutex and has already
    /// validated its precondition.
    fn commit(
        &self,
        key: &str,
        prev: Option<Envelope>,
        next: Option<JsonValue>,
        metadata: Option<JsonValue>,
        op: &str,
    ) -> SiltResult<()> {
        let ops = diff(
            prev.as_ref().and_then(|env| env.value.as_ref()),
            next.as_ref(),
        );
        if ops.0.is_empty() {
            // Structurally equal write: no version bump, no event.
            return Ok(());
        }

        let version = match &prev {
            Some(env) if !env.is_tombstone() => env.version.successor(),
            _ => Version::initial(),
        };
        let patch = Patch {
            version,
            ops,
            metadata,
        };

        let mut patches = prev.map(|env| env.patches).unwrap_or_default();
        if patches.len() > NUM_PATCHES_TO_KEEP - 1 {
            patches.drain(..patches.len() - (NUM_PATCHES_TO_KEEP - 1));
        }
        patches.push(patch.clone());

        let envelope = Envelope {
            version,
            value: next,
            patches,
            updated_at: now_hrnano(),
        };
        let bytes = envelope.encode()?;
        self.engine
            .put(key, &bytes)
            .map_err(|e| self.storage_error(op, e))?;

        debug!(key, version = %version, op, "committed");
        self.bus.publish(&PatchEvent {
            key: key.to_string(),
            patch,
        });
        Ok(())
    }

    fn scan_watches(&self, watches: &[(String, Version)]) -> SiltResult<Vec<KeyedPatches>> {
        let mut found = Vec::new();
        for (key, since) in watches {
            let Some(env) = self.read_envelope(key, "poll")? else {
                continue;
            };
            let newer: Vec<Patch> = env
                .patches
                .into_iter()
                .filter(|patch| patch.version > *since)
                .collect();
            if !newer.is_empty() {
                found.push(KeyedPatches {
                    key: key.clone(),
                    patches: newer,
                });
            }
        }
        Ok(found)
    }

    fn read_envelope(&self, key: &str, op: &str) -> SiltResult<Option<Envelope>> {
        match self.engine.get(key) {
            Ok(bytes) => self.decode(key, &bytes).map(Some),
            Err(KvError::NotFound) => Ok(None),
            Err(e) => Err(self.storage_error(op, e)),
        }
    }

    fn scan(&self, op: &str) -> SiltResult<Vec<(String, Vec<u8>)>> {
        self.engine
            .scan_all()
            .map_err(|e| self.storage_error(op, e))
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> SiltResult<Envelope> {
        Envelope::decode(bytes).map_err(|e| SiltError::Corruption {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn storage_error(&self, op: &str, err: KvError) -> SiltError {
        SiltError::Storage {
            op: op.to_string(),
            label: self.label.to_string(),
            message: err.to_string(),
        }
    }
}

/// A top-level value must be an object, boolean, number, or string.
/// Removal is represented by absence, never by storing null, and composite
/// non-object top levels are rejected before any state is touched.
fn validate_top_level(value: &JsonValue) -> SiltResult<()> {
    match value {
        JsonValue::Object(_)
        | JsonValue::Bool(_)
        | JsonValue::Number(_)
        | JsonValue::String(_) => Ok(()),
        JsonValue::Null => Err(SiltError::invalid_input(
            "top-level value must not be null; use remove or an absent value",
        )),
        JsonValue::Array(_) => Err(SiltError::invalid_input(
            "top-level value must be an object, boolean, number, or string",
        )),
    }
}
