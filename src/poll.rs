/// Long-poll building blocks.
///
/// A poll request watches a set of keys, each with a version floor. The
/// waiter registers a bus handler *before* the caller scans stored history,
/// which closes the race window: a commit landing between scan and wait
/// still reaches the handler. The first live event strictly above its key's
/// floor completes a one-shot with a single `(key, [patch])` entry; callers
/// that need more re-poll with advanced versions.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::bus::{ChangeBus, SubscriptionId};
use crate::envelope::Patch;
use crate::version::Version;

/// How long a poll blocks by default before returning empty, in
/// milliseconds.
pub const DEFAULT_READ_BLOCK_TIME_MS: u64 = 50_000;

/// Options for a poll request.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// How long to block waiting for a qualifying live event.
    pub read_block_time: Duration,
}

impl PollOptions {
    /// Options with a specific block time.
    pub fn with_read_block_time(read_block_time: Duration) -> Self {
        Self { read_block_time }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            read_block_time: Duration::from_millis(DEFAULT_READ_BLOCK_TIME_MS),
        }
    }
}

/// One key's qualifying patches in a poll result, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedPatches {
    /// The watched key
    pub key: String,
    /// Patches with versions above the caller's floor
    pub patches: Vec<Patch>,
}

/// How a wait ended. Timeout is ordinary control flow here; the poll
/// boundary turns it into an empty result.
pub(crate) enum PollOutcome {
    Resolved(Vec<KeyedPatches>),
    TimedOut,
}

/// A registered bus handler paired with the one-shot it completes.
///
/// Exactly one of `cancel` (scan already found patches) or `wait` must
/// consume the waiter; both deregister the handler.
pub(crate) struct PatchWaiter {
    id: SubscriptionId,
    rx: oneshot::Receiver<KeyedPatches>,
    bus: Arc<ChangeBus>,
}

impl PatchWaiter {
    /// Subscribe a handler that completes on the first event strictly above
    /// the floor of a watched key.
    pub(crate) fn register(bus: &Arc<ChangeBus>, watches: &[(String, Version)]) -> Self {
        let floors: HashMap<String, Version> = watches.iter().cloned().collect();
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));

        let id = bus.subscribe(move |event| {
            let Some(since) = floors.get(&event.key) else {
                return;
            };
            if event.patch.version > *since {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(KeyedPatches {
                        key: event.key.clone(),
                        patches: vec![event.patch.clone()],
                    });
                }
            }
        });

        Self {
            id,
            rx,
            bus: Arc::clone(bus),
        }
    }

    /// Deregister without waiting.
    pub(crate) fn cancel(self) {
        self.bus.unsubscribe(self.id);
    }

    /// Await the first qualifying live event, up to `read_block_time`.
    pub(crate) async fn wait(self, read_block_time: Duration) -> PollOutcome {
        let Self { id, rx, bus } = self;
        let outcome = match tokio::time::timeout(read_block_time, rx).await {
            Ok(Ok(found)) => PollOutcome::Resolved(vec![found]),
            Ok(Err(_)) | Err(_) => PollOutcome::TimedOut,
        };
        bus.unsubscribe(id);
        outcome
    }
}
