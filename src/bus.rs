/// In-process publish/subscribe of patch events.
///
/// The bus is a registry of handler callbacks keyed by subscription id.
/// A successful commit publishes one `PatchEvent` before the commit call
/// returns to its caller; publication fans out synchronously to every
/// registered handler.
///
/// Events for the same key arrive in version order (commits are serialized
/// by the write mutex); events for distinct keys interleave freely.
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::envelope::Patch;

/// A `(key, patch)` event emitted by a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEvent {
    /// The key that changed
    pub key: String,
    /// The patch the commit produced
    pub patch: Patch,
}

/// Unique identifier for a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Handler = Box<dyn Fn(&PatchEvent) + Send + Sync>;

/// The subscription bus: handler registry with synchronous fan-out.
pub struct ChangeBus {
    handlers: DashMap<SubscriptionId, Handler>,
    next_id: AtomicU64,
}

impl ChangeBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler. It receives every published event until
    /// deregistered.
    pub fn subscribe(&self, handler: impl Fn(&PatchEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.insert(id, Box::new(handler));
        id
    }

    /// Remove a handler. Returns false if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Fan an event out to every registered handler, on the caller's task.
    ///
    /// Handlers run while the committing write still holds the write mutex:
    /// they must not block, and must not call back into the bus or the
    /// commit path.
    pub fn publish(&self, event: &PatchEvent) {
        for entry in self.handlers.iter() {
            (entry.value())(event);
        }
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn event(key: &str, version: Version) -> PatchEvent {
        PatchEvent {
            key: key.to_string(),
            patch: Patch {
                version,
                ops: crate::envelope::diff(None, Some(&serde_json::json!({"k": key}))),
                metadata: None,
            },
        }
    }

    #[test]
    fn test_fan_out_to_all_handlers() {
        let bus = ChangeBus::new();
        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&seen_a);
        bus.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&seen_b);
        bus.subscribe(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&event("x", Version::new(1, 1)));
        bus.publish(&event("y", Version::new(2, 1)));

        assert_eq!(seen_a.load(Ordering::SeqCst), 2);
        assert_eq!(seen_b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = ChangeBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&seen);
        let id = bus.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&event("x", Version::new(1, 1)));
        assert!(bus.unsubscribe(id));
        bus.publish(&event("x", Version::new(1, 2)));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_handler_sees_event_payload() {
        let bus = ChangeBus::new();
        let keys = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let k = Arc::clone(&keys);
        bus.subscribe(move |ev: &PatchEvent| {
            k.lock().push((ev.key.clone(), ev.patch.version));
        });

        bus.publish(&event("a", Version::new(5, 1)));
        bus.publish(&event("b", Version::new(5, 2)));

        let seen = keys.lock();
        assert_eq!(
            *seen,
            vec![
                ("a".to_string(), Version::new(5, 1)),
                ("b".to_string(), Version::new(5, 2)),
            ]
        );
    }

    #[test]
    fn test_subscriber_count() {
        let bus = ChangeBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let id = bus.subscribe(|_| {});
        bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 2);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
