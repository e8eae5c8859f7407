//! In-process event bus for step coordination.
//!
//! Steps announce completion by publishing named events and may wait until a
//! set of events has occurred. The bus keeps no history: a subscription only
//! observes publications made after it was registered.
//!
//! Waiters live in a single registry behind a `std::sync::Mutex`. The lock is
//! never held across an `.await`, so publishers and subscribers cannot
//! deadlock each other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::Event;

/// Why a subscription resolved without all of its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("event bus shut down")]
    Shutdown,

    #[error("wait cancelled")]
    Cancelled,
}

type Delivery = Result<Vec<Event>, WaitError>;

struct Waiter {
    /// Names not observed yet
    pending: HashSet<String>,

    /// First occurrence of every observed name, in arrival order
    received: Vec<Event>,

    tx: oneshot::Sender<Delivery>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

struct Shared {
    registry: Mutex<Registry>,
    tap: broadcast::Sender<Event>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publish/subscribe keyed by event name. Cloning yields another handle to
/// the same bus.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_tap_capacity(256)
    }

    /// Create a bus whose observer stream buffers `capacity` events
    pub fn with_tap_capacity(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                tap,
            }),
        }
    }

    /// Mark `name` as occurred for every registered waiter.
    ///
    /// Never blocks on subscribers. Returns `false` when the bus is shut down
    /// and the event was dropped.
    pub fn publish(&self, name: impl Into<String>, payload: Vec<String>) -> bool {
        let event = Event::new(name, payload);

        {
            let mut registry = self.shared.registry();
            if registry.closed {
                debug!(event = %event.name, "Dropping event published after shutdown");
                return false;
            }

            let mut ready = Vec::new();
            for (id, waiter) in registry.waiters.iter_mut() {
                if waiter.pending.remove(&event.name) {
                    waiter.received.push(event.clone());
                    if waiter.pending.is_empty() {
                        ready.push(*id);
                    }
                }
            }

            for id in ready {
                if let Some(waiter) = registry.waiters.remove(&id) {
                    // Receiver may already be gone; the waiter is removed either way
                    let _ = waiter.tx.send(Ok(waiter.received));
                }
            }
        }

        debug!(event = %event.name, payload = ?event.payload, "Event published");
        // No observers is fine
        let _ = self.shared.tap.send(event);
        true
    }

    /// Register interest in every name of `names`.
    ///
    /// Registration happens before this returns, so publications made after
    /// the call are never missed. The returned [`Subscription`] resolves once
    /// all names were published, when the bus shuts down, or when `cancel`
    /// fires.
    pub fn subscribe<I, S>(&self, names: I, cancel: CancellationToken) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pending: HashSet<String> = names.into_iter().map(Into::into).collect();
        let (tx, rx) = oneshot::channel();

        let mut registry = self.shared.registry();
        let id = if registry.closed {
            let _ = tx.send(Err(WaitError::Shutdown));
            None
        } else if pending.is_empty() {
            let _ = tx.send(Ok(Vec::new()));
            None
        } else {
            let id = registry.next_id;
            registry.next_id += 1;
            registry.waiters.insert(
                id,
                Waiter {
                    pending,
                    received: Vec::new(),
                    tx,
                },
            );
            Some(id)
        };

        Subscription {
            id,
            rx,
            cancel,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Live stream of publications. No replay of earlier events.
    pub fn tap(&self) -> broadcast::Receiver<Event> {
        self.shared.tap.subscribe()
    }

    /// Release every waiter with [`WaitError::Shutdown`] and refuse new work.
    ///
    /// Returns `false` if the bus was already shut down.
    pub fn shutdown(&self) -> bool {
        let mut registry = self.shared.registry();
        if registry.closed {
            return false;
        }
        registry.closed = true;

        let released = registry.waiters.len();
        for (_, waiter) in registry.waiters.drain() {
            let _ = waiter.tx.send(Err(WaitError::Shutdown));
        }
        info!(released, "Event bus shut down");
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.registry().closed
    }

    /// Number of subscriptions still waiting
    pub fn waiting(&self) -> usize {
        self.shared.registry().waiters.len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it before it resolves removes the registration.
pub struct Subscription {
    id: Option<u64>,
    rx: oneshot::Receiver<Delivery>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Wait for every subscribed event.
    ///
    /// Yields the first occurrence of each event, in arrival order.
    pub async fn wait(mut self) -> Result<Vec<Event>, WaitError> {
        tokio::select! {
            biased;
            delivery = &mut self.rx => delivery.unwrap_or(Err(WaitError::Shutdown)),
            _ = self.cancel.cancelled() => Err(WaitError::Cancelled),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.shared.registry().waiters.remove(&id);
        }
    }
}
