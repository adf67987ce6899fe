//! Single-writer replicated value with edge-triggered change delivery.
//!
//! The authority owns the only [`Publisher`] for a value; every observer holds
//! a [`Subscription`]. Each write that changes the value delivers exactly one
//! [`Change`] carrying `(previous, current)` to every live subscription.
//! Writes that leave the value unchanged deliver nothing.
//!
//! Each subscription buffers at most a fixed number of changes. When a slow
//! subscription is full the oldest pending change is shed, so `current()`
//! still ends at the newest value but the shed `(previous, current)` links are
//! gone.

use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tracing::trace;

/// Pending changes buffered per subscription by [`Publisher::subscribe`].
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 64;

/// One change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub previous: T,
    pub current: T,
}

/// Create a replicated value holding `initial`.
pub fn replicated<T: Clone + PartialEq>(initial: T) -> Publisher<T> {
    Publisher {
        current: initial,
        subscribers: Vec::new(),
        writes: 0,
        shed: 0,
    }
}

/// Publisher end of one subscription.
#[derive(Debug)]
struct Outlet<T> {
    tx: Sender<Change<T>>,
    /// Second receiver on the same channel, used to drop the oldest change.
    oldest: Receiver<Change<T>>,
    /// Dead once the `Subscription` is dropped.
    alive: Weak<()>,
}

impl<T> Outlet<T> {
    /// Deliver `change`, shedding old ones while full. Returns `(open, shed)`.
    fn deliver(&self, mut change: Change<T>) -> (bool, u64) {
        let mut shed = 0;
        if self.alive.strong_count() == 0 {
            return (false, shed);
        }
        loop {
            match self.tx.try_send(change) {
                Ok(()) => return (true, shed),
                Err(TrySendError::Full(rejected)) => {
                    change = rejected;
                    if self.oldest.try_recv().is_ok() {
                        shed += 1;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return (false, shed),
            }
        }
    }
}

/// Write handle. Not `Clone`: there is exactly one writer per value.
#[derive(Debug)]
pub struct Publisher<T> {
    current: T,
    subscribers: Vec<Outlet<T>>,
    writes: u64,
    shed: u64,
}

impl<T: Clone + PartialEq> Publisher<T> {
    /// Current value.
    pub fn get(&self) -> &T {
        &self.current
    }

    /// Number of writes that changed the value.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Changes dropped from full subscriptions, across all subscribers.
    pub fn shed_count(&self) -> u64 {
        self.shed
    }

    /// Open a new read handle, starting at the current value.
    pub fn subscribe(&mut self) -> Subscription<T> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Open a read handle buffering at most `capacity` changes (minimum 1).
    pub fn subscribe_with_capacity(&mut self, capacity: usize) -> Subscription<T> {
        let (tx, rx) = bounded(capacity.max(1));
        let alive = Arc::new(());
        self.subscribers.push(Outlet {
            tx,
            oldest: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        Subscription {
            rx,
            latest: self.current.clone(),
            closed: false,
            _alive: alive,
        }
    }

    /// Number of subscriptions that have not been dropped.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Replace the value. Returns `true` if it changed and observers were notified.
    pub fn publish(&mut self, value: T) -> bool {
        if value == self.current {
            return false;
        }

        let previous = std::mem::replace(&mut self.current, value);
        self.writes += 1;

        let before = self.subscribers.len();
        let current = &self.current;
        let mut shed = 0;
        self.subscribers.retain(|outlet| {
            let (open, dropped) = outlet.deliver(Change {
                previous: previous.clone(),
                current: current.clone(),
            });
            shed += dropped;
            open
        });
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            trace!(dropped, "removed closed subscriptions");
        }
        if shed > 0 {
            self.shed += shed;
            trace!(shed, "shed oldest changes from full subscriptions");
        }

        true
    }
}

/// Read handle for a replicated value.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: Receiver<Change<T>>,
    latest: T,
    closed: bool,
    _alive: Arc<()>,
}

impl<T: Clone> Subscription<T> {
    /// Latest value observed through this subscription.
    pub fn current(&self) -> &T {
        &self.latest
    }

    /// True once the publisher is gone and every pending change was consumed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next pending change, if any.
    pub fn try_next(&mut self) -> Option<Change<T>> {
        match self.rx.try_recv() {
            Ok(change) => {
                self.latest = change.current.clone();
                Some(change)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// All pending changes in publish order.
    pub fn drain(&mut self) -> Vec<Change<T>> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
