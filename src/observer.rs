//! Per-instance event subscription.
//!
//! Every [`Node`](crate::Node) and [`Graph`](crate::Graph) owns its own
//! [`Observer`]: a minimal subscribe / emit registry. Delivery is synchronous
//! and single-threaded — listeners run to completion on the merging thread,
//! in subscription order. The library performs no listener-level error
//! handling: a panicking listener propagates to the caller of the emitting
//! operation.

use core::fmt;

/// An opaque handle identifying one subscription.
///
/// Returned by [`Observer::subscribe`]; pass it back to
/// [`Observer::unsubscribe`] to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener<E> = Box<dyn FnMut(&E)>;

/// A subscribe / emit registry for one event type.
pub struct Observer<E> {
    listeners: Vec<(Subscription, Listener<E>)>,
    next_id: u64,
}

impl<E> Observer<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    /// Register a listener. Returns the handle that deregisters it.
    pub fn subscribe(&mut self, listener: impl FnMut(&E) + 'static) -> Subscription {
        let id = Subscription(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a subscription. Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != subscription);
        self.listeners.len() != before
    }

    /// Deliver an event to every listener, in subscription order.
    pub fn emit(&mut self, event: &E) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> Default for Observer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
