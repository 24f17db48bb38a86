//! Message Bus
//!
//! Topic-based publish/subscribe with wildcard patterns. Delivery is
//! synchronous on the current thread: all matching subscribers run in
//! registration order before `publish` returns. Subscribe/unsubscribe
//! issued during delivery is deferred until the publish completes.

use std::fmt;

/// Subscription handle returned by `subscribe`.
pub type SubscriptionId = u64;

struct Subscription<M> {
    id: SubscriptionId,
    pattern: String,
    handler: Box<dyn FnMut(&str, &M)>,
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

enum PendingOp<M> {
    Subscribe(Subscription<M>),
    Unsubscribe(SubscriptionId),
}

/// Synchronous topic bus over message type `M`.
pub struct MessageBus<M> {
    subscriptions: Vec<Subscription<M>>,
    pending: Vec<PendingOp<M>>,
    delivering: bool,
    next_id: SubscriptionId,
    published: u64,
    delivered: u64,
}

impl<M> Default for MessageBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MessageBus<M> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            pending: Vec::new(),
            delivering: false,
            next_id: 1,
            published: 0,
            delivered: 0,
        }
    }

    /// Subscribe a handler to a topic pattern. `*` matches any remaining
    /// suffix within or across segments (`events.position.*`, `*`).
    pub fn subscribe(
        &mut self,
        pattern: impl Into<String>,
        handler: impl FnMut(&str, &M) + 'static,
    ) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        let sub = Subscription {
            id,
            pattern: pattern.into(),
            handler: Box::new(handler),
        };
        if self.delivering {
            self.pending.push(PendingOp::Subscribe(sub));
        } else {
            self.subscriptions.push(sub);
        }
        id
    }

    /// Remove a subscription. Deferred when issued during delivery.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        if self.delivering {
            self.pending.push(PendingOp::Unsubscribe(id));
        } else {
            self.subscriptions.retain(|s| s.id != id);
        }
    }

    /// Deliver `message` to every subscriber whose pattern matches `topic`,
    /// in registration order.
    pub fn publish(&mut self, topic: &str, message: &M) {
        self.published += 1;
        self.delivering = true;
        for sub in self.subscriptions.iter_mut() {
            if topic_matches(&sub.pattern, topic) {
                (sub.handler)(topic, message);
                self.delivered += 1;
            }
        }
        self.delivering = false;
        for op in self.pending.drain(..) {
            match op {
                PendingOp::Subscribe(sub) => self.subscriptions.push(sub),
                PendingOp::Unsubscribe(id) => self.subscriptions.retain(|s| s.id != id),
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn published_count(&self) -> u64 {
        self.published
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered
    }
}

/// Match a topic against a pattern where `*` matches any remaining suffix.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.find('*') {
        None => pattern == topic,
        Some(idx) => topic.len() >= idx && pattern[..idx] == topic[..idx],
    }
}
