// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The callback fabric: typed publish/subscribe between nodes.
//!
//! Each producer owns one [`Fanout`] per payload type it emits. Delivery is
//! synchronous: `publish` invokes every live subscriber in registration order
//! on the calling thread, so a slow subscriber directly stalls its producer.
//! Nodes that cannot guarantee a fast callback (the output device, the
//! Icecast sink) decouple behind a bounded queue instead of blocking here.
//!
//! Delivery holds the subscriber-list lock. That gives the teardown
//! guarantee (once `unsubscribe` returns, the callback will never run
//! again) and means a callback must not re-enter subscribe/unsubscribe on
//! the fanout it is being delivered from.

use std::sync::{Mutex, PoisonError};

use crate::error::{AircastError, Result};
use crate::graph::{self, NodeId};

/// A subscriber callback for payloads of type `T`.
pub type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// Token returned by subscribe operations; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Entry<T> {
    id: SubscriberId,
    consumer: Option<NodeId>,
    callback: Callback<T>,
}

struct Inner<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

/// The subscriber set owned by one producer.
pub struct Fanout<T> {
    owner: NodeId,
    inner: Mutex<Inner<T>>,
}

impl<T> Fanout<T> {
    /// Create the fanout for the producer identified by `owner`.
    pub fn new(owner: NodeId) -> Self {
        Self { owner, inner: Mutex::new(Inner { next_id: 1, entries: Vec::new() }) }
    }

    /// The producer this fanout belongs to.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe an anonymous observer (a meter, a sink with no PCM output).
    ///
    /// Delivery to the callback begins with the next published payload.
    pub fn subscribe(&self, callback: Callback<T>) -> SubscriberId {
        let mut inner = self.lock();
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Entry { id, consumer: None, callback });
        id
    }

    /// Subscribe a graph node, recording the producer → consumer edge.
    ///
    /// Refused with a validation error when the edge would close a cycle:
    /// the routing graph stays a DAG by construction.
    pub fn subscribe_consumer(&self, consumer: NodeId, callback: Callback<T>) -> Result<SubscriberId> {
        let mut inner = self.lock();
        if graph::would_cycle(self.owner, consumer) {
            return Err(AircastError::Validation(format!(
                "subscription {consumer} -> {} would create a cycle",
                self.owner
            )));
        }
        graph::add_edge(self.owner, consumer);
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Entry { id, consumer: Some(consumer), callback });
        Ok(id)
    }

    /// Remove a subscriber.
    ///
    /// After this returns, the callback will not be invoked again by this
    /// producer. Returns false when the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let Some(position) = inner.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = inner.entries.remove(position);
        if let Some(consumer) = entry.consumer {
            graph::remove_edge(self.owner, consumer);
        }
        true
    }

    /// Remove every subscriber at once (used by a producer going away).
    pub fn clear(&self) {
        let mut inner = self.lock();
        for entry in inner.entries.drain(..) {
            if let Some(consumer) = entry.consumer {
                graph::remove_edge(self.owner, consumer);
            }
        }
    }

    /// Whether there are currently any subscribers.
    pub fn has_subscribers(&self) -> bool {
        !self.lock().entries.is_empty()
    }

    /// The number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Deliver a payload to every subscriber, in registration order.
    pub fn publish(&self, payload: &T) {
        let mut inner = self.lock();
        for entry in &mut inner.entries {
            (entry.callback)(payload);
        }
    }
}

impl<T> std::fmt::Debug for Fanout<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("owner", &self.owner)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::graph::next_node_id;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_publish_in_registration_order() {
        let fanout: Fanout<i32> = Fanout::new(next_node_id());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            fanout.subscribe(Box::new(move |value: &i32| {
                seen.lock().unwrap().push((tag, *value));
            }));
        }

        fanout.publish(&7);
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("first", 7), ("second", 7), ("third", 7)]);
    }

    #[test]
    fn test_unsubscribed_callback_never_runs_again() {
        let fanout: Fanout<i32> = Fanout::new(next_node_id());
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_cb = calls.clone();
        let id = fanout.subscribe(Box::new(move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        }));

        fanout.publish(&1);
        assert!(fanout.unsubscribe(id));
        fanout.publish(&2);
        fanout.publish(&3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!fanout.has_subscribers());
    }

    #[test]
    fn test_unsubscribe_unknown_id() {
        let fanout: Fanout<i32> = Fanout::new(next_node_id());
        let id = fanout.subscribe(Box::new(|_| {}));
        assert!(fanout.unsubscribe(id));
        assert!(!fanout.unsubscribe(id));
    }

    #[test]
    fn test_cycle_refused() {
        let upstream: Fanout<i32> = Fanout::new(next_node_id());
        let downstream: Fanout<i32> = Fanout::new(next_node_id());

        // upstream feeds downstream...
        upstream
            .subscribe_consumer(downstream.owner(), Box::new(|_| {}))
            .expect("forward edge is fine");
        // ...so the reverse subscription must be refused.
        let err = downstream.subscribe_consumer(upstream.owner(), Box::new(|_| {}));
        assert!(matches!(err, Err(AircastError::Validation(_))));
    }

    #[test]
    fn test_clear_drops_edges() {
        let upstream: Fanout<i32> = Fanout::new(next_node_id());
        let downstream: Fanout<i32> = Fanout::new(next_node_id());
        upstream
            .subscribe_consumer(downstream.owner(), Box::new(|_| {}))
            .expect("forward edge is fine");
        upstream.clear();
        assert!(!upstream.has_subscribers());
        // Edge gone: the reverse direction subscribes cleanly now.
        downstream
            .subscribe_consumer(upstream.owner(), Box::new(|_| {}))
            .expect("edge was released by clear");
    }
}
