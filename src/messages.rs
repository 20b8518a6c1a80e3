//! The message bus (spec §4.5).
//!
//! Grounded directly on the teacher's `storage::track` use of
//! `shrev::EventChannel`/`ReaderId` (there, per-storage Added/Modified/
//! Removed flag channels; here, one channel per message type, each with its
//! own roster of subscriber closures instead of a single external reader).
//! Per-type erasure follows the same `Downcast`-based pattern as
//! `storage::AnyPool`. The topic map is guarded by a `parking_lot::Mutex`
//! (already the kernel's lock of choice for its name/tag indexes) rather
//! than requiring `&mut MessageBus`, since §4.5/§5 call for many producers
//! to publish concurrently.

use std::any::TypeId;
use std::collections::BTreeMap;

use downcast_rs::{impl_downcast, Downcast};
use log::warn;
use parking_lot::Mutex;
use shrev::{EventChannel, EventReadData, ReaderId};

/// A plain value type that can be published on the bus. Implemented by hand
/// or via `#[derive(Message)]`.
pub trait Message: Send + Sync + 'static {}

/// Handle returned by `subscribe`, used to detach a handler later.
#[derive(Clone, Copy, Debug)]
pub struct UnsubscribeToken {
    type_id: TypeId,
    index: usize,
}

struct Subscriber<M> {
    reader: ReaderId<M>,
    handler: Box<dyn FnMut(&M) + Send + Sync>,
}

struct Topic<M> {
    channel: EventChannel<M>,
    subscribers: Vec<Option<Subscriber<M>>>,
}

impl<M> Default for Topic<M> {
    fn default() -> Self {
        Topic {
            channel: EventChannel::new(),
            subscribers: Vec::new(),
        }
    }
}

impl<M: Message> Topic<M> {
    /// Pumps every subscriber present at call time (the §4.5(c) snapshot:
    /// subscribers registered mid-pump land past `snapshot_len` and are not
    /// visited until the next pump). Each subscriber keeps its own
    /// `ReaderId`, so FIFO order (§4.5(b)) holds per-subscriber regardless
    /// of delivery interleaving across subscribers.
    fn pump(&mut self) -> usize {
        let snapshot_len = self.subscribers.len();
        let channel = &self.channel;
        let mut delivered = 0usize;
        for slot in self.subscribers[..snapshot_len].iter_mut() {
            let Some(sub) = slot else { continue };
            let data = channel.read(&mut sub.reader);
            let events = match data {
                EventReadData::Data(iter) => iter,
                EventReadData::Overflow(iter, amount) => {
                    warn!("message subscriber lagged, {amount} events dropped from ring buffer");
                    iter
                }
            };
            for event in events {
                (sub.handler)(event);
                delivered += 1;
            }
        }
        delivered
    }

    fn clear(&mut self) {
        self.channel = EventChannel::new();
        for slot in self.subscribers.iter_mut().flatten() {
            slot.reader = self.channel.register_reader();
        }
    }

    fn remove(&mut self, index: usize) {
        if let Some(slot) = self.subscribers.get_mut(index) {
            *slot = None;
        }
    }
}

/// Dynamic, type-erased view over a `Topic<M>`, keyed by `TypeId`.
trait AnyTopic: Downcast + Send + Sync {
    fn pump_dyn(&mut self) -> usize;
    fn clear_dyn(&mut self);
    fn remove_dyn(&mut self, index: usize);
}
impl_downcast!(AnyTopic);

impl<M: Message> AnyTopic for Topic<M> {
    fn pump_dyn(&mut self) -> usize {
        self.pump()
    }

    fn clear_dyn(&mut self) {
        self.clear()
    }

    fn remove_dyn(&mut self, index: usize) {
        self.remove(index)
    }
}

/// Per-type publish/subscribe bus. One `World` owns one bus; `pump_all` is
/// called exactly once per frame, at the start of `begin_frame` (§4.5).
/// `subscribe`/`publish`/`unsubscribe` take `&self` and serialize through an
/// internal lock, so many producer threads can publish concurrently without
/// each needing exclusive access to the bus.
#[derive(Default)]
pub struct MessageBus {
    topics: Mutex<BTreeMap<TypeId, Box<dyn AnyTopic>>>,
}

impl MessageBus {
    /// Registers `handler` on `M`'s topic, creating the topic on first use.
    /// The handler observes only messages published after this call.
    pub fn subscribe<M: Message>(
        &self,
        handler: impl FnMut(&M) + Send + Sync + 'static,
    ) -> UnsubscribeToken {
        let mut topics = self.topics.lock();
        let type_id = TypeId::of::<M>();
        let topic = topics
            .entry(type_id)
            .or_insert_with(|| Box::<Topic<M>>::default())
            .downcast_mut::<Topic<M>>()
            .expect("message topic type mismatch");
        let reader = topic.channel.register_reader();
        topic.subscribers.push(Some(Subscriber {
            reader,
            handler: Box::new(handler),
        }));
        UnsubscribeToken {
            type_id,
            index: topic.subscribers.len() - 1,
        }
    }

    /// Detaches a previously registered handler. A no-op if already
    /// detached.
    pub fn unsubscribe(&self, token: UnsubscribeToken) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(&token.type_id) {
            topic.remove_dyn(token.index);
        }
    }

    /// Appends `value` to `M`'s per-type FIFO.
    pub fn publish<M: Message>(&self, value: M) {
        let mut topics = self.topics.lock();
        let type_id = TypeId::of::<M>();
        let topic = topics
            .entry(type_id)
            .or_insert_with(|| Box::<Topic<M>>::default())
            .downcast_mut::<Topic<M>>()
            .expect("message topic type mismatch");
        topic.channel.single_write(value);
    }

    /// Delivers every pending message to every subscriber, topic by topic,
    /// in this bus's stable (but otherwise unspecified) `TypeId` iteration
    /// order (§4.5(a)). Returns the total number of deliveries.
    pub fn pump_all(&self) -> usize {
        let mut topics = self.topics.lock();
        topics.values_mut().map(|t| t.pump_dyn()).sum()
    }

    /// Discards all pending (undelivered) messages across every topic
    /// without notifying subscribers.
    pub fn clear(&self) {
        let mut topics = self.topics.lock();
        for topic in topics.values_mut() {
            topic.clear_dyn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy)]
    struct Ping(i32);
    impl Message for Ping {}

    #[test]
    fn pump_delivers_in_fifo_order() {
        let bus = MessageBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        bus.subscribe::<Ping>(move |p| r.lock().unwrap().push(p.0));

        bus.publish(Ping(1));
        bus.publish(Ping(2));
        bus.publish(Ping(3));
        let delivered = bus.pump_all();

        assert_eq!(delivered, 3);
        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn subscribe_during_pump_only_affects_next_pump() {
        let bus = MessageBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));

        let r1 = received.clone();
        let mut bus_cell = None;
        // First subscriber publishes nothing; we simulate late subscription
        // by registering a second handler only after the first pump.
        bus.subscribe::<Ping>(move |p| r1.lock().unwrap().push(p.0));
        bus.publish(Ping(1));
        bus.pump_all();

        let r2 = received.clone();
        bus.subscribe::<Ping>(move |p| r2.lock().unwrap().push(p.0 * 10));
        bus.publish(Ping(2));
        bus.pump_all();
        let _ = &mut bus_cell;

        assert_eq!(*received.lock().unwrap(), vec![1, 2, 20]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = MessageBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let token = bus.subscribe::<Ping>(move |p| r.lock().unwrap().push(p.0));
        bus.unsubscribe(token);
        bus.publish(Ping(1));
        bus.pump_all();
        assert!(received.lock().unwrap().is_empty());
    }

    /// §4.5/§5 call for many producers: `publish` takes `&self`, so it must
    /// be callable from several threads sharing one bus without a data race.
    #[test]
    fn many_threads_publish_concurrently_without_losing_messages() {
        use std::thread;

        let bus = Arc::new(MessageBus::default());
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        bus.subscribe::<Ping>(move |p| r.lock().unwrap().push(p.0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bus = bus.clone();
                thread::spawn(move || bus.publish(Ping(i)))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let delivered = bus.pump_all();
        assert_eq!(delivered, 8);
        let mut got = received.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn clear_discards_without_delivering() {
        let bus = MessageBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        bus.subscribe::<Ping>(move |p| r.lock().unwrap().push(p.0));
        bus.publish(Ping(1));
        bus.clear();
        bus.pump_all();
        assert!(received.lock().unwrap().is_empty());
    }
}
