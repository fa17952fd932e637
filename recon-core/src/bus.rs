//! Topic-indexed publish/subscribe event bus.
//!
//! `Topic` is a closed enum carrying its payload as an associated variant
//! rather than a stringly-typed channel name, so a `match` over delivered
//! events stays exhaustive the same way [`crate::model::RecordType`] does
//! for DNS record types.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::model::{AddrRequest, AsnRequest, DnsRequest, WhoisRequest};

/// Delivery priority. Critical messages must never be dropped; see
/// [`EventBus::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    High,
    Critical,
}

/// Payload carried by a [`Topic`] event. One variant per bus topic.
#[derive(Debug, Clone)]
pub enum Event {
    NewName(DnsRequest),
    NameResolved(DnsRequest),
    NewAddr(AddrRequest),
    NewAsn(AsnRequest),
    NewWhois(WhoisRequest),
    ResolveName(DnsRequest),
    ReverseSweep(ipnet::IpNet),
    /// A subdomain and how many distinct times it has now been observed.
    NewSubdomain { name: String, times: u32 },
    Output(DnsRequest),
    Log { severity: LogSeverity, source: String, message: String },
    SetActive { service: String, active: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Identifies which of the eleven topics an [`Event`] belongs to, without
/// inspecting its payload. Used to index the subscriber map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewName,
    NameResolved,
    NewAddr,
    NewAsn,
    NewWhois,
    ResolveName,
    ReverseSweep,
    NewSubdomain,
    Output,
    Log,
    SetActive,
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::NewName(_) => Topic::NewName,
            Event::NameResolved(_) => Topic::NameResolved,
            Event::NewAddr(_) => Topic::NewAddr,
            Event::NewAsn(_) => Topic::NewAsn,
            Event::NewWhois(_) => Topic::NewWhois,
            Event::ResolveName(_) => Topic::ResolveName,
            Event::ReverseSweep(_) => Topic::ReverseSweep,
            Event::NewSubdomain { .. } => Topic::NewSubdomain,
            Event::Output(_) => Topic::Output,
            Event::Log { .. } => Topic::Log,
            Event::SetActive { .. } => Topic::SetActive,
        }
    }
}

/// Envelope actually pushed into a subscriber's queue, carrying the priority
/// the publisher asked for alongside the event itself.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub priority: Priority,
    pub event: Event,
}

const SUBSCRIBER_QUEUE_DEPTH: usize = 1024;

/// A bounded FIFO shared between a publisher-facing [`Subscriber`] handle
/// and the subscriber's own [`Inbox`], with a [`Notify`] standing in for
/// the recv-side wakeup an `mpsc` channel gives for free.
///
/// Plain `tokio::sync::mpsc` can't express "evict a specific queued item",
/// which the critical-never-drops contract in [`EventBus::publish`] needs —
/// so the queue itself is a `Mutex<VecDeque<Delivery>>` the publisher can
/// reach into, instead of a channel it can only push onto.
struct SharedQueue {
    depth: usize,
    items: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

impl SharedQueue {
    fn new(depth: usize) -> Self {
        Self { depth, items: Mutex::new(VecDeque::with_capacity(depth.min(64))), notify: Notify::new() }
    }

    /// Pushes `delivery` if there is room, evicting the oldest `Low`
    /// delivery first when `priority` is `Critical` and the queue is full.
    /// Returns `Err(delivery)` if no room could be made (queue is full of
    /// `High`/`Critical` items) — the caller decides whether to wait or
    /// drop it.
    fn try_push(&self, delivery: Delivery) -> Result<(), Delivery> {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.depth {
            if delivery.priority == Priority::Critical {
                if let Some(pos) = items.iter().position(|d| d.priority == Priority::Low) {
                    items.remove(pos);
                }
            }
            if items.len() >= self.depth {
                return Err(delivery);
            }
        }
        items.push_back(delivery);
        drop(items);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn recv(&self) -> Option<Delivery> {
        loop {
            {
                let mut items = self.items.lock().unwrap();
                if let Some(delivery) = items.pop_front() {
                    drop(items);
                    self.notify.notify_waiters();
                    return Some(delivery);
                }
            }
            self.notify.notified().await;
        }
    }

    fn try_recv(&self) -> Option<Delivery> {
        self.items.lock().unwrap().pop_front()
    }
}

struct Subscriber {
    id: u64,
    queue: Arc<SharedQueue>,
}

/// A handle returned by [`EventBus::subscribe`]; drop or call
/// [`Subscription::unsubscribe`] to stop delivery.
pub struct Subscription {
    bus: EventBus,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Stops delivery to this subscriber before returning.
    pub fn unsubscribe(self) {
        self.bus.remove_subscriber(self.topic, self.id);
    }
}

/// The receiving half handed back to a subscriber alongside its
/// [`Subscription`].
pub struct Inbox {
    queue: Arc<SharedQueue>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.queue.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Delivery, TryRecvError> {
        self.queue.try_recv().ok_or(TryRecvError)
    }
}

/// Mirrors `mpsc::error::TryRecvError`'s shape closely enough for the
/// handful of call sites that only check `.is_err()`.
#[derive(Debug)]
pub struct TryRecvError;

impl std::fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no delivery currently queued")
    }
}

/// Topic-indexed publish/subscribe bus.
///
/// Subscription-list mutation (subscribe/unsubscribe) is guarded per-topic
/// by `DashMap`'s own sharded locking; publish only ever takes a read path
/// over the topic's current subscriber list — lock-free for reads, with
/// mutation confined to subscription list changes.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<DashMap<Topic, Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a new subscriber for `topic`, returning the inbox it should
    /// poll and a handle to later unsubscribe.
    pub fn subscribe(&self, topic: Topic) -> (Inbox, Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SharedQueue::new(SUBSCRIBER_QUEUE_DEPTH));
        self.subscribers.entry(topic).or_default().push(Subscriber { id, queue: Arc::clone(&queue) });
        (
            Inbox { queue },
            Subscription {
                bus: self.clone(),
                topic,
                id,
            },
        )
    }

    fn remove_subscriber(&self, topic: Topic, id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(&topic) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Delivers `event` at `priority` to every subscriber currently
    /// registered on its topic. Fan-out, at-least-once within this process;
    /// ordered per (topic, publisher) only by virtue of each publisher
    /// calling `publish` sequentially — the bus itself does not serialize
    /// across publishers.
    pub async fn publish(&self, priority: Priority, event: Event) {
        let topic = event.topic();
        let Some(subs) = self.subscribers.get(&topic) else {
            return;
        };
        for sub in subs.iter() {
            self.deliver_one(sub, priority, event.clone()).await;
        }
    }

    /// Critical deliveries never drop: a full queue first evicts its oldest
    /// `Low` delivery (inside [`SharedQueue::try_push`]); if that still
    /// isn't enough room, the publisher blocks on the subscriber's notify
    /// until a `recv` frees a slot. High/Low deliveries are rejected
    /// outright under pressure rather than blocking the publisher.
    async fn deliver_one(&self, sub: &Subscriber, priority: Priority, event: Event) {
        let mut delivery = Delivery { priority, event };
        loop {
            match sub.queue.try_push(delivery) {
                Ok(()) => return,
                Err(rejected) => {
                    if rejected.priority != Priority::Critical {
                        return;
                    }
                    delivery = rejected;
                    sub.queue.notify.notified().await;
                }
            }
        }
    }

    /// Publishes a `Log` event at `Priority::Low` alongside the caller's own
    /// `log::*` call — every log call site is meant to surface on the bus
    /// too, not just in the process log.
    pub async fn log(&self, severity: LogSeverity, source: impl Into<String>, message: impl Into<String>) {
        self.publish(
            Priority::Low,
            Event::Log { severity, source: source.into(), message: message.into() },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tag;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (mut inbox, _sub) = bus.subscribe(Topic::NewName);
        let req = DnsRequest::new("www.example.com", "example.com", Tag::Dns, "test");
        bus.publish(Priority::High, Event::NewName(req.clone())).await;
        let delivery = inbox.recv().await.expect("delivery");
        match delivery.event {
            Event::NewName(got) => assert_eq!(got.name, req.name),
            _ => panic!("wrong topic delivered"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (mut inbox, sub) = bus.subscribe(Topic::Output);
        sub.unsubscribe();
        let req = DnsRequest::new("a.example.com", "example.com", Tag::Dns, "test");
        bus.publish(Priority::Low, Event::Output(req)).await;
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn fan_out_to_multiple_subscribers() {
        let bus = EventBus::new();
        let (mut a, _sa) = bus.subscribe(Topic::NewAddr);
        let (mut b, _sb) = bus.subscribe(Topic::NewAddr);
        let addr = AddrRequest::new("1.2.3.4".parse().unwrap());
        bus.publish(Priority::Low, Event::NewAddr(addr)).await;
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    /// Filling a subscriber's queue with `Low` deliveries, then publishing
    /// one `Critical`, must not be dropped — it evicts the oldest `Low`
    /// instead, so queue occupancy never exceeds the configured depth.
    #[tokio::test]
    async fn critical_evicts_oldest_low_instead_of_blocking_forever() {
        let bus = EventBus::new();
        let (mut inbox, _sub) = bus.subscribe(Topic::NewAddr);

        for i in 0..SUBSCRIBER_QUEUE_DEPTH {
            let addr = AddrRequest::new(format!("10.0.0.{}", i % 250).parse().unwrap());
            bus.publish(Priority::Low, Event::NewAddr(addr)).await;
        }

        let critical_addr = AddrRequest::new("255.255.255.255".parse().unwrap());
        tokio::time::timeout(
            std::time::Duration::from_millis(200),
            bus.publish(Priority::Critical, Event::NewAddr(critical_addr)),
        )
        .await
        .expect("critical publish must not block indefinitely behind a full Low queue");

        let mut saw_critical = false;
        let mut drained = 0;
        while let Some(delivery) = inbox.try_recv().ok() {
            drained += 1;
            if delivery.priority == Priority::Critical {
                saw_critical = true;
            }
        }
        assert_eq!(drained, SUBSCRIBER_QUEUE_DEPTH);
        assert!(saw_critical, "critical delivery must have displaced an evicted Low rather than being dropped");
    }
}
