//! Priority pub/sub event bus.
//!
//! Topics are plain strings (`panel.update`, `query.completed`, ...).
//! Delivery is strictly by priority (lower = earlier), FIFO within a
//! priority. A single dispatcher task drains the queue; non-critical events
//! fan out to handlers concurrently without the publisher waiting, critical
//! events are delivered inline and acknowledged back to the publisher.
//!
//! Backpressure: past the high-water mark, non-critical publishes are
//! dropped (counted), critical publishes wait for space up to a deadline.

use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock, mpsc, oneshot};

use crate::config::EventBusConfig;
use crate::error::BusError;

/// High-priority slot used for UI layout updates.
pub const PRIORITY_LAYOUT: u8 = 2;
/// Low-priority slot used for enrichment panel updates.
pub const PRIORITY_PANEL: u8 = 5;
/// Default priority for everything else.
pub const PRIORITY_DEFAULT: u8 = 4;

/// A bus event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
    /// Lower is dispatched earlier.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub critical: bool,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value, priority: u8) -> Self {
        Self {
            topic: topic.into(),
            payload,
            priority,
            created_at: Utc::now(),
            critical: false,
        }
    }

    pub fn critical(topic: impl Into<String>, payload: serde_json::Value, priority: u8) -> Self {
        Self {
            critical: true,
            ..Self::new(topic, payload, priority)
        }
    }
}

type Handler = std::sync::Arc<dyn Fn(&Event) + Send + Sync>;

struct Queued {
    event: Event,
    /// Monotonic sequence for FIFO within a priority.
    seq: u64,
    /// Critical publishers wait on this ack.
    ack: Option<oneshot::Sender<()>>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.event.priority == other.event.priority && self.seq == other.seq
    }
}
impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap is a max-heap; invert so the smallest (priority, seq) pops first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.event.priority, other.seq).cmp(&(self.event.priority, self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    closed: bool,
}

/// Monotonic counters exposed for `status` and tests.
#[derive(Debug, Default)]
pub struct BusCounters {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
    pub delivered: AtomicU64,
}

/// Priority pub/sub bus. Cheap to clone via `Arc`.
pub struct EventBus {
    config: EventBusConfig,
    queue: Mutex<QueueState>,
    /// Wakes the dispatcher when something is enqueued or the bus closes.
    pending: Notify,
    /// Wakes critical publishers waiting for queue space.
    space: Notify,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    pub counters: BusCounters,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            config,
            queue: Mutex::new(QueueState::default()),
            pending: Notify::new(),
            space: Notify::new(),
            handlers: RwLock::new(HashMap::new()),
            counters: BusCounters::default(),
        })
    }

    /// Register a handler for a topic.
    pub async fn subscribe(&self, topic: &str, handler: Handler) {
        self.handlers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// Register a channel subscription; every event on `topic` is cloned in.
    pub async fn subscribe_channel(&self, topic: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(
            topic,
            std::sync::Arc::new(move |event: &Event| {
                let _ = tx.send(event.clone());
            }),
        )
        .await;
        rx
    }

    /// Non-blocking publish. Past the high-water mark the event is dropped
    /// and the `dropped` counter incremented.
    pub fn publish(&self, event: Event) -> Result<(), BusError> {
        let mut state = self.queue.lock().expect("bus queue poisoned");
        if state.closed {
            return Err(BusError::Closed);
        }
        if state.heap.len() >= self.config.high_water_mark {
            drop(state);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Queued {
            event,
            seq,
            ack: None,
        });
        drop(state);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.pending.notify_one();
        Ok(())
    }

    /// Publish a critical event: waits for queue space up to the configured
    /// deadline, then waits for every handler to complete.
    pub async fn publish_critical(&self, mut event: Event) -> Result<(), BusError> {
        event.critical = true;
        let deadline = tokio::time::Instant::now() + self.config.critical_publish_deadline;
        let ack_rx = loop {
            {
                let mut state = self.queue.lock().expect("bus queue poisoned");
                if state.closed {
                    return Err(BusError::Closed);
                }
                if state.heap.len() < self.config.high_water_mark {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.heap.push(Queued {
                        event,
                        seq,
                        ack: Some(ack_tx),
                    });
                    break ack_rx;
                }
            }
            let waited = tokio::time::timeout_at(deadline, self.space.notified()).await;
            if waited.is_err() {
                return Err(BusError::Backpressure(
                    self.config.critical_publish_deadline,
                ));
            }
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.pending.notify_one();
        ack_rx.await.map_err(|_| BusError::Closed)
    }

    /// Spawn the dispatcher task. Returns a handle that stops it on drop.
    pub fn start(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move { bus.dispatch_loop().await })
    }

    /// Close the bus: pending events are still drained by the dispatcher.
    pub fn close(&self) {
        let mut state = self.queue.lock().expect("bus queue poisoned");
        state.closed = true;
        drop(state);
        self.pending.notify_one();
    }

    async fn dispatch_loop(&self) {
        loop {
            let next = {
                let mut state = self.queue.lock().expect("bus queue poisoned");
                match state.heap.pop() {
                    Some(q) => Some(q),
                    None if state.closed => return,
                    None => None,
                }
            };
            let Some(queued) = next else {
                self.pending.notified().await;
                continue;
            };
            self.space.notify_waiters();
            self.dispatch(queued).await;
        }
    }

    async fn dispatch(&self, queued: Queued) {
        let handlers: Vec<Handler> = {
            let map = self.handlers.read().await;
            map.get(&queued.event.topic).cloned().unwrap_or_default()
        };

        if queued.event.critical {
            for handler in &handlers {
                self.invoke(handler, &queued.event);
            }
            if let Some(ack) = queued.ack {
                let _ = ack.send(());
            }
        } else {
            let event = std::sync::Arc::new(queued.event);
            for handler in handlers {
                let event = event.clone();
                let bus_topic = event.topic.clone();
                tokio::spawn(async move {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                    if result.is_err() {
                        tracing::error!(topic = %bus_topic, "event handler panicked");
                    }
                });
            }
        }
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn invoke(&self, handler: &Handler, event: &Event) {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
        if result.is_err() {
            tracing::error!(topic = %event.topic, "event handler panicked");
            // Surface the failure as an event; never recursive because
            // handler errors are published non-critical.
            let _ = self.publish(Event::new(
                "bus.handler_error",
                serde_json::json!({ "topic": event.topic }),
                PRIORITY_DEFAULT,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn test_config(high_water: usize) -> EventBusConfig {
        EventBusConfig {
            high_water_mark: high_water,
            critical_publish_deadline: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn events_dispatch_in_priority_order_fifo_within_priority() {
        let bus = EventBus::new(test_config(64));
        let mut rx = bus.subscribe_channel("t").await;

        // Enqueue before the dispatcher starts so ordering is deterministic.
        bus.publish(Event::new("t", serde_json::json!({"n": 1}), 5))
            .unwrap();
        bus.publish(Event::new("t", serde_json::json!({"n": 2}), 1))
            .unwrap();
        bus.publish(Event::new("t", serde_json::json!({"n": 3}), 5))
            .unwrap();
        bus.publish(Event::new("t", serde_json::json!({"n": 4}), 1))
            .unwrap();

        let handle = bus.start();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let ev = rx.recv().await.unwrap();
            seen.push((ev.priority, ev.payload["n"].as_i64().unwrap()));
        }
        assert_eq!(seen, vec![(1, 2), (1, 4), (5, 1), (5, 3)]);

        bus.close();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn non_critical_publishes_drop_past_high_water() {
        let bus = EventBus::new(test_config(2));
        bus.publish(Event::new("t", serde_json::json!(1), 5)).unwrap();
        bus.publish(Event::new("t", serde_json::json!(2), 5)).unwrap();
        bus.publish(Event::new("t", serde_json::json!(3), 5)).unwrap();

        assert_eq!(bus.counters.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(bus.counters.published.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn critical_publish_waits_for_handlers() {
        let bus = EventBus::new(test_config(64));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        bus.subscribe(
            "c",
            Arc::new(move |_| {
                calls_in_handler.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;
        let handle = bus.start();

        bus.publish_critical(Event::critical("c", serde_json::json!({}), 1))
            .await
            .unwrap();
        // The ack only fires after the handler ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.close();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn critical_publish_times_out_at_high_water() {
        let bus = EventBus::new(test_config(1));
        bus.publish(Event::new("t", serde_json::json!(1), 5)).unwrap();

        // No dispatcher running, the queue stays full.
        let err = bus
            .publish_critical(Event::critical("t", serde_json::json!(2), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Backpressure(_)));
    }

    #[tokio::test]
    async fn handler_panic_does_not_kill_dispatcher() {
        let bus = EventBus::new(test_config(64));
        bus.subscribe("boom", Arc::new(|_| panic!("handler bug")))
            .await;
        let mut rx = bus.subscribe_channel("after").await;
        let handle = bus.start();

        bus.publish_critical(Event::critical("boom", serde_json::json!({}), 1))
            .await
            .unwrap();
        bus.publish(Event::new("after", serde_json::json!({}), 5))
            .unwrap();

        assert!(rx.recv().await.is_some());
        bus.close();
        let _ = handle.await;
    }
}
