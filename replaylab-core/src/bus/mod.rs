//! Async publish/subscribe event bus — the sole channel between pipeline
//! stages.
//!
//! One consumer task owns an unbounded FIFO queue. For each event it
//! computes the matching subscriber set (exact kind ∪ wildcard, minus
//! filter non-matches) and runs all matching handlers concurrently,
//! waiting for every one of them before dequeuing the next event. That
//! gives strict cross-event ordering with free intra-event concurrency.
//!
//! Lifecycle: Created → Started → Stopped. `stop()` cancels the consumer;
//! anything still queued is discarded, not processed. Restart after stop
//! is not supported.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::events::{Event, EventKind};

mod filter;
mod handler;
mod policy;
mod relay;

pub use filter::EventFilter;
pub use handler::{handler_fn, EventHandler, HandlerError};
pub use policy::{FailureAction, FailurePolicy, HaltOnError, LogAndContinue};
pub use relay::{BrokerProbe, UnreachableBroker};

/// What a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSelector {
    Only(EventKind),
    /// Wildcard: matches every event.
    Any,
}

/// Opaque token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is stopped; the event was not enqueued")]
    Stopped,
}

/// Runtime counters exposed by the bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub backend: String,
    pub events_published: u64,
    pub events_dispatched: u64,
    pub handler_errors: u64,
    pub queue_depth: usize,
    pub subscribers: usize,
    pub relay_connected: bool,
}

#[derive(Clone)]
struct Subscription {
    token: SubscriptionToken,
    handler: Arc<dyn EventHandler>,
    filter: Option<EventFilter>,
}

#[derive(Default)]
struct SubscriberTable {
    exact: HashMap<EventKind, Vec<Subscription>>,
    wildcard: Vec<Subscription>,
    next_token: u64,
}

impl SubscriberTable {
    fn count(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.wildcard.len()
    }
}

struct BusShared {
    tx: mpsc::UnboundedSender<Event>,
    subscribers: RwLock<SubscriberTable>,
    /// Events enqueued but not yet fully dispatched. Zero means quiescent.
    pending: AtomicUsize,
    idle: Notify,
    published: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    halted: AtomicBool,
    policy: Arc<dyn FailurePolicy>,
    probe: Option<Arc<dyn BrokerProbe>>,
    relay_connected: AtomicBool,
}

impl BusShared {
    fn matching(&self, event: &Event) -> Vec<Subscription> {
        let table = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        table
            .exact
            .get(&event.kind())
            .into_iter()
            .flatten()
            .chain(table.wildcard.iter())
            .filter(|sub| sub.filter.as_ref().map_or(true, |f| f.matches(event)))
            .cloned()
            .collect()
    }
}

enum Lifecycle {
    Created(mpsc::UnboundedReceiver<Event>),
    Started(JoinHandle<()>),
    Stopped,
}

/// The in-process event engine.
pub struct EventBus {
    shared: Arc<BusShared>,
    state: Mutex<Lifecycle>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(BusShared {
                tx,
                subscribers: RwLock::new(SubscriberTable::default()),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                published: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                handler_errors: AtomicU64::new(0),
                halted: AtomicBool::new(false),
                policy: Arc::new(LogAndContinue),
                probe: None,
                relay_connected: AtomicBool::new(false),
            }),
            state: Mutex::new(Lifecycle::Created(rx)),
        }
    }

    /// Replace the handler failure policy (before `start`).
    pub fn with_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        let shared = Arc::get_mut(&mut self.shared);
        match shared {
            Some(inner) => inner.policy = policy,
            // The consumer already holds a clone; too late to swap.
            None => warn!("failure policy ignored: bus already started"),
        }
        self
    }

    /// Attach a distributed-broker probe. Dispatch stays in-process either
    /// way; the probe only affects reported backend state.
    pub fn with_relay(mut self, probe: Arc<dyn BrokerProbe>) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(inner) => inner.probe = Some(probe),
            None => warn!("relay probe ignored: bus already started"),
        }
        self
    }

    /// Register a handler. Events published before `start()` are buffered
    /// and dispatched once the consumer runs.
    pub fn subscribe(
        &self,
        selector: EventSelector,
        handler: Arc<dyn EventHandler>,
        filter: Option<EventFilter>,
    ) -> SubscriptionToken {
        let mut table = self
            .shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        table.next_token += 1;
        let token = SubscriptionToken(table.next_token);
        let subscription = Subscription {
            token,
            handler,
            filter,
        };
        match selector {
            EventSelector::Only(kind) => {
                table.exact.entry(kind).or_default().push(subscription);
            }
            EventSelector::Any => table.wildcard.push(subscription),
        }
        token
    }

    /// Remove a subscription. Safe to call with a token that was already
    /// removed; returns whether anything was removed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut table = self
            .shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for bucket in table.exact.values_mut() {
            let before = bucket.len();
            bucket.retain(|sub| sub.token != token);
            removed |= bucket.len() != before;
        }
        let before = table.wildcard.len();
        table.wildcard.retain(|sub| sub.token != token);
        removed | (table.wildcard.len() != before)
    }

    /// Enqueue an event. The queue is unbounded, so this completes as soon
    /// as the event is in the FIFO; it does not wait for dispatch.
    pub async fn publish(&self, event: Event) -> Result<(), BusError> {
        self.enqueue(event)
    }

    /// Synchronous enqueue for non-async call sites.
    pub fn publish_nowait(&self, event: Event) -> Result<(), BusError> {
        self.enqueue(event)
    }

    fn enqueue(&self, event: Event) -> Result<(), BusError> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.shared.tx.send(event) {
            Ok(()) => {
                self.shared.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                Err(BusError::Stopped)
            }
        }
    }

    /// Start the consumer task. Idempotent while running; starting a
    /// stopped bus is an error.
    pub async fn start(&self) -> Result<(), BusError> {
        if let Some(probe) = self.shared.probe.clone() {
            let connected = probe.probe().await;
            self.shared
                .relay_connected
                .store(connected, Ordering::Release);
            if connected {
                debug!(backend = probe.name(), "broker relay reachable");
            } else {
                warn!(
                    backend = probe.name(),
                    "broker relay unreachable; degrading to in-process dispatch"
                );
            }
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, Lifecycle::Stopped) {
            Lifecycle::Created(rx) => {
                let shared = Arc::clone(&self.shared);
                let handle = tokio::spawn(consume(shared, rx));
                *state = Lifecycle::Started(handle);
                debug!("event bus consumer started");
                Ok(())
            }
            Lifecycle::Started(handle) => {
                *state = Lifecycle::Started(handle);
                Ok(())
            }
            Lifecycle::Stopped => Err(BusError::Stopped),
        }
    }

    /// Cancel the consumer and await its termination. Queued events are
    /// dropped, not processed.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Started(handle) => Some(handle),
                // Dropping the receiver discards anything buffered.
                Lifecycle::Created(_) | Lifecycle::Stopped => None,
            }
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!("event bus consumer stopped");
        }
    }

    /// Wait until the queue is empty and no dispatch is in flight, or the
    /// timeout elapses. `false` means state unknown — callers must not
    /// treat it as success.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return true;
            }
            if self.shared.halted.load(Ordering::Acquire) {
                return false;
            }
            let notified = self.shared.idle.notified();
            // Re-check after arming the notification to close the race
            // with the consumer's decrement.
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.shared.pending.load(Ordering::Acquire) == 0;
            }
        }
    }

    pub fn metrics(&self) -> BusMetrics {
        let backend = self
            .shared
            .probe
            .as_ref()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| "in-process".to_string());
        let subscribers = self
            .shared
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .count();
        BusMetrics {
            backend,
            events_published: self.shared.published.load(Ordering::Relaxed),
            events_dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            handler_errors: self.shared.handler_errors.load(Ordering::Relaxed),
            queue_depth: self.shared.pending.load(Ordering::Acquire),
            subscribers,
            relay_connected: self.shared.relay_connected.load(Ordering::Acquire),
        }
    }
}

async fn consume(shared: Arc<BusShared>, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        let matched = shared.matching(&event);
        let outcomes = join_all(matched.iter().map(|sub| sub.handler.handle(&event))).await;

        let mut halt = false;
        for err in outcomes.into_iter().filter_map(Result::err) {
            shared.handler_errors.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %event.kind(), error = %err, "event handler failed");
            if shared.policy.on_handler_error(&event, &err) == FailureAction::Halt {
                halt = true;
            }
        }

        shared.dispatched.fetch_add(1, Ordering::Relaxed);
        if shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            shared.idle.notify_waiters();
        }
        if halt {
            shared.halted.store(true, Ordering::Release);
            error!(kind = %event.kind(), "failure policy halted the event bus consumer");
            break;
        }
    }
}
