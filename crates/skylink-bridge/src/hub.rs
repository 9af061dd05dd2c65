//! ---
//! skylink_section: "04-telemetry-bridge"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Telemetry bridge core."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Fan-out of snapshot updates to independent subscribers.
//!
//! Every subscriber owns a bounded mailbox. Publishing never waits. A subscriber that keeps
//! up sees every update in publish order. Once its mailbox overflows, everything pending is
//! folded with the new update into a single entry, so the next read always carries the
//! latest value of every field. Updates keep folding into that entry until the reader
//! empties the mailbox, and a subscriber that stays behind for more than
//! `max_consecutive_drops` publishes is evicted.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use skylink_common::HubConfig;
use skylink_metrics::BridgeMetrics;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::snapshot::TelemetrySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of a single [`BroadcastHub::publish`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers that were behind; the update was folded into their pending entry.
    pub dropped: usize,
    /// Subscribers removed for staying behind past the drop limit.
    pub evicted: usize,
    /// Subscribers removed because their receiver was gone.
    pub disconnected: usize,
}

/// Running totals since the hub was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub published: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub subscribers: usize,
}

#[derive(Default)]
struct MailboxState {
    pending: VecDeque<TelemetrySnapshot>,
    /// Set on overflow; cleared once the reader empties the mailbox.
    coalescing: bool,
    consecutive_drops: u32,
    closed: bool,
    receiver_gone: bool,
}

impl MailboxState {
    fn pop(&mut self) -> Option<TelemetrySnapshot> {
        let next = self.pending.pop_front();
        if self.pending.is_empty() {
            self.coalescing = false;
        }
        next
    }
}

enum Offer {
    Queued,
    Folded { consecutive_drops: u32 },
    Gone,
}

struct Mailbox {
    capacity: usize,
    state: Mutex<MailboxState>,
    ready: Notify,
}

impl Mailbox {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            state: Mutex::new(MailboxState::default()),
            ready: Notify::new(),
        })
    }

    fn offer(&self, update: TelemetrySnapshot) -> Offer {
        let mut state = self.state.lock();
        if state.receiver_gone {
            return Offer::Gone;
        }
        let offer = if !state.coalescing && state.pending.len() < self.capacity {
            state.pending.push_back(update);
            state.consecutive_drops = 0;
            Offer::Queued
        } else {
            let mut folded = state
                .pending
                .drain(..)
                .fold(TelemetrySnapshot::default(), |mut acc, queued| {
                    acc.merge(&queued);
                    acc
                });
            folded.merge(&update);
            state.pending.push_back(folded);
            state.coalescing = true;
            state.consecutive_drops = state.consecutive_drops.saturating_add(1);
            Offer::Folded {
                consecutive_drops: state.consecutive_drops,
            }
        };
        drop(state);
        self.ready.notify_one();
        offer
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_one();
    }
}

struct Slot {
    mailbox: Arc<Mailbox>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<SubscriberId, Slot>,
    /// Every published update merged; primes late joiners.
    latest: Option<TelemetrySnapshot>,
    closed: bool,
}

struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }
}

struct HubInner {
    config: HubConfig,
    next_id: AtomicU64,
    state: Mutex<HubState>,
    counters: Counters,
    metrics: Option<BridgeMetrics>,
}

impl HubInner {
    fn remove(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state.subscribers.remove(&id) else {
            return false;
        };
        slot.mailbox.close();
        self.update_gauge(state.subscribers.len());
        true
    }

    fn update_gauge(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_subscribers(count);
        }
    }
}

/// Cloneable handle to the shared subscriber registry.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self::with_metrics(config, None)
    }

    pub fn with_metrics(config: HubConfig, metrics: Option<BridgeMetrics>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                next_id: AtomicU64::new(1),
                state: Mutex::new(HubState::default()),
                counters: Counters::new(),
                metrics,
            }),
        }
    }

    /// Add a subscriber. It is primed with the merged state of everything published so far.
    pub fn register(&self) -> SubscriberHandle {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mailbox = Mailbox::new(self.inner.config.subscriber_capacity);

        let mut state = self.inner.state.lock();
        if state.closed {
            mailbox.close();
            return SubscriberHandle {
                id,
                mailbox,
                hub: Weak::new(),
            };
        }
        if let Some(latest) = state.latest {
            mailbox.offer(latest);
        }
        state.subscribers.insert(
            id,
            Slot {
                mailbox: mailbox.clone(),
            },
        );
        self.inner.update_gauge(state.subscribers.len());
        debug!(subscriber = %id, total = state.subscribers.len(), "subscriber registered");

        SubscriberHandle {
            id,
            mailbox,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber; returns whether it was still registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    /// Offer `update` to every subscriber without waiting on any of them.
    pub fn publish(&self, update: TelemetrySnapshot) -> PublishReport {
        let max_drops = self.inner.config.max_consecutive_drops;
        let mut report = PublishReport::default();

        let mut state = self.inner.state.lock();
        if state.closed {
            return report;
        }
        state
            .latest
            .get_or_insert_with(TelemetrySnapshot::default)
            .merge(&update);
        state
            .subscribers
            .retain(|id, slot| match slot.mailbox.offer(update) {
                Offer::Queued => {
                    report.delivered += 1;
                    true
                }
                Offer::Folded { consecutive_drops } => {
                    report.dropped += 1;
                    if consecutive_drops > max_drops {
                        info!(subscriber = %id, drops = consecutive_drops, "evicting saturated subscriber");
                        slot.mailbox.close();
                        report.evicted += 1;
                        false
                    } else {
                        true
                    }
                }
                Offer::Gone => {
                    report.disconnected += 1;
                    false
                }
            });
        if report.evicted > 0 || report.disconnected > 0 {
            self.inner.update_gauge(state.subscribers.len());
        }
        drop(state);

        let counters = &self.inner.counters;
        counters.published.fetch_add(1, Ordering::Relaxed);
        counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        counters
            .evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        report
    }

    /// Deregister everyone and refuse new subscribers.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let count = state.subscribers.len();
        for (_, slot) in state.subscribers.drain() {
            slot.mailbox.close();
        }
        self.inner.update_gauge(0);
        debug!(subscribers = count, "broadcast hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Merged state of every update published so far.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.inner.state.lock().latest
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    pub fn stats(&self) -> HubStats {
        let counters = &self.inner.counters;
        HubStats {
            published: counters.published.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            evicted: counters.evicted.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Receiving end of a subscription. Dropping it unregisters the subscriber.
pub struct SubscriberHandle {
    id: SubscriberId,
    mailbox: Arc<Mailbox>,
    hub: Weak<HubInner>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next update; `None` once the subscriber was removed or the hub closed and the
    /// mailbox is drained.
    pub async fn recv(&mut self) -> Option<TelemetrySnapshot> {
        loop {
            {
                let mut state = self.mailbox.state.lock();
                if let Some(next) = state.pop() {
                    return Some(next);
                }
                if state.closed {
                    return None;
                }
            }
            // `notify_one` leaves a permit when nobody waits, so no wakeup is lost here.
            self.mailbox.ready.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<TelemetrySnapshot> {
        self.mailbox.state.lock().pop()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.mailbox.state.lock().receiver_gone = true;
        if let Some(inner) = self.hub.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle").field("id", &self.id).finish()
    }
}
