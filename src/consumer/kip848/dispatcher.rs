//! Rebalance event delivery
//!
//! Events produced by the heartbeat task are handed to the application's
//! listener one at a time, on the task that called `poll` or `close`.

use super::assignment::TopicPartitions;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Assignment change handed to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions newly granted to this member
    Assign(TopicPartitions),

    /// Partitions taken away from this member
    ///
    /// `lost` is set when the member lost them involuntarily (fenced, or a
    /// fatal error) instead of handing them back.
    Revoke {
        partitions: TopicPartitions,
        lost: bool,
    },
}

impl RebalanceEvent {
    pub fn revoke(partitions: TopicPartitions, lost: bool) -> Self {
        Self::Revoke { partitions, lost }
    }

    pub fn partitions(&self) -> &TopicPartitions {
        match self {
            Self::Assign(partitions) => partitions,
            Self::Revoke { partitions, .. } => partitions,
        }
    }

    pub fn is_assign(&self) -> bool {
        matches!(self, Self::Assign(_))
    }

    pub fn is_revoke(&self) -> bool {
        matches!(self, Self::Revoke { .. })
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Revoke { lost: true, .. })
    }
}

impl fmt::Display for RebalanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign(partitions) => write!(f, "assign {}", partitions),
            Self::Revoke {
                partitions,
                lost: true,
            } => write!(f, "revoke (lost) {}", partitions),
            Self::Revoke { partitions, .. } => write!(f, "revoke {}", partitions),
        }
    }
}

/// Application callback for assignment changes
///
/// Runs on the task calling `poll` or `close`. The listener may call the
/// application's own assign/unassign primitives.
pub trait RebalanceListener: Send {
    fn on_rebalance(&mut self, event: &RebalanceEvent);
}

impl<F> RebalanceListener for F
where
    F: FnMut(&RebalanceEvent) + Send,
{
    fn on_rebalance(&mut self, event: &RebalanceEvent) {
        self(event)
    }
}

/// What the caller must do after a dispatch
#[must_use = "poll must return to the application after an event was delivered"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSignal {
    /// An event was delivered, return before dispatching another one
    YieldAndReturn,
}

/// Delivers rebalance events to the listener and tracks what it was given
///
/// The listener runs with no lock held. It may read [`assigned`] or replace
/// itself; the replacement wins over the listener that was running.
///
/// [`assigned`]: RebalanceDispatcher::assigned
pub struct RebalanceDispatcher {
    listener: Mutex<Option<Box<dyn RebalanceListener>>>,

    /// Assignment as the application has seen it
    assigned: Mutex<TopicPartitions>,

    delivered: AtomicU64,
    dispatching: AtomicBool,
}

impl RebalanceDispatcher {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
            assigned: Mutex::new(TopicPartitions::empty()),
            delivered: AtomicU64::new(0),
            dispatching: AtomicBool::new(false),
        }
    }

    pub fn set_listener(&self, listener: Box<dyn RebalanceListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Assignment the application currently holds
    pub fn assigned(&self) -> TopicPartitions {
        self.assigned.lock().clone()
    }

    /// Number of events delivered so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// Claim the right to deliver, `None` while another delivery runs
    pub fn try_enter(&self) -> Option<DispatchGuard<'_>> {
        self.dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DispatchGuard { dispatcher: self })
    }
}

/// Exclusive delivery slot, released on drop
pub struct DispatchGuard<'a> {
    dispatcher: &'a RebalanceDispatcher,
}

impl DispatchGuard<'_> {
    /// Deliver one event
    ///
    /// The assignment is applied before the listener runs. Without a
    /// listener it is still applied, the way a consumer without a rebalance
    /// callback assigns automatically.
    pub fn dispatch(&self, event: &RebalanceEvent) -> DispatchSignal {
        let dispatcher = self.dispatcher;
        {
            let mut guard = dispatcher.assigned.lock();
            let assigned = &mut *guard;
            match event {
                RebalanceEvent::Assign(partitions) => {
                    if assigned.intersects(partitions) {
                        warn!(
                            held = %assigned,
                            granted = %partitions,
                            "Assign overlaps partitions already held"
                        );
                    }
                    assigned.extend(partitions);
                }
                RebalanceEvent::Revoke { partitions, .. } => assigned.subtract(partitions),
            }
        }

        debug!(event = %event, "Delivering rebalance event");
        let listener = dispatcher.listener.lock().take();
        if let Some(mut listener) = listener {
            listener.on_rebalance(event);
            let mut slot = dispatcher.listener.lock();
            if slot.is_none() {
                *slot = Some(listener);
            }
        }
        dispatcher.delivered.fetch_add(1, Ordering::AcqRel);

        DispatchSignal::YieldAndReturn
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.dispatching.store(false, Ordering::Release);
    }
}

impl Default for RebalanceDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RebalanceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebalanceDispatcher")
            .field("has_listener", &self.has_listener())
            .field("assigned", &self.assigned())
            .field("delivered", &self.delivered())
            .field("dispatching", &self.dispatching.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn parts(list: &[(&str, i32)]) -> TopicPartitions {
        list.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn test_dispatch_tracks_assignment() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let dispatcher = RebalanceDispatcher::new();
        dispatcher.set_listener(Box::new(move |event: &RebalanceEvent| {
            sink.lock().push(event.clone());
        }));

        let guard = dispatcher.try_enter().unwrap();
        let assign = RebalanceEvent::Assign(parts(&[("t", 0), ("t", 1)]));
        assert_eq!(guard.dispatch(&assign), DispatchSignal::YieldAndReturn);
        assert_eq!(dispatcher.assigned(), parts(&[("t", 0), ("t", 1)]));

        let revoke = RebalanceEvent::revoke(parts(&[("t", 0)]), true);
        let _ = guard.dispatch(&revoke);
        assert_eq!(dispatcher.assigned(), parts(&[("t", 1)]));

        assert_eq!(dispatcher.delivered(), 2);
        assert_eq!(*seen.lock(), vec![assign, revoke]);
    }

    #[test]
    fn test_dispatch_without_listener() {
        let dispatcher = RebalanceDispatcher::new();
        let guard = dispatcher.try_enter().unwrap();
        let _ = guard.dispatch(&RebalanceEvent::Assign(parts(&[("t", 0)])));
        assert_eq!(dispatcher.assigned().len(), 1);
        assert!(!dispatcher.has_listener());
    }

    #[test]
    fn test_single_delivery_slot() {
        let dispatcher = RebalanceDispatcher::new();
        let guard = dispatcher.try_enter().unwrap();
        assert!(dispatcher.try_enter().is_none());
        drop(guard);
        assert!(dispatcher.try_enter().is_some());
    }

    #[test]
    fn test_listener_reads_assignment_during_callback() {
        let dispatcher = Arc::new(RebalanceDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let view = Arc::downgrade(&dispatcher);
        let sink = seen.clone();
        dispatcher.set_listener(Box::new(move |_: &RebalanceEvent| {
            if let Some(dispatcher) = view.upgrade() {
                sink.lock().push(dispatcher.assigned());
            }
        }));

        let guard = dispatcher.try_enter().unwrap();
        let _ = guard.dispatch(&RebalanceEvent::Assign(parts(&[("t", 0), ("t", 1)])));
        let _ = guard.dispatch(&RebalanceEvent::revoke(parts(&[("t", 1)]), false));

        assert_eq!(
            *seen.lock(),
            vec![parts(&[("t", 0), ("t", 1)]), parts(&[("t", 0)])]
        );
    }

    #[test]
    fn test_listener_replaced_during_callback() {
        let dispatcher = Arc::new(RebalanceDispatcher::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let view = Arc::downgrade(&dispatcher);
        let first = calls.clone();
        let second = calls.clone();
        dispatcher.set_listener(Box::new(move |_: &RebalanceEvent| {
            first.lock().push("first");
            if let Some(dispatcher) = view.upgrade() {
                let sink = second.clone();
                dispatcher.set_listener(Box::new(move |_: &RebalanceEvent| {
                    sink.lock().push("second");
                }));
            }
        }));

        let guard = dispatcher.try_enter().unwrap();
        let _ = guard.dispatch(&RebalanceEvent::Assign(parts(&[("t", 0)])));
        let _ = guard.dispatch(&RebalanceEvent::revoke(parts(&[("t", 0)]), false));

        assert_eq!(*calls.lock(), vec!["first", "second"]);
        assert!(dispatcher.has_listener());
    }

    #[test]
    fn test_event_display() {
        let event = RebalanceEvent::revoke(parts(&[("orders", 3)]), true);
        assert_eq!(event.to_string(), "revoke (lost) [orders-3]");
        assert!(event.is_lost());
        assert!(!RebalanceEvent::revoke(parts(&[("orders", 3)]), false).is_lost());
    }
}
