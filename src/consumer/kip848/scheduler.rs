//! KIP-848 Heartbeat Scheduler
//!
//! Decides when the next ConsumerGroupHeartbeat goes out. The scheduler does
//! no waiting of its own: callers pass the current monotonic time and sleep
//! until [`HeartbeatScheduler::deadline`], which keeps it usable under a
//! paused tokio clock.
//!
//! ```text
//! Idle -> Armed -> InFlight -> Armed ...
//!            \         \
//!             +---------+--> LeavingGroup -> Halted
//! ```

use super::errors::ErrorClass;
use crate::config::FencingIntervalPolicy;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Scheduler states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing to send (not subscribed)
    Idle,

    /// Next heartbeat goes out at `deadline`
    Armed { deadline: Instant },

    /// A heartbeat was sent at `sent_at` and awaits its response
    InFlight { sent_at: Instant },

    /// Regular heartbeats stopped, only the leave heartbeat remains
    LeavingGroup,

    /// Permanently stopped
    Halted,
}

/// Heartbeat timing state machine
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    state: SchedulerState,

    /// Interval in effect, last advertised by the coordinator
    interval: Duration,

    /// Configured interval, used until the coordinator advertises one
    default_interval: Duration,

    fencing_policy: FencingIntervalPolicy,

    /// Re-arm with zero delay once the in-flight response arrives
    expedite: bool,

    /// Consecutive retriable failures
    retries: u64,
}

impl HeartbeatScheduler {
    pub fn new(default_interval: Duration, fencing_policy: FencingIntervalPolicy) -> Self {
        Self {
            state: SchedulerState::Idle,
            interval: default_interval,
            default_interval,
            fencing_policy,
            expedite: false,
            retries: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn consecutive_retries(&self) -> u64 {
        self.retries
    }

    /// When the next heartbeat is due, if one is scheduled
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, SchedulerState::InFlight { .. })
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, SchedulerState::Halted)
    }

    /// Request a heartbeat as soon as possible
    ///
    /// While a heartbeat is in flight the request is remembered and applied
    /// when its response is handled.
    pub fn arm_now(&mut self, now: Instant) {
        match self.state {
            SchedulerState::Idle | SchedulerState::Armed { .. } => {
                self.state = SchedulerState::Armed { deadline: now };
            }
            SchedulerState::InFlight { .. } => self.expedite = true,
            SchedulerState::LeavingGroup | SchedulerState::Halted => {}
        }
    }

    /// Stop scheduling without leaving for good (unsubscribe)
    pub fn disarm(&mut self) {
        if matches!(
            self.state,
            SchedulerState::Armed { .. } | SchedulerState::InFlight { .. }
        ) {
            self.state = SchedulerState::Idle;
        }
        self.expedite = false;
    }

    /// Move Armed to InFlight if the deadline has passed
    ///
    /// Returns true when a heartbeat must be sent now.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        match self.state {
            SchedulerState::Armed { deadline } if deadline <= now => {
                self.state = SchedulerState::InFlight { sent_at: now };
                true
            }
            _ => false,
        }
    }

    /// Re-arm after the in-flight heartbeat completed
    ///
    /// Success waits out the rest of the interval measured from the send.
    /// Retriable and fencing outcomes re-arm with zero delay. Fatal halts.
    pub fn on_response(
        &mut self,
        now: Instant,
        outcome: ErrorClass,
        advertised_interval: Option<Duration>,
    ) {
        let SchedulerState::InFlight { sent_at } = self.state else {
            return;
        };

        let deadline = match outcome {
            ErrorClass::Success => {
                self.retries = 0;
                if let Some(interval) = advertised_interval.filter(|i| !i.is_zero()) {
                    self.interval = interval;
                }
                if self.expedite {
                    now
                } else {
                    (sent_at + self.interval).max(now)
                }
            }
            ErrorClass::Retriable => {
                self.retries += 1;
                now
            }
            ErrorClass::Fencing => {
                if self.fencing_policy == FencingIntervalPolicy::ResetToDefault {
                    self.interval = self.default_interval;
                }
                now
            }
            ErrorClass::Fatal => {
                self.state = SchedulerState::Halted;
                self.expedite = false;
                return;
            }
        };

        self.expedite = false;
        trace!(
            delay_ms = deadline.saturating_duration_since(now).as_millis() as u64,
            outcome = %outcome,
            "Heartbeat re-armed"
        );
        self.state = SchedulerState::Armed { deadline };
    }

    /// Drop the in-flight heartbeat without a response (cancelled)
    pub fn cancel_in_flight(&mut self, now: Instant) {
        if self.is_in_flight() {
            self.state = SchedulerState::Armed { deadline: now };
        }
    }

    /// Stop regular heartbeats ahead of the leave heartbeat
    ///
    /// Returns false if the scheduler was already halted.
    pub fn begin_leave(&mut self) -> bool {
        if self.is_halted() {
            return false;
        }
        self.state = SchedulerState::LeavingGroup;
        self.expedite = false;
        true
    }

    /// Stop for good
    pub fn halt(&mut self) {
        self.state = SchedulerState::Halted;
        self.expedite = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);

    fn scheduler() -> HeartbeatScheduler {
        HeartbeatScheduler::new(INTERVAL, FencingIntervalPolicy::Retain)
    }

    #[test]
    fn test_tick_requires_armed_and_due() {
        let now = Instant::now();
        let mut s = scheduler();
        assert!(!s.on_tick(now));

        s.arm_now(now);
        assert_eq!(s.deadline(), Some(now));
        assert!(s.on_tick(now));
        assert!(s.is_in_flight());
        assert!(!s.on_tick(now));
    }

    #[test]
    fn test_success_waits_remaining_interval() {
        let start = Instant::now();
        let mut s = scheduler();
        s.arm_now(start);
        s.on_tick(start);

        let response_at = start + Duration::from_millis(100);
        s.on_response(response_at, ErrorClass::Success, None);
        assert_eq!(s.deadline(), Some(start + INTERVAL));

        // Not due before the deadline
        assert!(!s.on_tick(start + Duration::from_millis(499)));
        assert!(s.on_tick(start + INTERVAL));
    }

    #[test]
    fn test_slow_response_rearms_immediately() {
        let start = Instant::now();
        let mut s = scheduler();
        s.arm_now(start);
        s.on_tick(start);

        let late = start + Duration::from_millis(800);
        s.on_response(late, ErrorClass::Success, None);
        assert_eq!(s.deadline(), Some(late));
    }

    #[test]
    fn test_advertised_interval_applies_on_next_rearm() {
        let start = Instant::now();
        let mut s = HeartbeatScheduler::new(Duration::from_secs(5), FencingIntervalPolicy::Retain);
        s.arm_now(start);
        s.on_tick(start);
        s.on_response(start, ErrorClass::Success, Some(INTERVAL));
        assert_eq!(s.interval(), INTERVAL);
        assert_eq!(s.deadline(), Some(start + INTERVAL));
    }

    #[test]
    fn test_retriable_rearms_with_zero_delay() {
        let start = Instant::now();
        let mut s = scheduler();
        s.arm_now(start);
        s.on_tick(start);

        let at = start + Duration::from_millis(20);
        s.on_response(at, ErrorClass::Retriable, None);
        assert_eq!(s.deadline(), Some(at));
        assert_eq!(s.consecutive_retries(), 1);

        s.on_tick(at);
        s.on_response(at, ErrorClass::Success, None);
        assert_eq!(s.consecutive_retries(), 0);
    }

    #[test]
    fn test_fencing_interval_policy() {
        let start = Instant::now();
        let long = Duration::from_secs(5);

        for (policy, expected) in [
            (FencingIntervalPolicy::Retain, INTERVAL),
            (FencingIntervalPolicy::ResetToDefault, long),
        ] {
            let mut s = HeartbeatScheduler::new(long, policy);
            s.arm_now(start);
            s.on_tick(start);
            s.on_response(start, ErrorClass::Success, Some(INTERVAL));
            s.on_tick(start + INTERVAL);
            s.on_response(start + INTERVAL, ErrorClass::Fencing, None);

            assert_eq!(s.interval(), expected);
            assert_eq!(s.deadline(), Some(start + INTERVAL));
        }
    }

    #[test]
    fn test_fatal_halts() {
        let start = Instant::now();
        let mut s = scheduler();
        s.arm_now(start);
        s.on_tick(start);
        s.on_response(start, ErrorClass::Fatal, None);

        assert!(s.is_halted());
        s.arm_now(start);
        assert_eq!(s.deadline(), None);
        assert!(!s.begin_leave());
    }

    #[test]
    fn test_expedite_while_in_flight() {
        let start = Instant::now();
        let mut s = scheduler();
        s.arm_now(start);
        s.on_tick(start);

        s.arm_now(start + Duration::from_millis(10));
        let at = start + Duration::from_millis(30);
        s.on_response(at, ErrorClass::Success, None);
        assert_eq!(s.deadline(), Some(at));
    }

    #[test]
    fn test_leave_stops_regular_heartbeats() {
        let start = Instant::now();
        let mut s = scheduler();
        s.arm_now(start);
        assert!(s.begin_leave());
        assert_eq!(s.state(), SchedulerState::LeavingGroup);
        assert!(!s.on_tick(start + INTERVAL));

        s.halt();
        assert!(s.is_halted());
    }
}
