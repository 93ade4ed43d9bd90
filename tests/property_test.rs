//! Property-based tests for the consumer group client
//!
//! Uses proptest to generate random inputs and verify invariants hold
//! across a wide range of scenarios that unit tests might miss.

use proptest::prelude::*;
use std::time::Duration;
use streamline_group::config::FencingIntervalPolicy;
use streamline_group::consumer::kip848::errors::{FATAL_ERROR_CODES, FENCING_ERROR_CODES};
use streamline_group::consumer::kip848::{HeartbeatScheduler, MembershipState};
use streamline_group::{classify, ErrorClass, RebalanceEvent, TopicPartitions};
use tokio::time::Instant;

/// Strategy to generate an assignment over a small topic/partition space
fn arbitrary_assignment() -> impl Strategy<Value = TopicPartitions> {
    prop::collection::btree_set((0..3usize, 0..6i32), 0..12).prop_map(|set| {
        set.into_iter()
            .map(|(topic, partition)| (format!("topic-{}", topic), partition))
            .collect()
    })
}

/// Strategy to generate heartbeat outcomes
fn arbitrary_outcome() -> impl Strategy<Value = ErrorClass> {
    prop_oneof![
        Just(ErrorClass::Success),
        Just(ErrorClass::Retriable),
        Just(ErrorClass::Fencing),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Every code lands in exactly the class its list says
    #[test]
    fn classification_is_total_and_exact(code in any::<i16>()) {
        let class = classify(code);
        let fatal = FATAL_ERROR_CODES.iter().any(|c| c.as_i16() == code);
        let fencing = FENCING_ERROR_CODES.iter().any(|c| c.as_i16() == code);

        let expected = if code == 0 {
            ErrorClass::Success
        } else if fatal {
            ErrorClass::Fatal
        } else if fencing {
            ErrorClass::Fencing
        } else {
            ErrorClass::Retriable
        };
        prop_assert_eq!(class, expected, "code {}", code);
    }

    /// Property: Reconciling through any sequence of targets revokes before
    /// assigning, never double-assigns, and ends on the target
    #[test]
    fn reconciliation_orders_and_converges(
        targets in prop::collection::vec(arbitrary_assignment(), 1..20)
    ) {
        let mut membership = MembershipState::new(None);
        membership.on_join_response(Some("member-1"), Some(1));
        let mut held = TopicPartitions::empty();

        for target in &targets {
            let events = membership.on_assignment_delta(target);
            prop_assert!(events.len() <= 2);

            let mut seen_assign = false;
            for event in &events {
                match event {
                    RebalanceEvent::Revoke { partitions, lost } => {
                        prop_assert!(!seen_assign, "revoke after assign");
                        prop_assert!(!lost);
                        prop_assert!(!partitions.is_empty());
                        held.subtract(partitions);
                    }
                    RebalanceEvent::Assign(partitions) => {
                        prop_assert!(!held.intersects(partitions));
                        prop_assert!(!partitions.is_empty());
                        seen_assign = true;
                        held.extend(partitions);
                    }
                }
            }

            prop_assert_eq!(&held, target);
            prop_assert_eq!(membership.owned(), target);
        }
    }

    /// Property: A fence in the middle of reconciliation loses exactly what
    /// was held, and the next join starts from nothing
    #[test]
    fn fence_loses_everything_held(
        before in arbitrary_assignment(),
        after in arbitrary_assignment(),
    ) {
        let mut membership = MembershipState::new(None);
        membership.on_join_response(Some("member-1"), Some(1));
        membership.on_assignment_delta(&before);

        match membership.on_fence() {
            Some(RebalanceEvent::Revoke { partitions, lost }) => {
                prop_assert!(lost);
                prop_assert_eq!(&partitions, &before);
            }
            other => prop_assert!(before.is_empty(), "unexpected {:?}", other),
        }

        membership.on_join_response(Some("member-2"), Some(1));
        let events = membership.on_assignment_delta(&after);
        prop_assert!(events.iter().all(RebalanceEvent::is_assign));
        prop_assert_eq!(membership.owned(), &after);
    }

    /// Property: The scheduler never sends two heartbeats at once and never
    /// sends early after a success
    #[test]
    fn scheduler_respects_interval(
        outcomes in prop::collection::vec(arbitrary_outcome(), 1..40),
        latency_ms in prop::collection::vec(0u64..1200, 40),
    ) {
        let interval = Duration::from_millis(500);
        let mut scheduler = HeartbeatScheduler::new(interval, FencingIntervalPolicy::Retain);
        let mut now = Instant::now();
        scheduler.arm_now(now);

        for (outcome, latency) in outcomes.iter().zip(latency_ms) {
            let deadline = scheduler.deadline();
            prop_assert!(deadline.is_some());
            now = now.max(deadline.unwrap_or(now));

            let sent_at = now;
            prop_assert!(scheduler.on_tick(now));
            prop_assert!(!scheduler.on_tick(now));

            now += Duration::from_millis(latency);
            scheduler.on_response(now, *outcome, None);

            let next = scheduler.deadline().unwrap_or(now);
            match outcome {
                ErrorClass::Success => prop_assert_eq!(next, (sent_at + interval).max(now)),
                _ => prop_assert_eq!(next, now),
            }
        }
    }
}
