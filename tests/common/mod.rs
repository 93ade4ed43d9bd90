//! Shared fixtures for consumer group integration tests
//!
//! # Usage
//!
//! In your test file, add:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use streamline_group::testing::MockCoordinator;
use streamline_group::{GroupConsumerConfig, GroupProtocolEngine, RebalanceEvent, TopicPartitions};

/// Heartbeat interval advertised by the mock coordinator in these tests
pub const MOCK_INTERVAL_MS: i32 = 500;

pub const GROUP: &str = "test-group";
pub const TOPIC: &str = "test-topic";
pub const PARTITIONS: i32 = 4;

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Coordinator with one topic of `PARTITIONS` partitions and tracking on
pub fn coordinator() -> MockCoordinator {
    init_tracing();
    let coordinator = MockCoordinator::new(MOCK_INTERVAL_MS);
    coordinator.create_topic(TOPIC, PARTITIONS);
    coordinator.start_request_tracking();
    coordinator
}

pub fn config() -> GroupConsumerConfig {
    GroupConsumerConfig::new(GROUP).with_subscription([TOPIC])
}

/// Every partition of the test topic
pub fn all_partitions() -> TopicPartitions {
    (0..PARTITIONS).map(|p| (TOPIC.to_string(), p)).collect()
}

/// Listener that records every event it is handed
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RebalanceEvent>>>,
}

impl EventLog {
    pub fn attach(&self, engine: &GroupProtocolEngine) {
        let events = self.events.clone();
        engine.set_rebalance_listener(move |event: &RebalanceEvent| {
            events.lock().push(event.clone());
        });
    }

    pub fn events(&self) -> Vec<RebalanceEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Replay the log and check an assign never grants a held partition
    pub fn assert_no_overlap(&self) {
        let mut held = TopicPartitions::empty();
        for event in self.events() {
            match &event {
                RebalanceEvent::Assign(partitions) => {
                    assert!(
                        !held.intersects(partitions),
                        "{} overlaps held {}",
                        event,
                        held
                    );
                    held.extend(partitions);
                }
                RebalanceEvent::Revoke { partitions, .. } => held.subtract(partitions),
            }
        }
    }
}

/// Start an engine against `coordinator` with an attached event log
pub fn start(
    coordinator: &MockCoordinator,
    config: GroupConsumerConfig,
) -> (GroupProtocolEngine, EventLog) {
    let engine = GroupProtocolEngine::start(config, coordinator.clone()).unwrap();
    let log = EventLog::default();
    log.attach(&engine);
    (engine, log)
}
