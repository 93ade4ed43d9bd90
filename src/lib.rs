#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Streamline Group
//!
//! Client-side membership for the KIP-848 consumer group protocol. A member
//! joins, learns its partitions, survives coordinator errors and leaves its
//! group using the single `ConsumerGroupHeartbeat` API (key 68).
//!
//! ## Features
//!
//! - **Background Heartbeats**: A tokio task keeps the membership alive at the
//!   interval the coordinator advertises
//! - **Error Classification**: Retriable, fencing and fatal outcomes are each
//!   handled once, in one place
//! - **Ordered Rebalance Delivery**: Revocations always reach the application
//!   before assignments, one event per `poll`
//! - **Bounded Shutdown**: `close` revokes, leaves and returns within the
//!   configured close timeout
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use streamline_group::testing::MockCoordinator;
//! use streamline_group::{GroupConsumerConfig, GroupProtocolEngine, RebalanceEvent};
//!
//! #[tokio::main]
//! async fn main() -> streamline_group::Result<()> {
//!     let coordinator = MockCoordinator::new(500);
//!     coordinator.create_topic("orders", 4);
//!
//!     let config = GroupConsumerConfig::new("orders-processor").with_subscription(["orders"]);
//!     let engine = GroupProtocolEngine::start(config, coordinator)?;
//!     engine.set_rebalance_listener(|event: &RebalanceEvent| println!("{}", event));
//!
//!     while let Some(event) = engine.poll(Duration::from_secs(1)).await? {
//!         println!("delivered {}", event);
//!     }
//!
//!     engine.close().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`consumer`]: Heartbeat engine, scheduler, membership and rebalance delivery
//! - [`config`]: Group consumer configuration
//! - [`error`]: Error types and Result alias
//! - [`testing`]: In-process coordinator with error injection
//!
//! ## Configuration
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `heartbeat_interval_ms` | `5000` | Interval until the coordinator advertises one |
//! | `request_timeout_ms` | `5000` | Bound on a single heartbeat |
//! | `close_timeout_ms` | `10000` | Bound on the leave heartbeat during close |
//! | `fencing_interval_policy` | `retain` | Interval kept after a fence |
//!
//! ## Stability
//!
//! | Module | Stability | Notes |
//! |--------|-----------|-------|
//! | [`consumer`], [`config`], [`error`] | Stable | Core functionality |
//! | [`testing`] | Experimental | Test support |

// Deny .unwrap() in production code to prevent panics in the heartbeat task.
// Test code is exempt via #[cfg(test)] and --cfg test.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

// ── Stable public API modules ──
pub mod config;
pub mod consumer;
pub mod error;

// ── Test support ──
pub mod testing;

pub use config::{FencingIntervalPolicy, GroupConsumerConfig};
pub use consumer::kip848::{
    classify, DispatchSignal, EngineState, ErrorClass, GroupProtocolEngine, GroupTransport,
    HeartbeatRequest, HeartbeatResponse, RebalanceEvent, RebalanceListener, TopicPartitions,
};
pub use error::{ConfigError, GroupError, KafkaErrorCode, Result, TransportError};
