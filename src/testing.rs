//! Testing utilities for consumer group integration tests
//!
//! Provides an in-process group coordinator that speaks the
//! ConsumerGroupHeartbeat protocol, with hooks to inject errors and to
//! inspect the requests a member sent.
//!
//! # Stability
//!
//! **⚠️ Experimental** - This module is under active development.
//!
//! # Example
//!
//! ```ignore
//! use streamline_group::testing::MockCoordinator;
//! use streamline_group::{GroupConsumerConfig, GroupProtocolEngine};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_join() {
//!     let coordinator = MockCoordinator::new(500);
//!     coordinator.create_topic("orders", 4);
//!     coordinator.start_request_tracking();
//!
//!     let config = GroupConsumerConfig::new("group").with_subscription(["orders"]);
//!     let engine = GroupProtocolEngine::start(config, coordinator.clone()).unwrap();
//!
//!     let event = engine.poll(Duration::from_secs(1)).await.unwrap();
//!     assert!(event.unwrap().is_assign());
//!     engine.close().await.unwrap();
//! }
//! ```

use crate::config::defaults::DEFAULT_MOCK_HEARTBEAT_INTERVAL_MS;
use crate::consumer::kip848::errors::{classify, ErrorClass};
use crate::consumer::kip848::{HeartbeatRequest, HeartbeatResponse, MemberEpoch, TopicPartitions};
use crate::consumer::GroupTransport;
use crate::error::{KafkaErrorCode, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

// ============================================================================
// Error Injection
// ============================================================================

/// Outcome forced onto one heartbeat
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedOutcome {
    /// Respond with this error code after `rtt`
    ErrorCode { code: i16, rtt: Duration },

    /// Fail at the transport level after `rtt`
    Transport { error: TransportError, rtt: Duration },

    /// Handle the heartbeat normally after `rtt`
    Passthrough { rtt: Duration },
}

impl InjectedOutcome {
    fn rtt(&self) -> Duration {
        match self {
            Self::ErrorCode { rtt, .. } | Self::Transport { rtt, .. } | Self::Passthrough { rtt } => {
                *rtt
            }
        }
    }
}

/// FIFO of outcomes applied to the next heartbeats, one each
#[derive(Debug, Default, Clone)]
pub struct ErrorInjector {
    queue: VecDeque<InjectedOutcome>,
}

impl ErrorInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error code; `0` lets the heartbeat through after `rtt`
    pub fn push_error(&mut self, code: i16, rtt: Duration) {
        let outcome = if code == KafkaErrorCode::None.as_i16() {
            InjectedOutcome::Passthrough { rtt }
        } else {
            InjectedOutcome::ErrorCode { code, rtt }
        };
        self.queue.push_back(outcome);
    }

    pub fn push_transport_error(&mut self, error: TransportError, rtt: Duration) {
        self.queue.push_back(InjectedOutcome::Transport { error, rtt });
    }

    pub fn pop(&mut self) -> Option<InjectedOutcome> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ============================================================================
// Mock Coordinator
// ============================================================================

/// A heartbeat as the coordinator received it
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRequest {
    pub received_at: Instant,
    pub request: HeartbeatRequest,
}

#[derive(Debug, Clone)]
struct MockMember {
    epoch: MemberEpoch,
    subscription: Vec<String>,
    target: TopicPartitions,
    delivered: Option<TopicPartitions>,
}

#[derive(Debug)]
struct MockState {
    heartbeat_interval_ms: i32,
    topics: BTreeMap<String, i32>,
    members: BTreeMap<String, MockMember>,
    injector: ErrorInjector,
    tracking: bool,
    requests: Vec<TrackedRequest>,
    next_member: u64,
}

/// In-process KIP-848 group coordinator
///
/// Assigns the partitions of each subscribed topic round-robin over the
/// members subscribed to it, ordered by member id. Cloning shares the same
/// coordinator.
#[derive(Debug, Clone)]
pub struct MockCoordinator {
    state: Arc<Mutex<MockState>>,
}

impl MockCoordinator {
    /// Create a coordinator advertising `heartbeat_interval_ms`
    pub fn new(heartbeat_interval_ms: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                heartbeat_interval_ms,
                topics: BTreeMap::new(),
                members: BTreeMap::new(),
                injector: ErrorInjector::new(),
                tracking: false,
                requests: Vec::new(),
                next_member: 0,
            })),
        }
    }

    pub fn create_topic(&self, name: &str, partitions: i32) {
        let mut state = self.state.lock();
        state.topics.insert(name.to_string(), partitions);
        state.rebalance();
    }

    pub fn push_error(&self, code: i16, rtt: Duration) {
        self.state.lock().injector.push_error(code, rtt);
    }

    pub fn push_transport_error(&self, error: TransportError, rtt: Duration) {
        self.state.lock().injector.push_transport_error(error, rtt);
    }

    /// Record every heartbeat from now on, dropping earlier records
    pub fn start_request_tracking(&self) {
        let mut state = self.state.lock();
        state.tracking = true;
        state.requests.clear();
    }

    pub fn stop_request_tracking(&self) {
        self.state.lock().tracking = false;
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Recorded requests, oldest first
    pub fn requests(&self) -> Vec<HeartbeatRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|tracked| tracked.request.clone())
            .collect()
    }

    /// Recorded requests with the time they arrived
    pub fn tracked_requests(&self) -> Vec<TrackedRequest> {
        self.state.lock().requests.clone()
    }

    /// Recorded heartbeats, leave heartbeats excluded
    pub fn heartbeat_count(&self) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| !r.request.is_leave())
            .count()
    }

    pub fn leave_count(&self) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.request.is_leave())
            .count()
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Target assignment the coordinator holds for a member
    pub fn target_of(&self, member_id: &str) -> Option<TopicPartitions> {
        self.state
            .lock()
            .members
            .get(member_id)
            .map(|m| m.target.clone())
    }
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_HEARTBEAT_INTERVAL_MS as i32)
    }
}

impl MockState {
    fn handle(&mut self, request: &HeartbeatRequest) -> HeartbeatResponse {
        let interval = self.heartbeat_interval_ms;

        if request.is_leave() {
            if self.members.remove(&request.member_id).is_some() {
                self.rebalance();
            }
            return HeartbeatResponse::success(request.member_epoch, interval);
        }

        let member_id = if request.is_join() {
            let member_id = if request.member_id.is_empty() {
                self.next_member += 1;
                format!("mock-member-{}-{}", self.next_member, uuid::Uuid::new_v4())
            } else {
                request.member_id.clone()
            };
            self.members.insert(
                member_id.clone(),
                MockMember {
                    epoch: 0,
                    subscription: request.subscribed_topic_names.clone(),
                    target: TopicPartitions::empty(),
                    delivered: None,
                },
            );
            self.rebalance();
            member_id
        } else {
            let Some(member) = self.members.get(&request.member_id) else {
                return HeartbeatResponse::error(KafkaErrorCode::UnknownMemberId.as_i16());
            };
            if member.epoch != request.member_epoch {
                return HeartbeatResponse::error(KafkaErrorCode::FencedMemberEpoch.as_i16());
            }
            let resubscribed = !request.subscribed_topic_names.is_empty()
                && request.subscribed_topic_names != member.subscription;
            if resubscribed {
                if let Some(member) = self.members.get_mut(&request.member_id) {
                    member.subscription = request.subscribed_topic_names.clone();
                }
                self.rebalance();
            }
            request.member_id.clone()
        };

        let Some(member) = self.members.get_mut(&member_id) else {
            return HeartbeatResponse::error(KafkaErrorCode::UnknownMemberId.as_i16());
        };

        let changed = member.delivered.as_ref() != Some(&member.target);
        if changed {
            member.epoch += 1;
            member.delivered = Some(member.target.clone());
        }

        let mut response = HeartbeatResponse::success(member.epoch, interval);
        if request.is_join() {
            response.member_id = Some(member_id);
        }
        if changed {
            response = response.with_assignment(&member.target);
        }
        response
    }

    /// Recompute every member's target
    fn rebalance(&mut self) {
        for member in self.members.values_mut() {
            member.target = TopicPartitions::empty();
        }

        for (topic, partitions) in &self.topics {
            let subscribers: Vec<String> = self
                .members
                .iter()
                .filter(|(_, m)| m.subscription.iter().any(|t| t == topic))
                .map(|(id, _)| id.clone())
                .collect();
            if subscribers.is_empty() {
                continue;
            }

            for partition in 0..*partitions {
                let owner = &subscribers[partition as usize % subscribers.len()];
                if let Some(member) = self.members.get_mut(owner) {
                    member.target.add((topic.clone(), partition));
                }
            }
        }
    }
}

#[async_trait]
impl GroupTransport for MockCoordinator {
    async fn send_heartbeat(
        &self,
        request: HeartbeatRequest,
        _timeout: Duration,
    ) -> Result<HeartbeatResponse, TransportError> {
        let injected = {
            let mut state = self.state.lock();
            if state.tracking {
                state.requests.push(TrackedRequest {
                    received_at: Instant::now(),
                    request: request.clone(),
                });
            }
            state.injector.pop()
        };

        if let Some(outcome) = injected {
            debug!(outcome = ?outcome, member_id = %request.member_id, "Injecting heartbeat outcome");
            let rtt = outcome.rtt();
            if !rtt.is_zero() {
                tokio::time::sleep(rtt).await;
            }

            match outcome {
                InjectedOutcome::Transport { error, .. } => return Err(error),
                InjectedOutcome::ErrorCode { code, .. } => {
                    if classify(code) == ErrorClass::Fencing {
                        self.state.lock().members.remove(&request.member_id);
                    }
                    return Ok(HeartbeatResponse::error(code));
                }
                InjectedOutcome::Passthrough { .. } => {}
            }
        }

        Ok(self.state.lock().handle(&request))
    }
}
