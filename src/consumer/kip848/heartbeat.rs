//! KIP-848 Consumer Group Heartbeat
//!
//! Client-side ConsumerGroupHeartbeat request/response values (API Key 68).

use super::assignment::TopicPartitions;
use super::member::MemberEpoch;
use crate::error::{KafkaErrorCode, code_name};
use serde::{Deserialize, Serialize};

/// Member epoch sent by a dynamic member leaving the group
pub const LEAVE_GROUP_MEMBER_EPOCH: MemberEpoch = -1;

/// Member epoch sent by a static member leaving temporarily
pub const LEAVE_GROUP_STATIC_MEMBER_EPOCH: MemberEpoch = -2;

/// A topic partition assignment for heartbeat messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicAssignment {
    /// Topic name
    pub topic_name: String,
    /// Assigned partition indices
    pub partitions: Vec<i32>,
}

/// Consumer Group Heartbeat Request (API Key 68)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Consumer group ID
    pub group_id: String,

    /// Member ID (empty string for initial join)
    pub member_id: String,

    /// Current member epoch (0 for initial join, negative to leave)
    pub member_epoch: MemberEpoch,

    /// Instance ID for static membership (optional)
    pub instance_id: Option<String>,

    /// Rack ID for rack-aware assignment (optional)
    pub rack_id: Option<String>,

    /// Rebalance timeout in milliseconds, only sent when joining
    pub rebalance_timeout_ms: Option<i32>,

    /// Topics the consumer wants to subscribe to
    pub subscribed_topic_names: Vec<String>,

    /// Server-side assignor to use (optional, uses group default if not specified)
    pub server_assignor: Option<String>,

    /// Topic partitions currently owned by this member
    pub topic_partitions: Vec<TopicAssignment>,
}

impl HeartbeatRequest {
    /// Create a new join request (initial heartbeat)
    pub fn join(
        group_id: impl Into<String>,
        subscribed_topics: Vec<String>,
        rebalance_timeout_ms: i32,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            member_id: String::new(),
            member_epoch: 0,
            subscribed_topic_names: subscribed_topics,
            rebalance_timeout_ms: Some(rebalance_timeout_ms),
            ..Default::default()
        }
    }

    /// Create a heartbeat request for an existing member
    pub fn heartbeat(
        group_id: impl Into<String>,
        member_id: impl Into<String>,
        member_epoch: MemberEpoch,
        owned: &TopicPartitions,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            member_id: member_id.into(),
            member_epoch,
            topic_partitions: topic_partitions_to_assignments(owned),
            ..Default::default()
        }
    }

    /// Create the terminal leave request for a member
    pub fn leave(
        group_id: impl Into<String>,
        member_id: impl Into<String>,
        instance_id: Option<String>,
    ) -> Self {
        let member_epoch = if instance_id.is_some() {
            LEAVE_GROUP_STATIC_MEMBER_EPOCH
        } else {
            LEAVE_GROUP_MEMBER_EPOCH
        };
        Self {
            group_id: group_id.into(),
            member_id: member_id.into(),
            member_epoch,
            instance_id,
            ..Default::default()
        }
    }

    /// Check if this is an initial join request
    pub fn is_join(&self) -> bool {
        self.member_epoch == 0
    }

    /// Check if this is a leave request
    pub fn is_leave(&self) -> bool {
        self.member_epoch < 0
    }

    /// Convert topic partitions to TopicPartitions type
    pub fn as_topic_partitions(&self) -> TopicPartitions {
        assignments_to_topic_partitions(&self.topic_partitions)
    }
}

/// Consumer Group Heartbeat Response (API Key 68)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Throttle time in milliseconds
    pub throttle_time_ms: i32,

    /// Top-level error code
    pub error_code: i16,

    /// Error message (if error_code != 0)
    pub error_message: Option<String>,

    /// Assigned member ID (assigned by server on join)
    pub member_id: Option<String>,

    /// Member epoch after this heartbeat
    pub member_epoch: Option<MemberEpoch>,

    /// Time in milliseconds until next heartbeat is required
    pub heartbeat_interval_ms: Option<i32>,

    /// Target assignment, present only when it changed
    pub assignment: Option<Vec<TopicAssignment>>,
}

impl HeartbeatResponse {
    /// Create an error response
    pub fn error(code: i16) -> Self {
        Self {
            error_code: code,
            error_message: Some(code_name(&code)),
            ..Default::default()
        }
    }

    /// Create a successful join response
    pub fn join_success(
        member_id: impl Into<String>,
        member_epoch: MemberEpoch,
        heartbeat_interval_ms: i32,
    ) -> Self {
        Self {
            member_id: Some(member_id.into()),
            member_epoch: Some(member_epoch),
            heartbeat_interval_ms: Some(heartbeat_interval_ms),
            ..Default::default()
        }
    }

    /// Create a successful heartbeat response without assignment change
    pub fn success(member_epoch: MemberEpoch, heartbeat_interval_ms: i32) -> Self {
        Self {
            member_epoch: Some(member_epoch),
            heartbeat_interval_ms: Some(heartbeat_interval_ms),
            ..Default::default()
        }
    }

    /// Attach a target assignment
    pub fn with_assignment(mut self, target: &TopicPartitions) -> Self {
        self.assignment = Some(topic_partitions_to_assignments(target));
        self
    }

    /// Check if response indicates an error
    pub fn is_error(&self) -> bool {
        self.error_code != KafkaErrorCode::None.as_i16()
    }

    /// Known error code of this response, if it is one this client names
    pub fn get_error(&self) -> Option<KafkaErrorCode> {
        if self.is_error() {
            KafkaErrorCode::from_i16(self.error_code)
        } else {
            None
        }
    }

    /// Target assignment carried by this response
    pub fn target_assignment(&self) -> Option<TopicPartitions> {
        self.assignment
            .as_deref()
            .map(assignments_to_topic_partitions)
    }
}

/// Convert TopicPartitions to Vec<TopicAssignment>
pub fn topic_partitions_to_assignments(tp: &TopicPartitions) -> Vec<TopicAssignment> {
    tp.topics()
        .map(|topic| TopicAssignment {
            topic_name: topic.clone(),
            partitions: tp
                .partitions_for_topic(topic)
                .map(|parts| parts.iter().copied().collect())
                .unwrap_or_default(),
        })
        .collect()
}

/// Convert wire assignments back to TopicPartitions
pub fn assignments_to_topic_partitions(assignments: &[TopicAssignment]) -> TopicPartitions {
    let mut tp = TopicPartitions::empty();
    for assignment in assignments {
        for partition in &assignment.partitions {
            tp.add((assignment.topic_name.clone(), *partition));
        }
    }
    tp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_request() {
        let request = HeartbeatRequest::join(
            "test-group",
            vec!["topic-1".to_string(), "topic-2".to_string()],
            300000,
        );

        assert!(request.is_join());
        assert!(!request.is_leave());
        assert_eq!(request.group_id, "test-group");
        assert_eq!(request.subscribed_topic_names.len(), 2);
        assert_eq!(request.rebalance_timeout_ms, Some(300000));
    }

    #[test]
    fn test_heartbeat_request() {
        let owned = TopicPartitions::from_partitions(vec![
            ("topic-1".to_string(), 2),
            ("topic-1".to_string(), 0),
        ]);

        let request = HeartbeatRequest::heartbeat("test-group", "member-1", 5, &owned);

        assert!(!request.is_join());
        assert!(!request.is_leave());
        assert_eq!(request.member_id, "member-1");
        assert_eq!(request.member_epoch, 5);
        assert_eq!(request.topic_partitions[0].partitions, vec![0, 2]);
        assert_eq!(request.as_topic_partitions(), owned);
    }

    #[test]
    fn test_leave_request_epochs() {
        let dynamic = HeartbeatRequest::leave("test-group", "member-1", None);
        assert!(dynamic.is_leave());
        assert_eq!(dynamic.member_epoch, LEAVE_GROUP_MEMBER_EPOCH);

        let stat = HeartbeatRequest::leave("test-group", "member-1", Some("instance-1".into()));
        assert_eq!(stat.member_epoch, LEAVE_GROUP_STATIC_MEMBER_EPOCH);
    }

    #[test]
    fn test_error_response() {
        let response = HeartbeatResponse::error(KafkaErrorCode::FencedMemberEpoch.as_i16());

        assert!(response.is_error());
        assert_eq!(response.error_code, 110);
        assert_eq!(response.get_error(), Some(KafkaErrorCode::FencedMemberEpoch));
        assert_eq!(response.error_message.as_deref(), Some("FENCED_MEMBER_EPOCH"));
        assert!(response.heartbeat_interval_ms.is_none());
    }

    #[test]
    fn test_success_response_with_assignment() {
        let target = TopicPartitions::from_partitions(vec![("topic-1".to_string(), 0)]);
        let response = HeartbeatResponse::success(5, 3000).with_assignment(&target);

        assert!(!response.is_error());
        assert_eq!(response.member_epoch, Some(5));
        assert_eq!(response.heartbeat_interval_ms, Some(3000));
        assert_eq!(response.target_assignment(), Some(target));
    }

    #[test]
    fn test_topic_partitions_to_assignments() {
        let mut tp = TopicPartitions::empty();
        tp.add(("topic-1".to_string(), 1));
        tp.add(("topic-1".to_string(), 0));
        tp.add(("topic-2".to_string(), 0));

        let assignments = topic_partitions_to_assignments(&tp);

        assert_eq!(
            assignments,
            vec![
                TopicAssignment {
                    topic_name: "topic-1".to_string(),
                    partitions: vec![0, 1],
                },
                TopicAssignment {
                    topic_name: "topic-2".to_string(),
                    partitions: vec![0],
                },
            ]
        );
    }
}
