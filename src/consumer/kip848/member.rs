//! KIP-848 Consumer Member State
//!
//! Tracks the member's identity and epoch together with the partitions it
//! owns and the target last granted by the coordinator. Every assignment
//! change is turned into rebalance events, revocations first.

use super::assignment::{AssignmentDelta, TopicPartitions};
use super::dispatcher::RebalanceEvent;
use serde::{Deserialize, Serialize};

/// Member epoch - incremented by the coordinator on each assignment change
pub type MemberEpoch = i32;

/// Instance ID for static membership
pub type InstanceId = String;

/// Member ID - unique identifier for a member within a group
pub type MemberId = String;

/// Identity of a joined member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member ID assigned by the coordinator
    pub member_id: MemberId,

    /// Current member epoch
    pub member_epoch: MemberEpoch,

    /// Optional instance ID for static membership
    pub instance_id: Option<InstanceId>,
}

/// Membership of this consumer in its group
#[derive(Debug, Clone)]
pub struct MembershipState {
    /// Static membership instance id, survives fencing
    instance_id: Option<InstanceId>,

    /// Set on the first successful heartbeat, cleared on fence or fatal
    member: Option<Member>,

    /// Partitions handed out to the application
    owned: TopicPartitions,

    /// Target last granted by the coordinator
    target: Option<TopicPartitions>,

    /// Frozen after a fatal error
    frozen: bool,

    /// Set by fencing until the rejoin heartbeat is sent
    rejoin_pending: bool,
}

impl MembershipState {
    /// Create an unjoined membership
    pub fn new(instance_id: Option<InstanceId>) -> Self {
        Self {
            instance_id,
            member: None,
            owned: TopicPartitions::empty(),
            target: None,
            frozen: false,
            rejoin_pending: false,
        }
    }

    pub fn member(&self) -> Option<&Member> {
        self.member.as_ref()
    }

    pub fn member_id(&self) -> Option<&str> {
        self.member.as_ref().map(|m| m.member_id.as_str())
    }

    /// Current epoch, 0 while not joined
    pub fn member_epoch(&self) -> MemberEpoch {
        self.member.as_ref().map(|m| m.member_epoch).unwrap_or(0)
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn owned(&self) -> &TopicPartitions {
        &self.owned
    }

    pub fn target(&self) -> Option<&TopicPartitions> {
        self.target.as_ref()
    }

    pub fn is_joined(&self) -> bool {
        self.member.is_some()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_rejoin_pending(&self) -> bool {
        self.rejoin_pending
    }

    /// The rejoin heartbeat has been built
    pub fn clear_rejoin_pending(&mut self) {
        self.rejoin_pending = false;
    }

    /// Record identity and epoch from a successful heartbeat
    ///
    /// Returns true when this response made the member join. The epoch only
    /// moves forward within one membership.
    pub fn on_join_response(
        &mut self,
        member_id: Option<&str>,
        member_epoch: Option<MemberEpoch>,
    ) -> bool {
        if self.frozen {
            return false;
        }

        match self.member.as_mut() {
            Some(member) => {
                if let Some(id) = member_id.filter(|id| !id.is_empty()) {
                    if id != member.member_id {
                        member.member_id = id.to_string();
                    }
                }
                if let Some(epoch) = member_epoch {
                    if epoch > member.member_epoch {
                        member.member_epoch = epoch;
                    }
                }
                false
            }
            None => {
                let Some(id) = member_id.filter(|id| !id.is_empty()) else {
                    return false;
                };
                self.member = Some(Member {
                    member_id: id.to_string(),
                    member_epoch: member_epoch.unwrap_or(0).max(0),
                    instance_id: self.instance_id.clone(),
                });
                self.rejoin_pending = false;
                true
            }
        }
    }

    /// Reconcile owned partitions towards a newly granted target
    ///
    /// Yields at most one revoke followed by at most one assign, so the
    /// application never sees an assign for a partition it still owns.
    pub fn on_assignment_delta(&mut self, target: &TopicPartitions) -> Vec<RebalanceEvent> {
        if self.frozen {
            return Vec::new();
        }

        self.target = Some(target.clone());
        let delta = AssignmentDelta::compute(&self.owned, target);
        let mut events = Vec::with_capacity(2);

        if !delta.to_revoke.is_empty() {
            self.owned.subtract(&delta.to_revoke);
            events.push(RebalanceEvent::revoke(delta.to_revoke, false));
        }
        if !delta.to_assign.is_empty() {
            self.owned.extend(&delta.to_assign);
            events.push(RebalanceEvent::Assign(delta.to_assign));
        }

        events
    }

    /// Forget the member after the coordinator fenced it
    ///
    /// Owned partitions are lost rather than revoked. The next heartbeat is
    /// a join with epoch 0.
    pub fn on_fence(&mut self) -> Option<RebalanceEvent> {
        if self.frozen {
            return None;
        }

        self.member = None;
        self.target = None;
        self.rejoin_pending = true;
        self.take_owned(true)
    }

    /// Freeze the membership after a fatal error
    pub fn on_fatal(&mut self) {
        self.member = None;
        self.target = None;
        self.rejoin_pending = false;
        self.frozen = true;
    }

    /// Voluntarily give up the membership (unsubscribe or close)
    pub fn on_leave(&mut self) -> Option<RebalanceEvent> {
        self.member = None;
        self.target = None;
        self.rejoin_pending = false;
        if self.frozen {
            return None;
        }
        self.take_owned(false)
    }

    fn take_owned(&mut self, lost: bool) -> Option<RebalanceEvent> {
        if self.owned.is_empty() {
            return None;
        }
        let partitions = std::mem::take(&mut self.owned);
        Some(RebalanceEvent::revoke(partitions, lost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(list: &[(&str, i32)]) -> TopicPartitions {
        list.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn test_join_and_epoch_is_monotonic() {
        let mut membership = MembershipState::new(None);
        assert!(!membership.is_joined());

        assert!(membership.on_join_response(Some("member-1"), Some(1)));
        assert_eq!(membership.member_id(), Some("member-1"));
        assert_eq!(membership.member_epoch(), 1);

        assert!(!membership.on_join_response(None, Some(3)));
        assert_eq!(membership.member_epoch(), 3);

        // Older epoch from a delayed response is ignored
        membership.on_join_response(None, Some(2));
        assert_eq!(membership.member_epoch(), 3);
    }

    #[test]
    fn test_response_without_member_id_does_not_join() {
        let mut membership = MembershipState::new(None);
        assert!(!membership.on_join_response(None, Some(1)));
        assert!(!membership.is_joined());
    }

    #[test]
    fn test_delta_revokes_before_assigning() {
        let mut membership = MembershipState::new(None);
        membership.on_join_response(Some("member-1"), Some(1));

        let events = membership.on_assignment_delta(&parts(&[("t", 0), ("t", 1)]));
        assert_eq!(events, vec![RebalanceEvent::Assign(parts(&[("t", 0), ("t", 1)]))]);

        let events = membership.on_assignment_delta(&parts(&[("t", 1), ("t", 2)]));
        assert_eq!(
            events,
            vec![
                RebalanceEvent::revoke(parts(&[("t", 0)]), false),
                RebalanceEvent::Assign(parts(&[("t", 2)])),
            ]
        );
        assert_eq!(membership.owned(), &parts(&[("t", 1), ("t", 2)]));

        assert!(membership
            .on_assignment_delta(&parts(&[("t", 1), ("t", 2)]))
            .is_empty());
    }

    #[test]
    fn test_fence_loses_owned_partitions() {
        let mut membership = MembershipState::new(Some("instance-1".to_string()));
        membership.on_join_response(Some("member-1"), Some(4));
        membership.on_assignment_delta(&parts(&[("t", 0)]));

        let event = membership.on_fence();
        assert_eq!(event, Some(RebalanceEvent::revoke(parts(&[("t", 0)]), true)));
        assert!(!membership.is_joined());
        assert_eq!(membership.member_epoch(), 0);
        assert!(membership.owned().is_empty());
        assert!(membership.is_rejoin_pending());
        assert_eq!(membership.instance_id(), Some("instance-1"));

        // Nothing held, nothing lost
        assert_eq!(membership.on_fence(), None);
    }

    #[test]
    fn test_fatal_freezes() {
        let mut membership = MembershipState::new(None);
        membership.on_join_response(Some("member-1"), Some(1));
        membership.on_assignment_delta(&parts(&[("t", 0)]));

        membership.on_fatal();
        assert!(membership.is_frozen());
        assert!(!membership.is_joined());
        assert!(membership.on_assignment_delta(&parts(&[("t", 1)])).is_empty());
        assert!(!membership.on_join_response(Some("member-2"), Some(1)));
        assert_eq!(membership.on_fence(), None);
    }

    #[test]
    fn test_leave_revokes_voluntarily() {
        let mut membership = MembershipState::new(None);
        membership.on_join_response(Some("member-1"), Some(1));
        membership.on_assignment_delta(&parts(&[("t", 0)]));

        assert_eq!(
            membership.on_leave(),
            Some(RebalanceEvent::revoke(parts(&[("t", 0)]), false))
        );
        assert!(!membership.is_joined());
    }
}
