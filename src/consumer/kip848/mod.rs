//! KIP-848 Next-Generation Consumer Rebalancing Protocol (client side)
//!
//! The member talks to the coordinator through a single ConsumerGroupHeartbeat
//! API. Joining, assignment delivery, fencing and leaving all ride on the same
//! periodic request:
//!
//! - **Epoch 0** joins (or rejoins after a fence)
//! - **Epoch > 0** heartbeats, reporting the partitions the member owns
//! - **Epoch -1 / -2** leaves (dynamic / static member)
//!
//! ## Outcome Classes
//!
//! | Class | Effect |
//! |-------|--------|
//! | Success | Apply member id, epoch, interval and target assignment |
//! | Retriable | Heartbeat again immediately, nothing surfaced |
//! | Fencing | Lose owned partitions, rejoin with epoch 0 |
//! | Fatal | Stop heartbeating, surface the error to the application |
//!
//! ## State Machine
//!
//! ```text
//! Engine States:
//!   Unjoined -> Joining -> Stable -> LeavingGroup -> Left
//!                  ^          |
//!                  +- Fenced -+
//!   any -> Fatal
//! ```

pub mod assignment;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod heartbeat;
pub mod member;
pub mod scheduler;
pub mod transport;
mod worker;

pub use assignment::{AssignmentDelta, TopicPartition, TopicPartitions};
pub use dispatcher::{
    DispatchGuard, DispatchSignal, RebalanceDispatcher, RebalanceEvent, RebalanceListener,
};
pub use engine::{EngineState, GroupProtocolEngine};
pub use errors::{classify, classify_transport, ErrorClass};
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse, TopicAssignment};
pub use member::{Member, MemberEpoch, MembershipState};
pub use scheduler::{HeartbeatScheduler, SchedulerState};
pub use transport::GroupTransport;
