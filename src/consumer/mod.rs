//! Consumer group membership
//!
//! Implements the client side of the KIP-848 consumer group protocol: a
//! background heartbeat task keeps the member in its group while the
//! application receives assignment changes through `poll` and `close`.

pub mod kip848;

pub use kip848::{
    EngineState, GroupProtocolEngine, GroupTransport, RebalanceEvent, RebalanceListener,
    TopicPartitions,
};
