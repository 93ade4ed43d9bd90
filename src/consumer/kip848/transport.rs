//! Coordinator transport abstraction
//!
//! The engine talks to the group coordinator only through this trait. Wire
//! encoding and connection management live behind it.

use super::heartbeat::{HeartbeatRequest, HeartbeatResponse};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sends ConsumerGroupHeartbeat requests to the group coordinator
///
/// The engine never has more than one heartbeat outstanding and bounds every
/// call by `timeout` on its side as well.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    async fn send_heartbeat(
        &self,
        request: HeartbeatRequest,
        timeout: Duration,
    ) -> Result<HeartbeatResponse, TransportError>;
}

#[async_trait]
impl<T> GroupTransport for Arc<T>
where
    T: GroupTransport + ?Sized,
{
    async fn send_heartbeat(
        &self,
        request: HeartbeatRequest,
        timeout: Duration,
    ) -> Result<HeartbeatResponse, TransportError> {
        (**self).send_heartbeat(request, timeout).await
    }
}
