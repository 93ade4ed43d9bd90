//! KIP-848 Group Protocol Engine
//!
//! Client side of the next-generation consumer group protocol. A background
//! task owns the transport and the heartbeat timer; the application drives
//! rebalance delivery through [`GroupProtocolEngine::poll`] and
//! [`GroupProtocolEngine::close`].
//!
//! ```text
//! Engine States:
//!   Unjoined -> Joining -> Stable -> LeavingGroup -> Left
//!                  ^          |
//!                  +- Fenced -+
//!   any -> Fatal
//! ```
//!
//! Retriable and fencing outcomes never reach the application. A fatal
//! outcome is returned once by `poll` and again by every `close` call.

use super::dispatcher::{
    DispatchGuard, DispatchSignal, RebalanceDispatcher, RebalanceEvent, RebalanceListener,
};
use super::assignment::TopicPartitions;
use super::member::{MemberEpoch, MembershipState};
use super::transport::GroupTransport;
use super::worker::HeartbeatWorker;
use crate::config::GroupConsumerConfig;
use crate::error::{ConfigError, GroupError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Pause between attempts to take over a delivery during close
const DELIVERY_RETRY: Duration = Duration::from_millis(10);

/// Engine lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// Not subscribed to anything
    #[default]
    Unjoined,

    /// Subscribed, waiting for the coordinator to accept the member
    Joining,

    /// Member accepted, heartbeating at the coordinator's interval
    Stable,

    /// Fenced by the coordinator, rejoin pending
    Fenced,

    /// Fatal error, heartbeats stopped for good
    Fatal,

    /// Closing, only the leave heartbeat remains
    LeavingGroup,

    /// Closed
    Left,
}

/// Work queued by the heartbeat task for the poll/close caller
#[derive(Debug, Clone)]
pub(crate) enum PendingItem {
    Rebalance(RebalanceEvent),
    Fatal(GroupError),
}

/// State shared between the heartbeat task and the application
///
/// Only the heartbeat task mutates the membership; the application drains
/// `pending`.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: EngineState,
    pub(crate) membership: MembershipState,
    pub(crate) pending: VecDeque<PendingItem>,
    pub(crate) fatal: Option<GroupError>,
    pub(crate) heartbeats_sent: u64,
}

#[derive(Debug)]
pub(crate) struct EngineInner {
    pub(crate) shared: Mutex<Shared>,
    pub(crate) wakeup: Notify,
}

impl EngineInner {
    fn new(config: &GroupConsumerConfig) -> Self {
        Self {
            shared: Mutex::new(Shared {
                state: EngineState::Unjoined,
                membership: MembershipState::new(config.group_instance_id.clone()),
                pending: VecDeque::new(),
                fatal: None,
                heartbeats_sent: 0,
            }),
            wakeup: Notify::new(),
        }
    }
}

/// Requests from the application to the heartbeat task
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe(Vec<String>),
    Unsubscribe,
    /// An assignment reached the application, report it promptly
    Acknowledge,
    /// Stop regular heartbeats and cancel the one in flight
    Stop(oneshot::Sender<()>),
    /// Send the leave heartbeat and exit
    Leave(oneshot::Sender<()>),
}

/// Consumer group membership driven by ConsumerGroupHeartbeat
pub struct GroupProtocolEngine {
    config: GroupConsumerConfig,
    inner: Arc<EngineInner>,
    commands: mpsc::UnboundedSender<Command>,
    stop: watch::Sender<bool>,
    dispatcher: RebalanceDispatcher,
    worker: Mutex<Option<JoinHandle<()>>>,
    close_outcome: tokio::sync::Mutex<Option<Result<()>>>,
    closed: AtomicBool,
    fatal_surfaced: AtomicBool,
}

impl GroupProtocolEngine {
    /// Validate the configuration and start the heartbeat task
    ///
    /// Must be called from within a tokio runtime. If the configuration
    /// carries a subscription the member starts joining right away.
    pub fn start<T>(config: GroupConsumerConfig, transport: T) -> Result<Self>
    where
        T: GroupTransport + 'static,
    {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GroupError::TaskStopped(format!("no tokio runtime: {}", e)))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let inner = Arc::new(EngineInner::new(&config));

        let worker = HeartbeatWorker::new(
            config.clone(),
            Arc::new(transport),
            inner.clone(),
            command_rx,
            stop_rx,
        );
        let span = info_span!("group_heartbeat", group_id = %config.group_id);
        let handle = runtime.spawn(worker.run().instrument(span));

        let engine = Self {
            config,
            inner,
            commands,
            stop,
            dispatcher: RebalanceDispatcher::new(),
            worker: Mutex::new(Some(handle)),
            close_outcome: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
            fatal_surfaced: AtomicBool::new(false),
        };

        info!(
            group_id = %engine.config.group_id,
            instance_id = ?engine.config.group_instance_id,
            "Started consumer group engine"
        );

        if !engine.config.subscription.is_empty() {
            engine.subscribe(engine.config.subscription.clone())?;
        }

        Ok(engine)
    }

    /// Register the rebalance listener
    ///
    /// May be called from inside the running listener; the new one takes
    /// over from the next event.
    pub fn set_rebalance_listener<L>(&self, listener: L)
    where
        L: RebalanceListener + 'static,
    {
        self.dispatcher.set_listener(Box::new(listener));
    }

    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    pub fn config(&self) -> &GroupConsumerConfig {
        &self.config
    }

    /// Replace the subscription; the next heartbeat goes out immediately
    pub fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;

        let mut topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        topics.sort();
        topics.dedup();

        if topics.is_empty() {
            return Err(ConfigError::invalid_setting("subscription", "no topics given").into());
        }
        if let Some(topic) = topics.iter().find(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid_setting(
                "subscription",
                format!("invalid topic name {:?}", topic),
            )
            .into());
        }
        if let Some(fatal) = self.fatal_error() {
            return Err(fatal);
        }

        self.send_command(Command::Subscribe(topics))
    }

    /// Give up all partitions and leave the group, staying open
    pub fn unsubscribe(&self) -> Result<()> {
        self.ensure_open()?;
        self.send_command(Command::Unsubscribe)
    }

    /// Deliver at most one pending rebalance event
    ///
    /// Waits up to `timeout` for something to deliver. Returns the event
    /// handed to the listener, `None` when nothing happened, or the fatal
    /// error the first time the engine observed one. Once the fatal error
    /// was returned nothing else arrives, so later polls wait out their
    /// timeout and return `None`.
    ///
    /// The listener may call back into the engine, except `poll` itself: a
    /// poll that overlaps a running delivery fails with
    /// [`GroupError::ReentrantDispatch`].
    pub async fn poll(&self, timeout: Duration) -> Result<Option<RebalanceEvent>> {
        self.ensure_open()?;
        if self.fatal_surfaced.load(Ordering::Acquire) {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivered) = self.deliver_one() {
                return delivered;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, self.inner.wakeup.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    /// Pop and deliver one pending item, if any
    fn deliver_one(&self) -> Option<Result<Option<RebalanceEvent>>> {
        let Some(delivery) = self.dispatcher.try_enter() else {
            return Some(Err(GroupError::ReentrantDispatch));
        };

        let next = self.inner.shared.lock().pending.pop_front()?;
        match next {
            PendingItem::Fatal(error) => {
                self.fatal_surfaced.store(true, Ordering::Release);
                warn!(error = %error, "Surfacing fatal consumer group error");
                Some(Err(error))
            }
            PendingItem::Rebalance(event) => {
                let DispatchSignal::YieldAndReturn = delivery.dispatch(&event);
                if event.is_assign() {
                    let _ = self.commands.send(Command::Acknowledge);
                }
                Some(Ok(Some(event)))
            }
        }
    }

    /// Leave the group and stop the heartbeat task
    ///
    /// Pending events are delivered, held partitions are revoked, and one
    /// leave heartbeat is sent within the close timeout. After a fatal error
    /// the held partitions are revoked as lost, no leave heartbeat is sent
    /// and the fatal error is returned. Calling close again returns the
    /// first outcome without side effects.
    pub async fn close(&self) -> Result<()> {
        let mut outcome = self.close_outcome.lock().await;
        if let Some(done) = outcome.as_ref() {
            return done.clone();
        }

        self.closed.store(true, Ordering::Release);
        let result = self.shutdown().await;
        *outcome = Some(result.clone());
        result
    }

    async fn shutdown(&self) -> Result<()> {
        let close_timeout = self.config.close_timeout();
        let deadline = Instant::now() + close_timeout;
        info!(group_id = %self.config.group_id, "Closing consumer group engine");

        let _ = self.stop.send(true);
        let (ack, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop(ack)).is_ok()
            && tokio::time::timeout_at(deadline, stopped).await.is_err()
        {
            warn!("Heartbeat task did not stop within close timeout");
        }

        let fatal = self.inner.shared.lock().fatal.clone();
        match tokio::time::timeout_at(deadline, self.enter_delivery()).await {
            Ok(delivery) => self.revoke_for_close(&delivery, fatal.is_some()),
            Err(_) => warn!("Rebalance listener still running at close timeout, skipping revoke"),
        }

        let (ack, left) = oneshot::channel();
        if self.commands.send(Command::Leave(ack)).is_ok()
            && tokio::time::timeout_at(deadline, left).await.is_err()
        {
            warn!(
                timeout_ms = close_timeout.as_millis() as u64,
                "Leave group heartbeat did not complete within close timeout"
            );
        }

        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }

        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Wait for a delivery running on another task to finish
    async fn enter_delivery(&self) -> DispatchGuard<'_> {
        loop {
            if let Some(delivery) = self.dispatcher.try_enter() {
                return delivery;
            }
            tokio::time::sleep(DELIVERY_RETRY).await;
        }
    }

    /// Drain what the application has not seen yet and revoke the rest
    fn revoke_for_close(&self, delivery: &DispatchGuard<'_>, fatal: bool) {
        let drained: Vec<PendingItem> = self.inner.shared.lock().pending.drain(..).collect();

        for item in drained {
            match item {
                PendingItem::Rebalance(event) if !fatal => {
                    let _ = delivery.dispatch(&event);
                }
                PendingItem::Rebalance(event) => {
                    debug!(event = %event, "Dropping rebalance event after fatal error");
                }
                PendingItem::Fatal(_) => self.fatal_surfaced.store(true, Ordering::Release),
            }
        }

        let held = self.dispatcher.assigned();
        if !held.is_empty() {
            info!(partitions = %held, lost = fatal, "Revoking assignment on close");
            let _ = delivery.dispatch(&RebalanceEvent::revoke(held, fatal));
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.shared.lock().state
    }

    pub fn member_id(&self) -> Option<String> {
        self.inner
            .shared
            .lock()
            .membership
            .member_id()
            .map(str::to_string)
    }

    pub fn member_epoch(&self) -> MemberEpoch {
        self.inner.shared.lock().membership.member_epoch()
    }

    /// Partitions the application currently holds
    pub fn assignment(&self) -> TopicPartitions {
        self.dispatcher.assigned()
    }

    /// The fatal error, once one was received
    pub fn fatal_error(&self) -> Option<GroupError> {
        self.inner.shared.lock().fatal.clone()
    }

    /// Heartbeats handed to the transport, leave heartbeats included
    pub fn heartbeats_sent(&self) -> u64 {
        self.inner.shared.lock().heartbeats_sent
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(GroupError::Closed)
        } else {
            Ok(())
        }
    }

    fn send_command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| GroupError::TaskStopped("heartbeat task is not running".to_string()))
    }
}

impl Drop for GroupProtocolEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            if !self.is_closed() {
                warn!(group_id = %self.config.group_id, "Engine dropped without close, no leave heartbeat sent");
            }
            handle.abort();
        }
    }
}

impl std::fmt::Debug for GroupProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupProtocolEngine")
            .field("group_id", &self.config.group_id)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
