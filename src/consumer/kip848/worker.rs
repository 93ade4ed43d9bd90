//! Background heartbeat task
//!
//! One task per engine. It owns the transport and the scheduler, applies
//! every heartbeat outcome to the shared membership and queues rebalance
//! events for the application.

use super::engine::{Command, EngineInner, EngineState, PendingItem, Shared};
use super::errors::{classify, classify_transport, ErrorClass};
use super::heartbeat::{HeartbeatRequest, HeartbeatResponse};
use super::scheduler::HeartbeatScheduler;
use super::transport::GroupTransport;
use crate::config::GroupConsumerConfig;
use crate::error::{code_name, GroupError, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

pub(crate) struct HeartbeatWorker {
    config: GroupConsumerConfig,
    transport: Arc<dyn GroupTransport>,
    inner: Arc<EngineInner>,
    scheduler: HeartbeatScheduler,
    subscription: Vec<String>,
    commands: mpsc::UnboundedReceiver<Command>,
    stop: watch::Receiver<bool>,
}

impl HeartbeatWorker {
    pub(crate) fn new(
        config: GroupConsumerConfig,
        transport: Arc<dyn GroupTransport>,
        inner: Arc<EngineInner>,
        commands: mpsc::UnboundedReceiver<Command>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let scheduler =
            HeartbeatScheduler::new(config.heartbeat_interval(), config.fencing_interval_policy);
        Self {
            config,
            transport,
            inner,
            scheduler,
            subscription: Vec::new(),
            commands,
            stop,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Heartbeat task started");

        loop {
            let deadline = self.scheduler.deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("Engine handle dropped");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.heartbeat().await;
                }
            }
        }

        debug!("Heartbeat task stopped");
    }

    /// Returns false once the task must exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe(topics) => self.subscribe(topics),
            Command::Unsubscribe => self.unsubscribe().await,
            Command::Acknowledge => {
                let stable = self.inner.shared.lock().state == EngineState::Stable;
                if stable {
                    self.scheduler.arm_now(Instant::now());
                }
            }
            Command::Stop(ack) => {
                self.scheduler.begin_leave();
                {
                    let mut shared = self.inner.shared.lock();
                    if shared.state != EngineState::Fatal {
                        shared.state = EngineState::LeavingGroup;
                    }
                }
                let _ = ack.send(());
            }
            Command::Leave(ack) => {
                self.leave().await;
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn subscribe(&mut self, topics: Vec<String>) {
        {
            let mut shared = self.inner.shared.lock();
            if matches!(
                shared.state,
                EngineState::Fatal | EngineState::LeavingGroup | EngineState::Left
            ) {
                return;
            }
            if shared.state == EngineState::Unjoined {
                shared.state = EngineState::Joining;
            }
        }

        info!(topics = ?topics, "Subscription updated");
        self.subscription = topics;
        self.scheduler.arm_now(Instant::now());
    }

    async fn unsubscribe(&mut self) {
        let request = {
            let mut shared = self.inner.shared.lock();
            if matches!(
                shared.state,
                EngineState::Unjoined
                    | EngineState::Fatal
                    | EngineState::LeavingGroup
                    | EngineState::Left
            ) {
                return;
            }

            let request = self.leave_request(&shared);
            if let Some(event) = shared.membership.on_leave() {
                info!(event = %event, "Unsubscribed, revoking assignment");
                shared.pending.push_back(PendingItem::Rebalance(event));
                self.inner.wakeup.notify_one();
            }
            shared.state = EngineState::Unjoined;
            request
        };

        self.subscription.clear();
        self.scheduler.disarm();

        if let Some(request) = request {
            self.send_leave(request, self.config.request_timeout()).await;
        }
    }

    /// Final leave heartbeat, sent once on close
    async fn leave(&mut self) {
        let request = {
            let mut shared = self.inner.shared.lock();
            if shared.state == EngineState::Fatal {
                None
            } else {
                let request = self.leave_request(&shared);
                // The application already got its revoke from close
                let _ = shared.membership.on_leave();
                shared.state = EngineState::LeavingGroup;
                request
            }
        };

        if let Some(request) = request {
            self.send_leave(request, self.config.close_timeout()).await;
        }
        self.scheduler.halt();

        let mut shared = self.inner.shared.lock();
        if shared.state != EngineState::Fatal {
            shared.state = EngineState::Left;
            info!("Left consumer group");
        }
    }

    fn leave_request(&self, shared: &Shared) -> Option<HeartbeatRequest> {
        shared.membership.member().map(|member| {
            HeartbeatRequest::leave(
                self.config.group_id.clone(),
                member.member_id.clone(),
                self.config.group_instance_id.clone(),
            )
        })
    }

    async fn send_leave(&self, request: HeartbeatRequest, timeout: Duration) {
        info!(
            member_id = %request.member_id,
            epoch = request.member_epoch,
            "Sending leave group heartbeat"
        );
        self.inner.shared.lock().heartbeats_sent += 1;

        match tokio::time::timeout(timeout, self.transport.send_heartbeat(request, timeout)).await {
            Ok(Ok(response)) if !response.is_error() => {
                debug!("Leave group heartbeat acknowledged");
            }
            Ok(Ok(response)) => {
                warn!(error = %code_name(&response.error_code), "Leave group heartbeat rejected");
            }
            Ok(Err(error)) => warn!(error = %error, "Leave group heartbeat failed"),
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Leave group heartbeat timed out"
            ),
        }
    }

    /// Send one heartbeat if the scheduler says it is due
    async fn heartbeat(&mut self) {
        if *self.stop.borrow() || !self.scheduler.on_tick(Instant::now()) {
            return;
        }

        let Some(request) = self.build_request() else {
            self.scheduler.disarm();
            return;
        };

        debug!(
            member_id = %request.member_id,
            epoch = request.member_epoch,
            join = request.is_join(),
            "Sending heartbeat"
        );

        let timeout = self.config.request_timeout();
        let send = tokio::time::timeout(timeout, self.transport.send_heartbeat(request, timeout));

        let result = tokio::select! {
            result = send => match result {
                Ok(result) => result,
                Err(_) => Err(TransportError::TimedOut(timeout)),
            },
            _ = self.stop.changed() => {
                debug!("In-flight heartbeat cancelled by close");
                self.scheduler.cancel_in_flight(Instant::now());
                return;
            }
        };

        self.handle_result(result);
    }

    fn build_request(&mut self) -> Option<HeartbeatRequest> {
        if self.subscription.is_empty() {
            return None;
        }

        let mut shared = self.inner.shared.lock();
        shared.heartbeats_sent += 1;

        let request = match shared.membership.member().cloned() {
            None => {
                if shared.membership.is_rejoin_pending() {
                    debug!("Rejoining after fence");
                }
                shared.membership.clear_rejoin_pending();
                shared.state = EngineState::Joining;

                let mut request = HeartbeatRequest::join(
                    self.config.group_id.clone(),
                    self.subscription.clone(),
                    self.config.rebalance_timeout_hint(),
                );
                request.server_assignor = self.config.server_assignor.clone();
                request.rack_id = self.config.rack_id.clone();
                request
            }
            Some(member) => {
                let mut request = HeartbeatRequest::heartbeat(
                    self.config.group_id.clone(),
                    member.member_id,
                    member.member_epoch,
                    shared.membership.owned(),
                );
                request.subscribed_topic_names = self.subscription.clone();
                request
            }
        };

        Some(HeartbeatRequest {
            instance_id: self.config.group_instance_id.clone(),
            ..request
        })
    }

    fn handle_result(&mut self, result: Result<HeartbeatResponse, TransportError>) {
        let now = Instant::now();
        let inner = self.inner.clone();
        let mut shared = inner.shared.lock();
        let queued = shared.pending.len();

        match result {
            Err(error) => {
                warn!(
                    error = %error,
                    retries = self.scheduler.consecutive_retries() + 1,
                    "Heartbeat failed, retrying"
                );
                self.scheduler
                    .on_response(now, classify_transport(&error), None);
            }
            Ok(response) => match classify(response.error_code) {
                ErrorClass::Success => self.on_success(&mut shared, response, now),
                ErrorClass::Retriable => {
                    warn!(
                        error = %code_name(&response.error_code),
                        retries = self.scheduler.consecutive_retries() + 1,
                        "Heartbeat rejected, retrying"
                    );
                    self.scheduler.on_response(now, ErrorClass::Retriable, None);
                }
                ErrorClass::Fencing => {
                    info!(
                        member_id = ?shared.membership.member_id(),
                        epoch = shared.membership.member_epoch(),
                        error = %code_name(&response.error_code),
                        "Member fenced, rejoining"
                    );
                    if let Some(event) = shared.membership.on_fence() {
                        shared.pending.push_back(PendingItem::Rebalance(event));
                    }
                    shared.state = EngineState::Fenced;
                    self.scheduler.on_response(now, ErrorClass::Fencing, None);
                }
                ErrorClass::Fatal => {
                    let message = response
                        .error_message
                        .clone()
                        .unwrap_or_else(|| code_name(&response.error_code));
                    let fatal = GroupError::fatal(response.error_code, message);
                    error!(error = %fatal, "Fatal consumer group error, heartbeats stopped");

                    shared.membership.on_fatal();
                    shared.state = EngineState::Fatal;
                    shared.fatal = Some(fatal.clone());
                    shared.pending.push_back(PendingItem::Fatal(fatal));
                    self.scheduler.on_response(now, ErrorClass::Fatal, None);
                }
            },
        }

        if shared.pending.len() > queued {
            inner.wakeup.notify_one();
        }
    }

    fn on_success(&mut self, shared: &mut Shared, response: HeartbeatResponse, now: Instant) {
        let joined = shared
            .membership
            .on_join_response(response.member_id.as_deref(), response.member_epoch);
        if joined {
            info!(
                member_id = ?shared.membership.member_id(),
                epoch = shared.membership.member_epoch(),
                "Joined consumer group"
            );
        }

        if let Some(target) = response.target_assignment() {
            for event in shared.membership.on_assignment_delta(&target) {
                info!(
                    epoch = shared.membership.member_epoch(),
                    event = %event,
                    "Assignment changed"
                );
                shared.pending.push_back(PendingItem::Rebalance(event));
            }
        }

        if shared.membership.is_joined() {
            shared.state = EngineState::Stable;
        }

        let interval = response
            .heartbeat_interval_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64));
        self.scheduler.on_response(now, ErrorClass::Success, interval);
    }
}
