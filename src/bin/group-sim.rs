//! group-sim - run a consumer group member against an in-process coordinator
//!
//! Useful for watching the heartbeat engine react to injected coordinator
//! errors without a broker.

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use streamline_group::config::defaults::{DEFAULT_LOG_LEVEL, DEFAULT_MOCK_HEARTBEAT_INTERVAL_MS};
use streamline_group::testing::MockCoordinator;
use streamline_group::{
    EngineState, GroupConsumerConfig, GroupError, GroupProtocolEngine, RebalanceEvent,
    TopicPartitions,
};
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "group-sim", version, about = "KIP-848 consumer group simulator")]
struct SimArgs {
    /// Group consumer configuration file (TOML)
    #[arg(long, env = "GROUP_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Group id, overrides the configuration file
    #[arg(long, default_value = "group-sim")]
    group: String,

    /// Topics to subscribe to
    #[arg(long = "topic", default_value = "events")]
    topics: Vec<String>,

    /// Partitions created for each topic
    #[arg(long, default_value_t = 4)]
    partitions: i32,

    /// Heartbeat interval advertised by the coordinator
    #[arg(long, default_value_t = DEFAULT_MOCK_HEARTBEAT_INTERVAL_MS)]
    interval_ms: u64,

    /// Error code the coordinator returns once
    #[arg(long)]
    inject_error: Option<i16>,

    /// Heartbeat (1-based) that receives the injected error
    #[arg(long, default_value_t = 2)]
    inject_at: usize,

    /// How long to poll before closing
    #[arg(long, default_value_t = 3)]
    duration_secs: u64,

    /// Print the final member state as JSON
    #[arg(long)]
    json: bool,

    #[arg(long, env = "GROUP_SIM_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

#[derive(Debug, Serialize)]
struct SimSummary {
    group_id: String,
    member_id: Option<String>,
    member_epoch: i32,
    state: EngineState,
    assignment: TopicPartitions,
    heartbeats_sent: u64,
    events_delivered: usize,
    fatal_error: Option<String>,
    close_error: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = SimArgs::parse();

    let log_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Simulation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: SimArgs) -> streamline_group::Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let config = GroupConsumerConfig::load(path)?;
            info!(path = %path.display(), "Configuration loaded from file");
            config
        }
        None => GroupConsumerConfig::new(args.group.clone()),
    };
    if args.config.is_none() || config.group_id.is_empty() {
        config.group_id = args.group.clone();
    }
    if config.subscription.is_empty() {
        config = config.with_subscription(args.topics.clone());
    }

    let coordinator = MockCoordinator::new(i32::try_from(args.interval_ms).unwrap_or(i32::MAX));
    for topic in &config.subscription {
        coordinator.create_topic(topic, args.partitions);
    }
    if let Some(code) = args.inject_error {
        for _ in 1..args.inject_at.max(1) {
            coordinator.push_error(0, Duration::ZERO);
        }
        coordinator.push_error(code, Duration::ZERO);
        info!(code, heartbeat = args.inject_at, "Injecting coordinator error");
    }
    coordinator.start_request_tracking();

    let engine = GroupProtocolEngine::start(config, coordinator.clone())?;
    engine.set_rebalance_listener(|event: &RebalanceEvent| {
        info!(event = %event, "Rebalance");
    });

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut delivered = 0;
    let mut fatal: Option<GroupError> = None;
    while Instant::now() < deadline {
        match engine.poll(Duration::from_millis(100)).await {
            Ok(Some(_)) => delivered += 1,
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Consumer group error");
                fatal = Some(e);
                break;
            }
        }
    }

    let closed = engine.close().await;
    info!(
        heartbeats = coordinator.heartbeat_count(),
        leaves = coordinator.leave_count(),
        "Coordinator saw requests"
    );

    if args.json {
        let summary = SimSummary {
            group_id: engine.group_id().to_string(),
            member_id: engine.member_id(),
            member_epoch: engine.member_epoch(),
            state: engine.state(),
            assignment: engine.assignment(),
            heartbeats_sent: engine.heartbeats_sent(),
            events_delivered: delivered,
            fatal_error: fatal.as_ref().map(ToString::to_string),
            close_error: closed.as_ref().err().map(ToString::to_string),
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "Failed to render summary"),
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => closed,
    }
}
