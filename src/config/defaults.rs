//! Default constants for group consumer configuration
//!
//! These constants define the values used when a setting is absent from
//! the configuration file and no builder override is applied.

/// Default heartbeat interval in milliseconds, used until the coordinator
/// advertises its own
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Default session timeout in milliseconds
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 45_000;

/// Default rebalance timeout in milliseconds (5 minutes)
pub const DEFAULT_REBALANCE_TIMEOUT_MS: u64 = 300_000;

/// Default upper bound for a single heartbeat round trip in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default bound on the terminal leave heartbeat in milliseconds
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 10_000;

/// Default log level for the simulator binary
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default heartbeat interval advertised by the mock coordinator
pub const DEFAULT_MOCK_HEARTBEAT_INTERVAL_MS: u64 = 500;
