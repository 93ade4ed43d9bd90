//! Error types for the Streamline group client
//!
//! This module defines the crate-level error, the transport failure taxonomy
//! consumed by the heartbeat engine, and the Kafka protocol error codes the
//! `ConsumerGroupHeartbeat` API can return.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for group client operations
pub type Result<T> = std::result::Result<T, GroupError>;

/// Kafka protocol error codes relevant to the consumer group heartbeat
/// See: <https://kafka.apache.org/protocol.html#protocol_error_codes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum KafkaErrorCode {
    /// Unknown server error
    UnknownServerError = -1,
    /// No error
    None = 0,
    /// Request timed out
    RequestTimedOut = 7,
    /// Broker is shutting down
    NetworkException = 13,
    /// Coordinator load in progress
    CoordinatorLoadInProgress = 14,
    /// Coordinator not available
    CoordinatorNotAvailable = 15,
    /// Not coordinator for group
    NotCoordinator = 16,
    /// Unknown member
    UnknownMemberId = 25,
    /// Rebalance in progress
    RebalanceInProgress = 27,
    /// Topic authorization failed
    TopicAuthorizationFailed = 29,
    /// Group authorization failed
    GroupAuthorizationFailed = 30,
    /// Unsupported version
    UnsupportedVersion = 35,
    /// Invalid request
    InvalidRequest = 42,
    /// Group max size reached
    GroupMaxSizeReached = 81,
    /// Fenced member epoch, the member must rejoin with epoch 0
    FencedMemberEpoch = 110,
    /// Static membership instance id is still held by another member
    UnreleasedInstanceId = 111,
    /// The requested server-side assignor is not supported
    UnsupportedAssignor = 112,
    /// Member epoch is older than the coordinator's but still acceptable
    StaleMemberEpoch = 113,
}

impl KafkaErrorCode {
    /// Look up a known error code
    pub fn from_i16(code: i16) -> Option<Self> {
        let known = match code {
            -1 => Self::UnknownServerError,
            0 => Self::None,
            7 => Self::RequestTimedOut,
            13 => Self::NetworkException,
            14 => Self::CoordinatorLoadInProgress,
            15 => Self::CoordinatorNotAvailable,
            16 => Self::NotCoordinator,
            25 => Self::UnknownMemberId,
            27 => Self::RebalanceInProgress,
            29 => Self::TopicAuthorizationFailed,
            30 => Self::GroupAuthorizationFailed,
            35 => Self::UnsupportedVersion,
            42 => Self::InvalidRequest,
            81 => Self::GroupMaxSizeReached,
            110 => Self::FencedMemberEpoch,
            111 => Self::UnreleasedInstanceId,
            112 => Self::UnsupportedAssignor,
            113 => Self::StaleMemberEpoch,
            _ => return None,
        };
        Some(known)
    }

    /// Convert to the i16 error code used in Kafka protocol
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Protocol name of the error, as printed by Kafka tooling
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnknownServerError => "UNKNOWN_SERVER_ERROR",
            Self::None => "NONE",
            Self::RequestTimedOut => "REQUEST_TIMED_OUT",
            Self::NetworkException => "NETWORK_EXCEPTION",
            Self::CoordinatorLoadInProgress => "COORDINATOR_LOAD_IN_PROGRESS",
            Self::CoordinatorNotAvailable => "COORDINATOR_NOT_AVAILABLE",
            Self::NotCoordinator => "NOT_COORDINATOR",
            Self::UnknownMemberId => "UNKNOWN_MEMBER_ID",
            Self::RebalanceInProgress => "REBALANCE_IN_PROGRESS",
            Self::TopicAuthorizationFailed => "TOPIC_AUTHORIZATION_FAILED",
            Self::GroupAuthorizationFailed => "GROUP_AUTHORIZATION_FAILED",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::GroupMaxSizeReached => "GROUP_MAX_SIZE_REACHED",
            Self::FencedMemberEpoch => "FENCED_MEMBER_EPOCH",
            Self::UnreleasedInstanceId => "UNRELEASED_INSTANCE_ID",
            Self::UnsupportedAssignor => "UNSUPPORTED_ASSIGNOR",
            Self::StaleMemberEpoch => "STALE_MEMBER_EPOCH",
        }
    }
}

impl fmt::Display for KafkaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a raw error code, using the protocol name when it is known
pub(crate) fn code_name(code: &i16) -> String {
    match KafkaErrorCode::from_i16(*code) {
        Some(known) => known.name().to_string(),
        None => format!("ERROR_CODE_{}", code),
    }
}

/// Failure of a single heartbeat round trip below the protocol layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("connection to coordinator lost: {0}")]
    Disconnected(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("{operation}: {detail}")]
    Io { operation: String, detail: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self::Disconnected(detail.into())
    }

    pub fn tls(detail: impl Into<String>) -> Self {
        Self::Tls(detail.into())
    }

    pub fn io(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Io {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Structured configuration error domain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{setting}: {reason}")]
    InvalidSetting { setting: String, reason: String },
    #[error("missing {0}")]
    Missing(String),
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    pub fn invalid_setting(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(setting: impl Into<String>) -> Self {
        Self::Missing(setting.into())
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for ConfigError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

/// Main error type for the group client
///
/// Retriable and fencing outcomes are absorbed by the engine and never show
/// up here; `Fatal` is the only coordinator-originated variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("Fatal consumer group error: {}: {message}", code_name(.code))]
    Fatal { code: i16, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Consumer is closed")]
    Closed,

    #[error("Rebalance listener is already running on this consumer")]
    ReentrantDispatch,

    #[error("Heartbeat task stopped: {0}")]
    TaskStopped(String),
}

impl GroupError {
    pub fn fatal(code: i16, message: impl Into<String>) -> Self {
        Self::Fatal {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the error is the terminal fatal group condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Error code carried by a fatal error
    pub fn fatal_code(&self) -> Option<i16> {
        match self {
            Self::Fatal { code, .. } => Some(*code),
            _ => None,
        }
    }
}
