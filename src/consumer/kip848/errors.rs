//! KIP-848 Error Classification
//!
//! Maps `ConsumerGroupHeartbeat` outcomes onto the four reactions the member
//! can have. Pure and deterministic, no I/O.

use crate::error::{KafkaErrorCode, TransportError};
use std::fmt;

/// How the member reacts to a heartbeat outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Heartbeat accepted
    Success,

    /// Transient failure, retried immediately and never surfaced
    Retriable,

    /// Coordinator no longer recognizes the member
    /// Member must forget its identity and rejoin with epoch 0
    Fencing,

    /// Irrecoverable, the member stops heartbeating for good
    Fatal,
}

/// Error codes that terminate the member
pub const FATAL_ERROR_CODES: &[KafkaErrorCode] = &[
    KafkaErrorCode::InvalidRequest,
    KafkaErrorCode::GroupMaxSizeReached,
    KafkaErrorCode::UnsupportedAssignor,
    KafkaErrorCode::UnsupportedVersion,
    KafkaErrorCode::UnreleasedInstanceId,
    KafkaErrorCode::GroupAuthorizationFailed,
];

/// Error codes that fence the member
pub const FENCING_ERROR_CODES: &[KafkaErrorCode] = &[
    KafkaErrorCode::UnknownMemberId,
    KafkaErrorCode::FencedMemberEpoch,
];

/// Classify a protocol error code
pub fn classify(error_code: i16) -> ErrorClass {
    let Some(code) = KafkaErrorCode::from_i16(error_code) else {
        return ErrorClass::Retriable;
    };

    match code {
        KafkaErrorCode::None => ErrorClass::Success,
        KafkaErrorCode::UnknownMemberId | KafkaErrorCode::FencedMemberEpoch => ErrorClass::Fencing,
        KafkaErrorCode::InvalidRequest
        | KafkaErrorCode::GroupMaxSizeReached
        | KafkaErrorCode::UnsupportedAssignor
        | KafkaErrorCode::UnsupportedVersion
        | KafkaErrorCode::UnreleasedInstanceId
        | KafkaErrorCode::GroupAuthorizationFailed => ErrorClass::Fatal,
        _ => ErrorClass::Retriable,
    }
}

/// Classify a transport-level failure
///
/// Timeouts, disconnects and TLS failures are all transient from the
/// member's point of view.
pub fn classify_transport(_error: &TransportError) -> ErrorClass {
    ErrorClass::Retriable
}

impl ErrorClass {
    /// Check if the outcome requires the member to rejoin
    pub fn requires_rejoin(&self) -> bool {
        matches!(self, Self::Fencing)
    }

    /// Check if the outcome is retried with zero delay
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable)
    }

    /// Check if the outcome terminates the member
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Retriable => write!(f, "retriable"),
            Self::Fencing => write!(f, "fencing"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}
