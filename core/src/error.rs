//! Error types for the simulated transport and the planner client.
//!
//! # Design
//! Transport failures (`TransportError`) and handler failures are kept apart:
//! a handler that rejects a request still produces a normal response, so the
//! exchange succeeds at the transport level and the rejection only shows up in
//! the status code and envelope. `ApiError` is where the client folds the two
//! together for callers that only want "did my operation work".

use std::time::Duration;

use crate::http::status;
use crate::request::ReadyState;

/// Which direction of travel a message was on when it was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Request,
    Response,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Request => f.write_str("request"),
            Leg::Response => f.write_str("response"),
        }
    }
}

/// Why a request resolved through the error path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Lost on either leg. On the response leg the server has already acted,
    /// so the outcome of the operation is unknown.
    #[error("connection lost")]
    Dropped { leg: Leg },

    /// No registered server prefix matches the URL.
    #[error("server not found")]
    NoRoute { url: String },

    /// The client-side timer fired before the network resolved.
    #[error("request timed out")]
    Timeout { after: Duration },

    /// `abort()` was called while the request was in flight.
    #[error("request aborted")]
    Aborted,

    /// `wait()` was called on a request that has not been sent.
    #[error("request was never sent")]
    NotSent,
}

impl TransportError {
    /// Status code surfaced on the request object for this failure.
    pub fn status(&self) -> u16 {
        match self {
            TransportError::NoRoute { .. } => status::NOT_FOUND,
            _ => status::NETWORK_ERROR,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Misuse of the request state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("cannot {operation} while request is {state}")]
    InvalidState {
        operation: &'static str,
        state: ReadyState,
    },

    #[error("send requires a running Tokio runtime")]
    NoRuntime,
}

/// Rejected network or client configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("min delay {min:?} exceeds max delay {max:?}")]
    InvalidDelayRange { min: Duration, max: Duration },

    #[error("drop rate {0} is outside [0, 1]")]
    InvalidDropRate(f64),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Errors returned by `PlannerClient` operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The exchange itself failed; see `TransportError` for the reason.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The request object was driven out of order.
    #[error(transparent)]
    State(#[from] StateError),

    /// The server answered 404.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The server answered, but refused the operation.
    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ApiError {
    /// True when retrying the same request might succeed.
    ///
    /// A response-leg drop is included: the server may already have applied
    /// the operation, so only idempotent requests should be retried blindly.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(TransportError::Dropped { .. } | TransportError::Timeout { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_wire_status() {
        assert_eq!(TransportError::Dropped { leg: Leg::Request }.status(), 0);
        assert_eq!(
            TransportError::NoRoute {
                url: "/api/unknown".into()
            }
            .status(),
            404
        );
        assert_eq!(
            TransportError::Timeout {
                after: Duration::from_millis(50)
            }
            .status(),
            0
        );
    }

    #[test]
    fn transport_messages_are_distinguishable() {
        assert_eq!(TransportError::Dropped { leg: Leg::Response }.message(), "connection lost");
        assert_eq!(TransportError::NoRoute { url: "/x".into() }.message(), "server not found");
        assert_eq!(
            TransportError::Timeout {
                after: Duration::from_millis(1)
            }
            .message(),
            "request timed out"
        );
    }

    #[test]
    fn only_drops_and_timeouts_are_transient() {
        assert!(ApiError::from(TransportError::Dropped { leg: Leg::Response }).is_transient());
        assert!(ApiError::from(TransportError::Timeout {
            after: Duration::from_secs(1)
        })
        .is_transient());
        assert!(!ApiError::from(TransportError::NoRoute { url: "/".into() }).is_transient());
        assert!(!ApiError::Rejected {
            status: 401,
            message: "Unauthorized access".into()
        }
        .is_transient());
    }

    #[test]
    fn state_error_names_operation_and_state() {
        let err = StateError::InvalidState {
            operation: "send",
            state: ReadyState::Unsent,
        };
        assert_eq!(err.to_string(), "cannot send while request is UNSENT");
    }
}
