//! SDK error types with failover classification.
//!
//! Provides a two-tier error model:
//! - **Replica errors**: a specific server was not primary or unreachable;
//!   the failover engine recovers these by rerouting.
//! - **Terminal errors**: cluster exhaustion, server-reported RPC failures,
//!   and client-side state errors; never retried.
//!
//! Errors include retryability classification and the conversions server
//! stubs use to translate transport failures into the typed taxonomy.

use snafu::Snafu;
use tonic::Code;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK error types with context-rich error messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SdkError {
    /// The contacted server is not (or is no longer) the primary replica.
    ///
    /// Recovered by the primary-replica strategy: refresh topology and
    /// retry against the newly reported primary.
    #[snafu(display("Server {address} is not the primary replica"))]
    NotPrimary {
        /// Address of the server that rejected the request.
        address: String,
    },

    /// Transport-level failure reaching a server (timeout, refused).
    ///
    /// Recovered by trying a different replica; under the any-replica
    /// strategy this is the expected degraded path.
    #[snafu(display("Server {address} is unreachable: {message}"))]
    Unreachable {
        /// Address of the server that could not be reached.
        address: String,
        /// Transport error description.
        message: String,
    },

    /// No server in the cluster could satisfy the operation.
    ///
    /// Raised when every seed address fails a topology fetch or when a
    /// retry ceiling is exhausted. Carries the addresses attempted for
    /// diagnostics.
    #[snafu(display("Cluster unavailable; attempted servers: [{}]", attempted.join(", ")))]
    ClusterUnavailable {
        /// Addresses tried before giving up.
        attempted: Vec<String>,
    },

    /// Server-reported RPC error that failover must not mask.
    ///
    /// Deterministic application-level failures (bad request, permission
    /// denied) are propagated on first occurrence; retrying them cannot
    /// help and may hide a real bug.
    #[snafu(display("RPC error (code={code:?}): {message}"))]
    Rpc {
        /// gRPC status code.
        code: Code,
        /// Error message from the server.
        message: String,
    },

    /// Operation attempted on a session that has been closed.
    #[snafu(display("Session is closed"))]
    SessionClosed,

    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },
}

impl SdkError {
    /// Returns true if this error means the server is not the primary.
    #[must_use]
    pub fn is_not_primary(&self) -> bool {
        matches!(self, Self::NotPrimary { .. })
    }

    /// Returns true if this error is a transport-level reachability failure.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Returns true if the failover engine may recover this error by
    /// rerouting to another replica.
    ///
    /// Only [`NotPrimary`](Self::NotPrimary) and
    /// [`Unreachable`](Self::Unreachable) qualify; everything else is
    /// propagated to the caller unchanged on first occurrence.
    #[must_use]
    pub fn is_replica_failover(&self) -> bool {
        self.is_not_primary() || self.is_unreachable()
    }

    /// Returns the gRPC status code if this is an RPC error.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Classifies a gRPC status from the server at `address`.
    ///
    /// `UNAVAILABLE` and `DEADLINE_EXCEEDED` indicate the server cannot
    /// currently be reached and map to [`Unreachable`](Self::Unreachable);
    /// every other code is a deterministic server answer and maps to
    /// [`Rpc`](Self::Rpc). Stub implementations produce
    /// [`NotPrimary`](Self::NotPrimary) themselves when the server's typed
    /// response says so.
    #[must_use]
    pub fn from_status(address: impl Into<String>, status: tonic::Status) -> Self {
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded => Self::Unreachable {
                address: address.into(),
                message: status.message().to_owned(),
            },
            code => Self::Rpc { code, message: status.message().to_owned() },
        }
    }

    /// Classifies a transport error (connection refused, TLS failure,
    /// broken channel) for the server at `address`.
    #[must_use]
    pub fn from_transport(address: impl Into<String>, source: tonic::transport::Error) -> Self {
        Self::Unreachable { address: address.into(), message: source.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_primary_is_replica_failover() {
        let err = SdkError::NotPrimary { address: "10.0.0.1:1729".to_owned() };
        assert!(err.is_not_primary());
        assert!(!err.is_unreachable());
        assert!(err.is_replica_failover());
    }

    #[test]
    fn unreachable_is_replica_failover() {
        let err = SdkError::Unreachable {
            address: "10.0.0.1:1729".to_owned(),
            message: "connection refused".to_owned(),
        };
        assert!(err.is_unreachable());
        assert!(!err.is_not_primary());
        assert!(err.is_replica_failover());
    }

    #[test]
    fn cluster_unavailable_is_terminal() {
        let err = SdkError::ClusterUnavailable {
            attempted: vec!["10.0.0.1:1729".to_owned(), "10.0.0.2:1729".to_owned()],
        };
        assert!(!err.is_replica_failover());
    }

    #[test]
    fn cluster_unavailable_names_attempted_addresses() {
        let err = SdkError::ClusterUnavailable {
            attempted: vec!["10.0.0.1:1729".to_owned(), "10.0.0.2:1729".to_owned()],
        };
        let message = err.to_string();
        assert!(message.contains("10.0.0.1:1729"));
        assert!(message.contains("10.0.0.2:1729"));
    }

    #[test]
    fn status_unavailable_classifies_unreachable() {
        let status = tonic::Status::unavailable("server down");
        let err = SdkError::from_status("10.0.0.1:1729", status);
        assert!(matches!(err, SdkError::Unreachable { .. }));
        assert!(err.is_replica_failover());
    }

    #[test]
    fn status_deadline_exceeded_classifies_unreachable() {
        let status = tonic::Status::deadline_exceeded("timed out");
        let err = SdkError::from_status("10.0.0.1:1729", status);
        assert!(matches!(err, SdkError::Unreachable { .. }));
    }

    #[test]
    fn status_permission_denied_classifies_rpc() {
        let status = tonic::Status::permission_denied("access denied");
        let err = SdkError::from_status("10.0.0.1:1729", status);
        assert!(matches!(err, SdkError::Rpc { code: Code::PermissionDenied, .. }));
        assert!(!err.is_replica_failover());
    }

    #[test]
    fn status_invalid_argument_classifies_rpc() {
        let status = tonic::Status::invalid_argument("bad request");
        let err = SdkError::from_status("10.0.0.1:1729", status);
        assert!(matches!(err, SdkError::Rpc { code: Code::InvalidArgument, .. }));
        assert!(!err.is_replica_failover());
    }

    #[test]
    fn session_closed_is_terminal() {
        assert!(!SdkError::SessionClosed.is_replica_failover());
    }

    #[test]
    fn config_error_is_terminal() {
        let err = SdkError::Config { message: "bad config".to_owned() };
        assert!(!err.is_replica_failover());
    }

    #[test]
    fn code_accessor() {
        let err = SdkError::Rpc { code: Code::NotFound, message: "not found".to_owned() };
        assert_eq!(err.code(), Some(Code::NotFound));

        let err2 = SdkError::SessionClosed;
        assert_eq!(err2.code(), None);
    }
}
