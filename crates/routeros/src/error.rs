use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure to establish an authenticated session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("DNS resolution failed: {0}")]
    DnsFailure(String),
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("Port closed: {0}")]
    PortClosed(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("Connection reset: {0}")]
    TransportReset(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Stable identifier used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::DnsFailure(_) => "dns_failure",
            ConnectionError::NetworkUnreachable(_) => "network_unreachable",
            ConnectionError::PortClosed(_) => "port_closed",
            ConnectionError::Timeout(_) => "timeout",
            ConnectionError::AuthenticationFailed(_) => "authentication_failed",
            ConnectionError::Tls(_) => "tls",
            ConnectionError::TransportReset(_) => "transport_reset",
            ConnectionError::Protocol(_) => "protocol_error",
        }
    }

    /// Maps a socket-level error raised while connecting.
    pub fn from_connect_io(err: &io::Error, peer: &str, timeout: Duration) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => {
                ConnectionError::PortClosed(format!("{peer} refused the connection"))
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => {
                ConnectionError::TransportReset(format!("{peer}: {err}"))
            }
            io::ErrorKind::TimedOut => ConnectionError::Timeout(timeout),
            _ => ConnectionError::NetworkUnreachable(format!("{peer}: {err}")),
        }
    }
}

/// Failure of a single request on an established session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Router rejected command: {message}")]
    Trap {
        message: String,
        category: Option<u32>,
    },
    #[error("Router closed the session: {0}")]
    Fatal(String),
    #[error("Malformed reply: {0}")]
    Protocol(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection reset: {0}")]
    TransportReset(String),
    #[error("Session is closed")]
    SessionClosed,
}

impl ApiError {
    /// Whether the session can no longer be used after this error.
    pub fn poisons_session(&self) -> bool {
        !matches!(self, ApiError::Trap { .. })
    }
}

impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData => ApiError::Protocol(err.to_string()),
            io::ErrorKind::UnexpectedEof => {
                ApiError::TransportReset("connection closed by router".to_string())
            }
            _ => ApiError::TransportReset(err.to_string()),
        }
    }
}

impl From<ApiError> for ConnectionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Trap { message, .. } => ConnectionError::AuthenticationFailed(message),
            ApiError::Fatal(message) => ConnectionError::AuthenticationFailed(message),
            ApiError::Protocol(message) => ConnectionError::Protocol(message),
            ApiError::Timeout(duration) => ConnectionError::Timeout(duration),
            ApiError::TransportReset(message) => ConnectionError::TransportReset(message),
            ApiError::SessionClosed => {
                ConnectionError::TransportReset("session closed during login".to_string())
            }
        }
    }
}
