// ABOUTME: Transport error taxonomy with a single retriability classification.
// ABOUTME: 403 drives status to Offline; 4xx surface to callers; 5xx/network retry.

use crate::status::ConnectionStatus;
use thiserror::Error;

/// Errors surfaced by conversation transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The service returned 403; the session goes Offline and stays there
    #[error("authorization rejected by the service")]
    AuthRejected,

    /// Any other 4xx; the request was wrong, retrying cannot help
    #[error("request rejected: HTTP {status}: {body}")]
    Client { status: u16, body: String },

    /// 5xx; transient, retried after a fixed delay
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// Connect/timeout/transfer failure; retried like a 5xx
    #[error("network error: {0}")]
    Network(String),

    /// A request or response body that could not be built or understood
    #[error("malformed payload: {0}")]
    Protocol(String),

    /// Post attempted while the session can never become Online again
    #[error("connection is {0}, posting unavailable")]
    NotConnected(ConnectionStatus),

    /// `start()` called twice on the same client
    #[error("conversation already started")]
    AlreadyStarted,

    /// The session was ended while the operation was in flight
    #[error("conversation ended")]
    Ended,
}

impl TransportError {
    /// Whether the failure is transient and the request should be reissued
    /// after the configured retry delay.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_server_and_network_retry() {
        assert!(TransportError::Server { status: 502 }.is_retriable());
        assert!(TransportError::Network("connection reset".into()).is_retriable());

        assert!(!TransportError::AuthRejected.is_retriable());
        assert!(!TransportError::Client {
            status: 400,
            body: "bad activity".into()
        }
        .is_retriable());
        assert!(!TransportError::Protocol("truncated body".into()).is_retriable());
        assert!(!TransportError::Ended.is_retriable());
    }

    #[test]
    fn test_not_connected_names_the_state() {
        let e = TransportError::NotConnected(ConnectionStatus::Offline);
        assert!(e.to_string().contains("offline"));
    }
}
