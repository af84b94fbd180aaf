// ABOUTME: Connection status enum with a pure transition table.
// ABOUTME: Published through a watch channel; illegal transitions are ignored.

use tokio::sync::watch;

/// Connection lifecycle of a single conversation session.
///
/// One authoritative value per session, observable via
/// [`ConnectionClient::status`](crate::ConnectionClient::status). Dependent
/// loops (polling, token refresh) only run while `Online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Conversation is being established
    Connecting,
    /// Session established and processing activities
    Online,
    /// Service rejected our authorization; no further traffic
    Offline,
    /// Conversation could not be established
    Failed,
    /// Session was ended by the caller
    Ended,
}

impl ConnectionStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// `Ended` is terminal; `Offline` and `Failed` can only be ended. A
    /// session never returns to `Online` once it left it.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            (Connecting, Online | Offline | Failed | Ended) => true,
            (Online, Offline | Ended) => true,
            (Offline, Ended) => true,
            (Failed, Ended) => true,
            _ => false,
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectionStatus::Online
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Failed => write!(f, "failed"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Apply `next` to the status channel if the transition table allows it.
///
/// Returns true when the value changed. Subscribers are only notified on a
/// real change, so a second 403 can never produce a second Offline
/// notification.
pub(crate) fn transition(tx: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) -> bool {
    tx.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            false
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
