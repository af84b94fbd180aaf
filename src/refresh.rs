// ABOUTME: Periodic token rotation loop, active only while the session is Online.
// ABOUTME: Transient refresh failures retry with the fixed delay; 403 goes Offline.

use crate::client::ClientInner;
use crate::error::TransportError;
use crate::status::{transition, ConnectionStatus};
use std::sync::Arc;
use tokio::time::{interval_at, Instant};

/// Exchange the session token for a fresh one every refresh interval.
///
/// Only spawned in token mode; a long-lived secret never needs renewal.
pub(crate) async fn run(inner: Arc<ClientInner>) {
    let mut cancel = inner.cancel.subscribe();
    let status_rx = inner.status.subscribe();
    let period = inner.config.refresh_interval();
    // First rotation one full period after start
    let mut interval = interval_at(Instant::now() + period, period);

    'ticks: loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if !status_rx.borrow().is_online() {
                    break;
                }

                loop {
                    let token = {
                        let guard = inner.session.lock().unwrap_or_else(|e| e.into_inner());
                        match guard.as_ref() {
                            Some(s) => s.token.clone(),
                            None => break 'ticks,
                        }
                    };

                    let refreshed = tokio::select! {
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                break 'ticks;
                            }
                            continue;
                        }
                        result = inner.rest.refresh_token(&token) => result,
                    };

                    match refreshed {
                        Ok(conversation) => {
                            if let Some(new_token) = conversation.token {
                                let mut guard =
                                    inner.session.lock().unwrap_or_else(|e| e.into_inner());
                                if let Some(session) = guard.as_mut() {
                                    session.token = new_token;
                                }
                                tracing::debug!("Session token refreshed");
                            } else {
                                tracing::warn!("Token refresh response carried no token");
                            }
                            break;
                        }
                        Err(TransportError::AuthRejected) => {
                            tracing::warn!("Token refresh rejected by the service, going offline");
                            transition(&inner.status, ConnectionStatus::Offline);
                            break 'ticks;
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                delay_ms = inner.config.retry_delay_ms,
                                "Token refresh failed, retrying"
                            );
                            tokio::select! {
                                changed = cancel.changed() => {
                                    if changed.is_err() || *cancel.borrow() {
                                        break 'ticks;
                                    }
                                }
                                _ = tokio::time::sleep(inner.config.retry_delay()) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}
