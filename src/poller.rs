// ABOUTME: Watermark polling loop feeding the incoming-activity stream.
// ABOUTME: Empty pages wait the poll interval; transient errors retry; 403 goes Offline.

use crate::activity::Activity;
use crate::client::ClientInner;
use crate::error::TransportError;
use crate::status::{transition, ConnectionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `GET /conversations/{id}/activities` until the session stops being
/// Online, the caller ends it, or the receiver goes away.
///
/// Owns the sending half of the activity channel; returning closes the
/// stream for the consumer.
pub(crate) async fn run(inner: Arc<ClientInner>, tx: mpsc::Sender<Activity>) {
    let mut cancel = inner.cancel.subscribe();
    let status_rx = inner.status.subscribe();

    loop {
        if *cancel.borrow() {
            break;
        }
        if !status_rx.borrow().is_online() {
            break;
        }

        let (conversation_id, token, watermark) = {
            let guard = inner.session.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(s) => (
                    s.conversation_id.clone(),
                    s.token.clone(),
                    s.watermark.clone(),
                ),
                None => break,
            }
        };

        let fetched = tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
            result = inner
                .rest
                .get_activities(&conversation_id, &token, watermark.as_deref()) => result,
        };

        let delay = match fetched {
            Ok(set) => {
                // Empty pages carry no watermark; the previous cursor
                // stays in effect, never reset.
                if let Some(watermark) = &set.watermark {
                    let mut guard = inner.session.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(session) = guard.as_mut() {
                        session.watermark = Some(watermark.clone());
                    }
                }

                let empty = set.activities.is_empty();
                for activity in set.activities {
                    if *cancel.borrow() {
                        return;
                    }
                    if tx.send(activity).await.is_err() {
                        // Consumer went away; unsubscription stops polling
                        return;
                    }
                }

                if empty {
                    inner.config.poll_interval()
                } else {
                    Duration::ZERO
                }
            }
            Err(TransportError::AuthRejected) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    "Polling rejected by the service, going offline"
                );
                transition(&inner.status, ConnectionStatus::Offline);
                break;
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    delay_ms = inner.config.retry_delay_ms,
                    "Activity poll failed, retrying"
                );
                inner.config.retry_delay()
            }
        };

        if !delay.is_zero() {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
