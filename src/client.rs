// ABOUTME: ConnectionClient owns one conversation session: start, post, end.
// ABOUTME: Publishes status via a watch channel and incoming activities via ActivityReceiver.

use crate::activity::{Activity, ChannelAccount};
use crate::config::{ClientConfig, Credential};
use crate::error::TransportError;
use crate::poller;
use crate::refresh;
use crate::rest::{AttachmentUpload, ResourceResponse, RestClient};
use crate::status::{transition, ConnectionStatus};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

/// Mutable session state shared with the poller and refresher tasks.
///
/// The conversation id is fixed at start; the token is replaced by the
/// refresher; the watermark is advanced by the poller.
pub(crate) struct Session {
    pub(crate) conversation_id: String,
    pub(crate) token: String,
    pub(crate) watermark: Option<String>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) rest: RestClient,
    pub(crate) credential: Credential,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) cancel: watch::Sender<bool>,
    pub(crate) session: Mutex<Option<Session>>,
    started: AtomicBool,
}

impl ClientInner {
    pub(crate) fn session_auth(&self) -> Result<(String, String), TransportError> {
        let guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(s) => Ok((s.conversation_id.clone(), s.token.clone())),
            None => Err(TransportError::Ended),
        }
    }
}

/// Client for one conversation with a remote bot.
///
/// Cheap to clone; all clones share the same session. The status stream is
/// `Connecting` from construction, `Online` once [`start`](Self::start)
/// establishes the conversation, `Offline` after an authorization failure,
/// and `Ended` after [`end`](Self::end).
#[derive(Clone)]
pub struct ConnectionClient {
    inner: Arc<ClientInner>,
}

impl ConnectionClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let credential = config.credential()?;
        let rest = RestClient::new(&config.base_url, config.request_timeout())?;
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                rest,
                credential,
                status,
                cancel,
                session: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Observable connection status. The receiver always reflects the
    /// latest value; use `changed()` to wait for transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Begin the conversation and return the incoming-activity stream.
    ///
    /// Retries transient failures every retry delay until the conversation
    /// opens or the session is ended. A 403 moves the status to `Offline`;
    /// any other client error moves it to `Failed`. On success the poller
    /// task starts, and in token mode the refresher task as well.
    pub async fn start(&self) -> Result<ActivityReceiver, TransportError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let mut cancel = self.inner.cancel.subscribe();
        let conversation = loop {
            match self
                .inner
                .rest
                .start_conversation(self.inner.credential.value())
                .await
            {
                Ok(conversation) => break conversation,
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = self.inner.config.retry_delay_ms,
                        "Failed to start conversation, retrying"
                    );
                    tokio::select! {
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                return Err(TransportError::Ended);
                            }
                        }
                        _ = tokio::time::sleep(self.inner.config.retry_delay()) => {}
                    }
                }
                Err(TransportError::AuthRejected) => {
                    transition(&self.inner.status, ConnectionStatus::Offline);
                    return Err(TransportError::AuthRejected);
                }
                Err(e) => {
                    transition(&self.inner.status, ConnectionStatus::Failed);
                    return Err(e);
                }
            }
        };

        // Service-issued conversation token wins over the configured credential
        let token = conversation
            .token
            .clone()
            .unwrap_or_else(|| self.inner.credential.value().to_string());
        {
            let mut guard = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(Session {
                conversation_id: conversation.conversation_id.clone(),
                token,
                watermark: None,
            });
        }

        let (tx, rx) = mpsc::channel(256);
        transition(&self.inner.status, ConnectionStatus::Online);
        tracing::info!(
            conversation_id = %conversation.conversation_id,
            "Conversation started"
        );

        tokio::spawn(poller::run(self.inner.clone(), tx));
        if self.inner.credential.is_token() {
            tokio::spawn(refresh::run(self.inner.clone()));
        }

        Ok(ActivityReceiver::new(rx))
    }

    /// Send one activity; resolves to the server-assigned activity id.
    ///
    /// Waits while the session is still `Connecting`, fails immediately once
    /// it is in a state that can never become `Online` again. Outgoing
    /// activities are stamped with the configured sender and a
    /// clientActivityId before anything touches the network.
    pub async fn post_activity(&self, activity: Activity) -> Result<String, TransportError> {
        self.wait_until_online().await?;

        let mut activity = activity;
        self.stamp_sender(&mut activity);
        let client_activity_id = activity.ensure_client_activity_id();

        let resource = self
            .post_with_retry(|conversation_id, token| {
                let rest = self.inner.rest.clone();
                let activity = activity.clone();
                async move { rest.post_activity(&conversation_id, &token, &activity).await }
            })
            .await?;
        tracing::debug!(
            activity_id = %resource.id,
            client_activity_id = %client_activity_id,
            "Activity posted"
        );
        Ok(resource.id)
    }

    /// Upload binary attachments and post the carrying activity in one
    /// multipart request. Same gating and retry semantics as
    /// [`post_activity`](Self::post_activity).
    pub async fn post_message_with_attachments(
        &self,
        activity: Activity,
        uploads: Vec<AttachmentUpload>,
    ) -> Result<String, TransportError> {
        self.wait_until_online().await?;

        let mut activity = activity;
        self.stamp_sender(&mut activity);
        let client_activity_id = activity.ensure_client_activity_id();
        let user_id = activity
            .from
            .as_ref()
            .map(|from| from.id.clone())
            .ok_or_else(|| {
                TransportError::Protocol("upload requires a sender id on the activity".to_string())
            })?;

        let uploads = Arc::new(uploads);
        let resource = self
            .post_with_retry(|conversation_id, token| {
                let rest = self.inner.rest.clone();
                let activity = activity.clone();
                let user_id = user_id.clone();
                let uploads = uploads.clone();
                async move {
                    rest.upload_attachments(
                        &conversation_id,
                        &token,
                        &user_id,
                        &activity,
                        &uploads,
                    )
                    .await
                }
            })
            .await?;
        tracing::debug!(
            activity_id = %resource.id,
            client_activity_id = %client_activity_id,
            "Attachments uploaded"
        );
        Ok(resource.id)
    }

    /// End the session. Idempotent. Stops the poller and refresher
    /// immediately (pending delays and in-flight requests are dropped),
    /// closes the activity stream, and moves the status to `Ended`.
    pub fn end(&self) {
        let _ = self.inner.cancel.send(true);
        if transition(&self.inner.status, ConnectionStatus::Ended) {
            tracing::info!("Conversation ended");
        }
    }

    async fn wait_until_online(&self) -> Result<(), TransportError> {
        let mut status_rx = self.inner.status.subscribe();
        let status = *status_rx
            .wait_for(|s| *s != ConnectionStatus::Connecting)
            .await
            .map_err(|_| TransportError::Ended)?;
        if status.is_online() {
            Ok(())
        } else {
            Err(TransportError::NotConnected(status))
        }
    }

    fn stamp_sender(&self, activity: &mut Activity) {
        if activity.from.is_none() {
            if let Some(user_id) = &self.inner.config.user_id {
                activity.from = Some(ChannelAccount {
                    id: user_id.clone(),
                    name: self.inner.config.user_name.clone(),
                });
            }
        }
    }

    /// Issue a post-style request with the fixed-delay retry policy.
    /// Session auth is re-read on every attempt so a token rotated by the
    /// refresher takes effect mid-retry.
    async fn post_with_retry<F, Fut>(
        &self,
        mut request: F,
    ) -> Result<ResourceResponse, TransportError>
    where
        F: FnMut(String, String) -> Fut,
        Fut: std::future::Future<Output = Result<ResourceResponse, TransportError>>,
    {
        let mut cancel = self.inner.cancel.subscribe();
        loop {
            let (conversation_id, token) = self.inner.session_auth()?;
            match request(conversation_id, token).await {
                Ok(resource) => return Ok(resource),
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = self.inner.config.retry_delay_ms,
                        "Post failed, retrying"
                    );
                    tokio::select! {
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                return Err(TransportError::Ended);
                            }
                        }
                        _ = tokio::time::sleep(self.inner.config.retry_delay()) => {}
                    }
                }
                Err(TransportError::AuthRejected) => {
                    transition(&self.inner.status, ConnectionStatus::Offline);
                    return Err(TransportError::AuthRejected);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Receiver for the incoming-activity stream of one conversation.
///
/// The stream closes when the session ends, goes Offline, or the client is
/// dropped.
#[derive(Debug)]
pub struct ActivityReceiver {
    rx: mpsc::Receiver<Activity>,
}

impl ActivityReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<Activity>) -> Self {
        Self { rx }
    }

    /// Receive the next activity, or None once the stream is closed.
    pub async fn recv(&mut self) -> Option<Activity> {
        self.rx.recv().await
    }

    /// Receive an activity without blocking.
    pub fn try_recv(&mut self) -> Option<Activity> {
        self.rx.try_recv().ok()
    }

    /// Adapt into a `Stream` for combinator-style consumption.
    pub fn into_stream(self) -> ReceiverStream<Activity> {
        ReceiverStream::new(self.rx)
    }
}
