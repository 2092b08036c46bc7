//! Connection lifecycle
//!
//! ```text
//! Unauthenticated ──auth ok──► Authenticated ──subscribed──► Streaming
//!        │                          │                            │
//!        └────── denied ────────────┴── open failed ─────────────┴── feed end / error,
//!                                   ▼                                client gone, deadline,
//!                                 Closed  ◄──────────────────────────  shutdown
//! ```
//!
//! `Closed` is entered once per connection. The subscription is owned by the
//! relay loop, so its cursor is released on every exit path, unwinding
//! included.

use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{CredentialValidator, Identity};
use crate::sse::{StreamWriter, WriteError};
use crate::subscription::{StreamKind, Subscription, SubscriptionManager};
use crate::types::Result;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated,
    Streaming,
    Closed,
}

/// Why a connection reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Credentials were rejected
    Denied,
    /// The change feed could not be opened
    SubscribeFailed,
    /// The feed ended
    FeedExhausted,
    /// The feed failed mid-stream
    FeedError(String),
    /// The client disconnected
    ClientGone,
    /// The per-stream time limit ran out
    Deadline,
    /// The server is shutting down
    Shutdown,
}

/// External reasons to stop a relay
#[derive(Debug, Clone)]
pub struct StopSignals {
    shutdown: watch::Receiver<bool>,
    deadline: Option<tokio::time::Instant>,
}

impl StopSignals {
    pub fn new(shutdown: watch::Receiver<bool>, max_duration: Option<Duration>) -> Self {
        Self {
            shutdown,
            deadline: max_duration.map(|d| tokio::time::Instant::now() + d),
        }
    }

    /// Signals that never fire
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // A closed channel never reports shutdown
        drop(tx);
        Self {
            shutdown: rx,
            deadline: None,
        }
    }

    async fn shutdown_requested(&mut self) {
        if self.shutdown.wait_for(|stop| *stop).await.is_err() {
            pending::<()>().await
        }
    }

    /// Resolves with the reason once any signal fires
    async fn fired(&mut self) -> CloseReason {
        let deadline = self.deadline;
        tokio::select! {
            _ = self.shutdown_requested() => CloseReason::Shutdown,
            _ = sleep_until(deadline) => CloseReason::Deadline,
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

/// Count of live streams
#[derive(Debug, Clone)]
pub struct StreamGauge {
    active: Arc<watch::Sender<usize>>,
}

impl Default for StreamGauge {
    fn default() -> Self {
        Self {
            active: Arc::new(watch::channel(0).0),
        }
    }
}

impl StreamGauge {
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    fn enter(&self) -> GaugeGuard {
        self.active.send_modify(|n| *n += 1);
        GaugeGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Wait until no stream is live, or `timeout` passes; returns whether idle
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut changes = self.active.subscribe();
        let idle = matches!(
            tokio::time::timeout(timeout, changes.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        idle
    }
}

struct GaugeGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// One client request, from credential check to close
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    kind: StreamKind,
    account_id: String,
    state: ConnectionState,
    close_reason: Option<CloseReason>,
    opened_at: Instant,
}

impl Connection {
    pub fn new(kind: StreamKind, account_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            account_id: account_id.into(),
            state: ConnectionState::Unauthenticated,
            close_reason: None,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("[{}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        info!(
            "[{}] {} stream for {} closed after {:?}: {:?}",
            self.id,
            self.kind.as_str(),
            self.account_id,
            self.opened_at.elapsed(),
            reason
        );
        self.close_reason = Some(reason);
        self.transition(ConnectionState::Closed);
    }

    /// `Unauthenticated → Authenticated`, or `Closed` with the denial error
    pub async fn authenticate(
        &mut self,
        validator: &CredentialValidator,
        identity: &Identity,
    ) -> Result<()> {
        debug_assert_eq!(self.state, ConnectionState::Unauthenticated);
        match validator.authenticate(identity).await {
            Ok(()) => {
                self.transition(ConnectionState::Authenticated);
                Ok(())
            }
            Err(e) => {
                self.close(CloseReason::Denied);
                Err(e)
            }
        }
    }

    /// Open the connection's subscription; `Closed` on failure
    pub async fn subscribe(&mut self, manager: &SubscriptionManager) -> Result<Subscription> {
        debug_assert_eq!(self.state, ConnectionState::Authenticated);
        match manager.open(self.kind, &self.account_id).await {
            Ok(subscription) => Ok(subscription),
            Err(e) => {
                warn!("[{}] Failed to open subscription: {}", self.id, e);
                self.close(CloseReason::SubscribeFailed);
                Err(e.into())
            }
        }
    }

    /// `Streaming` until the feed ends, the client leaves or a stop signal fires
    ///
    /// Returns the closed connection; its cursor has been released.
    pub async fn relay(
        mut self,
        mut subscription: Subscription,
        mut writer: StreamWriter,
        mut stop: StopSignals,
        gauge: StreamGauge,
    ) -> Connection {
        let _active = gauge.enter();
        self.transition(ConnectionState::Streaming);

        let reason = loop {
            let next = tokio::select! {
                biased;
                reason = stop.fired() => break reason,
                _ = writer.closed() => break CloseReason::ClientGone,
                next = subscription.next() => next,
            };

            let record = match next {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    warn!("[{}] Error watching collection: {}", self.id, e);
                    break CloseReason::FeedError(e.to_string());
                }
                None => break CloseReason::FeedExhausted,
            };

            let Some(event) = subscription.transcoder().transcode(&record) else {
                continue;
            };

            let written = tokio::select! {
                biased;
                reason = stop.fired() => break reason,
                written = writer.write(&event) => written,
            };

            match written {
                Ok(()) => debug!("[{}] Sent '{}' event", self.id, event.event_type),
                Err(WriteError::Encode(e)) => {
                    warn!("[{}] Skipping '{}' event: {}", self.id, event.event_type, e);
                }
                Err(WriteError::ClientGone) => break CloseReason::ClientGone,
            }
        };

        subscription.close();
        debug!(
            "[{}] {} frame(s), {} byte(s) written",
            self.id,
            writer.frames_written(),
            writer.bytes_written()
        );
        self.close(reason);
        self
    }
}
