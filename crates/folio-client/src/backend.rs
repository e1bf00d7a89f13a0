//! Seams to the backend-as-a-service.
//!
//! The notification list API and the push channel are consumed as black
//! boxes. Production adapters implement these traits over the vendor SDK;
//! `folio-harness` provides in-memory fakes with failure injection.

use async_trait::async_trait;
use folio_core::{
    ChannelEvent, ChannelId, ChannelSpec, FetchError, Notification, NotificationId,
    TransportError, UserId,
};
use tokio::sync::mpsc;

use crate::hub::HubCommand;

/// Refreshed authentication session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// User the session belongs to.
    pub user_id: UserId,
    /// Expiry as unix seconds, if the backend reports one.
    pub expires_at: Option<u64>,
}

/// Request/response access to stored notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Current notification list for `user_id`, newest first.
    async fn fetch_notifications(&self, user_id: &UserId) -> Result<Vec<Notification>, FetchError>;

    /// Drop any cached list for `user_id`. Best-effort.
    async fn invalidate_cache(&self, user_id: &UserId);

    /// Refresh the authentication session.
    ///
    /// `Ok(None)` means there was no session to refresh.
    async fn refresh_session(&self) -> Result<Option<Session>, FetchError>;

    /// Mark notifications as read.
    async fn mark_read(&self, user_id: &UserId, ids: &[NotificationId]) -> Result<(), FetchError>;
}

/// Push-style event channel keyed by table and filter.
#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    /// Register a channel.
    ///
    /// Lifecycle and payload events for `channel` are delivered through
    /// `events` until the channel is closed. Returning `Ok` only means the
    /// registration was accepted; the channel counts as live once a
    /// `Subscribed` status arrives.
    async fn open(
        &self,
        channel: ChannelId,
        spec: ChannelSpec,
        events: ChannelSink,
    ) -> Result<(), TransportError>;

    /// Remove a channel. Closing an unknown channel is not an error.
    async fn close(&self, channel: ChannelId) -> Result<(), TransportError>;
}

/// Delivers transport events into the hub that opened the channel.
///
/// A sink is bound to one supervisor generation. Events sent through a sink
/// that outlived its generation are discarded by the hub.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    generation: u64,
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl ChannelSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<HubCommand>) -> Self {
        Self { generation, tx }
    }

    /// Deliver an event. Returns `false` once the hub has stopped.
    pub fn send(&self, event: ChannelEvent) -> bool {
        self.tx.send(HubCommand::Channel { generation: self.generation, event }).is_ok()
    }

    /// Whether the hub has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
