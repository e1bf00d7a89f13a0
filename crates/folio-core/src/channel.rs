//! Real-time channel vocabulary shared by the supervisor and transports.

use std::fmt;

use crate::notification::UserId;

/// Identifies one opened channel for the lifetime of a supervisor.
///
/// Ids are never reused, so events that arrive late from a closed channel can
/// be told apart from events of its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// What the transport should subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Unique channel name (`notifications:{user}:{nonce}`).
    pub name: String,
    /// Table whose row changes are streamed.
    pub table: String,
    /// User whose rows are streamed.
    pub user_id: UserId,
}

impl ChannelSpec {
    /// Row filter in the transport's `column=eq.value` syntax.
    pub fn filter(&self) -> String {
        format!("user_id=eq.{}", self.user_id)
    }
}

/// Lifecycle status reported by the transport for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Subscription acknowledged by the server.
    Subscribed,
    /// Server or socket reported an error for the channel.
    ChannelError,
    /// Channel closed.
    Closed,
    /// Subscription did not complete in the transport's time budget.
    TimedOut,
}

impl ChannelStatus {
    /// Whether this status ends the channel.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Subscribed)
    }
}

/// Row change kind carried by a payload event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

/// Event delivered by the transport for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    /// Lifecycle status change.
    Status(ChannelStatus),
    /// Data change on the subscribed rows.
    Payload(PayloadKind),
}

/// Transport event tagged with the channel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Channel that produced the event.
    pub channel: ChannelId,
    /// What happened.
    pub kind: ChannelEventKind,
}

impl ChannelEvent {
    /// Lifecycle event.
    pub fn status(channel: ChannelId, status: ChannelStatus) -> Self {
        Self { channel, kind: ChannelEventKind::Status(status) }
    }

    /// Payload event.
    pub fn payload(channel: ChannelId, kind: PayloadKind) -> Self {
        Self { channel, kind: ChannelEventKind::Payload(kind) }
    }
}
