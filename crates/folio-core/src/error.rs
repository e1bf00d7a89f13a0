//! Error types for the notification core.
//!
//! Errors are tagged once, at the I/O boundary, with a [`FetchErrorKind`].
//! Retry and session-refresh decisions downstream switch on the tag and never
//! inspect message text.

use thiserror::Error;

use crate::channel::ChannelId;

/// Classification of a failed store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Connectivity failure (DNS, reset, offline).
    Network,
    /// Request did not complete in time.
    Timeout,
    /// Session missing or expired (HTTP 401/403, JWT errors).
    Unauthorized,
    /// Response was not a well-formed notification list.
    InvalidData,
    /// Any other server-side refusal (validation, row-level permission).
    Rejected,
}

impl FetchErrorKind {
    /// Whether a backoff retry may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}

/// Failed call to the notification store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    /// Tag driving retry policy.
    pub kind: FetchErrorKind,
    /// Human-readable detail, surfaced to the UI as `last_error`.
    pub message: String,
}

impl FetchError {
    /// Create an error with an explicit kind.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Tag an untyped error message.
    ///
    /// For store adapters whose client library only reports strings. This is
    /// the only place message text is inspected.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let has = |needle: &str| lower.contains(needle);

        let kind = if has("403") || has("401") || has("forbidden") || has("unauthorized") || has("jwt")
        {
            FetchErrorKind::Unauthorized
        } else if has("timeout") || has("timed out") {
            FetchErrorKind::Timeout
        } else if has("network") || has("fetch") || has("connection") {
            FetchErrorKind::Network
        } else if has("invalid") || has("malformed") {
            FetchErrorKind::InvalidData
        } else {
            FetchErrorKind::Rejected
        };

        Self { kind, message }
    }

    /// Whether a backoff retry may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Refusals from [`crate::Supervisor::ensure_subscription`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The supervisor was torn down. A fresh instance is required.
    #[error("circuit breaker open: supervisor was torn down")]
    CircuitOpen,

    /// The reconnect budget for the current user is used up.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made in this cycle.
        attempts: u32,
    },
}

/// Failures reported by a channel transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Channel could not be opened.
    #[error("failed to open {channel}: {reason}")]
    Open {
        /// Channel being opened.
        channel: ChannelId,
        /// Transport detail.
        reason: String,
    },

    /// Channel could not be closed cleanly.
    #[error("failed to close {channel}: {reason}")]
    Close {
        /// Channel being closed.
        channel: ChannelId,
        /// Transport detail.
        reason: String,
    },
}
