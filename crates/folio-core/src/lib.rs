//! Folio notification core.
//!
//! Pure state machines for the real-time notification subscription manager.
//! Nothing in this crate performs I/O or owns a timer: every component takes
//! events as input and returns actions for a driver to execute. The async
//! drivers live in `folio-client`; deterministic simulation lives in
//! `folio-harness`.
//!
//! # Components
//!
//! - [`Supervisor`]: one live channel per process, bounded reconnection,
//!   circuit breaker
//! - [`ListenerRegistry`]: fan-out of the cached notification set to UI
//!   listeners
//! - [`RefreshCoordinator`]: per-consumer fetch deduplication and retry policy
//! - [`MemorySteward`]: periodic size cap for the cached set
//! - [`Environment`]: time and randomness abstraction

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod env;
pub mod error;
pub mod notification;
pub mod refresh;
pub mod registry;
pub mod steward;
pub mod supervisor;

pub use channel::{ChannelEvent, ChannelEventKind, ChannelId, ChannelSpec, ChannelStatus, PayloadKind};
pub use env::Environment;
pub use error::{FetchError, FetchErrorKind, SupervisorError, TransportError};
pub use notification::{Notification, NotificationId, NotificationSet, UserId, dedup_by_id};
pub use refresh::{RefreshAction, RefreshCoordinator, RetryConfig, RetryReason};
pub use registry::{Listener, ListenerId, ListenerRegistry};
pub use steward::{MemorySteward, StewardConfig};
pub use supervisor::{
    ConnectionState, ReconnectToken, Supervisor, SupervisorAction, SupervisorConfig,
};
