//! Folio notification client.
//!
//! Async drivers for the state machines in `folio-core`. Each state machine
//! is owned by exactly one tokio task and fed through an unbounded command
//! queue; the task executes the actions the machine returns against the
//! external collaborators.
//!
//! # Components
//!
//! - [`NotificationHub`]: process-wide task owning the supervisor, listener
//!   registry and memory steward
//! - [`NotificationConsumer`]: per-UI task owning a refresh coordinator
//! - [`NotificationStore`] / [`ChannelTransport`]: the backend seams
//! - [`SystemEnv`]: production environment

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod config;
pub mod consumer;
pub mod error;
pub mod hub;
pub mod system_env;

pub use backend::{ChannelSink, ChannelTransport, NotificationStore, Session};
pub use config::ClientConfig;
pub use consumer::{NotificationConsumer, NotificationView};
pub use error::HubError;
pub use hub::{HubHandle, HubStatus, InvalidateHook, NotificationHub};
pub use system_env::SystemEnv;
