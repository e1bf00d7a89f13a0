//! Client error types.

use folio_core::SupervisorError;
use thiserror::Error;

/// Errors returned by [`HubHandle`](crate::HubHandle) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("notification hub is closed")]
    Closed,

    /// The supervisor refused to subscribe.
    #[error("subscription refused: {0}")]
    Refused(#[from] SupervisorError),
}
