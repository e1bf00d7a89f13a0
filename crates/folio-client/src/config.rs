//! Client configuration.

use folio_core::{RetryConfig, StewardConfig, SupervisorConfig};

/// Configuration for the hub and its consumers.
///
/// Each field defaults to the production tuning of its component.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Subscription supervisor (reconnect budget, channel table).
    pub supervisor: SupervisorConfig,
    /// Per-consumer fetch retry policy.
    pub retry: RetryConfig,
    /// Cached list size cap.
    pub steward: StewardConfig,
}
