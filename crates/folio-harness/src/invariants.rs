//! Invariant checking for simulation runs.
//!
//! Invariants are properties that must hold after every step of every
//! scenario. Each check reads a [`HubSnapshot`]: the hub's own status next to
//! what the transport actually has open.

use folio_client::{HubError, HubHandle, HubStatus};
use folio_core::{ChannelId, ChannelSpec, SupervisorConfig};

use crate::SimTransport;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Observable state at one point of a run.
#[derive(Debug, Clone)]
pub struct HubSnapshot {
    /// Hub status.
    pub status: HubStatus,
    /// Channels the transport has open.
    pub open_channels: Vec<(ChannelId, ChannelSpec)>,
    /// Configured reconnect budget.
    pub max_reconnect_attempts: u32,
}

impl HubSnapshot {
    /// Capture the hub and transport state.
    ///
    /// # Errors
    ///
    /// [`HubError::Closed`] if the hub has stopped.
    pub async fn capture(
        hub: &HubHandle,
        transport: &SimTransport,
        config: &SupervisorConfig,
    ) -> Result<Self, HubError> {
        let status = hub.status().await?;
        Ok(Self {
            status,
            open_channels: transport.open_channels(),
            max_reconnect_attempts: config.max_reconnect_attempts,
        })
    }
}

/// A property checked against every snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, snapshot: &HubSnapshot) -> InvariantResult;
}

/// At most one channel is open, and it is the one the supervisor tracks.
pub struct SingleLiveChannel;

impl Invariant for SingleLiveChannel {
    fn name(&self) -> &'static str {
        "single_live_channel"
    }

    fn check(&self, snapshot: &HubSnapshot) -> InvariantResult {
        let open: Vec<ChannelId> = snapshot.open_channels.iter().map(|(id, _)| *id).collect();

        if open.len() > 1 || open.first().copied() != snapshot.status.channel {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "transport has {open:?} open, supervisor tracks {:?}",
                    snapshot.status.channel
                ),
            });
        }
        Ok(())
    }
}

/// The open channel streams the supervisor's current user.
pub struct ChannelScopedToUser;

impl Invariant for ChannelScopedToUser {
    fn name(&self) -> &'static str {
        "channel_scoped_to_user"
    }

    fn check(&self, snapshot: &HubSnapshot) -> InvariantResult {
        for (channel, spec) in &snapshot.open_channels {
            if snapshot.status.user_id.as_ref() != Some(&spec.user_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{channel} streams {} but supervisor user is {:?}",
                        spec.user_id, snapshot.status.user_id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A latched breaker leaves nothing open and nothing scheduled.
pub struct BreakerQuiescent;

impl Invariant for BreakerQuiescent {
    fn name(&self) -> &'static str {
        "breaker_quiescent"
    }

    fn check(&self, snapshot: &HubSnapshot) -> InvariantResult {
        let status = &snapshot.status;
        if status.circuit_open && (!snapshot.open_channels.is_empty() || status.reconnect_pending) {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "breaker open with {} channel(s), reconnect pending: {}",
                    snapshot.open_channels.len(),
                    status.reconnect_pending
                ),
            });
        }
        Ok(())
    }
}

/// Reconnects never exceed the configured budget.
pub struct ReconnectBudget;

impl Invariant for ReconnectBudget {
    fn name(&self) -> &'static str {
        "reconnect_budget"
    }

    fn check(&self, snapshot: &HubSnapshot) -> InvariantResult {
        if snapshot.status.reconnect_attempts > snapshot.max_reconnect_attempts {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{} reconnect attempts, budget {}",
                    snapshot.status.reconnect_attempts, snapshot.max_reconnect_attempts
                ),
            });
        }
        Ok(())
    }
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every hub invariant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SingleLiveChannel);
        registry.add(ChannelScopedToUser);
        registry.add(BreakerQuiescent);
        registry.add(ReconnectBudget);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, snapshot: &HubSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(snapshot).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with context on violation.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, snapshot: &HubSnapshot, context: &str) {
        if let Err(violations) = self.check_all(snapshot) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
