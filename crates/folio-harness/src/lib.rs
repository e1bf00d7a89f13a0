//! Deterministic simulation harness for the Folio notification client.
//!
//! In-memory implementations of the backend seams plus a virtual-time
//! [`Environment`](folio_core::Environment), so the real hub and consumer
//! drivers run unmodified under a paused tokio clock.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold after every step
//! of any scenario (one live channel, breaker quiescence, reconnect budget).
//! [`ChaosScenario`] drives a hub with seeded random operations and checks
//! them continuously.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod scenario;
pub mod sim_env;
pub mod sim_store;
pub mod sim_transport;

pub use invariants::{
    BreakerQuiescent, ChannelScopedToUser, HubSnapshot, Invariant, InvariantRegistry,
    InvariantResult, ReconnectBudget, SingleLiveChannel, Violation,
};
pub use scenario::{ChaosScenario, ScenarioReport};
pub use sim_env::SimEnv;
pub use sim_store::SimStore;
pub use sim_transport::SimTransport;
