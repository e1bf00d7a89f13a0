//! Seeded chaos scenario against a real hub.
//!
//! Interleaves subscribe calls for a handful of users, injected channel
//! failures and refusals, payload events, listener churn, sign-outs,
//! teardown and virtual-time jumps that let reconnect timers fire.
//! Invariants are checked after every step. The same seed replays the same run.

use std::{sync::Arc, time::Duration};

use folio_client::{ClientConfig, HubError, HubStatus, InvalidateHook, NotificationHub};
use folio_core::{ChannelStatus, ListenerId, Notification, PayloadKind, UserId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    SimEnv, SimStore, SimTransport,
    invariants::{HubSnapshot, InvariantRegistry, Violation},
};

/// Chaos scenario parameters.
#[derive(Debug, Clone)]
pub struct ChaosScenario {
    /// Seed for both the environment and the operation stream.
    pub seed: u64,
    /// Operations to run.
    pub steps: usize,
    /// Distinct users to subscribe.
    pub users: u8,
    /// Client configuration under test.
    pub config: ClientConfig,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    /// Steps executed.
    pub steps: usize,
    /// Channels the transport opened.
    pub channels_opened: usize,
    /// Channel failures injected.
    pub failures_injected: usize,
    /// Subscribe calls the supervisor refused.
    pub refusals: usize,
    /// Explicit teardowns.
    pub teardowns: usize,
    /// Store cache invalidations caused by payload events.
    pub invalidations: usize,
    /// Invariant violations with the step they were found at.
    pub violations: Vec<(usize, Violation)>,
    /// Hub status after the last step.
    pub final_status: Option<HubStatus>,
}

impl ScenarioReport {
    /// Whether every invariant held throughout.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

impl ChaosScenario {
    /// Scenario with default sizing.
    pub fn new(seed: u64) -> Self {
        Self { seed, steps: 200, users: 3, config: ClientConfig::default() }
    }

    /// Run the scenario on the current runtime.
    ///
    /// Requires a paused (or turmoil-driven) tokio clock; timer jumps would
    /// otherwise take real time.
    ///
    /// # Errors
    ///
    /// [`HubError::Closed`] if the hub stops mid-run.
    pub async fn run(&self) -> Result<ScenarioReport, HubError> {
        let env = SimEnv::with_seed(self.seed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.rotate_left(17));
        let transport = SimTransport::new();
        let store = SimStore::new();
        let hub = NotificationHub::spawn(
            env,
            Arc::new(transport.clone()),
            Arc::new(store.clone()),
            &self.config,
        );

        let invariants = InvariantRegistry::standard();
        let hook: InvalidateHook = Arc::new(|_: &UserId| true);
        let mut listeners: Vec<ListenerId> = Vec::new();
        let mut report = ScenarioReport::default();

        for step in 0..self.steps {
            match rng.gen_range(0..10) {
                0 | 1 => {
                    let user = UserId::new(format!("u{}", rng.gen_range(0..self.users.max(1))));
                    if listeners.is_empty() {
                        listeners.push(hub.add_listener(Arc::new(|_: &[Notification]| {})).await?);
                    }
                    let listener = listeners[rng.gen_range(0..listeners.len())];
                    match hub.ensure_subscription(user, listener, Arc::clone(&hook)).await {
                        Ok(()) => {},
                        Err(HubError::Refused(_)) => report.refusals += 1,
                        Err(error) => return Err(error),
                    }
                },
                2 | 3 => {
                    if let Some(channel) = transport.current() {
                        let status = match rng.gen_range(0..3) {
                            0 => ChannelStatus::ChannelError,
                            1 => ChannelStatus::Closed,
                            _ => ChannelStatus::TimedOut,
                        };
                        transport.emit_status(channel, status);
                        report.failures_injected += 1;
                    }
                },
                4 => {
                    if let Some(channel) = transport.current() {
                        transport.emit_payload(channel, PayloadKind::Insert);
                    }
                },
                5 | 6 => {
                    let id = hub.add_listener(Arc::new(|_: &[Notification]| {})).await?;
                    listeners.push(id);
                },
                7 => {
                    if !listeners.is_empty() {
                        let id = listeners.swap_remove(rng.gen_range(0..listeners.len()));
                        if rng.gen_bool(0.5) {
                            hub.remove_listener(id)?;
                        } else {
                            // Sign-out: still mounted, no longer subscribed
                            hub.unsubscribe(id)?;
                            listeners.push(id);
                        }
                    }
                },
                8 => {
                    tokio::time::sleep(Duration::from_secs(rng.gen_range(1..10))).await;
                },
                _ => {
                    if rng.gen_bool(0.2) {
                        hub.teardown()?;
                        report.teardowns += 1;
                    } else {
                        transport.refuse_next_opens(1);
                    }
                },
            }

            let snapshot = HubSnapshot::capture(&hub, &transport, &self.config.supervisor).await?;
            if let Err(violations) = invariants.check_all(&snapshot) {
                tracing::error!(step, count = violations.len(), "invariant violated");
                report.violations.extend(violations.into_iter().map(|v| (step, v)));
            }
            report.steps = step + 1;
        }

        report.channels_opened = transport.opened_total();
        report.invalidations = store.invalidations().len();
        report.final_status = Some(hub.status().await?);
        hub.shutdown()?;

        tracing::info!(
            seed = self.seed,
            steps = report.steps,
            opened = report.channels_opened,
            failures = report.failures_injected,
            refusals = report.refusals,
            violations = report.violations.len(),
            "scenario finished"
        );
        Ok(report)
    }
}
