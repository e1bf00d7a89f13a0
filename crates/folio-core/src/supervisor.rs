//! Subscription supervisor state machine.
//!
//! Keeps at most one live channel per process, tracks its lifecycle and
//! drives bounded reconnection behind a circuit breaker. Uses the action
//! pattern: methods take events as input and return [`SupervisorAction`]s for
//! the driver to execute. The supervisor never performs I/O and never holds a
//! timer; reconnect delays leave as data and come back as
//! [`Supervisor::reconnect_due`] calls carrying their [`ReconnectToken`].
//!
//! # State Machine
//!
//! ```text
//!                ensure_subscription
//! ┌──────────────┐   (OpenChannel)    ┌────────────┐  Subscribed   ┌───────────┐
//! │ Disconnected │───────────────────>│ Connecting │──────────────>│ Connected │
//! └──────────────┘                    └────────────┘               └───────────┘
//!        ^                                  │  ^                         │
//!        │ teardown                         │  │ reconnect_due           │ ChannelError
//!        │                                  │  │ (OpenChannel)           │ Closed
//!        │                                  ↓  │                         │ TimedOut
//!        │                               ┌───────┐                       │
//!        └───────────────────────────────│ Error │<──────────────────────┘
//!                                        └───────┘
//! ```
//!
//! A failure moves the channel handle out of state before `CloseChannel` is
//! emitted, so no later event can act on a channel that is being destroyed.

use std::time::Duration;

use crate::{
    channel::{ChannelEvent, ChannelEventKind, ChannelId, ChannelSpec, ChannelStatus},
    env::Environment,
    error::SupervisorError,
    notification::UserId,
};

/// Reconnect attempts allowed per subscription cycle.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 2;

/// Delay unit for reconnects. Attempt `n` waits `n` units.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on a single reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(15);

/// Table streamed by the notification channel.
pub const NOTIFICATIONS_TABLE: &str = "notifications";

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Reconnect attempts before giving up on the current user.
    pub max_reconnect_attempts: u32,
    /// Delay unit for reconnects.
    pub reconnect_base_delay: Duration,
    /// Cap on a single reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Table whose row changes are streamed.
    pub table: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            table: NOTIFICATIONS_TABLE.to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * attempt, max)`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay.saturating_mul(attempt).min(self.reconnect_max_delay)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel and nothing in progress.
    Disconnected,
    /// Channel opened, waiting for `Subscribed`.
    Connecting,
    /// Channel subscribed.
    Connected,
    /// Last channel failed. A reconnect may be pending.
    Error,
}

/// Identifies one scheduled reconnect.
///
/// Only the token of the currently pending reconnect is honoured. Cancelled
/// or superseded timers that still fire are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReconnectToken(pub u64);

/// Actions returned by the supervisor for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Open a channel and route its events back to the supervisor.
    OpenChannel {
        /// Id the transport must tag events with.
        channel: ChannelId,
        /// What to subscribe to.
        spec: ChannelSpec,
    },

    /// Close a channel. Errors from the close itself are swallowed.
    CloseChannel {
        /// Channel to close.
        channel: ChannelId,
    },

    /// Call [`Supervisor::reconnect_due`] with `token` after `delay`.
    ScheduleReconnect {
        /// User the reconnect is for.
        user_id: UserId,
        /// 1-based attempt number in this cycle.
        attempt: u32,
        /// How long to wait.
        delay: Duration,
        /// Token to hand back.
        token: ReconnectToken,
    },

    /// Abort the timer scheduled with `token`.
    CancelReconnect {
        /// Token of the timer to abort.
        token: ReconnectToken,
    },

    /// Rows changed: invalidate caches for the user and trigger a refresh.
    Invalidate {
        /// User whose notifications changed.
        user_id: UserId,
    },
}

/// Subscription supervisor.
///
/// One instance per process, owned by a single driver task. The circuit
/// breaker latches on [`Supervisor::teardown`]; a latched instance refuses
/// everything and must be replaced.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: SupervisorConfig,
    state: ConnectionState,
    user_id: Option<UserId>,
    channel: Option<ChannelId>,
    next_channel: u64,
    reconnect_attempts: u32,
    pending_reconnect: Option<(ReconnectToken, UserId)>,
    next_token: u64,
    circuit_open: bool,
}

impl Supervisor {
    /// Create a supervisor in [`ConnectionState::Disconnected`].
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            user_id: None,
            channel: None,
            next_channel: 1,
            reconnect_attempts: 0,
            pending_reconnect: None,
            next_token: 1,
            circuit_open: false,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// User the supervisor is subscribed (or subscribing) for.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Channel currently owned, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    /// Reconnect attempts made in the current cycle.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Whether the breaker has latched.
    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open
    }

    /// Whether a reconnect timer is outstanding.
    pub fn has_pending_reconnect(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    /// Configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Guarantee a live or in-progress subscription for `user_id`.
    ///
    /// Idempotent for the current user. A different user swaps the
    /// subscription: the old channel is closed and its reconnect cycle
    /// discarded before the new channel opens.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::CircuitOpen` after teardown
    /// - `SupervisorError::ReconnectExhausted` if the current user's
    ///   reconnect budget is used up
    pub fn ensure_subscription<E: Environment>(
        &mut self,
        user_id: &UserId,
        env: &E,
    ) -> Result<Vec<SupervisorAction>, SupervisorError> {
        if self.circuit_open {
            return Err(SupervisorError::CircuitOpen);
        }

        match self.user_id.as_ref() {
            Some(current) if current == user_id => {
                if self.channel.is_some() || self.pending_reconnect.is_some() {
                    return Ok(Vec::new());
                }
                if self.reconnect_attempts >= self.config.max_reconnect_attempts {
                    return Err(SupervisorError::ReconnectExhausted {
                        attempts: self.reconnect_attempts,
                    });
                }
                Ok(self.open(user_id.clone(), env))
            },
            Some(current) => {
                tracing::info!(from = %current, to = %user_id, "switching notification subscription");
                let mut actions = self.release();
                actions.extend(self.open(user_id.clone(), env));
                Ok(actions)
            },
            None => Ok(self.open(user_id.clone(), env)),
        }
    }

    /// Process a transport event.
    ///
    /// Events for channels other than the current one are ignored.
    pub fn handle_event(&mut self, event: &ChannelEvent) -> Vec<SupervisorAction> {
        if self.channel != Some(event.channel) {
            tracing::debug!(channel = %event.channel, "ignoring event for stale channel");
            return Vec::new();
        }

        match event.kind {
            ChannelEventKind::Status(ChannelStatus::Subscribed) => {
                tracing::info!(channel = %event.channel, "notification channel subscribed");
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                Vec::new()
            },
            ChannelEventKind::Status(status) => {
                tracing::warn!(channel = %event.channel, ?status, "notification channel failed");
                self.fail()
            },
            ChannelEventKind::Payload(kind) => {
                tracing::debug!(channel = %event.channel, ?kind, "notification rows changed");
                self.user_id
                    .clone()
                    .map(|user_id| vec![SupervisorAction::Invalidate { user_id }])
                    .unwrap_or_default()
            },
        }
    }

    /// The driver failed to open `channel`. Handled like a channel error.
    pub fn channel_open_failed(&mut self, channel: ChannelId, reason: &str) -> Vec<SupervisorAction> {
        if self.channel != Some(channel) {
            return Vec::new();
        }
        tracing::warn!(%channel, reason, "failed to open notification channel");
        self.fail()
    }

    /// A reconnect timer fired.
    ///
    /// Acts only if `token` is the pending reconnect, its user is still
    /// current and the breaker is clear. Anything else is silently dropped.
    pub fn reconnect_due<E: Environment>(
        &mut self,
        token: ReconnectToken,
        env: &E,
    ) -> Vec<SupervisorAction> {
        let Some((pending, user_id)) = self.pending_reconnect.take() else {
            return Vec::new();
        };
        if pending != token {
            self.pending_reconnect = Some((pending, user_id));
            return Vec::new();
        }
        if self.circuit_open || self.user_id.as_ref() != Some(&user_id) || self.channel.is_some() {
            return Vec::new();
        }

        tracing::info!(user = %user_id, attempt = self.reconnect_attempts, "reconnecting");
        self.open(user_id, env)
    }

    /// Latch the circuit breaker and release everything.
    ///
    /// Cancels a pending reconnect, closes the channel if present and resets
    /// counters. Every later call on this instance is refused.
    pub fn teardown(&mut self) -> Vec<SupervisorAction> {
        self.circuit_open = true;
        let actions = self.release();
        self.user_id = None;
        tracing::info!("notification supervisor torn down");
        actions
    }

    /// Drop the subscription without latching the breaker.
    ///
    /// Used on sign-out. The reconnect cycle is discarded, so the next
    /// [`Self::ensure_subscription`] starts fresh.
    pub fn unsubscribe(&mut self) -> Vec<SupervisorAction> {
        let Some(user_id) = self.user_id.take() else {
            return Vec::new();
        };
        tracing::info!(user = %user_id, "notification subscription released");
        self.release()
    }

    fn open<E: Environment>(&mut self, user_id: UserId, env: &E) -> Vec<SupervisorAction> {
        let channel = ChannelId(self.next_channel);
        self.next_channel += 1;

        let spec = ChannelSpec {
            name: format!("notifications:{user_id}:{:016x}", env.random_u64()),
            table: self.config.table.clone(),
            user_id: user_id.clone(),
        };

        tracing::debug!(%channel, name = %spec.name, "opening notification channel");
        self.user_id = Some(user_id);
        self.channel = Some(channel);
        self.state = ConnectionState::Connecting;

        vec![SupervisorAction::OpenChannel { channel, spec }]
    }

    /// Cancel the pending reconnect, close the channel and reset counters.
    fn release(&mut self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();

        if let Some((token, _)) = self.pending_reconnect.take() {
            actions.push(SupervisorAction::CancelReconnect { token });
        }
        if let Some(channel) = self.channel.take() {
            actions.push(SupervisorAction::CloseChannel { channel });
        }

        self.state = ConnectionState::Disconnected;
        self.reconnect_attempts = 0;
        actions
    }

    fn fail(&mut self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if let Some(channel) = self.channel.take() {
            actions.push(SupervisorAction::CloseChannel { channel });
        }
        self.state = ConnectionState::Error;

        if let Some(reconnect) = self.schedule_reconnect() {
            actions.push(reconnect);
        }
        actions
    }

    fn schedule_reconnect(&mut self) -> Option<SupervisorAction> {
        if self.circuit_open || self.pending_reconnect.is_some() {
            return None;
        }
        let user_id = self.user_id.clone()?;

        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            tracing::error!(
                user = %user_id,
                attempts = self.reconnect_attempts,
                "reconnect budget exhausted, real-time notifications disabled"
            );
            return None;
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let delay = self.config.reconnect_delay(attempt);
        let token = ReconnectToken(self.next_token);
        self.next_token += 1;
        self.pending_reconnect = Some((token, user_id.clone()));

        tracing::info!(user = %user_id, attempt, ?delay, "scheduling reconnect");
        Some(SupervisorAction::ScheduleReconnect { user_id, attempt, delay, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PayloadKind;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = std::time::Instant;

        fn now(&self) -> std::time::Instant {
            std::time::Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic for tests
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = i as u8;
            }
        }
    }

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    fn opened(actions: &[SupervisorAction]) -> ChannelId {
        actions
            .iter()
            .find_map(|a| match a {
                SupervisorAction::OpenChannel { channel, .. } => Some(*channel),
                _ => None,
            })
            .expect("expected OpenChannel action")
    }

    fn scheduled(actions: &[SupervisorAction]) -> (ReconnectToken, u32, Duration) {
        actions
            .iter()
            .find_map(|a| match a {
                SupervisorAction::ScheduleReconnect { token, attempt, delay, .. } => {
                    Some((*token, *attempt, *delay))
                },
                _ => None,
            })
            .expect("expected ScheduleReconnect action")
    }

    #[test]
    fn subscribe_lifecycle() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        let actions = sup.ensure_subscription(&user("u1"), &env).unwrap();
        assert_eq!(actions.len(), 1);
        let channel = opened(&actions);
        assert_eq!(sup.state(), ConnectionState::Connecting);

        match &actions[0] {
            SupervisorAction::OpenChannel { spec, .. } => {
                assert!(spec.name.starts_with("notifications:u1:"));
                assert_eq!(spec.table, "notifications");
                assert_eq!(spec.filter(), "user_id=eq.u1");
            },
            other => panic!("unexpected action {other:?}"),
        }

        let actions = sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Subscribed));
        assert!(actions.is_empty());
        assert_eq!(sup.state(), ConnectionState::Connected);
    }

    #[test]
    fn ensure_is_idempotent_for_same_user() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        sup.ensure_subscription(&user("u1"), &env).unwrap();
        assert!(sup.ensure_subscription(&user("u1"), &env).unwrap().is_empty());
        assert_eq!(sup.channel(), Some(ChannelId(1)));
    }

    #[test]
    fn switching_user_closes_old_channel_first() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        sup.ensure_subscription(&user("u1"), &env).unwrap();
        let actions = sup.ensure_subscription(&user("u2"), &env).unwrap();

        assert_eq!(actions[0], SupervisorAction::CloseChannel { channel: ChannelId(1) });
        assert_eq!(opened(&actions), ChannelId(2));
        assert_eq!(sup.user_id(), Some(&user("u2")));
        assert_eq!(sup.channel(), Some(ChannelId(2)));
    }

    #[test]
    fn channel_error_schedules_bounded_reconnects() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let mut channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());

        // First failure: 3s
        let actions = sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::ChannelError));
        assert_eq!(actions[0], SupervisorAction::CloseChannel { channel });
        let (token, attempt, delay) = scheduled(&actions);
        assert_eq!((attempt, delay), (1, Duration::from_secs(3)));
        assert_eq!(sup.state(), ConnectionState::Error);
        assert_eq!(sup.channel(), None);

        channel = opened(&sup.reconnect_due(token, &env));

        // Second failure: 6s
        let actions = sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::TimedOut));
        let (token, attempt, delay) = scheduled(&actions);
        assert_eq!((attempt, delay), (2, Duration::from_secs(6)));

        channel = opened(&sup.reconnect_due(token, &env));

        // Third failure: budget exhausted
        let actions = sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Closed));
        assert_eq!(actions, vec![SupervisorAction::CloseChannel { channel }]);
        assert_eq!(sup.state(), ConnectionState::Error);
        assert!(!sup.has_pending_reconnect());

        assert_eq!(
            sup.ensure_subscription(&user("u1"), &env),
            Err(SupervisorError::ReconnectExhausted { attempts: 2 })
        );
    }

    #[test]
    fn subscribed_resets_reconnect_counter() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        let (token, ..) =
            scheduled(&sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Closed)));
        assert_eq!(sup.reconnect_attempts(), 1);

        let channel = opened(&sup.reconnect_due(token, &env));
        sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Subscribed));
        assert_eq!(sup.reconnect_attempts(), 0);
        assert_eq!(sup.state(), ConnectionState::Connected);
    }

    #[test]
    fn reconnect_delay_is_capped() {
        let config = SupervisorConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(3));
        assert_eq!(config.reconnect_delay(4), Duration::from_secs(12));
        assert_eq!(config.reconnect_delay(5), Duration::from_secs(15));
        assert_eq!(config.reconnect_delay(50), Duration::from_secs(15));
    }

    #[test]
    fn open_failure_is_treated_as_channel_error() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        let actions = sup.channel_open_failed(channel, "socket refused");

        assert_eq!(actions[0], SupervisorAction::CloseChannel { channel });
        assert_eq!(scheduled(&actions).1, 1);
        assert_eq!(sup.state(), ConnectionState::Error);
    }

    #[test]
    fn payload_event_invalidates_current_user() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        let actions = sup.handle_event(&ChannelEvent::payload(channel, PayloadKind::Insert));

        assert_eq!(actions, vec![SupervisorAction::Invalidate { user_id: user("u1") }]);
    }

    #[test]
    fn stale_channel_events_are_ignored() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let old = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        sup.ensure_subscription(&user("u2"), &env).unwrap();

        assert!(sup.handle_event(&ChannelEvent::status(old, ChannelStatus::Closed)).is_empty());
        assert!(sup.handle_event(&ChannelEvent::payload(old, PayloadKind::Update)).is_empty());
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn teardown_cancels_pending_reconnect() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        let (token, ..) =
            scheduled(&sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Closed)));

        let actions = sup.teardown();
        assert_eq!(actions, vec![SupervisorAction::CancelReconnect { token }]);
        assert!(sup.is_circuit_open());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.reconnect_attempts(), 0);

        // Timer fires anyway
        assert!(sup.reconnect_due(token, &env).is_empty());
        assert_eq!(
            sup.ensure_subscription(&user("u1"), &env),
            Err(SupervisorError::CircuitOpen)
        );
    }

    #[test]
    fn teardown_closes_live_channel() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        assert_eq!(sup.teardown(), vec![SupervisorAction::CloseChannel { channel }]);
        assert_eq!(sup.channel(), None);
    }

    #[test]
    fn user_switch_drops_scheduled_reconnect() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        let (token, ..) =
            scheduled(&sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Closed)));

        let actions = sup.ensure_subscription(&user("u2"), &env).unwrap();
        assert_eq!(actions[0], SupervisorAction::CancelReconnect { token });
        assert!(sup.reconnect_due(token, &env).is_empty());
        assert_eq!(sup.channel(), Some(ChannelId(2)));
    }

    #[test]
    fn ensure_during_pending_reconnect_is_noop() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::ChannelError));

        assert!(sup.ensure_subscription(&user("u1"), &env).unwrap().is_empty());
        assert_eq!(sup.channel(), None);
    }

    #[test]
    fn unsubscribe_releases_without_latching() {
        let env = TestEnv;
        let mut sup = Supervisor::new(SupervisorConfig::default());

        let channel = opened(&sup.ensure_subscription(&user("u1"), &env).unwrap());
        let (token, ..) =
            scheduled(&sup.handle_event(&ChannelEvent::status(channel, ChannelStatus::Closed)));

        assert_eq!(sup.unsubscribe(), vec![SupervisorAction::CancelReconnect { token }]);
        assert_eq!(sup.user_id(), None);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(!sup.is_circuit_open());
        assert!(sup.reconnect_due(token, &env).is_empty());
        assert!(sup.unsubscribe().is_empty());

        let actions = sup.ensure_subscription(&user("u1"), &env).unwrap();
        assert_eq!(opened(&actions), ChannelId(2));
    }
}
