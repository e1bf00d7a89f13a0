//! Refresh/retry coordinator state machine.
//!
//! One coordinator per UI consumer. Wraps the notification fetch with an
//! in-flight guard, deduplication, change detection, progressive retry on
//! transient failures and a one-shot session refresh on authorization
//! failures. Like the supervisor it performs no I/O: it returns
//! [`RefreshAction`]s and is told about their outcomes.
//!
//! # Retry policy
//!
//! | failure kind              | reaction                                          |
//! |---------------------------|---------------------------------------------------|
//! | `Network`, `Timeout`      | retry after 5s, 15s, 30s, 30s... up to 3 times     |
//! | `Unauthorized`            | refresh session once, then retry after 1s         |
//! | `InvalidData`, `Rejected` | surface, no retry                                 |

use std::{collections::HashSet, time::Duration};

use crate::{
    error::{FetchError, FetchErrorKind},
    notification::{Notification, NotificationId, NotificationSet, UserId},
};

/// Transient-failure retries per failure chain.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before transient retry `n`. The last entry repeats.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] =
    [Duration::from_secs(5), Duration::from_secs(15), Duration::from_secs(30)];

/// Delay between a successful session refresh and the retried fetch.
pub const DEFAULT_SESSION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Transient retries before giving up.
    pub max_retries: u32,
    /// Progressive delay table. The last entry sticks.
    pub retry_delays: Vec<Duration>,
    /// Delay before the fetch retried after a session refresh.
    pub session_retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            session_retry_delay: DEFAULT_SESSION_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `previous_retries` earlier retries.
    pub fn retry_delay(&self, previous_retries: u32) -> Duration {
        let index = (previous_retries as usize).min(self.retry_delays.len().saturating_sub(1));
        self.retry_delays.get(index).copied().unwrap_or(Duration::ZERO)
    }
}

/// Why a retry was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Network or timeout failure.
    Transient,
    /// Session was refreshed after an authorization failure.
    SessionRefreshed,
}

/// Actions returned by the coordinator for the driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshAction {
    /// Fetch the list for `user_id`, then report through
    /// [`RefreshCoordinator::fetch_succeeded`] or
    /// [`RefreshCoordinator::fetch_failed`].
    Fetch {
        /// User to fetch for.
        user_id: UserId,
    },

    /// Refresh the auth session, then report through
    /// [`RefreshCoordinator::session_refreshed`].
    RefreshSession,

    /// Call [`RefreshCoordinator::retry_due`] after `delay`, replacing any
    /// pending retry.
    ScheduleRetry {
        /// How long to wait.
        delay: Duration,
        /// Why.
        reason: RetryReason,
    },

    /// Abort the pending retry timer, if any.
    CancelRetry,

    /// The id set changed: push this deduplicated list to listeners.
    Publish(Vec<Notification>),

    /// No user: clear the consumer's local list.
    ClearNotifications,
}

/// Per-consumer refresh coordinator.
#[derive(Debug, Clone, Default)]
pub struct RefreshCoordinator {
    config: RetryConfig,
    user_id: Option<UserId>,
    in_flight: Option<UserId>,
    session_refresh_pending: bool,
    session_retry_used: bool,
    retry_count: u32,
    previous_ids: Option<HashSet<NotificationId>>,
    has_loaded: bool,
    loading: bool,
    last_error: Option<FetchError>,
}

impl RefreshCoordinator {
    /// Create a coordinator with no user.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Current user.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Whether the UI should show a loading state.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether the last refresh cycle ended in an error.
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    /// Last surfaced error.
    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }

    /// Transient retries used in the current failure chain.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether a fetch is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Switch user (`None` on sign-out). Resets all per-user state.
    pub fn set_user(&mut self, user_id: Option<UserId>) -> Vec<RefreshAction> {
        if self.user_id == user_id {
            return Vec::new();
        }

        *self = Self { config: self.config.clone(), user_id, ..Self::default() };

        let mut actions = vec![RefreshAction::CancelRetry];
        if self.user_id.is_none() {
            actions.push(RefreshAction::ClearNotifications);
        }
        actions
    }

    /// Request a refresh.
    ///
    /// `is_retry` suppresses the loading indicator once a first load has
    /// completed. A call while a fetch is outstanding does nothing.
    pub fn refresh(&mut self, is_retry: bool) -> Vec<RefreshAction> {
        let Some(user_id) = self.user_id.clone() else {
            self.previous_ids = None;
            self.loading = false;
            return vec![RefreshAction::ClearNotifications];
        };

        if self.in_flight.is_some() || self.session_refresh_pending {
            tracing::debug!(user = %user_id, "refresh already in flight");
            return Vec::new();
        }

        self.in_flight = Some(user_id.clone());
        if !is_retry || !self.has_loaded {
            self.loading = true;
        }

        vec![RefreshAction::Fetch { user_id }]
    }

    /// A retry timer fired.
    pub fn retry_due(&mut self) -> Vec<RefreshAction> {
        self.refresh(true)
    }

    /// The fetch for `user_id` returned `list`.
    ///
    /// Results for a user that is no longer in flight are dropped.
    pub fn fetch_succeeded(
        &mut self,
        user_id: &UserId,
        list: Vec<Notification>,
    ) -> Vec<RefreshAction> {
        if self.in_flight.as_ref() != Some(user_id) {
            return Vec::new();
        }

        if let Some(bad) = list.iter().position(|n| n.id.as_str().is_empty()) {
            let error = FetchError::new(
                FetchErrorKind::InvalidData,
                format!("invalid response format: entry {bad} has no id"),
            );
            return self.fetch_failed(user_id, error);
        }

        self.in_flight = None;
        self.loading = false;
        self.has_loaded = true;
        self.retry_count = 0;
        self.session_retry_used = false;
        self.last_error = None;

        let set = NotificationSet::from_list(list);
        let ids = set.ids();

        let mut actions = vec![RefreshAction::CancelRetry];
        if self.previous_ids.as_ref() == Some(&ids) {
            tracing::debug!(user = %user_id, count = ids.len(), "notification set unchanged");
        } else {
            self.previous_ids = Some(ids);
            actions.push(RefreshAction::Publish(set.into_vec()));
        }
        actions
    }

    /// The fetch for `user_id` failed.
    pub fn fetch_failed(&mut self, user_id: &UserId, error: FetchError) -> Vec<RefreshAction> {
        if self.in_flight.as_ref() != Some(user_id) {
            return Vec::new();
        }

        self.in_flight = None;
        self.loading = false;
        tracing::warn!(user = %user_id, %error, "notification fetch failed");

        let actions = match error.kind {
            FetchErrorKind::Unauthorized if !self.session_retry_used => {
                self.session_retry_used = true;
                self.session_refresh_pending = true;
                vec![RefreshAction::RefreshSession]
            },
            FetchErrorKind::Unauthorized => {
                tracing::warn!(user = %user_id, "authorization still failing after session refresh");
                Vec::new()
            },
            FetchErrorKind::Network | FetchErrorKind::Timeout
                if self.retry_count < self.config.max_retries =>
            {
                let delay = self.config.retry_delay(self.retry_count);
                self.retry_count += 1;
                tracing::info!(user = %user_id, retry = self.retry_count, ?delay, "scheduling fetch retry");
                vec![RefreshAction::ScheduleRetry { delay, reason: RetryReason::Transient }]
            },
            FetchErrorKind::Network | FetchErrorKind::Timeout => {
                tracing::error!(user = %user_id, retries = self.retry_count, "fetch retries exhausted");
                Vec::new()
            },
            FetchErrorKind::InvalidData | FetchErrorKind::Rejected => Vec::new(),
        };

        self.last_error = Some(error);
        actions
    }

    /// The session refresh requested by [`RefreshAction::RefreshSession`]
    /// finished. `refreshed` is `false` if no session could be obtained.
    pub fn session_refreshed(&mut self, refreshed: bool) -> Vec<RefreshAction> {
        if !self.session_refresh_pending {
            return Vec::new();
        }
        self.session_refresh_pending = false;

        if refreshed && self.user_id.is_some() {
            vec![RefreshAction::ScheduleRetry {
                delay: self.config.session_retry_delay,
                reason: RetryReason::SessionRefreshed,
            }]
        } else {
            tracing::warn!("session refresh failed, not retrying");
            Vec::new()
        }
    }

    /// Reset the error state and retry counter without fetching.
    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.retry_count = 0;
        self.session_retry_used = false;
    }
}
