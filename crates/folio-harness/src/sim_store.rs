//! In-memory notification store with scripted failures.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use folio_client::{NotificationStore, Session};
use folio_core::{FetchError, Notification, NotificationId, UserId};

struct StoreState {
    rows: HashMap<UserId, Vec<Notification>>,
    fetch_failures: VecDeque<FetchError>,
    mark_failures: VecDeque<FetchError>,
    fetch_latency: Duration,
    session: Option<Session>,
    fetches: Vec<UserId>,
    invalidations: Vec<UserId>,
    session_refreshes: usize,
    marked: Vec<NotificationId>,
}

/// Simulated notification backend.
///
/// Clones share state. Fetches return the rows stored for the user unless a
/// scripted failure is queued.
#[derive(Clone)]
pub struct SimStore {
    state: Arc<Mutex<StoreState>>,
}

impl SimStore {
    /// Empty store with an available session.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                rows: HashMap::new(),
                fetch_failures: VecDeque::new(),
                mark_failures: VecDeque::new(),
                fetch_latency: Duration::ZERO,
                session: Some(Session { user_id: UserId::new("sim-user"), expires_at: None }),
                fetches: Vec::new(),
                invalidations: Vec::new(),
                session_refreshes: 0,
                marked: Vec::new(),
            })),
        }
    }

    /// Replace the rows for `user_id` (newest first).
    pub fn set_notifications(&self, user_id: &UserId, rows: Vec<Notification>) {
        self.state().rows.insert(user_id.clone(), rows);
    }

    /// Insert a row at the head of `user_id`'s list.
    pub fn push_notification(&self, user_id: &UserId, row: Notification) {
        self.state().rows.entry(user_id.clone()).or_default().insert(0, row);
    }

    /// Fail the next fetches with `errors`, in order.
    pub fn fail_next_fetches(&self, errors: impl IntoIterator<Item = FetchError>) {
        self.state().fetch_failures.extend(errors);
    }

    /// Fail the next `mark_read` calls with `errors`, in order.
    pub fn fail_next_marks(&self, errors: impl IntoIterator<Item = FetchError>) {
        self.state().mark_failures.extend(errors);
    }

    /// Delay every fetch by `latency` of virtual time.
    pub fn set_fetch_latency(&self, latency: Duration) {
        self.state().fetch_latency = latency;
    }

    /// Session returned by `refresh_session`; `None` simulates a signed-out
    /// backend.
    pub fn set_session(&self, session: Option<Session>) {
        self.state().session = session;
    }

    /// Fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.state().fetches.len()
    }

    /// Fetches started for `user_id`.
    pub fn fetch_count_for(&self, user_id: &UserId) -> usize {
        self.state().fetches.iter().filter(|u| *u == user_id).count()
    }

    /// Users whose cache was invalidated, in order.
    pub fn invalidations(&self) -> Vec<UserId> {
        self.state().invalidations.clone()
    }

    /// Session refreshes so far.
    pub fn session_refreshes(&self) -> usize {
        self.state().session_refreshes
    }

    /// Ids marked read so far.
    pub fn marked_read(&self) -> Vec<NotificationId> {
        self.state().marked.clone()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for SimStore {
    async fn fetch_notifications(&self, user_id: &UserId) -> Result<Vec<Notification>, FetchError> {
        let (failure, latency) = {
            let mut state = self.state();
            state.fetches.push(user_id.clone());
            (state.fetch_failures.pop_front(), state.fetch_latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(self.state().rows.get(user_id).cloned().unwrap_or_default()),
        }
    }

    async fn invalidate_cache(&self, user_id: &UserId) {
        self.state().invalidations.push(user_id.clone());
    }

    async fn refresh_session(&self) -> Result<Option<Session>, FetchError> {
        let mut state = self.state();
        state.session_refreshes += 1;
        Ok(state.session.clone())
    }

    async fn mark_read(&self, user_id: &UserId, ids: &[NotificationId]) -> Result<(), FetchError> {
        let mut state = self.state();
        if let Some(error) = state.mark_failures.pop_front() {
            return Err(error);
        }

        if let Some(rows) = state.rows.get_mut(user_id) {
            for row in rows.iter_mut().filter(|row| ids.contains(&row.id)) {
                row.read = true;
            }
        }
        state.marked.extend_from_slice(ids);
        Ok(())
    }
}
