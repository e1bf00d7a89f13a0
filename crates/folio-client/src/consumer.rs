//! Per-UI notification consumer.
//!
//! One consumer per mounted UI instance. It owns a [`RefreshCoordinator`],
//! runs the fetches and session refreshes the coordinator asks for on
//! spawned tasks, and exposes the result as an observable
//! [`NotificationView`].
//!
//! Spawned work reports back through the consumer's own command queue, so a
//! refresh requested while a fetch is outstanding reaches the coordinator's
//! in-flight guard and collapses into the running fetch.

use std::{sync::Arc, time::Duration};

use folio_core::{
    Environment, FetchError, Listener, ListenerId, Notification, NotificationId, RefreshAction,
    RefreshCoordinator, RetryConfig, RetryReason, UserId,
};
use tokio::{
    sync::{mpsc, watch},
    task::{AbortHandle, JoinHandle},
};

use crate::{
    backend::NotificationStore,
    error::HubError,
    hub::{HubHandle, InvalidateHook},
};

/// What a UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationView {
    /// Cached list, newest first.
    pub notifications: Vec<Notification>,
    /// Entries not yet read.
    pub unread_count: usize,
    /// Entries in the list.
    pub total_count: usize,
    /// A user-visible load is in progress.
    pub is_loading: bool,
    /// The last refresh cycle ended in an error.
    pub has_error: bool,
    /// The error behind `has_error`.
    pub last_error: Option<FetchError>,
}

enum ConsumerCommand {
    Refresh { background: bool },
    RetryDue { generation: u64 },
    Fetched { user_id: UserId, result: Result<Vec<Notification>, FetchError> },
    SessionRefreshed { refreshed: bool },
    Listen { notifications: Vec<Notification> },
    ClearError,
    SetUser { user_id: Option<UserId> },
    MarkRead { ids: Option<Vec<NotificationId>> },
    MarkedRead { ids: Vec<NotificationId> },
    Unmount,
}

/// Handle to a mounted consumer.
///
/// Dropping the handle unmounts the consumer in the background;
/// [`Self::unmount`] does the same and waits for it.
pub struct NotificationConsumer {
    tx: mpsc::UnboundedSender<ConsumerCommand>,
    view: watch::Receiver<NotificationView>,
    task: Option<JoinHandle<()>>,
}

impl NotificationConsumer {
    /// Mount a consumer.
    ///
    /// Registers a listener with the hub, subscribes to live updates for an
    /// authenticated `user_id` and starts the first load.
    ///
    /// # Errors
    ///
    /// [`HubError::Closed`] if the hub has stopped. A refused subscription
    /// is not an error: the consumer still loads, without live updates.
    pub async fn mount<E: Environment>(
        hub: HubHandle,
        store: Arc<dyn NotificationStore>,
        env: E,
        config: RetryConfig,
        user_id: Option<UserId>,
    ) -> Result<Self, HubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(NotificationView::default());

        let listener = hub.add_listener(listener(tx.downgrade())).await?;

        let task = ConsumerTask {
            env,
            hub,
            store,
            coordinator: RefreshCoordinator::new(config),
            listener,
            notifications: Vec::new(),
            retry_timer: None,
            retry_generation: 0,
            view: view_tx,
            tx: tx.downgrade(),
        };
        let task = tokio::spawn(task.run(rx, user_id));

        Ok(Self { tx, view, task: Some(task) })
    }

    /// Current view.
    pub fn view(&self) -> NotificationView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.view.clone()
    }

    /// Reload the list, showing the loading state.
    pub fn refresh_notifications(&self) {
        self.send(ConsumerCommand::Refresh { background: false });
    }

    /// Dismiss the current error and reset the retry budget.
    pub fn clear_error(&self) {
        self.send(ConsumerCommand::ClearError);
    }

    /// Switch to another user, or to none on sign-out.
    pub fn set_user(&self, user_id: Option<UserId>) {
        self.send(ConsumerCommand::SetUser { user_id });
    }

    /// Mark the given notifications as read.
    pub fn mark_read(&self, ids: Vec<NotificationId>) {
        self.send(ConsumerCommand::MarkRead { ids: Some(ids) });
    }

    /// Mark every unread notification in the current list as read.
    pub fn mark_all_read(&self) {
        self.send(ConsumerCommand::MarkRead { ids: None });
    }

    /// Cancel the retry timer, remove the listener and stop the task.
    pub async fn unmount(mut self) {
        self.send(ConsumerCommand::Unmount);
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            tracing::warn!(%error, "notification consumer task failed");
        }
    }

    fn send(&self, command: ConsumerCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("notification consumer already stopped");
        }
    }
}

impl Drop for NotificationConsumer {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(ConsumerCommand::Unmount);
        }
    }
}

fn listener(tx: mpsc::WeakUnboundedSender<ConsumerCommand>) -> Listener {
    Arc::new(move |notifications: &[Notification]| {
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(ConsumerCommand::Listen { notifications: notifications.to_vec() });
        }
    })
}

struct ConsumerTask<E: Environment> {
    env: E,
    hub: HubHandle,
    store: Arc<dyn NotificationStore>,
    coordinator: RefreshCoordinator,
    listener: ListenerId,
    notifications: Vec<Notification>,
    retry_timer: Option<AbortHandle>,
    retry_generation: u64,
    view: watch::Sender<NotificationView>,
    tx: mpsc::WeakUnboundedSender<ConsumerCommand>,
}

impl<E: Environment> ConsumerTask<E> {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ConsumerCommand>,
        user_id: Option<UserId>,
    ) {
        self.switch_user(user_id).await;
        self.publish_view();

        while let Some(command) = rx.recv().await {
            match command {
                ConsumerCommand::Refresh { background } => {
                    let actions = self.coordinator.refresh(background);
                    self.execute(actions);
                },
                ConsumerCommand::RetryDue { generation } => {
                    if generation == self.retry_generation && self.retry_timer.take().is_some() {
                        let actions = self.coordinator.retry_due();
                        self.execute(actions);
                    }
                },
                ConsumerCommand::Fetched { user_id, result } => {
                    let actions = match result {
                        Ok(list) => self.coordinator.fetch_succeeded(&user_id, list),
                        Err(error) => self.coordinator.fetch_failed(&user_id, error),
                    };
                    self.execute(actions);
                },
                ConsumerCommand::SessionRefreshed { refreshed } => {
                    let actions = self.coordinator.session_refreshed(refreshed);
                    self.execute(actions);
                },
                ConsumerCommand::Listen { notifications } => self.notifications = notifications,
                ConsumerCommand::ClearError => self.coordinator.clear_error(),
                ConsumerCommand::SetUser { user_id } => self.switch_user(user_id).await,
                ConsumerCommand::MarkRead { ids } => self.mark_read(ids),
                ConsumerCommand::MarkedRead { ids } => self.apply_read(&ids),
                ConsumerCommand::Unmount => break,
            }
            self.publish_view();
        }

        self.cancel_retry();
        if self.hub.remove_listener(self.listener).is_err() {
            tracing::debug!("hub closed before consumer unmount");
        }
    }

    async fn switch_user(&mut self, user_id: Option<UserId>) {
        let signed_in = self.coordinator.user_id().is_some();
        let actions = self.coordinator.set_user(user_id.clone());
        self.execute(actions);

        match user_id {
            Some(user_id) => {
                let hook = self.invalidate_hook();
                if let Err(error) =
                    self.hub.ensure_subscription(user_id.clone(), self.listener, hook).await
                {
                    tracing::warn!(user = %user_id, %error, "live notification updates unavailable");
                }
            },
            None if signed_in => {
                if self.hub.unsubscribe(self.listener).is_err() {
                    tracing::debug!("hub closed before sign-out");
                }
            },
            None => {},
        }

        let actions = self.coordinator.refresh(false);
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<RefreshAction>) {
        for action in actions {
            match action {
                RefreshAction::Fetch { user_id } => self.spawn_fetch(user_id),
                RefreshAction::RefreshSession => self.spawn_session_refresh(),
                RefreshAction::ScheduleRetry { delay, reason } => self.schedule_retry(delay, reason),
                RefreshAction::CancelRetry => self.cancel_retry(),
                RefreshAction::Publish(list) => {
                    if let Err(error) = self.hub.update_notifications(list) {
                        tracing::warn!(%error, "failed to publish notifications");
                    }
                },
                RefreshAction::ClearNotifications => self.notifications.clear(),
            }
        }
    }

    fn spawn_fetch(&self, user_id: UserId) {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = store.fetch_notifications(&user_id).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(ConsumerCommand::Fetched { user_id, result });
            }
        });
    }

    fn spawn_session_refresh(&self) {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let refreshed = match store.refresh_session().await {
                Ok(session) => session.is_some(),
                Err(error) => {
                    tracing::warn!(%error, "session refresh failed");
                    false
                },
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(ConsumerCommand::SessionRefreshed { refreshed });
            }
        });
    }

    fn schedule_retry(&mut self, delay: Duration, reason: RetryReason) {
        self.cancel_retry();
        self.retry_generation += 1;

        let env = self.env.clone();
        let tx = self.tx.clone();
        let generation = self.retry_generation;

        let timer = tokio::spawn(async move {
            env.sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(ConsumerCommand::RetryDue { generation });
            }
        });

        tracing::debug!(?delay, ?reason, "fetch retry armed");
        self.retry_timer = Some(timer.abort_handle());
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn mark_read(&self, ids: Option<Vec<NotificationId>>) {
        let Some(user_id) = self.coordinator.user_id().cloned() else {
            tracing::debug!("mark read without a user");
            return;
        };

        let ids = ids.unwrap_or_else(|| {
            self.notifications.iter().filter(|n| !n.read).map(|n| n.id.clone()).collect()
        });
        if ids.is_empty() {
            return;
        }

        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            match store.mark_read(&user_id, &ids).await {
                Ok(()) => {
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(ConsumerCommand::MarkedRead { ids });
                    }
                },
                Err(error) => {
                    tracing::warn!(user = %user_id, %error, count = ids.len(), "failed to mark notifications read");
                },
            }
        });
    }

    /// Republish the cached list with read flags applied.
    ///
    /// A refetch would not do: the id set is unchanged, so the coordinator
    /// would suppress the publish.
    fn apply_read(&mut self, ids: &[NotificationId]) {
        let mut changed = false;
        let updated: Vec<Notification> = self
            .notifications
            .iter()
            .map(|n| {
                if !n.read && ids.contains(&n.id) {
                    changed = true;
                    n.clone().with_read(true)
                } else {
                    n.clone()
                }
            })
            .collect();

        if changed && let Err(error) = self.hub.update_notifications(updated) {
            tracing::warn!(%error, "failed to publish read state");
        }
    }

    fn invalidate_hook(&self) -> InvalidateHook {
        let tx = self.tx.clone();
        Arc::new(move |_: &UserId| {
            tx.upgrade()
                .is_some_and(|tx| tx.send(ConsumerCommand::Refresh { background: true }).is_ok())
        })
    }

    fn publish_view(&self) {
        let next = NotificationView {
            notifications: self.notifications.clone(),
            unread_count: self.notifications.iter().filter(|n| !n.read).count(),
            total_count: self.notifications.len(),
            is_loading: self.coordinator.is_loading(),
            has_error: self.coordinator.has_error(),
            last_error: self.coordinator.last_error().cloned(),
        };

        self.view.send_if_modified(|view| {
            if *view == next {
                return false;
            }
            *view = next;
            true
        });
    }
}
