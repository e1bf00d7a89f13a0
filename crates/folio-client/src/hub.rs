//! Process-wide notification hub.
//!
//! The hub is a single tokio task owning the [`Supervisor`], the
//! [`ListenerRegistry`] and the [`MemorySteward`]. Everything that touches
//! them arrives as a [`HubCommand`] on one unbounded queue, so transitions
//! are serialized without locks.
//!
//! # Architecture
//!
//! ```text
//! HubHandle ──┐
//! ChannelSink ┼──► mpsc ──► hub task ──► Supervisor ──► actions
//! timers ─────┘                                           │
//!                        ChannelTransport ◄── open/close ──┤
//!                        NotificationStore ◄── invalidate ─┘
//! ```
//!
//! # Generations
//!
//! Removing the last listener retires the supervisor and installs a fresh
//! one. Channel ids restart with every instance, so sinks and reconnect
//! timers carry the generation they were created in and anything from an
//! older generation is dropped on arrival.
//!
//! # Invalidate hooks
//!
//! Every listener that asked for the subscription registers its own hook. A
//! payload event invalidates the store cache once, then runs every hook.
//! The subscription is released when the last hook goes away, whether its
//! listener was removed or its consumer signed out.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use folio_core::{
    ChannelEvent, ChannelId, ConnectionState, Environment, Listener, ListenerId, ListenerRegistry,
    MemorySteward, Notification, NotificationSet, ReconnectToken, Supervisor, SupervisorAction,
    SupervisorConfig, UserId,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};

use crate::{
    backend::{ChannelSink, ChannelTransport, NotificationStore},
    config::ClientConfig,
    error::HubError,
};

/// Called after a payload event invalidated the store cache.
///
/// Returns `false` once the consumer behind it is gone, which unregisters
/// the hook.
pub type InvalidateHook = Arc<dyn Fn(&UserId) -> bool + Send + Sync>;

/// Inbound hub queue entries.
pub(crate) enum HubCommand {
    Ensure {
        user_id: UserId,
        listener: ListenerId,
        hook: InvalidateHook,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unsubscribe {
        listener: ListenerId,
    },
    Teardown,
    AddListener {
        listener: Listener,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveListener {
        id: ListenerId,
    },
    Update {
        notifications: Vec<Notification>,
    },
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    ReconnectDue {
        generation: u64,
        token: ReconnectToken,
    },
    HookGone {
        listener: ListenerId,
    },
    StewardTick,
    Status {
        reply: oneshot::Sender<HubStatus>,
    },
    Shutdown,
}

/// Snapshot of hub state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    /// Supervisor connection state.
    pub state: ConnectionState,
    /// User the subscription is scoped to.
    pub user_id: Option<UserId>,
    /// Live channel.
    pub channel: Option<ChannelId>,
    /// Reconnects spent in the current cycle.
    pub reconnect_attempts: u32,
    /// Breaker latched by an explicit teardown.
    pub circuit_open: bool,
    /// Reconnect timer armed.
    pub reconnect_pending: bool,
    /// Registered listeners.
    pub listener_count: usize,
    /// Listeners holding an invalidate hook.
    pub hook_count: usize,
    /// Size of the cached notification list.
    pub cached: usize,
    /// Supervisor instances retired so far.
    pub generation: u64,
}

/// Hub task state. Constructed and driven only through [`Self::spawn`].
pub struct NotificationHub<E: Environment> {
    env: E,
    transport: Arc<dyn ChannelTransport>,
    store: Arc<dyn NotificationStore>,
    config: SupervisorConfig,
    supervisor: Supervisor,
    generation: u64,
    registry: ListenerRegistry,
    steward: MemorySteward,
    hooks: BTreeMap<ListenerId, InvalidateHook>,
    timers: HashMap<ReconnectToken, AbortHandle>,
    steward_task: Option<AbortHandle>,
    tx: mpsc::WeakUnboundedSender<HubCommand>,
}

impl<E: Environment> NotificationHub<E> {
    /// Spawn the hub task on the current tokio runtime.
    ///
    /// The task runs until [`HubHandle::shutdown`] is called or every
    /// handle and channel sink has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        env: E,
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn NotificationStore>,
        config: &ClientConfig,
    ) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut hub = Self::new(env, transport, store, config, tx.downgrade());
        hub.start_steward();
        tokio::spawn(hub.run(rx));

        HubHandle { tx }
    }

    fn new(
        env: E,
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn NotificationStore>,
        config: &ClientConfig,
        tx: mpsc::WeakUnboundedSender<HubCommand>,
    ) -> Self {
        Self {
            env,
            transport,
            store,
            config: config.supervisor.clone(),
            supervisor: Supervisor::new(config.supervisor.clone()),
            generation: 0,
            registry: ListenerRegistry::new(),
            steward: MemorySteward::new(config.steward.clone()),
            hooks: BTreeMap::new(),
            timers: HashMap::new(),
            steward_task: None,
            tx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        tracing::debug!("notification hub started");

        while let Some(command) = rx.recv().await {
            if !self.handle(command).await {
                break;
            }
        }

        drop(rx);
        self.stop().await;
        tracing::debug!("notification hub stopped");
    }

    /// Returns `false` when the hub should stop.
    async fn handle(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Ensure { user_id, listener, hook, reply } => {
                let result = self.ensure(user_id, listener, hook).await;
                let _ = reply.send(result);
            },
            HubCommand::Unsubscribe { listener } => self.drop_hook(listener).await,
            HubCommand::Teardown => {
                self.hooks.clear();
                let actions = self.supervisor.teardown();
                self.execute(actions).await;
            },
            HubCommand::AddListener { listener, reply } => {
                let id = self.registry.add_listener(listener);
                tracing::debug!(listener = id.0, count = self.registry.listener_count(), "listener added");
                let _ = reply.send(id);
            },
            HubCommand::RemoveListener { id } => {
                if !self.registry.remove_listener(id) {
                    return true;
                }
                if self.registry.is_empty() {
                    self.retire().await;
                } else {
                    self.drop_hook(id).await;
                }
            },
            HubCommand::Update { notifications } => {
                self.registry.update_notifications(notifications);
            },
            HubCommand::Channel { generation, event } => {
                if generation != self.generation {
                    tracing::debug!(channel = %event.channel, generation, "dropping event from retired supervisor");
                    return true;
                }
                let actions = self.supervisor.handle_event(&event);
                self.execute(actions).await;
            },
            HubCommand::ReconnectDue { generation, token } => {
                if generation != self.generation {
                    return true;
                }
                self.timers.remove(&token);
                let actions = self.supervisor.reconnect_due(token, &self.env);
                self.execute(actions).await;
            },
            HubCommand::HookGone { listener } => {
                tracing::debug!(listener = listener.0, "invalidate hook owner gone");
                self.drop_hook(listener).await;
            },
            HubCommand::StewardTick => self.run_steward(),
            HubCommand::Status { reply } => {
                let _ = reply.send(self.status());
            },
            HubCommand::Shutdown => return false,
        }
        true
    }

    async fn ensure(
        &mut self,
        user_id: UserId,
        listener: ListenerId,
        hook: InvalidateHook,
    ) -> Result<(), HubError> {
        let actions = self.supervisor.ensure_subscription(&user_id, &self.env).map_err(|error| {
            tracing::warn!(user = %user_id, %error, "subscription refused");
            HubError::from(error)
        })?;

        self.hooks.insert(listener, hook);
        self.execute(actions).await;
        Ok(())
    }

    /// Unregister `listener`'s hook. The last hook out releases the
    /// subscription.
    async fn drop_hook(&mut self, listener: ListenerId) {
        if self.hooks.remove(&listener).is_none() || !self.hooks.is_empty() {
            return;
        }
        let actions = self.supervisor.unsubscribe();
        self.execute(actions).await;
        self.registry.clear_cache();
    }

    /// Last listener gone: release everything and start over with a fresh
    /// supervisor, so the next mount is not blocked by a latched breaker.
    async fn retire(&mut self) {
        self.hooks.clear();
        let actions = self.supervisor.teardown();
        self.execute(actions).await;

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }

        self.supervisor = Supervisor::new(self.config.clone());
        self.generation += 1;
        self.registry.clear_cache();

        tracing::info!(generation = self.generation, "last listener removed, subscription retired");
    }

    async fn stop(&mut self) {
        if let Some(task) = self.steward_task.take() {
            task.abort();
        }

        let actions = self.supervisor.teardown();
        self.execute(actions).await;

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    /// Execute supervisor actions in order.
    ///
    /// A failed open feeds back into the supervisor, whose follow-up actions
    /// run before anything queued after the open.
    async fn execute(&mut self, actions: Vec<SupervisorAction>) {
        let mut pending: VecDeque<SupervisorAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                SupervisorAction::OpenChannel { channel, spec } => {
                    let Some(tx) = self.tx.upgrade() else {
                        tracing::debug!(%channel, "hub closing, skipping channel open");
                        continue;
                    };
                    let sink = ChannelSink::new(self.generation, tx);

                    if let Err(error) = self.transport.open(channel, spec, sink).await {
                        let follow_up = self.supervisor.channel_open_failed(channel, &error.to_string());
                        for action in follow_up.into_iter().rev() {
                            pending.push_front(action);
                        }
                    }
                },
                SupervisorAction::CloseChannel { channel } => {
                    if let Err(error) = self.transport.close(channel).await {
                        tracing::debug!(%channel, %error, "channel close failed");
                    }
                },
                SupervisorAction::ScheduleReconnect { token, delay, .. } => {
                    self.schedule_reconnect(token, delay);
                },
                SupervisorAction::CancelReconnect { token } => {
                    if let Some(timer) = self.timers.remove(&token) {
                        timer.abort();
                    }
                },
                SupervisorAction::Invalidate { user_id } => self.invalidate(user_id),
            }
        }
    }

    fn schedule_reconnect(&mut self, token: ReconnectToken, delay: Duration) {
        let env = self.env.clone();
        let tx = self.tx.clone();
        let generation = self.generation;

        let timer = tokio::spawn(async move {
            env.sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(HubCommand::ReconnectDue { generation, token });
            }
        });

        self.timers.insert(token, timer.abort_handle());
    }

    fn invalidate(&self, user_id: UserId) {
        let store = Arc::clone(&self.store);
        let hooks: Vec<(ListenerId, InvalidateHook)> =
            self.hooks.iter().map(|(id, hook)| (*id, Arc::clone(hook))).collect();
        let tx = self.tx.clone();

        // Invalidate first so no hook's refresh can read the stale cache
        tokio::spawn(async move {
            store.invalidate_cache(&user_id).await;

            if hooks.is_empty() {
                tracing::debug!(user = %user_id, "no invalidate hook registered");
            }
            for (listener, hook) in hooks {
                if !hook(&user_id)
                    && let Some(tx) = tx.upgrade()
                {
                    let _ = tx.send(HubCommand::HookGone { listener });
                }
            }
        });
    }

    fn start_steward(&mut self) {
        let env = self.env.clone();
        let tx = self.tx.clone();
        let interval = self.steward.interval();

        let task = tokio::spawn(async move {
            loop {
                env.sleep(interval).await;
                let Some(tx) = tx.upgrade() else { break };
                if tx.send(HubCommand::StewardTick).is_err() {
                    break;
                }
            }
        });

        self.steward_task = Some(task.abort_handle());
    }

    fn run_steward(&mut self) {
        let Some(trimmed) = self.registry.cached().and_then(|cached| self.steward.trim(cached))
        else {
            return;
        };
        self.registry.update_notifications(trimmed);
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            state: self.supervisor.state(),
            user_id: self.supervisor.user_id().cloned(),
            channel: self.supervisor.channel(),
            reconnect_attempts: self.supervisor.reconnect_attempts(),
            circuit_open: self.supervisor.is_circuit_open(),
            reconnect_pending: self.supervisor.has_pending_reconnect(),
            listener_count: self.registry.listener_count(),
            hook_count: self.hooks.len(),
            cached: self.registry.cached().map_or(0, NotificationSet::len),
            generation: self.generation,
        }
    }
}

/// Cloneable handle to a running hub.
///
/// Every method fails with [`HubError::Closed`] once the hub task has
/// stopped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Make sure a channel is live (or being established) for `user_id`.
    ///
    /// `hook` is registered for `listener` and called whenever a payload
    /// event invalidates the cache. A later call for the same listener
    /// replaces it; removing the listener drops it.
    ///
    /// # Errors
    ///
    /// - [`HubError::Refused`] if the breaker is latched or the reconnect
    ///   budget for `user_id` is exhausted.
    /// - [`HubError::Closed`] if the hub has stopped.
    pub async fn ensure_subscription(
        &self,
        user_id: UserId,
        listener: ListenerId,
        hook: InvalidateHook,
    ) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Ensure { user_id, listener, hook, reply })?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Withdraw `listener` from the subscription, e.g. on sign-out.
    ///
    /// Once no listener holds a hook the channel is closed. Unlike
    /// [`Self::teardown`] this does not latch the breaker.
    pub fn unsubscribe(&self, listener: ListenerId) -> Result<(), HubError> {
        self.send(HubCommand::Unsubscribe { listener })
    }

    /// Release the channel and cancel any pending reconnect.
    ///
    /// Latches the breaker until the last listener is removed.
    pub fn teardown(&self) -> Result<(), HubError> {
        self.send(HubCommand::Teardown)
    }

    /// Register a listener. It is invoked immediately if a list is cached.
    pub async fn add_listener(&self, listener: Listener) -> Result<ListenerId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::AddListener { listener, reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Unregister a listener. Removing the last one retires the
    /// subscription.
    pub fn remove_listener(&self, id: ListenerId) -> Result<(), HubError> {
        self.send(HubCommand::RemoveListener { id })
    }

    /// Replace the cached list and notify every listener.
    pub fn update_notifications(&self, notifications: Vec<Notification>) -> Result<(), HubError> {
        self.send(HubCommand::Update { notifications })
    }

    /// Number of registered listeners.
    pub async fn listener_count(&self) -> Result<usize, HubError> {
        Ok(self.status().await?.listener_count)
    }

    /// Snapshot of hub state.
    pub async fn status(&self) -> Result<HubStatus, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Status { reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Stop the hub: close the channel, cancel timers, end the task.
    pub fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubCommand::Shutdown)
    }

    /// Whether the hub task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Closed)
    }
}
