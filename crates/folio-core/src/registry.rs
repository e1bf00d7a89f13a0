//! Listener registry and canonical notification cache.
//!
//! Every mounted UI consumer registers one listener. The registry owns the
//! cached [`NotificationSet`] and pushes it to all listeners on each update.
//! A listener registered after the first update receives the cached set
//! immediately instead of waiting for the next change.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::notification::{Notification, NotificationSet};

/// Callback receiving the current notification list.
pub type Listener = Arc<dyn Fn(&[Notification]) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::add_listener`].
///
/// Ids increase monotonically and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Registered listeners plus the cached set they observe.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: BTreeMap<ListenerId, Listener>,
    next_id: u64,
    cached: Option<NotificationSet>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .field("cached", &self.cached.as_ref().map(NotificationSet::len))
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry with no cached set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. Invoked immediately if a cached set exists.
    pub fn add_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        if let Some(cached) = &self.cached {
            listener(cached.as_slice());
        }

        self.listeners.insert(id, listener);
        id
    }

    /// Deregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Replace the cached set and notify every listener in registration
    /// order.
    pub fn update_notifications(&mut self, list: Vec<Notification>) {
        let set = NotificationSet::from_list(list);
        for listener in self.listeners.values() {
            listener(set.as_slice());
        }
        self.cached = Some(set);
    }

    /// Drop the cached set without notifying anyone.
    pub fn clear_cache(&mut self) {
        self.cached = None;
    }

    /// Cached set, if any update happened.
    pub fn cached(&self) -> Option<&NotificationSet> {
        self.cached.as_ref()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counting_listener() -> (Listener, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let listener: Listener = Arc::new(move |_: &[Notification]| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (listener, calls)
    }

    #[test]
    fn update_notifies_all_listeners() {
        let mut registry = ListenerRegistry::new();
        let (a, a_calls) = counting_listener();
        let (b, b_calls) = counting_listener();
        registry.add_listener(a);
        registry.add_listener(b);

        registry.update_notifications(vec![Notification::new("n1", 1)]);

        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.cached().map(NotificationSet::len), Some(1));
    }

    #[test]
    fn late_listener_receives_cached_set() {
        let mut registry = ListenerRegistry::new();
        registry.update_notifications(vec![Notification::new("n1", 1), Notification::new("n2", 2)]);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        registry.add_listener(Arc::new(move |list: &[Notification]| {
            sink.lock().unwrap().push(list.len());
        }));

        assert_eq!(*received.lock().unwrap(), vec![2]);
    }

    #[test]
    fn listener_without_cache_is_not_invoked_on_add() {
        let mut registry = ListenerRegistry::new();
        let (a, calls) = counting_listener();
        registry.add_listener(a);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_listener_is_not_invoked() {
        let mut registry = ListenerRegistry::new();
        let (a, calls) = counting_listener();
        let id = registry.add_listener(a);

        assert!(registry.remove_listener(id));
        assert!(!registry.remove_listener(id));
        registry.update_notifications(vec![Notification::new("n1", 1)]);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn update_deduplicates() {
        let mut registry = ListenerRegistry::new();
        registry.update_notifications(vec![
            Notification::new("n1", 1),
            Notification::new("n1", 2),
        ]);
        assert_eq!(registry.cached().map(NotificationSet::len), Some(1));
    }
}
