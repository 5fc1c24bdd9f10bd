//! Connection status fan-out

use std::sync::{Arc, Mutex};

use log::debug;

/// Receives connection state changes.
///
/// Called on whatever task performed the transition; forward into a channel to
/// move the notification onto a specific context.
pub trait ConnectionStatusListener: Send + Sync {
    fn on_connection_state_changed(&self, connected: bool);
}

impl<F> ConnectionStatusListener for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_connection_state_changed(&self, connected: bool) {
        self(connected)
    }
}

/// Token returned by [`ConnectionListenerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    connected: bool,
    listeners: Vec<(ListenerId, Arc<dyn ConnectionStatusListener>)>,
}

/// Set of connection listeners plus the last state they were told about
#[derive(Default)]
pub struct ConnectionListenerRegistry {
    inner: Mutex<RegistryInner>,
    /// Held while calling listeners so a replay and an edge cannot swap order
    delivery: Mutex<()>,
}

impl ConnectionListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` and immediately tells it the current state.
    ///
    /// Listeners must not call back into the registry while being notified.
    pub fn register(&self, listener: Arc<dyn ConnectionStatusListener>) -> ListenerId {
        let _delivery = self.lock_delivery();
        let (id, connected) = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = ListenerId(inner.next_id);
            inner.listeners.push((id, listener.clone()));
            (id, inner.connected)
        };
        listener.on_connection_state_changed(connected);
        id
    }

    /// Removes a listener; unknown ids are ignored
    pub fn unregister(&self, id: ListenerId) {
        self.lock().listeners.retain(|(existing, _)| *existing != id);
    }

    /// Records `connected` and notifies every listener if it changed
    pub fn notify(&self, connected: bool) {
        let _delivery = self.lock_delivery();
        let listeners = {
            let mut inner = self.lock();
            if inner.connected == connected {
                return;
            }
            inner.connected = connected;
            inner
                .listeners
                .iter()
                .map(|(_, l)| l.clone())
                .collect::<Vec<_>>()
        };
        debug!(
            "Notifying {} listener(s): connected = {}",
            listeners.len(),
            connected
        );
        for listener in listeners {
            listener.on_connection_state_changed(connected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_delivery(&self) -> std::sync::MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(|e| e.into_inner())
    }
}
