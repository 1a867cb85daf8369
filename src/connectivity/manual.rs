use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::observer::{
    Connectivity, ConnectivityError, ConnectivityEvent, ConnectivityListener,
    ConnectivityObserver, Subscription,
};

/// Connectivity source driven by explicit calls.
///
/// Listeners run synchronously on the thread calling [`go_online`] or
/// [`go_offline`], which makes it the deterministic choice for tests and for
/// hosts that already receive reachability callbacks on their own loop.
/// Clones share state and listeners.
///
/// [`go_online`]: ManualConnectivity::go_online
/// [`go_offline`]: ManualConnectivity::go_offline
#[derive(Clone)]
pub struct ManualConnectivity {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<ConnectivityEvent>,
    listeners: RwLock<Vec<(String, ConnectivityListener)>>,
    next_id: AtomicU64,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ConnectivityEvent::new(Connectivity::from_online(online), 0)),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Mark the network reachable. Returns false if it already was.
    pub fn go_online(&self) -> bool {
        self.transition(Connectivity::Online)
    }

    /// Mark the network unreachable. Returns false if it already was.
    pub fn go_offline(&self) -> bool {
        self.transition(Connectivity::Offline)
    }

    fn transition(&self, to: Connectivity) -> bool {
        let event = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.state == to {
                return false;
            }
            *state = ConnectivityEvent::new(to, state.generation + 1);
            *state
        };

        // Snapshot listeners so a callback can unsubscribe without deadlocking.
        let listeners: Vec<ConnectivityListener> = match self.inner.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect(),
        };
        for listener in listeners {
            listener(event);
        }
        true
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

impl ConnectivityObserver for ManualConnectivity {
    fn current(&self) -> ConnectivityEvent {
        match self.inner.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn subscribe(&self, listener: ConnectivityListener) -> Result<Subscription, ConnectivityError> {
        let id = format!("manual-{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .inner
            .listeners
            .write()
            .map_err(|_| ConnectivityError::LockPoisoned("subscribe"))?;
        listeners.push((id.clone(), listener));
        Ok(Subscription::new(vec![id]))
    }

    fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, ConnectivityError> {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .map_err(|_| ConnectivityError::LockPoisoned("unsubscribe"))?;
        let before = listeners.len();
        listeners.retain(|(id, _)| !subscription.ids().contains(id));
        Ok(listeners.len() != before)
    }

    fn listener_count(&self) -> usize {
        self.inner.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}
