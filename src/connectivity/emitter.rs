use std::sync::{Arc, Mutex};

use event_emitter_rs::EventEmitter;
use tracing::debug;

use super::observer::{
    Connectivity, ConnectivityError, ConnectivityEvent, ConnectivityListener,
    ConnectivityObserver, Subscription,
};

pub const ONLINE_EVENT: &str = "online";
pub const OFFLINE_EVENT: &str = "offline";

/// Connectivity source backed by an `EventEmitter`.
///
/// Mirrors the browser's `online` / `offline` window events. The emitter
/// invokes every listener on its own thread, so deliveries are asynchronous
/// and may arrive out of order; each event carries its generation so
/// listeners can discard stale ones.
pub struct EmitterConnectivity {
    inner: Mutex<EmitterState>,
}

struct EmitterState {
    emitter: EventEmitter,
    current: ConnectivityEvent,
    subscriptions: usize,
}

impl EmitterConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            inner: Mutex::new(EmitterState {
                emitter: EventEmitter::new(),
                current: ConnectivityEvent::new(Connectivity::from_online(online), 0),
                subscriptions: 0,
            }),
        }
    }

    /// Record the host's reachability. Emits only when the state changes.
    pub fn set_online(&self, online: bool) -> bool {
        let to = Connectivity::from_online(online);
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.current.state == to {
            return false;
        }

        let generation = state.current.generation + 1;
        state.current = ConnectivityEvent::new(to, generation);
        let event = if online { ONLINE_EVENT } else { OFFLINE_EVENT };
        debug!(event, generation, "emitting connectivity change");
        state.emitter.emit(event, generation);
        true
    }
}

impl Default for EmitterConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityObserver for EmitterConnectivity {
    fn current(&self) -> ConnectivityEvent {
        match self.inner.lock() {
            Ok(state) => state.current,
            Err(poisoned) => poisoned.into_inner().current,
        }
    }

    fn subscribe(&self, listener: ConnectivityListener) -> Result<Subscription, ConnectivityError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| ConnectivityError::LockPoisoned("emitter subscribe"))?;

        let on_online = Arc::clone(&listener);
        let online_id = state.emitter.on(ONLINE_EVENT, move |generation: u64| {
            on_online(ConnectivityEvent::new(Connectivity::Online, generation))
        });
        let on_offline = listener;
        let offline_id = state.emitter.on(OFFLINE_EVENT, move |generation: u64| {
            on_offline(ConnectivityEvent::new(Connectivity::Offline, generation))
        });

        state.subscriptions += 1;
        Ok(Subscription::new(vec![online_id, offline_id]))
    }

    fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, ConnectivityError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| ConnectivityError::LockPoisoned("emitter unsubscribe"))?;

        let mut removed = false;
        for id in subscription.ids() {
            removed |= state.emitter.remove_listener(id).is_some();
        }
        if removed {
            state.subscriptions = state.subscriptions.saturating_sub(1);
        }
        Ok(removed)
    }

    fn listener_count(&self) -> usize {
        match self.inner.lock() {
            Ok(state) => state.subscriptions,
            Err(poisoned) => poisoned.into_inner().subscriptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn delivers_edges_with_generation() {
        let source = EmitterConnectivity::new(true);
        let latest = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&latest);
        source
            .subscribe(Arc::new(move |event: ConnectivityEvent| {
                sink.fetch_max(event.generation, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(source.set_online(false));
        assert!(!source.set_online(false));
        assert!(source.set_online(true));

        assert!(wait_for(|| latest.load(Ordering::SeqCst) == 2));
        assert!(source.is_online());
    }

    #[test]
    fn unsubscribe_removes_both_listeners() {
        let source = EmitterConnectivity::new(false);
        let calls = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&calls);
        let sub = source
            .subscribe(Arc::new(move |_event: ConnectivityEvent| {
                sink.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(source.listener_count(), 1);

        assert!(source.unsubscribe(&sub).unwrap());
        assert_eq!(source.listener_count(), 0);

        source.set_online(true);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
