use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Network reachability as seen by the host environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

/// A reachability edge, stamped with the observer's generation counter.
///
/// Generations increase by one per transition. Listeners may receive events
/// out of order and must ignore any event older than the last one applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub state: Connectivity,
    pub generation: u64,
}

impl ConnectivityEvent {
    pub fn new(state: Connectivity, generation: u64) -> Self {
        Self { state, generation }
    }
}

pub type ConnectivityListener = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

/// Handle returned by [`ConnectivityObserver::subscribe`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    ids: Vec<String>,
}

impl Subscription {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    LockPoisoned(&'static str),
    SubscribeFailed(String),
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityError::LockPoisoned(operation) => {
                write!(f, "connectivity lock poisoned during {}", operation)
            }
            ConnectivityError::SubscribeFailed(message) => {
                write!(f, "connectivity subscribe failed: {}", message)
            }
        }
    }
}

impl std::error::Error for ConnectivityError {}

/// Source of "became reachable" / "became unreachable" signals.
pub trait ConnectivityObserver: Send + Sync {
    /// Current state together with the generation that produced it.
    fn current(&self) -> ConnectivityEvent;

    fn is_online(&self) -> bool {
        self.current().state.is_online()
    }

    /// Register a listener for both edges.
    fn subscribe(&self, listener: ConnectivityListener) -> Result<Subscription, ConnectivityError>;

    /// Remove a listener. Returns true if it was still registered.
    fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, ConnectivityError>;

    /// Number of live subscriptions.
    fn listener_count(&self) -> usize;
}

impl<O: ConnectivityObserver + ?Sized> ConnectivityObserver for Arc<O> {
    fn current(&self) -> ConnectivityEvent {
        (**self).current()
    }

    fn subscribe(&self, listener: ConnectivityListener) -> Result<Subscription, ConnectivityError> {
        (**self).subscribe(listener)
    }

    fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, ConnectivityError> {
        (**self).unsubscribe(subscription)
    }

    fn listener_count(&self) -> usize {
        (**self).listener_count()
    }
}
