#[cfg(feature = "emitter")]
mod emitter;
mod manual;
mod observer;

#[cfg(feature = "emitter")]
pub use emitter::{EmitterConnectivity, OFFLINE_EVENT, ONLINE_EVENT};
pub use manual::ManualConnectivity;
pub use observer::{
    Connectivity, ConnectivityError, ConnectivityEvent, ConnectivityListener,
    ConnectivityObserver, Subscription,
};
