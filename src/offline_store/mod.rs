mod config;
mod store;

pub use config::{StoreConfig, QUEUE_KEY_SUFFIX};
pub use store::{OfflineStore, OfflineStoreBuilder, StoreValue};
