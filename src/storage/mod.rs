mod file;
mod in_memory;
mod store;

pub use file::FileKeyValueStore;
pub use in_memory::InMemoryKeyValueStore;
pub use store::{KeyValueStore, StorageError};
