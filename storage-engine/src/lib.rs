pub mod memory_node;
pub mod moka_cache;

pub use memory_node::{MemoryNodeConnector, StoreSet, memory_factory};
pub use moka_cache::MokaStore;
