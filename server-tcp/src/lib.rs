pub mod client;
pub mod config;
pub mod protocol;
pub mod server;

pub use client::TcpNodeConnector;
pub use protocol::{Request, Response};
pub use server::{NodeState, process_connection, serve, spawn_node};

// Re-export Bytes for convenience
pub use bytes::Bytes;

use shared::Result;
use shared::config::ProviderConfig;
use sharded_cache::{CacheProvider, ProviderKind, ProviderRegistry};
use std::sync::Arc;

/// Registry factory for [`ProviderKind::Tcp`]
pub fn tcp_factory(config: ProviderConfig) -> Result<CacheProvider> {
    CacheProvider::new(config, Arc::new(TcpNodeConnector))
}

/// Registry with every provider kind this workspace ships
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register(ProviderKind::Tcp, tcp_factory)
        .register(ProviderKind::Memory, storage_engine::memory_factory);
    registry
}
