use crate::moka_cache::MokaStore;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use shared::config::{NodeDescriptor, ProviderConfig};
use shared::{Error, Result};
use sharded_cache::{CacheProvider, NodeConnection, NodeConnector};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One [`MokaStore`] per id, created the first time it is asked for
#[derive(Debug, Default)]
pub struct StoreSet<K>
where
    K: Debug + Hash + Eq,
{
    stores: DashMap<K, MokaStore>,
}

impl<K> StoreSet<K>
where
    K: Debug + Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
        }
    }

    /// The store for `id` if one was ever created; never creates one.
    pub fn existing(&self, id: &K) -> Option<MokaStore> {
        self.stores.get(id).map(|store| store.clone())
    }

    pub fn store(&self, id: &K) -> MokaStore {
        if let Some(store) = self.stores.get(id) {
            return store.clone();
        }
        self.stores
            .entry(id.clone())
            .or_insert_with(MokaStore::new_unbounded)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// In-process nodes, one store per node id.
/// Nodes can be marked down to make connects fail.
#[derive(Debug, Default)]
pub struct MemoryNodeConnector {
    nodes: StoreSet<String>,
    down: DashSet<String>,
}

impl MemoryNodeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind `node`, for inspecting what the provider wrote
    pub fn store_for(&self, node: &NodeDescriptor) -> MokaStore {
        self.nodes.store(&node.id())
    }

    pub fn mark_down(&self, node_id: &str) {
        self.down.insert(node_id.to_string());
    }

    pub fn mark_up(&self, node_id: &str) {
        self.down.remove(node_id);
    }
}

#[async_trait]
impl NodeConnector for MemoryNodeConnector {
    async fn connect(
        &self,
        node: &NodeDescriptor,
        _timeout: Duration,
    ) -> Result<Box<dyn NodeConnection>> {
        let id = node.id();
        if self.down.contains(&id) {
            debug!(node = %id, "refusing connect to node marked down");
            return Err(Error::node(id, "node is down"));
        }
        Ok(Box::new(MemoryConnection {
            store: self.nodes.store(&id),
        }))
    }
}

struct MemoryConnection {
    store: MokaStore,
}

#[async_trait]
impl NodeConnection for MemoryConnection {
    async fn add(&mut self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.store.insert(key.to_string(), value, ttl).await;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.store.get(key).await)
    }

    async fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.store.remove(key).await)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Registry factory for [`sharded_cache::ProviderKind::Memory`]; each
/// provider gets its own set of in-process nodes.
pub fn memory_factory(config: ProviderConfig) -> Result<CacheProvider> {
    CacheProvider::new(config, Arc::new(MemoryNodeConnector::new()))
}
