//! Consistent hashing with virtual replicas.
//!
//! Every node is placed on the ring `virtual_replicas * weight` times, at the
//! xxHash3-128 coordinate of `"{node_id}-{replica}"` folded to 64 bits. A key
//! belongs to the first point at or after its own coordinate, wrapping to the
//! start of the ring.

use arc_swap::ArcSwap;
use shared::config::NodeDescriptor;
use shared::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use twox_hash::XxHash3_128;

#[derive(Debug, Clone)]
struct RingPoint {
    hash: u64,
    node: Arc<NodeDescriptor>,
}

/// An immutable ring snapshot. Topology changes produce a new snapshot.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Sorted by `(hash, node id)`.
    points: Vec<RingPoint>,
    nodes: Vec<Arc<NodeDescriptor>>,
    virtual_replicas: u32,
}

impl HashRing {
    /// Build a ring over `nodes`. Nodes with a duplicate id are ignored.
    pub fn build(
        nodes: impl IntoIterator<Item = NodeDescriptor>,
        virtual_replicas: u32,
    ) -> Result<Self> {
        let mut ring = Self::empty(virtual_replicas);
        for node in nodes {
            if !ring.contains(&node.id()) {
                ring.push_points(Arc::new(node))?;
            }
        }
        if ring.nodes.is_empty() {
            return Err(Error::EmptyTopology);
        }
        ring.sort_points();
        Ok(ring)
    }

    pub fn empty(virtual_replicas: u32) -> Self {
        Self {
            points: Vec::new(),
            nodes: Vec::new(),
            virtual_replicas: virtual_replicas.max(1),
        }
    }

    /// Find the node owning `key`.
    pub fn locate(&self, key: &str) -> Result<&Arc<NodeDescriptor>> {
        let hash = Self::hash_key(key.as_bytes());
        let idx = self.points.partition_point(|point| point.hash < hash);
        self.points
            .get(idx)
            .or_else(|| self.points.first())
            .map(|point| &point.node)
            .ok_or(Error::NoNodesAvailable)
    }

    /// A new snapshot with `node`'s points added; other points are kept as-is.
    /// Returns `None` if a node with the same id is already on the ring.
    pub fn with_node(&self, node: NodeDescriptor) -> Result<Option<Self>> {
        if self.contains(&node.id()) {
            return Ok(None);
        }
        let mut ring = self.clone();
        ring.push_points(Arc::new(node))?;
        ring.sort_points();
        Ok(Some(ring))
    }

    /// A new snapshot without the points of `node_id`.
    /// Returns `None` if no such node is on the ring.
    pub fn without_node(&self, node_id: &str) -> Option<Self> {
        if !self.contains(node_id) {
            return None;
        }
        Some(Self {
            points: self
                .points
                .iter()
                .filter(|point| point.node.id() != node_id)
                .cloned()
                .collect(),
            nodes: self
                .nodes
                .iter()
                .filter(|node| node.id() != node_id)
                .cloned()
                .collect(),
            virtual_replicas: self.virtual_replicas,
        })
    }

    pub fn nodes(&self) -> &[Arc<NodeDescriptor>] {
        &self.nodes
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|node| node.id() == node_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of virtual points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn virtual_replicas(&self) -> u32 {
        self.virtual_replicas
    }

    /// Sample how `sample_size` synthetic keys spread over the nodes, by node id.
    pub fn distribution(&self, sample_size: usize) -> HashMap<String, usize> {
        let mut distribution = HashMap::new();
        for i in 0..sample_size {
            if let Ok(node) = self.locate(&format!("sample_key_{}", i)) {
                *distribution.entry(node.id()).or_insert(0) += 1;
            }
        }
        distribution
    }

    /// Ring coordinate of a key: xxHash3-128 with the halves folded together.
    pub fn hash_key(key: &[u8]) -> u64 {
        let hash = XxHash3_128::oneshot(key);
        ((hash >> 64) as u64) ^ (hash as u64)
    }

    fn push_points(&mut self, node: Arc<NodeDescriptor>) -> Result<()> {
        let id = node.id();
        let replicas = node.ring_points(self.virtual_replicas)?;
        self.points.extend((0..replicas).map(|replica| RingPoint {
            hash: Self::hash_key(format!("{}-{}", id, replica).as_bytes()),
            node: Arc::clone(&node),
        }));
        self.nodes.push(node);
        Ok(())
    }

    fn sort_points(&mut self) {
        self.points
            .sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.node.id().cmp(&b.node.id())));
    }
}

/// The ring currently in use. Readers take a snapshot and never observe a
/// half-built ring; topology changes publish a complete replacement.
#[derive(Debug)]
pub struct SharedRing {
    current: ArcSwap<HashRing>,
}

impl SharedRing {
    pub fn new(ring: HashRing) -> Self {
        Self {
            current: ArcSwap::from_pointee(ring),
        }
    }

    pub fn snapshot(&self) -> Arc<HashRing> {
        self.current.load_full()
    }

    pub fn locate(&self, key: &str) -> Result<Arc<NodeDescriptor>> {
        self.current.load().locate(key).map(Arc::clone)
    }

    /// Returns `false` if the node was already present. A node the ring
    /// cannot place leaves the current snapshot untouched.
    pub fn add_node(&self, node: NodeDescriptor) -> Result<bool> {
        let id = node.id();
        let mut outcome = Ok(false);
        self.current.rcu(|ring| match ring.with_node(node.clone()) {
            Ok(Some(next)) => {
                outcome = Ok(true);
                Arc::new(next)
            }
            Ok(None) => {
                outcome = Ok(false);
                Arc::clone(ring)
            }
            Err(e) => {
                outcome = Err(e);
                Arc::clone(ring)
            }
        });
        if let Ok(true) = outcome {
            info!(node = %id, "added node to ring");
        }
        outcome
    }

    /// Returns `false` if the node was not on the ring.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut removed = false;
        self.current.rcu(|ring| match ring.without_node(node_id) {
            Some(next) => {
                removed = true;
                Arc::new(next)
            }
            None => {
                removed = false;
                Arc::clone(ring)
            }
        });
        if removed {
            info!(node = %node_id, "removed node from ring");
        }
        removed
    }
}
