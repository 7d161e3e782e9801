//! In-process node double that records what the provider sends it.

use crate::ports::{NodeConnection, NodeConnector};
use async_trait::async_trait;
use bytes::Bytes;
use shared::config::NodeDescriptor;
use shared::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Entries = HashMap<(String, String), (Bytes, Duration)>;

#[derive(Default)]
pub(crate) struct RecordingConnector {
    entries: Arc<Mutex<Entries>>,
    failing: Mutex<HashSet<String>>,
    stall: Mutex<Option<Duration>>,
    last_timeout: Mutex<Option<Duration>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl RecordingConnector {
    pub(crate) fn entry(&self, node_id: &str, key: &str) -> Option<(Bytes, Duration)> {
        self.entries
            .lock()
            .unwrap()
            .get(&(node_id.to_string(), key.to_string()))
            .cloned()
    }

    pub(crate) fn fail_node(&self, node_id: &str) {
        self.failing.lock().unwrap().insert(node_id.to_string());
    }

    pub(crate) fn stall_connects(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock().unwrap()
    }
}

#[async_trait]
impl NodeConnector for RecordingConnector {
    async fn connect(
        &self,
        node: &NodeDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn NodeConnection>> {
        *self.last_timeout.lock().unwrap() = Some(timeout);
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&node.id()) {
            return Err(Error::node(node.id(), "connection refused"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection {
            node_id: node.id(),
            entries: Arc::clone(&self.entries),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct RecordingConnection {
    node_id: String,
    entries: Arc<Mutex<Entries>>,
    closed: Arc<AtomicUsize>,
}

impl RecordingConnection {
    fn slot(&self, key: &str) -> (String, String) {
        (self.node_id.clone(), key.to_string())
    }
}

#[async_trait]
impl NodeConnection for RecordingConnection {
    async fn add(&mut self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.entries.lock().unwrap().insert(self.slot(key), (value, ttl));
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&self.slot(key))
            .map(|(value, _)| value.clone()))
    }

    async fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().remove(&self.slot(key)).is_some())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
