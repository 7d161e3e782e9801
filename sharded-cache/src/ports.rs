#![deny(clippy::all)]

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::NodeDescriptor;
use shared::{Error, Result};
use std::time::Duration;

// Ports are the pluggable extension points for the backing node client and value codec

/// Port for opening a connection to a single backing node
#[async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    /// Open a fresh connection to `node`, giving up after `timeout`
    async fn connect(
        &self,
        node: &NodeDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn NodeConnection>>;
}

/// A transient connection to one node, used for exactly one operation.
/// Dropping it releases the underlying resources; `close` does so gracefully.
#[async_trait]
pub trait NodeConnection: Send {
    async fn add(&mut self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;
    /// `Ok(None)` is a miss, never a transport failure.
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>>;
    /// Returns whether the key existed.
    async fn remove(&mut self, key: &str) -> Result<bool>;
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Port for turning application values into node-transportable bytes
pub trait CacheCodec: Send + Sync + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}
