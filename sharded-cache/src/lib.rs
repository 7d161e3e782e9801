//! Sharded cache facade: routes key/value operations to backing nodes through
//! a consistent hash ring.

pub mod dispatch;
pub mod domain;
pub mod ports;
pub mod provider;
pub mod registry;
pub mod ring;

#[cfg(test)]
mod testing;

pub use dispatch::{PendingRead, submit_and_await, submit_and_forget};
pub use domain::{FALLBACK_TTL_SECS, TtlSpec, physical_key};
pub use ports::{CacheCodec, JsonCodec, NodeConnection, NodeConnector};
pub use provider::CacheProvider;
pub use registry::{ProviderFactory, ProviderKind, ProviderRegistry};
pub use ring::{HashRing, SharedRing};

// Re-exported so callers can name config and errors without a direct dependency
pub use shared::config::{NodeDescriptor, ProviderConfig};
pub use shared::{Error, Result};
