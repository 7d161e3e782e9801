use crate::provider::CacheProvider;
use shared::config::ProviderConfig;
use shared::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The cache implementations a provider can be built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// In-process nodes
    Memory,
    /// Remote nodes over the binary TCP protocol
    Tcp,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Memory => f.write_str("memory"),
            ProviderKind::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(ProviderKind::Memory),
            "tcp" => Ok(ProviderKind::Tcp),
            _ => Err(Error::parse("provider kind", s)),
        }
    }
}

pub type ProviderFactory = Box<dyn Fn(ProviderConfig) -> Result<CacheProvider> + Send + Sync>;

/// Maps each [`ProviderKind`] to the constructor that builds it.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `kind`, replacing any earlier registration.
    pub fn register<F>(&mut self, kind: ProviderKind, factory: F) -> &mut Self
    where
        F: Fn(ProviderConfig) -> Result<CacheProvider> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
        self
    }

    pub fn create(&self, kind: ProviderKind, config: ProviderConfig) -> Result<CacheProvider> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| Error::ProviderNotRegistered(kind.to_string()))?;
        tracing::debug!(%kind, nodes = config.nodes.len(), "creating cache provider");
        factory(config)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
