use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::warn;

pub const ENV_NODES: &str = "SHARD_CACHE_NODES";
pub const ENV_VIRTUAL_REPLICAS: &str = "SHARD_CACHE_VIRTUAL_REPLICAS";
pub const ENV_DEFAULT_TTL_SECS: &str = "SHARD_CACHE_DEFAULT_TTL_SECS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "SHARD_CACHE_CONNECT_TIMEOUT_MS";
pub const ENV_NAMESPACE: &str = "SHARD_CACHE_NAMESPACE";

/// Upper bound on the ring points one node may occupy.
pub const MAX_NODE_POINTS: u32 = 1 << 16;

/// A single backing node as supplied by the registry.
///
/// Immutable once a ring has been built from it; the ring holds shared
/// references rather than copies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct NodeDescriptor {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub password: Option<String>,
    /// Multiplier on the ring's virtual replica count. Must be >= 1.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl NodeDescriptor {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            db: 0,
            password: None,
            weight: 1,
        }
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Stable identity used for ring placement and topology changes.
    pub fn id(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::parse("host", self.host.clone()));
        }
        if self.weight == 0 || self.weight > MAX_NODE_POINTS {
            return Err(Error::parse("weight", self.weight.to_string()));
        }
        Ok(())
    }

    /// Number of ring points this node occupies: `virtual_replicas * weight`,
    /// at most [`MAX_NODE_POINTS`].
    pub fn ring_points(&self, virtual_replicas: u32) -> Result<u32> {
        virtual_replicas
            .checked_mul(self.weight.max(1))
            .filter(|points| *points <= MAX_NODE_POINTS)
            .ok_or_else(|| Error::parse("weight", self.weight.to_string()))
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Node entry with the string-typed fields a registry hands out.
#[derive(Clone, Debug, Default)]
pub struct RawNodeEntry {
    pub host: String,
    pub port: String,
    pub db: Option<String>,
    pub password: Option<String>,
    pub weight: Option<String>,
}

impl RawNodeEntry {
    pub fn resolve(&self) -> Result<NodeDescriptor> {
        let port = self
            .port
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::parse("port", self.port.clone()))?;
        let db = match &self.db {
            Some(db) => db
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::parse("database index", db.clone()))?,
            None => 0,
        };
        let weight = match &self.weight {
            Some(w) => match w.trim().parse::<u32>() {
                Ok(w) if w >= 1 => w,
                _ => return Err(Error::parse("weight", w.clone())),
            },
            None => 1,
        };

        let node = NodeDescriptor {
            host: self.host.trim().to_string(),
            port,
            db,
            password: self.password.clone().filter(|p| !p.is_empty()),
            weight,
        };
        node.validate()?;
        Ok(node)
    }
}

/// Parse a comma separated node list.
///
/// Each entry is `host:port[/db][?password=..&weight=..]`.
pub fn parse_node_list(text: &str) -> Result<Vec<NodeDescriptor>> {
    text.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_node_entry(entry)?.resolve())
        .collect()
}

fn parse_node_entry(entry: &str) -> Result<RawNodeEntry> {
    let (location, options) = match entry.split_once('?') {
        Some((location, options)) => (location, Some(options)),
        None => (entry, None),
    };
    let (address, db) = match location.split_once('/') {
        Some((address, db)) => (address, Some(db.to_string())),
        None => (location, None),
    };
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::parse("node address", entry))?;

    let mut raw = RawNodeEntry {
        host: host.to_string(),
        port: port.to_string(),
        db,
        ..Default::default()
    };

    for option in options.into_iter().flat_map(|o| o.split('&')) {
        match option.split_once('=') {
            Some(("password", value)) => raw.password = Some(value.to_string()),
            Some(("weight", value)) => raw.weight = Some(value.to_string()),
            _ => return Err(Error::parse("node option", option)),
        }
    }

    Ok(raw)
}

/// Everything a provider needs, resolved once before it is constructed.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub nodes: Vec<NodeDescriptor>,
    #[serde(default = "default_virtual_replicas")]
    pub virtual_replicas: u32,
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_virtual_replicas() -> u32 {
    ProviderConfig::DEFAULT_VIRTUAL_REPLICAS
}

fn default_connect_timeout_ms() -> u64 {
    ProviderConfig::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_namespace() -> String {
    ProviderConfig::DEFAULT_NAMESPACE.to_string()
}

impl ProviderConfig {
    pub const DEFAULT_VIRTUAL_REPLICAS: u32 = 160;
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
    pub const DEFAULT_NAMESPACE: &str = "default";

    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self {
            nodes,
            virtual_replicas: Self::DEFAULT_VIRTUAL_REPLICAS,
            default_ttl_secs: None,
            connect_timeout_ms: Self::DEFAULT_CONNECT_TIMEOUT_MS,
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = Some(secs);
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_virtual_replicas(mut self, replicas: u32) -> Self {
        self.virtual_replicas = replicas;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nodes = match lookup(ENV_NODES) {
            Some(list) => parse_node_list(&list)?,
            None => {
                warn!("{} not set, provider will have no nodes", ENV_NODES);
                Vec::new()
            }
        };

        let mut config = Self::new(nodes);
        if let Some(value) = lookup(ENV_VIRTUAL_REPLICAS) {
            config.virtual_replicas = parse_number(ENV_VIRTUAL_REPLICAS, &value)?;
        }
        if let Some(value) = lookup(ENV_DEFAULT_TTL_SECS) {
            config.default_ttl_secs = Some(parse_number(ENV_DEFAULT_TTL_SECS, &value)?);
        }
        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_number(ENV_CONNECT_TIMEOUT_MS, &value)?;
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.virtual_replicas == 0 || self.virtual_replicas > MAX_NODE_POINTS {
            return Err(Error::parse(
                "virtual replicas",
                self.virtual_replicas.to_string(),
            ));
        }
        self.nodes.iter().try_for_each(|node| {
            node.validate()?;
            node.ring_points(self.virtual_replicas).map(|_| ())
        })
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::parse(field, value))
}
