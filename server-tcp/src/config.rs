use shared::{Error, Result};
use tracing::warn;

pub const ENV_HOST: &str = "CARBON_HOST";
pub const ENV_TCP_PORT: &str = "CARBON_TCP_PORT";
pub const ENV_NODE_PASSWORD: &str = "CARBON_NODE_PASSWORD";

/// Settings for running a single backing node
#[derive(Clone, Debug, PartialEq)]
pub struct NodeServerConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl NodeServerConfig {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 5500;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(ENV_HOST).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let port = match lookup(ENV_TCP_PORT) {
            Some(port) => port
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::parse(ENV_TCP_PORT, port))?,
            None => Self::DEFAULT_PORT,
        };
        let password = lookup(ENV_NODE_PASSWORD).filter(|p| !p.is_empty());
        if password.is_none() {
            warn!("{} not set, node accepts unauthenticated clients", ENV_NODE_PASSWORD);
        }
        Ok(Self {
            host,
            port,
            password,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
