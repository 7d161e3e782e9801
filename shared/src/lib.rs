// shared/src/lib.rs

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot build a ring from an empty node list")]
    EmptyTopology,
    #[error("no nodes available on the ring")]
    NoNodesAvailable,
    #[error("malformed {field}: {value:?}")]
    ConfigurationParseError { field: String, value: String },
    #[error("node {node}: {reason}")]
    NodeCommunication { node: String, reason: String },
    #[error("codec: {0}")]
    Codec(String),
    #[error("provider not registered: {0}")]
    ProviderNotRegistered(String),
    #[error("dispatched operation did not complete: {0}")]
    Dispatch(String),
}

impl Error {
    pub fn node(node: impl Into<String>, reason: impl ToString) -> Self {
        Error::NodeCommunication {
            node: node.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(field: impl Into<String>, value: impl Into<String>) -> Self {
        Error::ConfigurationParseError {
            field: field.into(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
