//! Error types for the chain crate.

use thiserror::Error;

/// Errors from building chains and routing through them.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("no node available in hop '{0}'")]
    NoNodeAvailable(String),

    #[error("chain '{chain}' hop '{hop}' node '{node}': {reason}")]
    Build {
        chain: String,
        hop: String,
        node: String,
        reason: String,
    },

    #[error("unknown {kind} '{name}'")]
    UnknownComponent { kind: &'static str, name: String },

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bind not supported")]
    BindUnsupported,

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("resolver: domain {0} does not exist")]
    Resolve(String),

    #[error("invalid metadata '{key}': {reason}")]
    Metadata { key: String, reason: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ChainError {
    /// Log label for this error, see `hopchain_core::errors`.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::Build { .. } | ChainError::UnknownComponent { .. } => {
                hopchain_core::ERROR_BUILD
            }
            ChainError::Metadata { .. } | ChainError::Tls(_) => hopchain_core::ERROR_CONFIG,
            ChainError::Resolve(_) => hopchain_core::ERROR_RESOLVE,
            ChainError::Timeout(_) | ChainError::Cancelled => hopchain_core::ERROR_TIMEOUT,
            ChainError::Dial { .. } | ChainError::Io(_) => hopchain_core::ERROR_IO,
            ChainError::NoNodeAvailable(_)
            | ChainError::BindUnsupported
            | ChainError::UnsupportedNetwork(_)
            | ChainError::Other(_) => hopchain_core::ERROR_PROTOCOL,
        }
    }
}

impl From<hopchain_net::NetError> for ChainError {
    fn from(e: hopchain_net::NetError) -> Self {
        match e {
            hopchain_net::NetError::Io(e) => ChainError::Io(e),
            other => ChainError::Other(Box::new(other)),
        }
    }
}
