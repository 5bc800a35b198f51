//! Error types for the relay crate.

use hopchain_chain::ChainError;
use hopchain_net::NetError;
use hopchain_proto::{ParseError, WriteError, status_text};
use thiserror::Error;

/// Errors that can occur while negotiating with a relay.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed relay message: {0:?}")]
    Proto(ParseError),

    #[error("cannot encode relay request: {0:?}")]
    Write(WriteError),

    #[error("bind on {address}/{network} failed: {}", label(.status))]
    BindFailed {
        address: String,
        network: String,
        status: u8,
    },

    #[error("connect to {address}/{network} failed: {}", label(.status))]
    ConnectFailed {
        address: String,
        network: String,
        status: u8,
    },

    #[error("relay response carries no address")]
    MissingAddress,

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("relay handshake timed out")]
    Timeout,

    #[error("relay handshake cancelled")]
    Cancelled,

    #[error("resolver: domain {0} does not exist")]
    Resolve(String),

    #[error("relay bound {address}, not usable on {network}")]
    AddressFamily { address: String, network: String },

    #[error(transparent)]
    Net(#[from] NetError),
}

fn label(status: &u8) -> &'static str {
    status_text(*status)
}

impl From<RelayError> for ChainError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Io(e) => ChainError::Io(e),
            RelayError::UnsupportedNetwork(n) => ChainError::UnsupportedNetwork(n),
            RelayError::Timeout => ChainError::Timeout("relay handshake".into()),
            RelayError::Cancelled => ChainError::Cancelled,
            RelayError::Resolve(host) => ChainError::Resolve(host),
            other => ChainError::Other(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_spelled_out() {
        let err = RelayError::BindFailed {
            address: ":8080".into(),
            network: "tcp".into(),
            status: hopchain_proto::STATUS_FORBIDDEN,
        };
        assert_eq!(err.to_string(), "bind on :8080/tcp failed: forbidden");
    }

    #[test]
    fn converts_into_chain_error() {
        assert!(matches!(
            ChainError::from(RelayError::UnsupportedNetwork("sctp".into())),
            ChainError::UnsupportedNetwork(n) if n == "sctp"
        ));
        assert!(matches!(ChainError::from(RelayError::Cancelled), ChainError::Cancelled));
        let mismatch = ChainError::from(RelayError::AddressFamily {
            address: "203.0.113.5".into(),
            network: "udp6".into(),
        });
        assert_eq!(mismatch.to_string(), "relay bound 203.0.113.5, not usable on udp6");
        let chained = ChainError::from(RelayError::MissingAddress);
        assert_eq!(chained.to_string(), "relay response carries no address");
    }
}
