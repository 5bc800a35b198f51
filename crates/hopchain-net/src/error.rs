//! Error types for the net crate.

use thiserror::Error;

/// Errors from logical connections and bound listeners.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue is full")]
    QueueFull,

    #[error("read from closed connection")]
    ReadClosed,

    #[error("connection is closed")]
    ConnClosed,

    #[error("listener is closed")]
    ListenerClosed,
}
