use std::net::SocketAddr;

/// Server-level failures. Only [`ServerError::Bind`] and
/// [`ServerError::InvalidConfig`] stop the server; a [`ServerError::Send`]
/// affects one client for one tick.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
