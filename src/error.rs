//! Error types for the Corelink client.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client API.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was attempted in a state that does not allow it,
    /// e.g. sending on a stream that is not a sender.
    #[error("invalid state: {0}")]
    State(String),

    /// A caller-supplied argument was rejected before reaching the server.
    #[error("invalid value: {0}")]
    Value(String),

    /// A socket operation failed.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// The server rejected a command or returned an unusable response.
    #[error("server error: {0}")]
    Comm(String),

    /// A command requiring authentication ran before a token was issued.
    #[error("no session token")]
    NoToken,

    /// The requested transport exists in the protocol but is not
    /// implemented by this client.
    #[error("transport not implemented: {0}")]
    NotImplemented(&'static str),
}
