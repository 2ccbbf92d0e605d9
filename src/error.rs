//! Error types for the lawnsync-worker engine.

use thiserror::Error;

/// Errors that can occur inside the worker engine.
///
/// Strategy execution never surfaces these to a page: every fetch-path error
/// is converted into a cached or synthesized response. They surface from
/// configuration loading, lifecycle steps and client messaging.
#[derive(Error, Debug)]
pub enum Error {
    /// The network fetch itself failed (offline, DNS, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error from a persistent cache backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration parsed but violates an invariant.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A URL could not be parsed or resolved against the origin.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A broadcast was attempted with no open clients.
    #[error("No open clients")]
    NoClients,

    /// A client closed before a message could be delivered.
    #[error("Client {0} is gone")]
    ClientGone(String),

    /// The notification surface rejected an operation.
    #[error("Notification error: {0}")]
    Notification(String),

    /// A store name that the registry has no policy for.
    #[error("Unknown cache store: {0}")]
    UnknownStore(String),

    /// A lifecycle event arrived in a state that cannot accept it.
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// State the worker was in.
        from: String,
        /// State the event tried to move to.
        to: String,
    },
}

/// A specialized `Result` type for lawnsync-worker operations.
pub type Result<T> = std::result::Result<T, Error>;
