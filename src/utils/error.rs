//! The `error` module defines the error type used throughout the `weft`
//! library.
//!
//! Every fallible public operation returns [`Result`], so callers have a
//! single error enum to match on regardless of which layer failed.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the fabric client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every broker in the directory was tried and none could be reached.
    #[error("unable to connect to any broker in the directory")]
    ConnectionFailed,

    /// An operation that needs a live broker connection was invoked without one.
    #[error("client is not connected to a broker")]
    NotConnected,

    /// `connect` was called while a connection is already established or in progress.
    #[error("client is already connected")]
    AlreadyConnected,

    /// A synchronous request did not receive a response within its timeout.
    #[error("timed out waiting for a response to request {0}")]
    RequestTimeout(String),

    /// The service registry did not acknowledge a registration change in time.
    #[error("timed out waiting for the service registry to acknowledge")]
    RegistrationTimeout,

    /// The client was shut down while the operation was in flight.
    #[error("operation aborted by client shutdown")]
    Shutdown,

    /// A broker definition could not be parsed.
    #[error("malformed broker definition: {0}")]
    MalformedBroker(String),

    /// No service with the given id is registered on this client.
    #[error("no service registered with id {0}")]
    UnknownService(String),

    /// A service with the given id is already registered on this client.
    #[error("service {0} is already registered")]
    ServiceAlreadyRegistered(String),

    /// Failure loading or merging configuration.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Failure building the TLS context (bad CA bundle, cert or key).
    #[error("TLS setup error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure at the WebSocket layer.
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
