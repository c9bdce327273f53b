//! # Weft
//!
//! `weft` is a client library for a topic-based messaging fabric. It maintains
//! a single authenticated WebSocket connection to one broker out of a
//! configured directory, and multiplexes three interaction styles over it:
//! fire-and-forget events, correlated request/response exchanges, and hosting
//! of request-handling services.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: Broker descriptors and the connection-ordering policy over the directory.
//! - `client`: The client facade plus the connection supervisor, callback registries,
//!   request correlation and service hosting that sit behind it.
//! - `config`: Handles loading and merging client configuration.
//! - `message`: The fabric message envelope (events, requests, responses, error responses).
//! - `transport`: The WebSocket link to a broker and the JSON frame protocol spoken over it.
//! - `utils`: Contains shared utilities, such as error handling and log setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod message;
pub mod transport;
pub mod utils;

pub use broker::Broker;
pub use client::{Client, ConnectionState};
pub use message::{ErrorResponse, Event, Message, Reply, Request, Response};
pub use utils::error::{ClientError, Result};
