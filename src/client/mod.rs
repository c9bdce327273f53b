//! The `client` module contains the fabric client facade and the machinery
//! behind it: connection supervision, callback registries, request
//! correlation and service hosting.

pub mod callbacks;
pub mod service;

mod client;
mod connection;
mod requests;
mod subscriptions;


pub use callbacks::{EventCallback, RequestCallback, ResponseCallback};
pub use client::Client;
pub use connection::ConnectionState;
pub use service::{RequestHandler, ServiceError, ServiceRegistrationInfo};
pub use subscriptions::{topic_matches, topic_wildcards};
