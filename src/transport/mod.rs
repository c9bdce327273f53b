//! The `transport` module owns the WebSocket link to a broker and the JSON
//! frame protocol spoken over it.
//!
//! `frame` defines the wire frames, `tls` builds the rustls context from the
//! configured PEM material, and `websocket` dials a broker and exposes the
//! resulting connection as a frame writer plus a frame reader.

pub mod frame;
pub mod tls;
pub mod websocket;

#[cfg(test)]
mod tests;

pub use frame::{ClientFrame, ServerFrame};
pub use websocket::{Connection, FrameSender};
