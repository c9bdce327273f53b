//! Handler traits for the three kinds of inbound traffic.
//!
//! Handlers are registered as `Arc` trait objects; the same `Arc` registered
//! twice under one pattern is stored once, and removal compares `Arc`
//! identity. Plain closures implement the traits via the blanket impls, so
//! `Arc::new(|event: &Event| ...)` is a valid event callback.

use crate::message::{Event, Reply, Request};

/// Receives events delivered for subscribed topics.
pub trait EventCallback: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventCallback for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Receives inbound requests for topics this client serves.
pub trait RequestCallback: Send + Sync {
    fn on_request(&self, request: &Request);
}

impl<F> RequestCallback for F
where
    F: Fn(&Request) + Send + Sync,
{
    fn on_request(&self, request: &Request) {
        self(request)
    }
}

/// Receives replies to requests issued by this client.
pub trait ResponseCallback: Send + Sync {
    fn on_response(&self, reply: &Reply);
}

impl<F> ResponseCallback for F
where
    F: Fn(&Reply) + Send + Sync,
{
    fn on_response(&self, reply: &Reply) {
        self(reply)
    }
}
