//! The `message` module defines the fabric message envelope.
//!
//! Every payload that crosses the fabric travels inside one of four message
//! kinds: an [`Event`] (fire-and-forget broadcast), a [`Request`] (expects a
//! reply), a [`Response`] (successful reply) or an [`ErrorResponse`] (failed
//! reply). The kind is part of the wire encoding, so receivers dispatch on it
//! without inspecting the payload.


use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error code reported when a request names a service that is not registered.
pub const ERR_SERVICE_UNAVAILABLE: u32 = 0x8000_0001;
/// Error code synthesized locally when an asynchronous request times out.
pub const ERR_RESPONSE_TIMEOUT: u32 = 0x8000_0002;
/// Error code synthesized locally when the client disconnects with requests in flight.
pub const ERR_CLIENT_DISCONNECTED: u32 = 0x8000_0003;
/// Error code reported when a service handler panics while serving a request.
pub const ERR_SERVICE_FAILURE: u32 = 0x8000_0004;

/// A message traveling over the fabric, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Event(Event),
    Request(Request),
    Response(Response),
    ErrorResponse(ErrorResponse),
}

impl Message {
    /// The unique id of the wrapped message.
    pub fn message_id(&self) -> &str {
        match self {
            Message::Event(m) => &m.message_id,
            Message::Request(m) => &m.message_id,
            Message::Response(m) => &m.message_id,
            Message::ErrorResponse(m) => &m.message_id,
        }
    }

    /// The topic the wrapped message is addressed to.
    pub fn destination_topic(&self) -> &str {
        match self {
            Message::Event(m) => &m.destination_topic,
            Message::Request(m) => &m.destination_topic,
            Message::Response(m) => &m.destination_topic,
            Message::ErrorResponse(m) => &m.destination_topic,
        }
    }

    pub(crate) fn set_source_client_id(&mut self, client_id: &str) {
        let source = match self {
            Message::Event(m) => &mut m.source_client_id,
            Message::Request(m) => &mut m.source_client_id,
            Message::Response(m) => &mut m.source_client_id,
            Message::ErrorResponse(m) => &mut m.source_client_id,
        };
        if source.is_empty() {
            *source = client_id.to_string();
        }
    }
}

/// A fire-and-forget broadcast delivered to every subscriber of its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message_id: String,
    #[serde(default)]
    pub source_client_id: String,
    pub destination_topic: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    pub timestamp: i64,
}

impl Event {
    pub fn new(destination_topic: &str) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            source_client_id: String::new(),
            destination_topic: destination_topic.to_string(),
            payload: Vec::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A message addressed to a service topic that expects exactly one reply.
///
/// `reply_to_topic` and `message_id` are filled in by the client when the
/// request is sent; the serving side copies them into the reply so the
/// originating client can correlate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub message_id: String,
    #[serde(default)]
    pub source_client_id: String,
    pub destination_topic: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub reply_to_topic: String,
    /// Optional id of the specific service instance this request targets.
    /// Empty means any service owning the topic may serve it.
    #[serde(default)]
    pub service_id: String,
    pub timestamp: i64,
}

impl Request {
    pub fn new(destination_topic: &str) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            source_client_id: String::new(),
            destination_topic: destination_topic.to_string(),
            payload: Vec::new(),
            reply_to_topic: String::new(),
            service_id: String::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A successful reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message_id: String,
    #[serde(default)]
    pub source_client_id: String,
    pub destination_topic: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Id of the request this response answers.
    pub request_message_id: String,
    #[serde(default)]
    pub service_id: String,
    pub timestamp: i64,
}

impl Response {
    /// Builds a response addressed back at the request's reply topic, carrying
    /// the correlation id and the serving service's id.
    pub fn for_request(request: &Request) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            source_client_id: String::new(),
            destination_topic: request.reply_to_topic.clone(),
            payload: Vec::new(),
            request_message_id: request.message_id.clone(),
            service_id: request.service_id.clone(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A failed reply to a [`Request`], carrying a numeric error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message_id: String,
    #[serde(default)]
    pub source_client_id: String,
    pub destination_topic: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    pub request_message_id: String,
    #[serde(default)]
    pub service_id: String,
    pub error_code: u32,
    pub error_message: String,
    pub timestamp: i64,
}

impl ErrorResponse {
    /// Builds an error reply addressed back at the request's reply topic.
    pub fn for_request(request: &Request, error_code: u32, error_message: &str) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            source_client_id: String::new(),
            destination_topic: request.reply_to_topic.clone(),
            payload: Vec::new(),
            request_message_id: request.message_id.clone(),
            service_id: request.service_id.clone(),
            error_code,
            error_message: error_message.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Builds an error reply the client fabricates locally (timeout, shutdown)
    /// when no broker-delivered reply will ever arrive.
    pub(crate) fn synthesized(request_message_id: &str, error_code: u32, error_message: &str) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            source_client_id: String::new(),
            destination_topic: String::new(),
            payload: Vec::new(),
            request_message_id: request_message_id.to_string(),
            service_id: String::new(),
            error_code,
            error_message: error_message.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// The outcome of a request: either a successful [`Response`] or an
/// [`ErrorResponse`]. Exactly one `Reply` is produced per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(Response),
    Error(ErrorResponse),
}

impl Reply {
    /// Id of the request this reply answers.
    pub fn request_message_id(&self) -> &str {
        match self {
            Reply::Response(r) => &r.request_message_id,
            Reply::Error(r) => &r.request_message_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// The payload carried by the reply, empty for most error replies.
    pub fn payload(&self) -> &[u8] {
        match self {
            Reply::Response(r) => &r.payload,
            Reply::Error(r) => &r.payload,
        }
    }
}
