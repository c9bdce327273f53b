use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Frames sent from the client to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "publish")]
    Publish { topic: String, message: Message },
}

/// Frames sent from the broker to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// A message delivered for a topic the client is subscribed to. `topic`
    /// carries the concrete topic the message was published on, which may be
    /// narrower than the wildcard that matched it.
    #[serde(rename = "message")]
    Message { topic: String, message: Message },
}
