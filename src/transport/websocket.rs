//! Client side of the WebSocket link to a single broker.
//!
//! A [`Connection`] owns the split socket: outbound frames are serialized and
//! handed to a writer task through an unbounded channel, so sending never
//! blocks the caller; inbound frames are pulled by the connection supervisor
//! via [`Connection::next_frame`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::transport::frame::{ClientFrame, ServerFrame};
use crate::utils::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live connection to one broker.
pub struct Connection {
    outbound: mpsc::UnboundedSender<WsMessage>,
    reader: SplitStream<WsStream>,
}

impl Connection {
    /// Dials the broker, preferring its host name and falling back to its IP
    /// address when the host name cannot be reached.
    pub async fn open(
        broker: &Broker,
        tls: Option<&Arc<rustls::ClientConfig>>,
        timeout: Duration,
    ) -> Result<Connection> {
        match Self::open_addr(&broker.host_name, broker.port, tls, timeout).await {
            Ok(connection) => Ok(connection),
            Err(err) => match &broker.ip_address {
                Some(ip) => {
                    warn!(
                        "Failed to reach {} by host name ({err}), retrying via {ip}",
                        broker.host_name
                    );
                    Self::open_addr(ip, broker.port, tls, timeout).await
                }
                None => Err(err),
            },
        }
    }

    async fn open_addr(
        addr: &str,
        port: u16,
        tls: Option<&Arc<rustls::ClientConfig>>,
        timeout: Duration,
    ) -> Result<Connection> {
        let scheme = if tls.is_some() { "wss" } else { "ws" };
        let url = format!("{scheme}://{addr}:{port}");
        debug!("Dialing broker at {url}");

        let connector = tls.map(|config| Connector::Rustls(Arc::clone(config)));
        let (socket, _) = tokio::time::timeout(
            timeout,
            connect_async_tls_with_config(url, None, false, connector),
        )
        .await
        .map_err(|_| {
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connection to {addr}:{port} timed out"),
            ))
        })??;

        info!("Connected to broker at {addr}:{port}");

        let (mut sink, reader) = socket.split();
        let (outbound, mut pending) = mpsc::unbounded_channel::<WsMessage>();

        // Writer task: drains the channel until the connection drops or the
        // sender side is released.
        tokio::spawn(async move {
            while let Some(msg) = pending.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        Ok(Connection { outbound, reader })
    }

    /// Serializes and queues a frame for sending.
    pub fn send(&self, frame: &ClientFrame) -> Result<()> {
        send_frame(&self.outbound, frame)
    }

    /// A cloneable handle for sending frames on this connection.
    pub fn sender(&self) -> FrameSender {
        FrameSender {
            outbound: self.outbound.clone(),
        }
    }

    /// Returns the next well-formed frame from the broker, or `None` once the
    /// link is gone. Malformed frames are logged and skipped.
    pub async fn next_frame(&mut self) -> Option<ServerFrame> {
        while let Some(msg) = self.reader.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(frame) => return Some(frame),
                    Err(err) => warn!("Ignoring malformed frame: {err}"),
                },
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {} // ping/pong/binary: nothing to dispatch
                Err(err) => {
                    warn!("Broker connection lost: {err}");
                    return None;
                }
            }
        }
        None
    }

    /// Requests an orderly close of the link.
    pub fn close(&self) {
        let _ = self.outbound.send(WsMessage::Close(None));
    }
}

/// Write-side handle to a connection, detached from the reader so the rest of
/// the client can send while the supervisor owns the read loop.
#[derive(Clone)]
pub struct FrameSender {
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl FrameSender {
    pub fn send(&self, frame: &ClientFrame) -> Result<()> {
        send_frame(&self.outbound, frame)
    }
}

fn send_frame(outbound: &mpsc::UnboundedSender<WsMessage>, frame: &ClientFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    outbound
        .send(WsMessage::Text(text.into()))
        .map_err(|_| ClientError::NotConnected)
}
