//! In-process broker used by the integration tests.
//!
//! Speaks the client frame protocol over real WebSocket connections, routes
//! published messages to matching subscribers (including the publisher
//! itself), and optionally plays the part of the fabric's service registry by
//! acknowledging registration and withdrawal requests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use weft::broker::Broker;
use weft::client::service::{REGISTER_TOPIC, UNREGISTER_TOPIC};
use weft::client::topic_matches;
use weft::config::Settings;
use weft::message::{Message, Response};
use weft::transport::{ClientFrame, ServerFrame};
use weft::{Client, ConnectionState};

type SessionSender = mpsc::UnboundedSender<WsMessage>;

#[derive(Default)]
struct FabricState {
    sessions: HashMap<String, SessionSender>,
    subscriptions: HashMap<String, HashSet<String>>,
    registrations: Vec<serde_json::Value>,
    withdrawals: Vec<serde_json::Value>,
}

pub struct MockBroker {
    addr: SocketAddr,
    state: Arc<Mutex<FabricState>>,
    acceptor: JoinHandle<()>,
}

impl MockBroker {
    /// Starts a broker with the registry responder enabled.
    pub async fn start() -> Self {
        Self::start_with_registry(true).await
    }

    pub async fn start_with_registry(answer_registry: bool) -> Self {
        weft::utils::logging::init("warn");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(FabricState::default()));

        let accept_state = Arc::clone(&state);
        let acceptor = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle_session(
                    stream,
                    Arc::clone(&accept_state),
                    answer_registry,
                ));
            }
        });

        Self {
            addr,
            state,
            acceptor,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// This broker as a directory entry.
    pub fn broker(&self) -> Broker {
        Broker::new("127.0.0.1", self.addr.port()).unwrap()
    }

    /// Severs every live connection, as a broker crash would.
    pub fn kill_connections(&self) {
        let state = self.state.lock().unwrap();
        for sender in state.sessions.values() {
            let _ = sender.send(WsMessage::Close(None));
        }
    }

    /// Stops accepting new connections and severs the live ones.
    pub fn shutdown(&self) {
        self.acceptor.abort();
        self.kill_connections();
    }

    pub fn registration_count(&self) -> usize {
        self.state.lock().unwrap().registrations.len()
    }

    pub fn registrations(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().registrations.clone()
    }

    pub fn withdrawal_count(&self) -> usize {
        self.state.lock().unwrap().withdrawals.len()
    }

    /// Number of sessions subscribed to the exact pattern.
    pub fn subscriber_count(&self, pattern: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .subscriptions
            .get(pattern)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}

async fn handle_session(stream: TcpStream, state: Arc<Mutex<FabricState>>, answer_registry: bool) {
    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut reader) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<WsMessage>();
    let session_id = Uuid::new_v4().to_string();
    state
        .lock()
        .unwrap()
        .sessions
        .insert(session_id.clone(), sender);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(msg)) = reader.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
            continue;
        };
        match frame {
            ClientFrame::Subscribe { topic } => {
                state
                    .lock()
                    .unwrap()
                    .subscriptions
                    .entry(topic)
                    .or_default()
                    .insert(session_id.clone());
            }
            ClientFrame::Unsubscribe { topic } => {
                if let Some(sessions) = state.lock().unwrap().subscriptions.get_mut(&topic) {
                    sessions.remove(&session_id);
                }
            }
            ClientFrame::Publish { topic, message } => {
                handle_publish(&state, answer_registry, &topic, message);
            }
        }
    }

    let mut st = state.lock().unwrap();
    st.sessions.remove(&session_id);
    for sessions in st.subscriptions.values_mut() {
        sessions.remove(&session_id);
    }
    drop(st);
    writer.abort();
}

fn handle_publish(
    state: &Arc<Mutex<FabricState>>,
    answer_registry: bool,
    topic: &str,
    message: Message,
) {
    if answer_registry {
        if let Message::Request(request) = &message {
            if topic == REGISTER_TOPIC || topic == UNREGISTER_TOPIC {
                let payload: serde_json::Value =
                    serde_json::from_slice(&request.payload).unwrap_or_default();
                {
                    let mut st = state.lock().unwrap();
                    if topic == REGISTER_TOPIC {
                        st.registrations.push(payload);
                    } else {
                        st.withdrawals.push(payload);
                    }
                }
                let reply_topic = request.reply_to_topic.clone();
                let ack = Message::Response(Response::for_request(request));
                deliver(state, &reply_topic, ack);
                return;
            }
        }
    }
    deliver(state, topic, message);
}

fn deliver(state: &Arc<Mutex<FabricState>>, topic: &str, message: Message) {
    let frame = ServerFrame::Message {
        topic: topic.to_string(),
        message,
    };
    let text = serde_json::to_string(&frame).unwrap();
    let st = state.lock().unwrap();
    let mut delivered: HashSet<&String> = HashSet::new();
    for (pattern, sessions) in &st.subscriptions {
        if !topic_matches(pattern, topic) {
            continue;
        }
        for session_id in sessions {
            if delivered.insert(session_id) {
                if let Some(sender) = st.sessions.get(session_id) {
                    let _ = sender.send(WsMessage::Text(text.clone().into()));
                }
            }
        }
    }
}

/// Settings tuned for fast test runs.
pub fn fast_settings(brokers: Vec<Broker>) -> Settings {
    let mut settings = Settings::for_brokers(brokers);
    settings.connection.connect_timeout_secs = 2;
    settings.connection.reconnect_delay_secs = 1;
    settings.connection.reconnect_delay_random = 0.0;
    settings
}

/// Waits until the client reaches the given state, or panics after 5s.
pub async fn wait_for_state(client: &Client, want: ConnectionState) {
    let mut watch = client.state_watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *watch.borrow_and_update() == want {
                return;
            }
            if watch.changed().await.is_err() {
                panic!("state watch closed while waiting for {want:?}");
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want:?}"));
}

/// Polls the condition until it holds, or panics after 5s.
pub async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

/// A TCP port with nothing listening on it.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
