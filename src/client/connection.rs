//! The connection supervisor: owns the live broker link, walks the broker
//! directory on (re)connect, and pumps inbound frames into the dispatch
//! queue.
//!
//! One supervisor task runs per connected session. It establishes a link
//! (retrying with capped exponential backoff and jitter), replays the desired
//! subscriptions before any frame is dispatched, then reads frames until the
//! link drops or a disconnect is requested. An unrequested link loss loops
//! back into establishment when automatic reconnect is enabled.

use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broker::connection_order;
use crate::client::client::Inner;
use crate::message::Message;
use crate::transport::frame::{ClientFrame, ServerFrame};
use crate::transport::websocket::Connection;
use crate::utils::error::{ClientError, Result};

/// Lifecycle of the client's broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

pub(crate) async fn run_supervisor(inner: Arc<Inner>, ready: oneshot::Sender<Result<()>>) {
    let mut ready = Some(ready);
    let mut shutdown = inner.shutdown_watch();

    'session: loop {
        inner.set_state(ConnectionState::Connecting);

        let mut connection = match establish(&inner, &mut shutdown, ready.is_some()).await {
            Ok(connection) => connection,
            Err(err) => {
                // A shutdown can land while re-establishing; waiters parked on
                // the correlation engine must still observe it.
                inner.requests().cancel_all();
                inner.set_state(ConnectionState::Disconnected);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(err));
                }
                return;
            }
        };

        // Install the link, then replay every desired subscription before the
        // first frame is dispatched. Application traffic sent from here on
        // cannot overtake the replay.
        inner.install_link(connection.sender());
        for topic in inner.subscriptions().topics() {
            if let Err(err) = connection.send(&ClientFrame::Subscribe { topic: topic.clone() }) {
                warn!("Subscription replay for {topic} failed: {err}");
                inner.drop_link();
                continue 'session;
            }
        }

        inner.set_state(ConnectionState::Connected);
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }
        inner.services().resume_announcements();

        loop {
            tokio::select! {
                frame = connection.next_frame() => match frame {
                    Some(ServerFrame::Message { topic, message }) => {
                        // Bounded queue: a full dispatch pool backpressures
                        // the socket reader instead of buffering unboundedly.
                        if inner.enqueue(topic, message).await.is_err() {
                            inner.drop_link();
                            inner.set_state(ConnectionState::Disconnected);
                            return;
                        }
                    }
                    None => {
                        inner.drop_link();
                        inner.services().pause_announcements();
                        if inner.settings().connection.reconnect_when_disconnected {
                            warn!("Broker link lost, reconnecting");
                            continue 'session;
                        }
                        warn!("Broker link lost");
                        inner.requests().cancel_all();
                        inner.set_state(ConnectionState::Disconnected);
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow_and_update() {
                        inner.set_state(ConnectionState::Disconnecting);
                        connection.close();
                        inner.drop_link();
                        inner.services().pause_announcements();
                        inner.requests().cancel_all();
                        inner.set_state(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        }
    }
}

/// Walks the broker directory until a connection is established or the retry
/// budget runs out. The broker that served the previous session is always
/// tried first.
async fn establish(
    inner: &Arc<Inner>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
    first_connect: bool,
) -> Result<Connection> {
    let settings = inner.settings().connection.clone();
    let mut delay = Duration::from_secs(settings.reconnect_delay_secs.max(1));
    let mut failed_passes: i32 = 0;

    loop {
        if *shutdown.borrow() {
            return Err(ClientError::Shutdown);
        }

        let candidates = connection_order(&inner.settings().brokers, inner.last_broker().as_ref());
        if candidates.is_empty() {
            warn!("Broker directory is empty");
            return Err(ClientError::ConnectionFailed);
        }

        for broker in &candidates {
            if *shutdown.borrow() {
                return Err(ClientError::Shutdown);
            }
            let timeout = Duration::from_secs(settings.connect_timeout_secs);
            match Connection::open(broker, inner.tls(), timeout).await {
                Ok(connection) => {
                    inner.record_broker(broker.clone());
                    return Ok(connection);
                }
                Err(err) => warn!("Could not connect to broker {broker}: {err}"),
            }
        }

        failed_passes += 1;
        if first_connect && settings.connect_retries >= 0 && failed_passes > settings.connect_retries
        {
            return Err(ClientError::ConnectionFailed);
        }

        let wait = jittered(delay, settings.reconnect_delay_random);
        info!("No broker reachable, retrying in {:.1}s", wait.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow_and_update() {
                    return Err(ClientError::Shutdown);
                }
            }
        }

        let max = Duration::from_secs(settings.reconnect_delay_max_secs.max(1));
        delay = delay.mul_f64(settings.reconnect_back_off_multiplier.max(1.0)).min(max);
    }
}

/// Adds up to `fraction` of random jitter to the delay so a fleet of clients
/// does not reconnect in lockstep.
fn jittered(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let jitter = delay.mul_f64(fraction.min(1.0) * rand::thread_rng().r#gen::<f64>());
    delay + jitter
}

/// One dispatch worker: pulls inbound messages off the shared queue and runs
/// the matching callbacks. Exits when the client is dropped.
pub(crate) async fn run_dispatch_worker(
    inner: Weak<Inner>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<(String, Message)>>>,
) {
    loop {
        let next = { queue.lock().await.recv().await };
        match next {
            Some((topic, message)) => {
                let Some(inner) = inner.upgrade() else { return };
                inner.route_message(&topic, &message);
            }
            None => {
                debug!("Dispatch queue closed");
                return;
            }
        }
    }
}
