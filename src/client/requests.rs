//! Request/response correlation.
//!
//! Every outbound request parks an entry in the pending table, keyed by its
//! message id. Inbound replies are matched against the table and resolve
//! their entry exactly once: a matched entry is removed under the lock before
//! its waiter is notified, so a reply racing a timeout can never deliver
//! twice. Replies with no pending entry (late arrivals, duplicates from the
//! at-least-once substrate) are dropped.
//!
//! Asynchronous requests carry a deadline; a reaper task sweeps the table and
//! resolves expired entries with a synthesized timeout error reply.
//! Synchronous waiters enforce their own deadline on the await side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::client::callbacks::ResponseCallback;
use crate::message::{ERR_CLIENT_DISCONNECTED, ERR_RESPONSE_TIMEOUT, ErrorResponse, Reply};

const REAPER_TICK: Duration = Duration::from_millis(100);

/// What a synchronous waiter receives when its entry resolves.
pub(crate) enum SyncOutcome {
    Reply(Reply),
    Shutdown,
}

enum Pending {
    Sync(oneshot::Sender<SyncOutcome>),
    Async {
        callback: Arc<dyn ResponseCallback>,
        deadline: Instant,
    },
}

/// The pending-request table.
pub(crate) struct RequestManager {
    pending: Mutex<HashMap<String, Pending>>,
}

impl RequestManager {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Parks a synchronous waiter for the given request id.
    pub(crate) fn register_sync(&self, message_id: &str) -> oneshot::Receiver<SyncOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(message_id.to_string(), Pending::Sync(tx));
        rx
    }

    /// Parks an asynchronous callback with a deadline for the given request id.
    pub(crate) fn register_async(
        &self,
        message_id: &str,
        callback: Arc<dyn ResponseCallback>,
        deadline: Instant,
    ) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(message_id.to_string(), Pending::Async { callback, deadline });
    }

    /// Drops the entry for a request whose send failed or whose waiter gave up.
    pub(crate) fn discard(&self, message_id: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(message_id);
    }

    /// Resolves the pending entry matching the reply, if any.
    pub(crate) fn resolve(&self, reply: &Reply) {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(reply.request_message_id())
        };
        match entry {
            Some(Pending::Sync(tx)) => {
                // The waiter may have timed out between removal and here; the
                // reply is then dropped, which is the exactly-once outcome.
                let _ = tx.send(SyncOutcome::Reply(reply.clone()));
            }
            Some(Pending::Async { callback, .. }) => callback.on_response(reply),
            None => trace!(
                "Dropping reply with no pending request: {}",
                reply.request_message_id()
            ),
        }
    }

    /// Resolves every expired asynchronous entry with a timeout error reply.
    pub(crate) fn reap_expired(&self, now: Instant) {
        let expired: Vec<(String, Arc<dyn ResponseCallback>)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| {
                    matches!(entry, Pending::Async { deadline, .. } if *deadline <= now)
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| match pending.remove(&id) {
                    Some(Pending::Async { callback, .. }) => Some((id, callback)),
                    _ => None,
                })
                .collect()
        };
        for (message_id, callback) in expired {
            debug!("Request {message_id} timed out");
            let reply = Reply::Error(ErrorResponse::synthesized(
                &message_id,
                ERR_RESPONSE_TIMEOUT,
                "timed out waiting for a response",
            ));
            callback.on_response(&reply);
        }
    }

    /// Resolves every pending entry on shutdown: synchronous waiters observe
    /// the shutdown, asynchronous callbacks receive a disconnected error reply.
    pub(crate) fn cancel_all(&self) {
        let drained: Vec<(String, Pending)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (message_id, entry) in drained {
            match entry {
                Pending::Sync(tx) => {
                    let _ = tx.send(SyncOutcome::Shutdown);
                }
                Pending::Async { callback, .. } => {
                    let reply = Reply::Error(ErrorResponse::synthesized(
                        &message_id,
                        ERR_CLIENT_DISCONNECTED,
                        "client disconnected before a response arrived",
                    ));
                    callback.on_response(&reply);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Inbound replies reach the manager through the response-callback table,
/// where it is registered under the match-all pattern.
impl ResponseCallback for RequestManager {
    fn on_response(&self, reply: &Reply) {
        self.resolve(reply);
    }
}

/// Periodically sweeps the pending table; exits once the owning client is gone.
pub(crate) async fn run_reaper(manager: Weak<RequestManager>) {
    let mut tick = tokio::time::interval(REAPER_TICK);
    loop {
        tick.tick().await;
        let Some(manager) = manager.upgrade() else {
            return;
        };
        manager.reap_expired(Instant::now());
    }
}
