//! The client facade and the shared core behind it.
//!
//! [`Client`] is the public face: identity, connection control, pub/sub,
//! request/response and service registration. The [`Inner`] core is shared
//! (via `Arc`) with the connection supervisor, the dispatch workers and the
//! service manager's background tasks.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::client::callbacks::{EventCallback, RequestCallback, ResponseCallback};
use crate::client::connection::{ConnectionState, run_dispatch_worker, run_supervisor};
use crate::client::requests::{RequestManager, SyncOutcome, run_reaper};
use crate::client::service::{ServiceManager, ServiceRegistrationInfo};
use crate::client::subscriptions::SubscriptionRegistry;
use crate::config::Settings;
use crate::message::{Event, Message, Reply, Request};
use crate::transport::frame::ClientFrame;
use crate::transport::tls::build_client_config;
use crate::transport::websocket::FrameSender;
use crate::utils::error::{ClientError, Result};

/// Prefix under which each client's private reply topic lives.
const REPLY_TOPIC_PREFIX: &str = "/weft/client/";

/// A fabric client: one logical connection to the broker directory, plus the
/// pub/sub, request/response and service machinery on top of it.
///
/// The client must be created and used inside a Tokio runtime; construction
/// spawns the dispatch workers and the request reaper.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(settings: Settings) -> Result<Self> {
        let tls = settings
            .tls
            .as_ref()
            .map(build_client_config)
            .transpose()?;
        let client_id = settings
            .client
            .client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let reply_to_topic = format!("{REPLY_TOPIC_PREFIX}{client_id}");

        let (queue_tx, queue_rx) = mpsc::channel(settings.dispatch.incoming_queue_size.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let pool_size = settings.dispatch.incoming_pool_size.max(1);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            client_id,
            reply_to_topic,
            settings,
            tls,
            subscriptions: SubscriptionRegistry::new(),
            requests: Arc::new(RequestManager::new()),
            services: Arc::new(ServiceManager::new(weak.clone())),
            link: Mutex::new(None),
            last_broker: Mutex::new(None),
            state_tx,
            shutdown_tx,
            queue_tx,
            supervisor: Mutex::new(None),
        });

        // The private reply topic is always subscribed, and all replies flow
        // through the correlation engine.
        inner.subscriptions.add_topic(&inner.reply_to_topic);
        inner
            .subscriptions
            .add_response_callback("", Arc::clone(&inner.requests) as Arc<dyn ResponseCallback>);

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for _ in 0..pool_size {
            tokio::spawn(run_dispatch_worker(
                Arc::downgrade(&inner),
                Arc::clone(&queue_rx),
            ));
        }
        tokio::spawn(run_reaper(Arc::downgrade(&inner.requests)));

        Ok(Self { inner })
    }

    /// The id this client identifies itself with on the fabric.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// The private topic replies to this client's requests arrive on.
    pub fn reply_to_topic(&self) -> &str {
        &self.inner.reply_to_topic
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// A watch on the connection state, for callers that want to observe
    /// transitions rather than poll.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The broker currently serving this client, when connected.
    pub fn current_broker(&self) -> Option<Broker> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.inner.last_broker()
    }

    /// Connects to the fabric, trying brokers in directory order (preferring
    /// the one that served the previous session). Resolves once connected, or
    /// with an error once the configured retry budget is exhausted.
    pub async fn connect(&self) -> Result<()> {
        let ready = {
            let mut supervisor = self
                .inner
                .supervisor
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
                return Err(ClientError::AlreadyConnected);
            }
            self.inner.shutdown_tx.send_replace(false);
            let (ready_tx, ready_rx) = oneshot::channel();
            *supervisor = Some(tokio::spawn(run_supervisor(
                Arc::clone(&self.inner),
                ready_tx,
            )));
            ready_rx
        };
        ready.await.map_err(|_| ClientError::ConnectionFailed)?
    }

    /// Disconnects from the fabric. Hosted services are withdrawn from the
    /// registry first (best effort), then in-flight requests are resolved
    /// with a shutdown outcome. Idempotent.
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Connected {
            self.inner.services.withdraw_all(&self.inner).await;
        }
        self.inner.shutdown_tx.send_replace(true);
        let handle = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Subscribes to a topic (or wildcard pattern) without attaching a
    /// callback. The subscription is replayed automatically after reconnects.
    pub fn subscribe(&self, topic: &str) {
        self.inner.subscribe(topic);
    }

    pub fn unsubscribe(&self, topic: &str) {
        self.inner.unsubscribe(topic);
    }

    /// The topic patterns this client is currently subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.topics()
    }

    /// Attaches an event callback for a topic pattern. With `subscribe` true
    /// the matching transport subscription is established as well.
    pub fn add_event_callback(
        &self,
        pattern: &str,
        callback: Arc<dyn EventCallback>,
        subscribe: bool,
    ) {
        if self.inner.subscriptions.add_event_callback(pattern, callback) && subscribe {
            self.inner.subscribe(pattern);
        }
    }

    /// Detaches an event callback. With `unsubscribe` true the matching
    /// transport subscription interest is released as well; pass false when
    /// the callback was attached without one, so a subscription established
    /// explicitly via [`Client::subscribe`] stays intact.
    pub fn remove_event_callback(
        &self,
        pattern: &str,
        callback: &Arc<dyn EventCallback>,
        unsubscribe: bool,
    ) {
        if self.inner.subscriptions.remove_event_callback(pattern, callback) && unsubscribe {
            self.inner.unsubscribe(pattern);
        }
    }

    pub fn add_response_callback(&self, pattern: &str, callback: Arc<dyn ResponseCallback>) {
        self.inner.subscriptions.add_response_callback(pattern, callback);
    }

    pub fn remove_response_callback(&self, pattern: &str, callback: &Arc<dyn ResponseCallback>) {
        self.inner.subscriptions.remove_response_callback(pattern, callback);
    }

    pub fn add_request_callback(&self, pattern: &str, callback: Arc<dyn RequestCallback>) {
        self.inner.subscriptions.add_request_callback(pattern, callback);
    }

    pub fn remove_request_callback(&self, pattern: &str, callback: &Arc<dyn RequestCallback>) {
        self.inner.subscriptions.remove_request_callback(pattern, callback);
    }

    /// Publishes an event to its destination topic.
    pub fn send_event(&self, event: Event) -> Result<()> {
        self.inner.publish_message(Message::Event(event))
    }

    /// Sends a response to a request served outside the service registry,
    /// from a manually attached request callback.
    pub fn send_response(&self, response: crate::message::Response) -> Result<()> {
        self.inner.publish_message(Message::Response(response))
    }

    pub fn send_error_response(&self, error: crate::message::ErrorResponse) -> Result<()> {
        self.inner.publish_message(Message::ErrorResponse(error))
    }

    /// Sends a request and waits for its reply. `timeout` defaults to the
    /// configured request timeout; on expiry the request is abandoned and any
    /// late reply is dropped.
    ///
    /// Must not be called from inside a request handler or callback: those
    /// run on the dispatch workers this call's reply must come through.
    pub async fn sync_request(&self, request: Request, timeout: Option<Duration>) -> Result<Reply> {
        self.inner.sync_request(request, timeout).await
    }

    /// Sends a request and delivers its reply (or a synthesized timeout
    /// error) to the callback. The callback fires exactly once.
    pub fn async_request(
        &self,
        request: Request,
        callback: Arc<dyn ResponseCallback>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.inner.async_request(request, callback, timeout)
    }

    /// Registers a service and waits for the registry's acknowledgment.
    pub async fn register_service_sync(
        &self,
        info: ServiceRegistrationInfo,
        timeout: Duration,
    ) -> Result<()> {
        self.inner
            .services
            .register(&self.inner, info, Some(timeout))
            .await
    }

    /// Registers a service without waiting for acknowledgment; the
    /// announcement happens in the background, or at the next connect.
    pub async fn register_service_async(&self, info: ServiceRegistrationInfo) -> Result<()> {
        self.inner.services.register(&self.inner, info, None).await
    }

    /// Unregisters a service and waits for the registry to acknowledge the
    /// withdrawal.
    pub async fn unregister_service_sync(&self, service_id: &str, timeout: Duration) -> Result<()> {
        self.inner
            .services
            .unregister(&self.inner, service_id, Some(timeout))
            .await
    }

    /// Unregisters a service, withdrawing it in the background.
    pub async fn unregister_service_async(&self, service_id: &str) -> Result<()> {
        self.inner
            .services
            .unregister(&self.inner, service_id, None)
            .await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Stops the supervisor and unblocks any waiters; background tasks
        // observe the dropped Arc and exit.
        self.inner.shutdown_tx.send_replace(true);
        self.inner.requests.cancel_all();
    }
}

/// State shared between the facade and the background tasks.
pub(crate) struct Inner {
    pub(crate) client_id: String,
    pub(crate) reply_to_topic: String,
    settings: Settings,
    tls: Option<Arc<rustls::ClientConfig>>,
    subscriptions: SubscriptionRegistry,
    requests: Arc<RequestManager>,
    services: Arc<ServiceManager>,
    link: Mutex<Option<FrameSender>>,
    last_broker: Mutex<Option<Broker>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    queue_tx: mpsc::Sender<(String, Message)>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn tls(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls.as_ref()
    }

    pub(crate) fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub(crate) fn requests(&self) -> &Arc<RequestManager> {
        &self.requests
    }

    pub(crate) fn services(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        debug!("Connection state: {state:?}");
        self.state_tx.send_replace(state);
    }

    pub(crate) fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn install_link(&self, sender: FrameSender) {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        *link = Some(sender);
    }

    pub(crate) fn drop_link(&self) {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        *link = None;
    }

    fn link(&self) -> Option<FrameSender> {
        self.link.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn last_broker(&self) -> Option<Broker> {
        self.last_broker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn record_broker(&self, broker: Broker) {
        let mut last = self.last_broker.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(broker);
    }

    pub(crate) async fn enqueue(
        &self,
        topic: String,
        message: Message,
    ) -> std::result::Result<(), mpsc::error::SendError<(String, Message)>> {
        self.queue_tx.send((topic, message)).await
    }

    /// Runs the callbacks matching an inbound message. Invoked on the
    /// dispatch workers.
    pub(crate) fn route_message(&self, topic: &str, message: &Message) {
        match message {
            Message::Event(event) => self.subscriptions.fire_event(topic, event),
            Message::Request(request) => self.subscriptions.fire_request(topic, request),
            Message::Response(response) => self
                .subscriptions
                .fire_response(topic, &Reply::Response(response.clone())),
            Message::ErrorResponse(error) => self
                .subscriptions
                .fire_response(topic, &Reply::Error(error.clone())),
        }
    }

    /// Records interest in a topic and, when this is the first interest and a
    /// link is up, sends the subscribe frame. A send failure is ignored: the
    /// topic is in the desired set and will be replayed on reconnect.
    pub(crate) fn subscribe(&self, topic: &str) {
        if self.subscriptions.add_topic(topic) {
            if let Some(link) = self.link() {
                let _ = link.send(&ClientFrame::Subscribe {
                    topic: topic.to_string(),
                });
            }
        }
    }

    pub(crate) fn unsubscribe(&self, topic: &str) {
        if self.subscriptions.remove_topic(topic) {
            if let Some(link) = self.link() {
                let _ = link.send(&ClientFrame::Unsubscribe {
                    topic: topic.to_string(),
                });
            }
        }
    }

    /// Stamps the message with this client's id and publishes it.
    pub(crate) fn publish_message(&self, mut message: Message) -> Result<()> {
        message.set_source_client_id(&self.client_id);
        let link = self.link().ok_or(ClientError::NotConnected)?;
        link.send(&ClientFrame::Publish {
            topic: message.destination_topic().to_string(),
            message,
        })
    }

    pub(crate) fn send_reply(&self, reply: Reply) -> Result<()> {
        match reply {
            Reply::Response(response) => self.publish_message(Message::Response(response)),
            Reply::Error(error) => self.publish_message(Message::ErrorResponse(error)),
        }
    }

    fn prepare_request(&self, request: &mut Request) {
        request.reply_to_topic = self.reply_to_topic.clone();
        request.source_client_id = self.client_id.clone();
    }

    fn request_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(Duration::from_secs(
            self.settings.client.default_request_timeout_secs,
        ))
    }

    pub(crate) async fn sync_request(
        &self,
        mut request: Request,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        self.prepare_request(&mut request);
        let message_id = request.message_id.clone();
        let receiver = self.requests.register_sync(&message_id);

        if let Err(err) = self.publish_message(Message::Request(request)) {
            self.requests.discard(&message_id);
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout(timeout), receiver).await {
            Ok(Ok(SyncOutcome::Reply(reply))) => Ok(reply),
            Ok(Ok(SyncOutcome::Shutdown)) => Err(ClientError::Shutdown),
            Ok(Err(_)) => Err(ClientError::Shutdown),
            Err(_) => {
                // Abandon the entry; a reply arriving after this point has
                // nothing to resolve and is dropped.
                self.requests.discard(&message_id);
                warn!("Request {message_id} timed out");
                Err(ClientError::RequestTimeout(message_id))
            }
        }
    }

    pub(crate) fn async_request(
        &self,
        mut request: Request,
        callback: Arc<dyn ResponseCallback>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.prepare_request(&mut request);
        let message_id = request.message_id.clone();
        let deadline = Instant::now() + self.request_timeout(timeout);
        self.requests.register_async(&message_id, callback, deadline);

        if let Err(err) = self.publish_message(Message::Request(request)) {
            self.requests.discard(&message_id);
            return Err(err);
        }
        Ok(())
    }
}
