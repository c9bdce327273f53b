//! Service hosting: registration bookkeeping, registry announcements and
//! request dispatch to application handlers.
//!
//! A service is a set of request topics backed by handlers. Registering it
//! announces it to the fabric's service registry over an ordinary
//! request/response exchange; the registry's reply is the acknowledgment.
//! While the service stays registered the client re-announces it every TTL
//! interval so the registry keeps it alive, and re-announces immediately
//! after every reconnect.
//!
//! Each inbound request is answered exactly once per serving service: the
//! handler's payload becomes a response, a handler error becomes an error
//! response, and a handler panic is caught and reported as a service failure.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::callbacks::RequestCallback;
use crate::client::client::Inner;
use crate::client::connection::ConnectionState;
use crate::message::{
    ERR_SERVICE_FAILURE, ERR_SERVICE_UNAVAILABLE, ErrorResponse, Reply, Request, Response,
};
use crate::utils::error::{ClientError, Result};

/// Topic on which services are announced to the fabric's registry.
pub const REGISTER_TOPIC: &str = "/weft/service/registry/register";
/// Topic on which service withdrawals are announced.
pub const UNREGISTER_TOPIC: &str = "/weft/service/registry/unregister";

/// Default service time-to-live, in minutes.
pub const DEFAULT_TTL_MINS: u32 = 60;

/// Timeout applied to TTL re-announcements and best-effort withdrawals.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(10);

/// An error produced by a service handler, reported back to the requester as
/// an error response.
#[derive(Debug, Clone)]
pub struct ServiceError {
    pub code: u32,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: u32, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

/// Serves requests for one topic of a registered service.
///
/// The returned payload becomes the response; an error becomes an error
/// response with the handler's code and message. Handlers run on the dispatch
/// workers, so a handler must not block on its own synchronous request.
pub trait RequestHandler: Send + Sync {
    fn handle_request(&self, request: &Request) -> std::result::Result<Vec<u8>, ServiceError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request) -> std::result::Result<Vec<u8>, ServiceError> + Send + Sync,
{
    fn handle_request(&self, request: &Request) -> std::result::Result<Vec<u8>, ServiceError> {
        self(request)
    }
}

/// Everything the fabric needs to know about a hosted service.
pub struct ServiceRegistrationInfo {
    /// A textual type such as `"/myorg/storage"`, shared by equivalent
    /// service instances.
    pub service_type: String,
    service_id: String,
    /// Minutes the registry keeps the service alive without a re-announcement.
    pub ttl_mins: u32,
    /// Free-form attributes published alongside the registration.
    pub metadata: HashMap<String, String>,
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl ServiceRegistrationInfo {
    pub fn new(service_type: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            service_id: Uuid::new_v4().to_string(),
            ttl_mins: DEFAULT_TTL_MINS,
            metadata: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    /// The generated id uniquely identifying this service instance.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Adds a request topic served by this service. Registering a second
    /// handler for the same topic replaces the first, keeping a single
    /// responder per topic.
    pub fn add_topic(&mut self, topic: &str, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(topic.to_string(), handler);
    }

    /// The request topics this service owns.
    pub fn topics(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    fn handler_for(&self, topic: &str) -> Option<&Arc<dyn RequestHandler>> {
        if let Some(handler) = self.handlers.get(topic) {
            return Some(handler);
        }
        self.handlers
            .iter()
            .find(|(pattern, _)| crate::client::subscriptions::topic_matches(pattern, topic))
            .map(|(_, handler)| handler)
    }
}

struct ServiceEntry {
    info: ServiceRegistrationInfo,
    announcer: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceEntry {
    /// Starts (or restarts) the TTL announcement loop for this service.
    fn start_announcer(entry: &Arc<Self>, inner: Weak<Inner>, announce_now: bool) {
        let task_entry = Arc::clone(entry);
        let handle = tokio::spawn(async move {
            let ttl = Duration::from_secs(u64::from(task_entry.info.ttl_mins.max(1)) * 60);
            if announce_now {
                announce(&inner, &task_entry.info).await;
            }
            loop {
                tokio::time::sleep(ttl).await;
                announce(&inner, &task_entry.info).await;
            }
        });
        let mut announcer = entry.announcer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = announcer.replace(handle) {
            old.abort();
        }
    }

    fn stop_announcer(&self) {
        let mut announcer = self.announcer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = announcer.take() {
            handle.abort();
        }
    }
}

/// The set of services hosted by one client.
pub(crate) struct ServiceManager {
    inner: Weak<Inner>,
    services: Mutex<HashMap<String, Arc<ServiceEntry>>>,
}

impl ServiceManager {
    pub(crate) fn new(inner: Weak<Inner>) -> Self {
        Self {
            inner,
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a service. With a timeout the call requires a connection and
    /// waits for the registry's acknowledgment; without one the announcement
    /// happens in the background (or at the next connect).
    pub(crate) async fn register(
        &self,
        inner: &Arc<Inner>,
        info: ServiceRegistrationInfo,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if timeout.is_some() && inner.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let service_id = info.service_id().to_string();
        let topics = info.topics();
        let entry = {
            let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
            if services.contains_key(&service_id) {
                return Err(ClientError::ServiceAlreadyRegistered(service_id));
            }
            let entry = Arc::new(ServiceEntry {
                info,
                announcer: Mutex::new(None),
            });
            services.insert(service_id.clone(), Arc::clone(&entry));
            entry
        };

        for topic in &topics {
            inner
                .subscriptions()
                .add_request_callback(topic, Arc::clone(inner.services()) as Arc<dyn RequestCallback>);
            inner.subscribe(topic);
        }

        match timeout {
            Some(timeout) => {
                let announced = announce_once(inner, &entry.info, timeout).await;
                // The service stays registered even when the acknowledgment is
                // missing; the TTL loop keeps retrying the announcement.
                ServiceEntry::start_announcer(&entry, self.inner.clone(), announced.is_err());
                announced.map_err(|err| match err {
                    ClientError::RequestTimeout(_) => ClientError::RegistrationTimeout,
                    other => other,
                })?;
                info!("Service {service_id} registered");
            }
            None => {
                if inner.state() == ConnectionState::Connected {
                    ServiceEntry::start_announcer(&entry, self.inner.clone(), true);
                }
            }
        }
        Ok(())
    }

    /// Unregisters a service and withdraws it from the registry.
    pub(crate) async fn unregister(
        &self,
        inner: &Arc<Inner>,
        service_id: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if timeout.is_some() && inner.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let entry = {
            let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
            services
                .remove(service_id)
                .ok_or_else(|| ClientError::UnknownService(service_id.to_string()))?
        };
        entry.stop_announcer();

        let manager_callback = Arc::clone(inner.services()) as Arc<dyn RequestCallback>;
        for topic in entry.info.topics() {
            // The manager callback is shared by every hosted service; keep it
            // while another service still owns the topic.
            if !self.topic_still_owned(&topic) {
                inner
                    .subscriptions()
                    .remove_request_callback(&topic, &manager_callback);
            }
            inner.unsubscribe(&topic);
        }

        match timeout {
            Some(timeout) => {
                withdraw_once(inner, service_id, timeout)
                    .await
                    .map_err(|err| match err {
                        ClientError::RequestTimeout(_) => ClientError::RegistrationTimeout,
                        other => other,
                    })?;
                info!("Service {service_id} unregistered");
            }
            None => {
                if inner.state() == ConnectionState::Connected {
                    let inner = Arc::clone(inner);
                    let service_id = service_id.to_string();
                    tokio::spawn(async move {
                        if let Err(err) = withdraw_once(&inner, &service_id, ANNOUNCE_TIMEOUT).await
                        {
                            warn!("Withdrawal of service {service_id} failed: {err}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    fn topic_still_owned(&self, topic: &str) -> bool {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services
            .values()
            .any(|entry| entry.info.topics().iter().any(|owned| owned == topic))
    }

    /// Restarts TTL announcement loops after a (re)connect, announcing every
    /// hosted service immediately.
    pub(crate) fn resume_announcements(&self) {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        for entry in services.values() {
            ServiceEntry::start_announcer(entry, self.inner.clone(), true);
        }
    }

    /// Stops TTL announcement loops when the link goes away.
    pub(crate) fn pause_announcements(&self) {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        for entry in services.values() {
            entry.stop_announcer();
        }
    }

    /// Withdraws every hosted service ahead of a clean disconnect. Services
    /// stay registered locally and are re-announced on the next connect.
    pub(crate) async fn withdraw_all(&self, inner: &Arc<Inner>) {
        let entries: Vec<Arc<ServiceEntry>> = {
            let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
            services.values().cloned().collect()
        };
        for entry in entries {
            entry.stop_announcer();
            let service_id = entry.info.service_id();
            if let Err(err) = withdraw_once(inner, service_id, ANNOUNCE_TIMEOUT).await {
                warn!("Withdrawal of service {service_id} failed: {err}");
            }
        }
    }

    fn serve(&self, inner: &Arc<Inner>, entry: &ServiceEntry, request: &Request) {
        let service_id = entry.info.service_id();
        let reply = match entry.info.handler_for(&request.destination_topic) {
            None => Reply::Error(ErrorResponse::for_request(
                request,
                ERR_SERVICE_UNAVAILABLE,
                "service does not handle this topic",
            )),
            Some(handler) => {
                // A panicking handler must not take the dispatch worker down,
                // and the requester still gets its single reply.
                let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle_request(request)));
                match outcome {
                    Ok(Ok(payload)) => {
                        Reply::Response(Response::for_request(request).with_payload(payload))
                    }
                    Ok(Err(err)) => Reply::Error(ErrorResponse::for_request(
                        request,
                        err.code,
                        &err.message,
                    )),
                    Err(_) => {
                        warn!("Handler for {} panicked", request.destination_topic);
                        Reply::Error(ErrorResponse::for_request(
                            request,
                            ERR_SERVICE_FAILURE,
                            "service handler failed",
                        ))
                    }
                }
            }
        };

        if request.reply_to_topic.is_empty() {
            warn!("Dropping reply to request {} with no reply topic", request.message_id);
            return;
        }
        let reply = stamp_service_id(reply, service_id);
        if let Err(err) = inner.send_reply(reply) {
            warn!("Failed to send reply for request {}: {err}", request.message_id);
        }
    }
}

/// Inbound requests reach the manager through the request-callback table.
impl RequestCallback for ServiceManager {
    fn on_request(&self, request: &Request) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let targets: Vec<Arc<ServiceEntry>> = {
            let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
            if request.service_id.is_empty() {
                services
                    .values()
                    .filter(|entry| entry.info.handler_for(&request.destination_topic).is_some())
                    .cloned()
                    .collect()
            } else {
                match services.get(&request.service_id) {
                    Some(entry) => vec![Arc::clone(entry)],
                    None => Vec::new(),
                }
            }
        };

        if targets.is_empty() {
            debug!(
                "No service for request {} (service id {:?})",
                request.message_id, request.service_id
            );
            if !request.service_id.is_empty() && !request.reply_to_topic.is_empty() {
                let reply = Reply::Error(ErrorResponse::for_request(
                    request,
                    ERR_SERVICE_UNAVAILABLE,
                    "unable to locate service",
                ));
                if let Err(err) = inner.send_reply(reply) {
                    warn!("Failed to report missing service: {err}");
                }
            }
            return;
        }

        for entry in targets {
            self.serve(&inner, &entry, request);
        }
    }
}

fn stamp_service_id(reply: Reply, service_id: &str) -> Reply {
    match reply {
        Reply::Response(mut response) => {
            if response.service_id.is_empty() {
                response.service_id = service_id.to_string();
            }
            Reply::Response(response)
        }
        Reply::Error(mut error) => {
            if error.service_id.is_empty() {
                error.service_id = service_id.to_string();
            }
            Reply::Error(error)
        }
    }
}

async fn announce_once(
    inner: &Arc<Inner>,
    info: &ServiceRegistrationInfo,
    timeout: Duration,
) -> Result<()> {
    let payload = serde_json::to_vec(&serde_json::json!({
        "serviceType": info.service_type,
        "serviceGuid": info.service_id(),
        "metaData": info.metadata,
        "requestChannels": info.topics(),
        "ttlMins": info.ttl_mins,
    }))?;
    let request = Request::new(REGISTER_TOPIC).with_payload(payload);
    // Any reply counts as the acknowledgment
    inner.sync_request(request, Some(timeout)).await?;
    Ok(())
}

async fn withdraw_once(inner: &Arc<Inner>, service_id: &str, timeout: Duration) -> Result<()> {
    let payload = serde_json::to_vec(&serde_json::json!({ "serviceGuid": service_id }))?;
    let request = Request::new(UNREGISTER_TOPIC).with_payload(payload);
    inner.sync_request(request, Some(timeout)).await?;
    Ok(())
}

async fn announce(inner: &Weak<Inner>, info: &ServiceRegistrationInfo) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if let Err(err) = announce_once(&inner, info, ANNOUNCE_TIMEOUT).await {
        warn!(
            "Re-announcement of service {} failed: {err}",
            info.service_id()
        );
    }
}
