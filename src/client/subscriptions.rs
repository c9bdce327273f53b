//! Callback registration tables and the topic wildcard scheme.
//!
//! Topics are `/`-separated paths. A subscription pattern is either a
//! concrete topic, the empty string (matches everything), or a wildcard
//! pattern ending in `#`, which matches every topic at or below its prefix:
//! `/finance/#` matches `/finance/orders` and `/finance/orders/fills`, and
//! the bare pattern `#` matches all topics. Wildcards appear only as the
//! terminal segment.
//!
//! Each message kind has its own table, so an event never reaches a response
//! callback even if their patterns overlap. Alongside the tables lives the
//! desired-subscription set: a reference count per topic that decides when a
//! subscribe or unsubscribe frame is owed to the broker, and what to replay
//! after a reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::client::callbacks::{EventCallback, RequestCallback, ResponseCallback};
use crate::message::{Event, Reply, Request};

/// Produces the chain of wildcard patterns that match the given topic, from
/// most to least specific. The topic itself is not included:
/// `/finance/orders` yields `/finance/#`, `/#`, `#`.
pub fn topic_wildcards(topic: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = topic.to_string();
    while current != "#" {
        current = wildcard_parent(&current);
        chain.push(current.clone());
    }
    chain
}

/// True when `pattern` covers `topic`: the empty pattern covers everything,
/// otherwise the pattern must equal the topic or appear in its wildcard chain.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    pattern.is_empty() || pattern == topic || topic_wildcards(topic).iter().any(|w| w == pattern)
}

/// One step up the wildcard chain: strips the last topic segment (or, for a
/// wildcard, the segment before the `#`) and re-appends `#`.
fn wildcard_parent(topic: &str) -> String {
    if topic.is_empty() {
        return "#".to_string();
    }
    let segments: Vec<&str> = topic.split('/').collect();
    if !topic.ends_with('#') {
        return format!("{}/#", segments[..segments.len() - 1].join("/"));
    }
    if topic.len() == 2 {
        // "/#" generalizes to the universal wildcard
        return "#".to_string();
    }
    format!(
        "{}/#",
        segments[..segments.len().saturating_sub(2)].join("/")
    )
}

/// Identity comparison for `Arc` handlers. Compares the data address only:
/// trait-object vtable pointers are not stable across coercion sites.
fn same_callback<C: ?Sized>(a: &Arc<C>, b: &Arc<C>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A pattern-keyed table of `Arc` handlers with identity-based dedupe.
struct CallbackTable<C: ?Sized> {
    entries: Mutex<HashMap<String, Vec<Arc<C>>>>,
}

impl<C: ?Sized> CallbackTable<C> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Adds the callback under the pattern; returns false when that exact
    /// `Arc` is already registered there.
    fn add(&self, pattern: &str, callback: Arc<C>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let slot = entries.entry(pattern.to_string()).or_default();
        if slot.iter().any(|existing| same_callback(existing, &callback)) {
            return false;
        }
        slot.push(callback);
        true
    }

    /// Removes the callback from the pattern; returns false when it was not
    /// registered there.
    fn remove(&self, pattern: &str, callback: &Arc<C>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = entries.get_mut(pattern) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|existing| !same_callback(existing, callback));
        let removed = slot.len() < before;
        if slot.is_empty() {
            entries.remove(pattern);
        }
        removed
    }

    /// Snapshot of every callback whose pattern covers the topic. Cloned out
    /// of the lock so handlers run without holding it.
    fn matching(&self, topic: &str) -> Vec<Arc<C>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched = Vec::new();
        if let Some(slot) = entries.get("") {
            matched.extend(slot.iter().cloned());
        }
        if let Some(slot) = entries.get(topic) {
            matched.extend(slot.iter().cloned());
        }
        for wildcard in topic_wildcards(topic) {
            if let Some(slot) = entries.get(&wildcard) {
                matched.extend(slot.iter().cloned());
            }
        }
        matched
    }
}

/// The typed callback tables plus the desired-subscription refcounts.
pub(crate) struct SubscriptionRegistry {
    events: CallbackTable<dyn EventCallback>,
    requests: CallbackTable<dyn RequestCallback>,
    responses: CallbackTable<dyn ResponseCallback>,
    topics: Mutex<HashMap<String, usize>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            events: CallbackTable::new(),
            requests: CallbackTable::new(),
            responses: CallbackTable::new(),
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add_event_callback(&self, pattern: &str, callback: Arc<dyn EventCallback>) -> bool {
        self.events.add(pattern, callback)
    }

    pub(crate) fn remove_event_callback(
        &self,
        pattern: &str,
        callback: &Arc<dyn EventCallback>,
    ) -> bool {
        self.events.remove(pattern, callback)
    }

    pub(crate) fn add_request_callback(
        &self,
        pattern: &str,
        callback: Arc<dyn RequestCallback>,
    ) -> bool {
        self.requests.add(pattern, callback)
    }

    pub(crate) fn remove_request_callback(
        &self,
        pattern: &str,
        callback: &Arc<dyn RequestCallback>,
    ) -> bool {
        self.requests.remove(pattern, callback)
    }

    pub(crate) fn add_response_callback(
        &self,
        pattern: &str,
        callback: Arc<dyn ResponseCallback>,
    ) -> bool {
        self.responses.add(pattern, callback)
    }

    pub(crate) fn remove_response_callback(
        &self,
        pattern: &str,
        callback: &Arc<dyn ResponseCallback>,
    ) -> bool {
        self.responses.remove(pattern, callback)
    }

    /// Records the desire to be subscribed to the topic; returns true when
    /// this is the first interest and a subscribe frame is owed.
    pub(crate) fn add_topic(&self, topic: &str) -> bool {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let count = topics.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Releases one interest in the topic; returns true when it was the last
    /// and an unsubscribe frame is owed.
    pub(crate) fn remove_topic(&self, topic: &str) -> bool {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        match topics.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                topics.remove(topic);
                true
            }
            None => false,
        }
    }

    /// The topics to replay to a freshly connected broker.
    pub(crate) fn topics(&self) -> Vec<String> {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.keys().cloned().collect()
    }

    pub(crate) fn fire_event(&self, topic: &str, event: &Event) {
        let callbacks = self.events.matching(topic);
        if callbacks.is_empty() {
            trace!("No event callback for topic {topic}");
        }
        for callback in callbacks {
            callback.on_event(event);
        }
    }

    pub(crate) fn fire_request(&self, topic: &str, request: &Request) {
        for callback in self.requests.matching(topic) {
            callback.on_request(request);
        }
    }

    pub(crate) fn fire_response(&self, topic: &str, reply: &Reply) {
        for callback in self.responses.matching(topic) {
            callback.on_response(reply);
        }
    }
}
