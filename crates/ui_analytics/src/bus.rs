//! Named-topic publish/subscribe with replay latches
//!
//! The bus is the notification backbone for integration lifecycle topics and
//! environment signals. A topic can be *latched* by a publish that asks for
//! it: from then on a new subscriber is invoked immediately (without a
//! payload) instead of being registered. Scoped views namespace topic names
//! by string prefix, which is the only composition mechanism.

use crate::error::IntegrationError;
use crate::utils::catch_panic;
use compact_str::{format_compact, CompactString};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Payload delivered with a publish.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicPayload {
    /// Failure reported by an integration (`error` / `init-error` topics)
    Error(IntegrationError),
    /// Arbitrary structured data
    Value(serde_json::Value),
}

impl TopicPayload {
    /// The carried integration error, if this payload is one
    pub fn as_error(&self) -> Option<&IntegrationError> {
        match self {
            TopicPayload::Error(e) => Some(e),
            TopicPayload::Value(_) => None,
        }
    }
}

/// Options controlling a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Mark the topic latched once every current subscriber has run
    pub latch: bool,
}

impl PublishOptions {
    /// Publish and latch the topic
    pub fn latched() -> Self {
        Self { latch: true }
    }
}

/// Opaque handle identifying one subscription instance.
///
/// Subscribing the same closure twice yields two tokens, and unsubscribing
/// one token removes exactly that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type TopicCallback = Arc<dyn Fn(Option<&TopicPayload>) + Send + Sync>;

#[derive(Default)]
struct TopicEntry {
    latched: bool,
    subscribers: SmallVec<[(SubscriptionToken, TopicCallback); 4]>,
}

/// Process-local topic bus.
pub struct TopicBus {
    topics: DashMap<CompactString, TopicEntry>,
    next_token: AtomicU64,
}

impl fmt::Debug for TopicBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicBus")
            .field("topics", &self.topics.len())
            .finish()
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Invoke every subscriber of `topic`, in subscription order.
    ///
    /// Each invocation is isolated: a panicking subscriber is logged and the
    /// remaining subscribers still run. Callbacks run without any bus lock
    /// held, so they may subscribe, unsubscribe or publish re-entrantly.
    pub fn publish(&self, topic: &str, payload: Option<TopicPayload>, options: PublishOptions) {
        if topic.is_empty() {
            return;
        }

        // A latching publish marks the topic under the same guard that copies
        // the subscribers, so a concurrent subscribe lands on one side or the other.
        let callbacks: SmallVec<[TopicCallback; 4]> = if options.latch {
            let mut entry = self.topics.entry(CompactString::new(topic)).or_default();
            entry.latched = true;
            entry.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        } else {
            self.topics
                .get(topic)
                .map(|entry| entry.subscribers.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };

        trace!("📤 Publishing '{}' to {} subscriber(s)", topic, callbacks.len());

        for callback in callbacks.iter() {
            if let Err(panic) = catch_panic(|| callback(payload.as_ref())) {
                error!("❌ Subscriber for topic '{}' panicked: {}", topic, panic);
            }
        }
    }

    /// Subscribe to `topic`.
    ///
    /// On a latched topic the callback fires immediately with no payload and
    /// is not retained; the returned token then resolves to nothing.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionToken
    where
        F: Fn(Option<&TopicPayload>) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let callback: TopicCallback = Arc::new(callback);

        let latched = {
            let mut entry = self.topics.entry(CompactString::new(topic)).or_default();
            if entry.latched {
                true
            } else {
                entry.subscribers.push((token, callback.clone()));
                false
            }
        };

        if latched {
            trace!("🔁 Topic '{}' is latched, invoking new subscriber immediately", topic);
            if let Err(panic) = catch_panic(|| callback(None)) {
                error!("❌ Subscriber for latched topic '{}' panicked: {}", topic, panic);
            }
        }

        token
    }

    /// Remove at most one subscription. Returns whether one was removed.
    pub fn unsubscribe(&self, topic: &str, token: SubscriptionToken) -> bool {
        let Some(mut entry) = self.topics.get_mut(topic) else {
            return false;
        };

        match entry.subscribers.iter().position(|(t, _)| *t == token) {
            Some(index) => {
                entry.subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether a latching publish has happened on `topic`
    pub fn is_latched(&self, topic: &str) -> bool {
        self.topics.get(topic).map(|e| e.latched).unwrap_or(false)
    }

    /// Number of callbacks currently registered on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|e| e.subscribers.len()).unwrap_or(0)
    }

    /// Drop every topic whose name starts with `prefix`, latches included.
    pub fn clear_prefix(&self, prefix: &str) {
        self.topics.retain(|key, _| !key.starts_with(prefix));
    }

    /// A view of this bus that prefixes every topic with `scope`.
    pub fn scoped(self: &Arc<Self>, scope: &str) -> ScopedBus {
        ScopedBus {
            bus: self.clone(),
            scope: CompactString::new(scope),
        }
    }
}

/// Topic bus view namespaced under a prefix (`<scope>:<topic>`).
#[derive(Clone)]
pub struct ScopedBus {
    bus: Arc<TopicBus>,
    scope: CompactString,
}

impl fmt::Debug for ScopedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedBus").field("scope", &self.scope).finish()
    }
}

impl ScopedBus {
    /// The prefix applied to every topic
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Fully qualified topic name on the underlying bus
    pub fn topic_key(&self, topic: &str) -> CompactString {
        format_compact!("{}:{}", self.scope, topic)
    }

    pub fn publish(&self, topic: &str, payload: Option<TopicPayload>, options: PublishOptions) {
        self.bus.publish(&self.topic_key(topic), payload, options)
    }

    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionToken
    where
        F: Fn(Option<&TopicPayload>) + Send + Sync + 'static,
    {
        self.bus.subscribe(&self.topic_key(topic), callback)
    }

    pub fn unsubscribe(&self, topic: &str, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(&self.topic_key(topic), token)
    }

    pub fn is_latched(&self, topic: &str) -> bool {
        self.bus.is_latched(&self.topic_key(topic))
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.bus.subscriber_count(&self.topic_key(topic))
    }
}
