//! Environment signals
//!
//! Page lifecycle signals published on the `environment` scope of the bus.
//! Detecting them is the host's job; the host calls
//! [`EnvironmentMonitor::signal`] and triggers subscribe with
//! [`EnvironmentMonitor::on`] or [`EnvironmentMonitor::once`].

use crate::bus::{PublishOptions, ScopedBus, SubscriptionToken, TopicBus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Bus scope holding the environment signals
pub const ENVIRONMENT_SCOPE: &str = "environment";

/// One-shot page lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentSignal {
    /// HTML parsed and DOM built
    PageDomLoad,
    /// Every resource finished loading
    PageLoad,
    PageBeforeUnload,
    PageUnload,
}

impl EnvironmentSignal {
    pub const ALL: [EnvironmentSignal; 4] = [
        EnvironmentSignal::PageDomLoad,
        EnvironmentSignal::PageLoad,
        EnvironmentSignal::PageBeforeUnload,
        EnvironmentSignal::PageUnload,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            EnvironmentSignal::PageDomLoad => "page-dom-load",
            EnvironmentSignal::PageLoad => "page-load",
            EnvironmentSignal::PageBeforeUnload => "page-before-unload",
            EnvironmentSignal::PageUnload => "page-unload",
        }
    }

    /// Look a signal up by its topic name
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.topic() == topic)
    }
}

impl fmt::Display for EnvironmentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Publishes and observes environment signals.
///
/// Each signal fires at most once. Fired signals stay latched, so a
/// subscriber that arrives late runs immediately.
#[derive(Debug, Clone)]
pub struct EnvironmentMonitor {
    bus: ScopedBus,
}

impl EnvironmentMonitor {
    pub fn new(bus: &Arc<TopicBus>) -> Self {
        Self {
            bus: bus.scoped(ENVIRONMENT_SCOPE),
        }
    }

    /// Publish `signal` unless it already fired. Returns whether it was published.
    pub fn signal(&self, signal: EnvironmentSignal) -> bool {
        if self.has_fired(signal) {
            debug!("Environment signal '{}' already fired, ignoring", signal);
            return false;
        }
        debug!("🌐 Environment signal '{}'", signal);
        self.bus.publish(signal.topic(), None, PublishOptions::latched());
        true
    }

    pub fn has_fired(&self, signal: EnvironmentSignal) -> bool {
        self.bus.is_latched(signal.topic())
    }

    pub fn on<F>(&self, signal: EnvironmentSignal, callback: F) -> SubscriptionToken
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.bus.subscribe(signal.topic(), move |_| callback())
    }

    pub fn off(&self, signal: EnvironmentSignal, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(signal.topic(), token)
    }

    /// Run `callback` on the first firing only, then unsubscribe.
    pub fn once<F>(&self, signal: EnvironmentSignal, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let callback = Mutex::new(Some(callback));
        let fired = Arc::new(AtomicBool::new(false));
        let token_slot: Arc<OnceLock<SubscriptionToken>> = Arc::new(OnceLock::new());

        let bus = self.bus.clone();
        let topic = signal.topic();
        let fired_in_cb = fired.clone();
        let slot_in_cb = token_slot.clone();
        let token = self.bus.subscribe(topic, move |_| {
            if fired_in_cb.swap(true, Ordering::SeqCst) {
                return;
            }
            let callback = callback.lock().ok().and_then(|mut slot| slot.take());
            if let Some(callback) = callback {
                callback();
            }
            if let Some(token) = slot_in_cb.get() {
                bus.unsubscribe(topic, *token);
            }
        });

        let _ = token_slot.set(token);
        if fired.load(Ordering::SeqCst) {
            self.bus.unsubscribe(topic, token);
        }
    }
}
