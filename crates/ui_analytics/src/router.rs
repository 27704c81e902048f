//! Dispatch router
//!
//! Decides whether a record may reach an integration and performs the
//! delivery. Each delivery is isolated: a panic, an error or a slow future
//! from one integration never touches another.

use crate::event::{EventRecord, Properties};
use crate::integration::{Capability, Integration, Outcome};
use crate::state::SharedEvent;
use crate::utils::lock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Allow/deny predicate.
///
/// An empty allow list allows everyone and an empty deny list denies no one.
pub fn should_deliver(record: &EventRecord, integration_name: &str) -> bool {
    let allowed = record.allow_list.is_empty() || record.allow_list.iter().any(|n| n == integration_name);
    let denied = !record.deny_list.is_empty() && record.deny_list.iter().any(|n| n == integration_name);
    allowed && !denied
}

/// Counters kept by the router
#[derive(Debug, Default)]
pub struct DispatchStats {
    events_emitted: AtomicU64,
    rejected_events: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    replays: AtomicU64,
    initialization_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    /// Records appended to the log
    pub events_emitted: u64,
    /// Emits refused at the call boundary
    pub rejected_events: u64,
    /// Capability calls started for a record or user
    pub deliveries: u64,
    /// Deliveries that panicked or reported an error
    pub delivery_failures: u64,
    /// Integrations that replayed the log on becoming ready
    pub replays: u64,
    /// Integrations whose `initialize` failed or panicked
    pub initialization_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            rejected_events: self.rejected_events.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            initialization_failures: self.initialization_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_initialization_failure(&self) {
        self.initialization_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }
}

/// Delivers records and user identities to integrations.
#[derive(Debug, Default)]
pub struct DispatchRouter {
    stats: Arc<DispatchStats>,
}

impl DispatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Deliver a fresh record to every integration in `ready`, in order.
    pub fn dispatch(&self, record: &EventRecord, ready: &[Integration]) {
        for integration in ready {
            self.deliver_event(integration, record);
        }
    }

    /// Deliver one record to one integration if the predicate allows it.
    /// Returns whether a `track` call was made.
    pub fn deliver_event(&self, integration: &Integration, record: &EventRecord) -> bool {
        if !should_deliver(record, integration.name()) {
            trace!("Skipping \"{}\" for integration '{}'", record.name, integration.name());
            return false;
        }

        let Some(definition) = integration.definition() else {
            return false;
        };
        if !definition.capabilities().contains(Capability::Track) {
            error!(
                "❌ Integration '{}' is initialized but does not have a track method",
                integration.name()
            );
            return false;
        }

        self.stats.record_delivery();
        let outcome = Outcome::guard(|| definition.track(record));
        self.report(outcome, integration.name(), format!("track(\"{}\")", record.name));
        true
    }

    /// Hand the identified user to an integration that supports it.
    pub fn deliver_user(&self, integration: &Integration, user: &Properties) -> bool {
        let Some(definition) = integration.definition() else {
            return false;
        };
        if !definition.capabilities().contains(Capability::IdentifyUser) {
            return false;
        }

        self.stats.record_delivery();
        let outcome = Outcome::guard(|| definition.identify_user(user));
        self.report(outcome, integration.name(), "identifyUser".to_string());
        true
    }

    /// Deliver a log snapshot to one integration, in log order.
    pub fn replay(&self, integration: &Integration, events: &[SharedEvent]) {
        self.stats.record_replay();
        let mut delivered = 0usize;
        for shared in events {
            let record = lock(shared).clone();
            if self.deliver_event(integration, &record) {
                delivered += 1;
            }
        }
        debug!(
            "🔁 Replayed {}/{} logged events to integration '{}'",
            delivered,
            events.len(),
            integration.name()
        );
    }

    fn report(&self, outcome: Outcome, integration: &str, call: String) {
        let stats = self.stats.clone();
        let integration = integration.to_string();
        outcome.settle(move |result| {
            if let Err(e) = result {
                stats.record_failure();
                error!("❌ {} failed for integration '{}': {}", call, integration, e);
            }
        });
    }
}
