//! Integration lifecycle
//!
//! `pending-definition -> initializing -> ready | errored`. Transitions only
//! move forward. Promotion to `ready` marks the integration ready and
//! snapshots the event log in one state write, so live dispatch and replay
//! never both deliver (or both skip) the same record.

use super::definition::{Capability, IntegrationDefinition, Outcome, ToolReference};
use crate::bus::{PublishOptions, ScopedBus, SubscriptionToken, TopicBus, TopicPayload};
use crate::engine::EngineCore;
use crate::error::{AnalyticsError, IntegrationError};
use crate::event::Properties;
use crate::utils::{guarded, lock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle topics published on each integration's scoped bus.
pub mod topics {
    /// Published right before `initialize` runs
    pub const BEFORE_INIT: &str = "before-init";
    /// Latched once the integration has caught up with the event log
    pub const READY: &str = "ready";
    /// Carries the [`crate::IntegrationError`] that stopped initialization
    pub const ERROR: &str = "error";
    /// Same failure as `error`, as `{"error": "<message>"}`
    pub const INIT_ERROR: &str = "init-error";
}

/// Bus scope prefix shared by every integration
pub(crate) const SCOPE_PREFIX: &str = "integration:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationStatus {
    PendingDefinition,
    Initializing,
    Ready,
    Errored,
}

impl IntegrationStatus {
    /// `ready` or `errored`; nothing follows either
    pub fn is_settled(&self) -> bool {
        matches!(self, IntegrationStatus::Ready | IntegrationStatus::Errored)
    }

    fn can_become(&self, next: IntegrationStatus) -> bool {
        use IntegrationStatus::*;
        matches!(
            (self, next),
            (PendingDefinition, Initializing) | (Initializing, Ready) | (Initializing, Errored)
        )
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntegrationStatus::PendingDefinition => "pending-definition",
            IntegrationStatus::Initializing => "initializing",
            IntegrationStatus::Ready => "ready",
            IntegrationStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

struct IntegrationCore {
    status: IntegrationStatus,
    definition: Option<Arc<dyn IntegrationDefinition>>,
    options: Properties,
}

struct IntegrationInner {
    name: String,
    instance: Uuid,
    core: Mutex<IntegrationCore>,
    bus: ScopedBus,
    status_tx: watch::Sender<IntegrationStatus>,
}

/// One adapter and its lifecycle. Cloning shares the same integration.
#[derive(Clone)]
pub struct Integration {
    inner: Arc<IntegrationInner>,
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("name", &self.inner.name)
            .field("instance", &self.inner.instance)
            .field("status", &self.status())
            .finish()
    }
}

impl Integration {
    /// A forward reference: pending, no capabilities, topics scoped to a
    /// fresh instance id.
    pub(crate) fn new(name: String, bus: &Arc<TopicBus>) -> Self {
        let instance = Uuid::new_v4();
        let scoped = bus.scoped(&format!("{SCOPE_PREFIX}{name}:{instance}"));
        let (status_tx, _) = watch::channel(IntegrationStatus::PendingDefinition);

        Self {
            inner: Arc::new(IntegrationInner {
                name,
                instance,
                core: Mutex::new(IntegrationCore {
                    status: IntegrationStatus::PendingDefinition,
                    definition: None,
                    options: Properties::new(),
                }),
                bus: scoped,
                status_tx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unique id of this integration object; a reset and redefine yields a new one
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance
    }

    pub fn status(&self) -> IntegrationStatus {
        lock(&self.inner.core).status
    }

    pub fn is_ready(&self) -> bool {
        self.status() == IntegrationStatus::Ready
    }

    pub fn has_definition(&self) -> bool {
        lock(&self.inner.core).definition.is_some()
    }

    /// Accumulated options
    pub fn options(&self) -> Properties {
        lock(&self.inner.core).options.clone()
    }

    pub fn same_instance(&self, other: &Integration) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn bus(&self) -> &ScopedBus {
        &self.inner.bus
    }

    pub(crate) fn definition(&self) -> Option<Arc<dyn IntegrationDefinition>> {
        lock(&self.inner.core).definition.clone()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<IntegrationStatus> {
        self.inner.status_tx.subscribe()
    }

    pub(crate) fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionToken
    where
        F: Fn(Option<&TopicPayload>) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(topic, callback)
    }

    pub(crate) fn unsubscribe(&self, topic: &str, token: SubscriptionToken) -> bool {
        self.inner.bus.unsubscribe(topic, token)
    }

    /// Move to `next` if the transition is legal. Must not be called with
    /// the core lock held.
    fn transition(&self, next: IntegrationStatus) -> bool {
        let mut core = lock(&self.inner.core);
        if !core.status.can_become(next) {
            debug!(
                "Ignoring transition of '{}' from {} to {}",
                self.inner.name, core.status, next
            );
            return false;
        }
        core.status = next;
        true
    }

    fn announce_status(&self) {
        let status = self.status();
        self.inner.status_tx.send_replace(status);
    }

    /// Attach a definition and start initialization.
    ///
    /// Only an integration that has never been defined accepts one. The
    /// `before-init` topic fires before `initialize` runs; a definition
    /// without `initialize` is ready immediately.
    pub(crate) fn apply_definition(
        &self,
        engine: &Arc<EngineCore>,
        definition: Arc<dyn IntegrationDefinition>,
    ) -> Result<(), AnalyticsError> {
        {
            let mut core = lock(&self.inner.core);
            if core.definition.is_some() || core.status != IntegrationStatus::PendingDefinition {
                return Err(AnalyticsError::AlreadyDefined(self.inner.name.clone()));
            }
            core.definition = Some(definition.clone());
            core.status = IntegrationStatus::Initializing;
        }
        self.announce_status();

        info!("🚀 Initializing integration '{}'", self.inner.name);
        self.inner.bus.publish(topics::BEFORE_INIT, None, PublishOptions::default());

        if !definition.capabilities().contains(Capability::Initialize) {
            self.on_ready(engine);
            return Ok(());
        }

        let initial_options = definition.initial_options();
        let outcome = Outcome::guard(|| definition.initialize(&initial_options));

        let integration = self.clone();
        let engine = engine.clone();
        outcome.settle(move |result| match result {
            Ok(()) => integration.on_ready(&engine),
            Err(e) => integration.on_error(&engine, e),
        });

        Ok(())
    }

    /// Promote to `ready`, catch up with the log and latch the `ready` topic.
    fn on_ready(&self, engine: &Arc<EngineCore>) {
        let promoted = engine.state.update(|state| {
            if self.transition(IntegrationStatus::Ready) {
                Some((state.events.clone(), state.current_user.clone()))
            } else {
                None
            }
        });
        let Some((events, current_user)) = promoted else {
            return;
        };

        info!("✅ Integration '{}' is ready", self.inner.name);

        let options = self.options();
        if !options.is_empty() {
            self.forward_options(&options);
        }

        if let Some(user) = current_user {
            engine.router.deliver_user(self, &user);
        }

        engine.router.replay(self, &events);

        self.inner.bus.publish(topics::READY, None, PublishOptions::latched());
        self.announce_status();
    }

    /// Terminal failure: no replay, one `error` notification.
    fn on_error(&self, engine: &Arc<EngineCore>, error: IntegrationError) {
        if !self.transition(IntegrationStatus::Errored) {
            return;
        }
        engine.router.stats().record_initialization_failure();

        error!("💥 Integration '{}' failed to initialize: {}", self.inner.name, error);

        self.inner
            .bus
            .publish(topics::ERROR, Some(TopicPayload::Error(error.clone())), PublishOptions::default());
        self.inner.bus.publish(
            topics::INIT_ERROR,
            Some(TopicPayload::Value(serde_json::json!({ "error": error.to_string() }))),
            PublishOptions::default(),
        );
        self.announce_status();
    }

    /// Shallow-merge into the running options and forward the merged set
    /// to the definition when it accepts options.
    pub(crate) fn set_options(&self, options: Properties) {
        let (merged, defined) = {
            let mut core = lock(&self.inner.core);
            core.options.extend(options);
            (core.options.clone(), core.definition.is_some())
        };

        if defined {
            self.forward_options(&merged);
        }
    }

    fn forward_options(&self, options: &Properties) {
        let Some(definition) = self.definition() else {
            return;
        };
        if !definition.capabilities().contains(Capability::SetOptions) {
            return;
        }
        if let Err(e) = guarded(|| definition.set_options(options)) {
            error!("❌ setOptions failed for integration '{}': {}", self.inner.name, e);
        }
    }

    pub(crate) fn tool_reference(&self) -> Option<ToolReference> {
        let definition = self.definition()?;
        if !definition.capabilities().contains(Capability::ToolReference) {
            return None;
        }
        guarded(|| definition.tool_reference()).unwrap_or_else(|e| {
            error!("❌ getToolReference failed for integration '{}': {}", self.inner.name, e);
            None
        })
    }

    pub(crate) fn clear_user_session(&self) {
        let Some(definition) = self.definition() else {
            return;
        };
        if !definition.capabilities().contains(Capability::ClearUserSession) {
            return;
        }
        if let Err(e) = guarded(|| definition.clear_user_session()) {
            error!("❌ clearUserSession failed for integration '{}': {}", self.inner.name, e);
        }
    }

    pub(crate) fn set_group(&self, group: &str, properties: &Properties) {
        let Some(definition) = self.definition() else {
            warn!(
                "⚠️ setGroup('{}') on integration '{}' ignored: integration is not defined yet",
                group, self.inner.name
            );
            return;
        };
        if !definition.capabilities().contains(Capability::SetGroup) {
            return;
        }

        let name = self.inner.name.clone();
        let group_name = group.to_string();
        Outcome::guard(|| definition.set_group(group, properties)).settle(move |result| {
            if let Err(e) = result {
                error!("❌ setGroup('{}') failed for integration '{}': {}", group_name, name, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::Definition;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> Arc<EngineCore> {
        Arc::new(EngineCore::new())
    }

    fn props(value: serde_json::Value) -> Properties {
        crate::event::properties_from_value(value)
    }

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(IntegrationStatus::PendingDefinition.to_string(), "pending-definition");
        assert_eq!(
            serde_json::to_value(IntegrationStatus::Errored).unwrap(),
            json!("errored")
        );
        assert!(IntegrationStatus::Ready.is_settled());
        assert!(!IntegrationStatus::Initializing.is_settled());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use IntegrationStatus::*;
        assert!(PendingDefinition.can_become(Initializing));
        assert!(Initializing.can_become(Ready));
        assert!(Initializing.can_become(Errored));
        assert!(!Ready.can_become(Errored));
        assert!(!Errored.can_become(Ready));
        assert!(!Ready.can_become(Initializing));
        assert!(!PendingDefinition.can_become(Ready));
    }

    #[test]
    fn test_definition_without_initialize_is_ready_immediately() {
        let engine = engine();
        let integration = Integration::new("plain".into(), &engine.bus);

        integration
            .apply_definition(&engine, Arc::new(Definition::new().with_track(|_| Outcome::ok())))
            .unwrap();
        assert_eq!(integration.status(), IntegrationStatus::Ready);
        assert!(integration.bus().is_latched(topics::READY));
    }

    #[test]
    fn test_second_definition_is_rejected() {
        let engine = engine();
        let integration = Integration::new("dup".into(), &engine.bus);
        integration.apply_definition(&engine, Arc::new(Definition::new())).unwrap();

        let err = integration
            .apply_definition(&engine, Arc::new(Definition::new()))
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::AlreadyDefined(name) if name == "dup"));
        assert_eq!(integration.status(), IntegrationStatus::Ready);
    }

    #[test]
    fn test_before_init_fires_before_initialize() {
        let engine = engine();
        let integration = Integration::new("ordered".into(), &engine.bus);
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = order.clone();
        integration.subscribe(topics::BEFORE_INIT, move |_| seen.lock().unwrap().push("before-init"));

        let seen = order.clone();
        let definition = Definition::new().with_initialize(move |_| {
            seen.lock().unwrap().push("initialize");
            Outcome::ok()
        });
        integration.apply_definition(&engine, Arc::new(definition)).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["before-init", "initialize"]);
    }

    #[test]
    fn test_initialize_receives_initial_options() {
        let engine = engine();
        let integration = Integration::new("opts".into(), &engine.bus);
        let received = Arc::new(Mutex::new(None));

        let slot = received.clone();
        let definition = Definition::new()
            .with_initial_options(props(json!({"id": "UA-1"})))
            .with_initialize(move |options| {
                *slot.lock().unwrap() = Some(options.clone());
                Outcome::ok()
            });
        integration.apply_definition(&engine, Arc::new(definition)).unwrap();

        assert_eq!(*received.lock().unwrap(), Some(props(json!({"id": "UA-1"}))));
    }

    #[test]
    fn test_failed_initialize_publishes_error_and_init_error() {
        let engine = engine();
        let integration = Integration::new("broken".into(), &engine.bus);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let init_errors = Arc::new(AtomicUsize::new(0));

        let sink = errors.clone();
        integration.subscribe(topics::ERROR, move |payload| {
            sink.lock().unwrap().push(payload.and_then(TopicPayload::as_error).cloned());
        });
        let count = init_errors.clone();
        integration.subscribe(topics::INIT_ERROR, move |payload| {
            assert_eq!(
                payload,
                Some(&TopicPayload::Value(json!({"error": "integration panicked: no script"})))
            );
            count.fetch_add(1, Ordering::SeqCst);
        });

        let definition = Definition::new().with_initialize(|_| panic!("no script"));
        integration.apply_definition(&engine, Arc::new(definition)).unwrap();

        assert_eq!(integration.status(), IntegrationStatus::Errored);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![Some(IntegrationError::Panicked("no script".into()))]
        );
        assert_eq!(init_errors.load(Ordering::SeqCst), 1);
        assert!(!integration.bus().is_latched(topics::READY));
    }

    #[test]
    fn test_set_options_merges_and_forwards_every_call() {
        let engine = engine();
        let integration = Integration::new("configurable".into(), &engine.bus);
        let forwarded = Arc::new(Mutex::new(Vec::new()));

        // before a definition exists options only accumulate
        integration.set_options(props(json!({"a": 1})));
        assert_eq!(integration.options(), props(json!({"a": 1})));

        let sink = forwarded.clone();
        let definition = Definition::new().with_set_options(move |options| sink.lock().unwrap().push(options.clone()));
        integration.apply_definition(&engine, Arc::new(definition)).unwrap();

        integration.set_options(props(json!({"b": 2, "a": 3})));

        let forwarded = forwarded.lock().unwrap();
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[0], props(json!({"a": 1})));
        assert_eq!(forwarded[1], props(json!({"a": 3, "b": 2})));
    }

    #[test]
    fn test_capabilities_absent_are_not_called() {
        let engine = engine();
        let integration = Integration::new("minimal".into(), &engine.bus);
        integration.apply_definition(&engine, Arc::new(Definition::new())).unwrap();

        assert!(integration.tool_reference().is_none());
        integration.clear_user_session();
        integration.set_group("team", &Properties::new());
    }

    #[test]
    fn test_set_group_forwards_name_and_properties() {
        let engine = engine();
        let integration = Integration::new("grouped".into(), &engine.bus);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let sink = calls.clone();
        let definition = Definition::new().with_set_group(move |name, properties| {
            sink.lock().unwrap().push((name.to_string(), properties.clone()));
            Outcome::ok()
        });
        integration.apply_definition(&engine, Arc::new(definition)).unwrap();
        integration.set_group("team", &props(json!({"size": 4})));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![("team".to_string(), props(json!({"size": 4})))]
        );
    }

    #[tokio::test]
    async fn test_status_watch_reports_settlement() {
        let engine = engine();
        let integration = Integration::new("async".into(), &engine.bus);
        let mut status = integration.subscribe_status();

        let definition = Definition::new().with_initialize(|_| {
            Outcome::deferred(async {
                tokio::task::yield_now().await;
                Ok(())
            })
        });
        integration.apply_definition(&engine, Arc::new(definition)).unwrap();

        let settled = status.wait_for(|s| s.is_settled()).await.map(|s| *s);
        assert_eq!(settled.unwrap(), IntegrationStatus::Ready);
    }
}
