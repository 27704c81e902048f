//! The dispatch engine
//!
//! [`Analytics`] owns one process state, one topic bus and one router.
//! Engines are independent; cloning an engine shares it.
//!
//! Public operations never return errors to the caller. Invalid input is
//! logged and ignored, and integration failures surface on the integration's
//! `error` topic.

use crate::bus::TopicBus;
use crate::config::AnalyticsConfig;
use crate::environment::EnvironmentMonitor;
use crate::error::AnalyticsError;
use crate::event::{properties_from_value, EventKind, EventRecord, Properties, RoutingOptions};
use crate::integration::lifecycle::SCOPE_PREFIX;
use crate::integration::{Integration, IntegrationDefinition, IntegrationHandle};
use crate::router::{DispatchRouter, DispatchStatsSnapshot};
use crate::state::{ProcessState, SharedEvent, StateSnapshot};
use crate::transform::{apply_retroactively, run_all_transforms, Transform};
use crate::utils::normalize_name;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Shared internals behind [`Analytics`] and every handle it hands out.
#[derive(Debug)]
pub(crate) struct EngineCore {
    pub(crate) state: ProcessState,
    pub(crate) bus: Arc<TopicBus>,
    pub(crate) router: DispatchRouter,
    pub(crate) environment: EnvironmentMonitor,
}

impl EngineCore {
    pub(crate) fn new() -> Self {
        let bus = Arc::new(TopicBus::new());
        Self {
            state: ProcessState::new(),
            environment: EnvironmentMonitor::new(&bus),
            bus,
            router: DispatchRouter::new(),
        }
    }

    /// Build, transform, log and dispatch one record.
    pub(crate) fn emit(&self, kind: EventKind, name: &str, properties: Properties, options: RoutingOptions) {
        let mut record = match EventRecord::new(kind, name, properties, options) {
            Ok(record) => record,
            Err(e) => {
                self.router.stats().record_rejected();
                error!("❌ {} rejected: {}", kind, e);
                return;
            }
        };

        let transforms = self.state.get().transforms.clone();
        run_all_transforms(&transforms, &mut record);

        let shared: SharedEvent = Arc::new(Mutex::new(record.clone()));
        let ready = self.state.update(|state| {
            state.events.push(shared);
            state
                .integrations
                .iter()
                .filter(|i| i.is_ready())
                .cloned()
                .collect::<Vec<_>>()
        });
        self.router.stats().record_emitted();

        debug!("📤 {} \"{}\" logged, {} ready integrations", kind, record.name, ready.len());
        self.router.dispatch(&record, &ready);
    }

    /// Look an integration up by name, creating a pending one if needed.
    fn reference(&self, name: &str) -> Result<Integration, AnalyticsError> {
        let name = normalize_name(name).ok_or(AnalyticsError::InvalidIntegrationName)?;

        if let Some(existing) = self.state.get().integration(&name) {
            return Ok(existing.clone());
        }

        Ok(self.state.update(|state| {
            if let Some(existing) = state.integration(&name) {
                return existing.clone();
            }
            let integration = Integration::new(name, &self.bus);
            debug!("🔗 Referenced integration '{}'", integration.name());
            state.integrations.push(integration.clone());
            integration
        }))
    }
}

/// Analytics dispatch engine.
///
/// ```
/// use ui_analytics::{Analytics, Definition, Outcome, RoutingOptions};
/// use serde_json::json;
///
/// let analytics = Analytics::new();
/// analytics.emit_track("signup", json!({"plan": "pro"}), RoutingOptions::new());
///
/// let console = analytics.define_integration(
///     "console",
///     Definition::new().with_track(|event| {
///         println!("{} {:?}", event.name, event.properties);
///         Outcome::ok()
///     }),
/// );
/// assert!(console.unwrap().is_ready());
/// ```
#[derive(Clone, Debug)]
pub struct Analytics {
    core: Arc<EngineCore>,
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}

impl Analytics {
    pub fn new() -> Self {
        Self {
            core: Arc::new(EngineCore::new()),
        }
    }

    /// Engine with every configured integration referenced and its options
    /// accumulated ahead of its definition.
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        let analytics = Self::new();
        for (name, options) in &config.integrations {
            if let Some(handle) = analytics.integration(name) {
                handle.set_options(options.clone());
            }
        }
        info!("📋 Engine configured with {} integrations", config.integrations.len());
        analytics
    }

    /// Record a named action. Properties that are not an object are dropped.
    pub fn emit_track(&self, name: &str, properties: Value, options: RoutingOptions) {
        self.core
            .emit(EventKind::Event, name, properties_from_value(properties), options);
    }

    /// Record a page view
    pub fn emit_page(&self, name: &str, properties: Value, options: RoutingOptions) {
        self.core
            .emit(EventKind::Page, name, properties_from_value(properties), options);
    }

    /// Reference an integration by name, creating a pending forward reference
    /// the first time. Returns `None` for a blank name.
    pub fn integration(&self, name: &str) -> Option<IntegrationHandle> {
        self.define_or_reference_integration(name, None)
    }

    /// Define an integration and start its initialization.
    ///
    /// Redefining one that already has a definition is logged and ignored;
    /// the handle to the existing integration is still returned.
    pub fn define_integration<D>(&self, name: &str, definition: D) -> Option<IntegrationHandle>
    where
        D: IntegrationDefinition,
    {
        self.define_or_reference_integration(name, Some(Arc::new(definition)))
    }

    pub fn define_or_reference_integration(
        &self,
        name: &str,
        definition: Option<Arc<dyn IntegrationDefinition>>,
    ) -> Option<IntegrationHandle> {
        let integration = match self.core.reference(name) {
            Ok(integration) => integration,
            Err(e) => {
                error!("❌ integration lookup failed: {}", e);
                return None;
            }
        };

        if let Some(definition) = definition {
            if let Err(e) = integration.apply_definition(&self.core, definition) {
                error!("❌ {}", e);
            }
        }

        Some(IntegrationHandle::new(integration, self.core.clone()))
    }

    /// Reference several integrations at once; blank names are skipped.
    pub fn integrations<I, S>(&self, names: I) -> Vec<IntegrationHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| self.integration(name.as_ref()))
            .collect()
    }

    /// Append a transform and apply it once to every logged record.
    pub fn register_transform<T>(&self, transform: T)
    where
        T: Into<Transform>,
    {
        let transform = transform.into();
        let events = self.core.state.update(|state| {
            state.transforms.push(transform.clone());
            state.events.clone()
        });
        apply_retroactively(&transform, &events);
    }

    /// Set the current user and hand it to every ready integration that
    /// supports identification. Anything but an object is rejected.
    pub fn identify_user(&self, user: Value) {
        let Value::Object(user) = user else {
            error!("❌ {}", AnalyticsError::InvalidUserTraits(user.to_string()));
            return;
        };

        let ready = self.core.state.update(|state| {
            state.current_user = Some(user.clone());
            state
                .integrations
                .iter()
                .filter(|i| i.is_ready())
                .cloned()
                .collect::<Vec<_>>()
        });

        for integration in &ready {
            self.core.router.deliver_user(integration, &user);
        }
    }

    /// Forget the current user and clear every integration's session.
    pub fn clear_all_user_sessions(&self) {
        let integrations = self.core.state.update(|state| {
            state.current_user = None;
            state.integrations.clone()
        });
        for integration in &integrations {
            integration.clear_user_session();
        }
    }

    /// Drop every integration, record, transform and the current user, along
    /// with every integration topic.
    pub fn reset_process_state(&self) {
        self.core.state.clear();
        self.core.bus.clear_prefix(SCOPE_PREFIX);
        info!("🧹 Analytics process state reset");
    }

    /// Read-only view of the current state
    pub fn state(&self) -> Arc<StateSnapshot> {
        self.core.state.get()
    }

    pub fn bus(&self) -> &Arc<TopicBus> {
        &self.core.bus
    }

    pub fn environment(&self) -> &EnvironmentMonitor {
        &self.core.environment
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.core.router.stats().snapshot()
    }
}
