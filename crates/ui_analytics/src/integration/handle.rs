//! Caller-facing integration handles

use super::definition::ToolReference;
use super::lifecycle::{Integration, IntegrationStatus};
use crate::bus::{SubscriptionToken, TopicPayload};
use crate::engine::EngineCore;
use crate::event::{properties_from_value, EventKind, Properties, RoutingOptions};
use serde_json::Value;
use std::sync::Arc;

/// Handle returned by every integration lookup.
///
/// Events sent through it are restricted to this integration.
#[derive(Clone, Debug)]
pub struct IntegrationHandle {
    integration: Integration,
    engine: Arc<EngineCore>,
}

impl IntegrationHandle {
    pub(crate) fn new(integration: Integration, engine: Arc<EngineCore>) -> Self {
        Self { integration, engine }
    }

    pub fn name(&self) -> &str {
        self.integration.name()
    }

    pub fn integration(&self) -> &Integration {
        &self.integration
    }

    /// Subscribe to one of this integration's lifecycle topics
    /// (see [`crate::topics`]).
    pub fn on<F>(&self, topic: &str, callback: F) -> SubscriptionToken
    where
        F: Fn(Option<&TopicPayload>) + Send + Sync + 'static,
    {
        self.integration.subscribe(topic, callback)
    }

    pub fn off(&self, topic: &str, token: SubscriptionToken) -> bool {
        self.integration.unsubscribe(topic, token)
    }

    pub fn set_options(&self, options: Properties) {
        self.integration.set_options(options);
    }

    pub fn get_tool_reference(&self) -> Option<ToolReference> {
        self.integration.tool_reference()
    }

    pub fn clear_user_session(&self) {
        self.integration.clear_user_session();
    }

    /// Emit an event only this integration may receive
    pub fn track(&self, name: &str, properties: Value, options: RoutingOptions) {
        self.emit(EventKind::Event, name, properties, options);
    }

    /// Emit a page view only this integration may receive
    pub fn track_page(&self, name: &str, properties: Value, options: RoutingOptions) {
        self.emit(EventKind::Page, name, properties, options);
    }

    /// Facade for addressing one group through this integration
    pub fn group(&self, name: &str) -> GroupHandle {
        GroupHandle {
            handle: self.clone(),
            group: name.to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.integration.is_ready()
    }

    pub fn status(&self) -> IntegrationStatus {
        self.integration.status()
    }

    /// Wait until the integration is `ready` or `errored`
    pub async fn settled(&self) -> IntegrationStatus {
        let mut status = self.integration.subscribe_status();
        let settled = match status.wait_for(|s| s.is_settled()).await {
            Ok(settled) => *settled,
            Err(_) => self.integration.status(),
        };
        settled
    }

    fn emit(&self, kind: EventKind, name: &str, properties: Value, mut options: RoutingOptions) {
        options.integration_whitelist = vec![self.name().to_string()];
        self.engine.emit(kind, name, properties_from_value(properties), options);
    }
}

/// Per-group helpers returned by [`IntegrationHandle::group`].
#[derive(Clone, Debug)]
pub struct GroupHandle {
    handle: IntegrationHandle,
    group: String,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.group
    }

    /// Forward group setup properties to the integration's `setGroup`
    pub fn setup(&self, properties: &Properties) {
        self.handle.integration.set_group(&self.group, properties);
    }

    pub fn track(&self, name: &str, properties: Value, options: RoutingOptions) {
        self.handle.track(name, properties, self.address(options));
    }

    pub fn track_page(&self, name: &str, properties: Value, options: RoutingOptions) {
        self.handle.track_page(name, properties, self.address(options));
    }

    fn address(&self, mut options: RoutingOptions) -> RoutingOptions {
        options.groups = vec![self.group.clone()];
        options
    }
}
