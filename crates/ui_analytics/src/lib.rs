//! # UI Analytics
//!
//! In-process dispatch core for client-side analytics instrumentation.
//! Application code records events before any analytics vendor is ready;
//! integrations (vendor adapters) come and go on their own asynchronous
//! lifecycle and each one receives the full event history once it is ready.
//!
//! ## Key Features
//!
//! - **Event log**: every `track`/`page` call is kept in emission order and
//!   replayed to integrations that become ready later
//! - **Transforms**: rewrite events on creation and, when registered late,
//!   once over the existing log
//! - **Routing**: per-event allow and deny lists decide which integrations
//!   receive what
//! - **Isolation**: a failing or panicking integration never affects another
//!   one, nor the caller
//! - **Lifecycle topics**: `before-init`, `ready` (latched) and `error` on a
//!   bus scoped to each integration
//!
//! ## Architecture
//!
//! - **Analytics**: engine context owning the state, the bus and the router
//! - **ProcessState**: versioned snapshot of integrations, log, transforms and user
//! - **TopicBus**: named-topic pub/sub with replay latches
//! - **DispatchRouter**: allow/deny predicate and isolated delivery
//! - **Integration**: `pending-definition -> initializing -> ready | errored`
//!
//! ## Usage
//!
//! ```rust
//! use ui_analytics::{Analytics, Definition, Outcome, RoutingOptions};
//! use serde_json::json;
//!
//! let analytics = Analytics::new();
//!
//! // Events emitted before any integration exists are kept
//! analytics.emit_track("signup", json!({"plan": "pro"}), RoutingOptions::new());
//!
//! analytics.register_transform(|mut event: ui_analytics::EventRecord| {
//!     event.properties.insert("app".into(), json!("web"));
//!     Some(event)
//! });
//!
//! let ga = analytics
//!     .define_integration(
//!         "google-analytics",
//!         Definition::new()
//!             .with_initialize(|_options| Outcome::ok())
//!             .with_track(|event| {
//!                 assert_eq!(event.properties["app"], json!("web"));
//!                 Outcome::ok()
//!             }),
//!     )
//!     .unwrap();
//!
//! ga.on(ui_analytics::topics::READY, |_| println!("caught up"));
//! assert!(ga.is_ready());
//! ```

pub mod bus;
pub mod config;
mod engine;
pub mod environment;
pub mod error;
pub mod event;
pub mod integration;
pub mod logging;
pub mod router;
pub mod state;
pub mod transform;
mod utils;

pub use bus::{PublishOptions, ScopedBus, SubscriptionToken, TopicBus, TopicPayload};
pub use config::{AnalyticsConfig, LoggingSettings};
pub use engine::Analytics;
pub use environment::{EnvironmentMonitor, EnvironmentSignal};
pub use error::{AnalyticsError, IntegrationError, Result};
pub use event::{EventKind, EventRecord, Properties, RoutingOptions, TransformOutcome};
pub use integration::{
    topics, Capabilities, Capability, Definition, GroupHandle, Integration, IntegrationDefinition,
    IntegrationHandle, IntegrationStatus, Outcome, ToolReference,
};
pub use router::{should_deliver, DispatchRouter, DispatchStats, DispatchStatsSnapshot};
pub use state::{ProcessState, StateSnapshot};
pub use transform::Transform;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
