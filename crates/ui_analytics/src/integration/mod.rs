//! Integrations: adapter definitions, their lifecycle and caller handles

pub mod definition;
pub mod handle;
pub mod lifecycle;

pub use definition::{Capabilities, Capability, Definition, IntegrationDefinition, Outcome, ToolReference};
pub use handle::{GroupHandle, IntegrationHandle};
pub use lifecycle::{topics, Integration, IntegrationStatus};
