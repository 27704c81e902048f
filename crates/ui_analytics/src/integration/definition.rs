//! Integration definitions
//!
//! An adapter author describes an integration by implementing
//! [`IntegrationDefinition`] or by filling in a closure-backed
//! [`Definition`]. Every capability is optional; the engine only calls the
//! ones listed in [`IntegrationDefinition::capabilities`].

use crate::error::IntegrationError;
use crate::event::{EventRecord, Properties};
use crate::utils::{guarded, spawn_detached};
use futures::future::{self, BoxFuture, FutureExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Opaque handle to the third-party tool an integration wraps
pub type ToolReference = Arc<dyn Any + Send + Sync>;

/// One optional capability of an integration definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Initialize,
    Track,
    IdentifyUser,
    SetOptions,
    ToolReference,
    ClearUserSession,
    SetGroup,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Initialize,
        Capability::Track,
        Capability::IdentifyUser,
        Capability::SetOptions,
        Capability::ToolReference,
        Capability::ClearUserSession,
        Capability::SetGroup,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of capabilities a definition exposes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const fn none() -> Self {
        Capabilities(0)
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.0 |= capability.bit();
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Capabilities::none();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Result of a capability call: finished now, or finishing later.
pub enum Outcome {
    /// The call completed before returning
    Sync(Result<(), IntegrationError>),
    /// The call completes when the future resolves
    Deferred(BoxFuture<'static, Result<(), IntegrationError>>),
}

impl Outcome {
    pub fn ok() -> Self {
        Outcome::Sync(Ok(()))
    }

    pub fn err(error: impl Into<IntegrationError>) -> Self {
        Outcome::Sync(Err(error.into()))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), IntegrationError>> + Send + 'static,
    {
        Outcome::Deferred(future.boxed())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }

    /// Normalise both shapes into one future
    pub fn into_future(self) -> BoxFuture<'static, Result<(), IntegrationError>> {
        match self {
            Outcome::Sync(result) => future::ready(result).boxed(),
            Outcome::Deferred(future) => future,
        }
    }

    /// Run a capability call, turning a panic into a failed outcome
    pub(crate) fn guard(call: impl FnOnce() -> Outcome) -> Outcome {
        guarded(call).unwrap_or_else(|e| Outcome::Sync(Err(e)))
    }

    /// Hand the final result to `on_settled`.
    ///
    /// `Sync` outcomes settle before this returns. `Deferred` ones settle
    /// from a detached task, with a panic while polling reported as
    /// [`IntegrationError::Panicked`].
    pub(crate) fn settle<F>(self, on_settled: F)
    where
        F: FnOnce(Result<(), IntegrationError>) + Send + 'static,
    {
        match self {
            Outcome::Sync(result) => on_settled(result),
            Outcome::Deferred(future) => spawn_detached(async move {
                let result = AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(IntegrationError::from_panic(panic)));
                on_settled(result);
            }),
        }
    }
}

impl From<Result<(), IntegrationError>> for Outcome {
    fn from(result: Result<(), IntegrationError>) -> Self {
        Outcome::Sync(result)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Sync(result) => f.debug_tuple("Sync").field(result).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Capability bundle supplied by an adapter author.
///
/// Only the methods whose [`Capability`] appears in `capabilities()` are
/// ever called. The default bodies succeed without doing anything.
pub trait IntegrationDefinition: Send + Sync + 'static {
    /// Capabilities this definition provides
    fn capabilities(&self) -> Capabilities;

    /// Options handed to `initialize`
    fn initial_options(&self) -> Properties {
        Properties::new()
    }

    fn initialize(&self, _options: &Properties) -> Outcome {
        Outcome::ok()
    }

    fn track(&self, _event: &EventRecord) -> Outcome {
        Outcome::ok()
    }

    fn identify_user(&self, _user: &Properties) -> Outcome {
        Outcome::ok()
    }

    /// Receives the full merged options after every change
    fn set_options(&self, _options: &Properties) {}

    fn tool_reference(&self) -> Option<ToolReference> {
        None
    }

    fn clear_user_session(&self) {}

    fn set_group(&self, _name: &str, _properties: &Properties) -> Outcome {
        Outcome::ok()
    }
}

type InitializeFn = dyn Fn(&Properties) -> Outcome + Send + Sync;
type TrackFn = dyn Fn(&EventRecord) -> Outcome + Send + Sync;
type IdentifyFn = dyn Fn(&Properties) -> Outcome + Send + Sync;
type SetOptionsFn = dyn Fn(&Properties) + Send + Sync;
type ToolReferenceFn = dyn Fn() -> Option<ToolReference> + Send + Sync;
type ClearSessionFn = dyn Fn() + Send + Sync;
type SetGroupFn = dyn Fn(&str, &Properties) -> Outcome + Send + Sync;

/// Closure-backed [`IntegrationDefinition`].
///
/// The capability set is exactly the closures that were supplied.
///
/// ```
/// use ui_analytics::{Definition, Outcome};
///
/// let definition = Definition::new()
///     .with_initialize(|_options| Outcome::ok())
///     .with_track(|event| {
///         println!("sending {}", event.name);
///         Outcome::ok()
///     });
/// ```
#[derive(Default)]
pub struct Definition {
    initial_options: Properties,
    initialize: Option<Box<InitializeFn>>,
    track: Option<Box<TrackFn>>,
    identify_user: Option<Box<IdentifyFn>>,
    set_options: Option<Box<SetOptionsFn>>,
    tool_reference: Option<Box<ToolReferenceFn>>,
    clear_user_session: Option<Box<ClearSessionFn>>,
    set_group: Option<Box<SetGroupFn>>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_options(mut self, options: Properties) -> Self {
        self.initial_options = options;
        self
    }

    pub fn with_initialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&Properties) -> Outcome + Send + Sync + 'static,
    {
        self.initialize = Some(Box::new(f));
        self
    }

    pub fn with_track<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventRecord) -> Outcome + Send + Sync + 'static,
    {
        self.track = Some(Box::new(f));
        self
    }

    pub fn with_identify_user<F>(mut self, f: F) -> Self
    where
        F: Fn(&Properties) -> Outcome + Send + Sync + 'static,
    {
        self.identify_user = Some(Box::new(f));
        self
    }

    pub fn with_set_options<F>(mut self, f: F) -> Self
    where
        F: Fn(&Properties) + Send + Sync + 'static,
    {
        self.set_options = Some(Box::new(f));
        self
    }

    pub fn with_tool_reference<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<ToolReference> + Send + Sync + 'static,
    {
        self.tool_reference = Some(Box::new(f));
        self
    }

    pub fn with_clear_user_session<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.clear_user_session = Some(Box::new(f));
        self
    }

    pub fn with_set_group<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Properties) -> Outcome + Send + Sync + 'static,
    {
        self.set_group = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("capabilities", &self.capabilities())
            .field("initial_options", &self.initial_options)
            .finish()
    }
}

impl IntegrationDefinition for Definition {
    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::none();
        let present = [
            (Capability::Initialize, self.initialize.is_some()),
            (Capability::Track, self.track.is_some()),
            (Capability::IdentifyUser, self.identify_user.is_some()),
            (Capability::SetOptions, self.set_options.is_some()),
            (Capability::ToolReference, self.tool_reference.is_some()),
            (Capability::ClearUserSession, self.clear_user_session.is_some()),
            (Capability::SetGroup, self.set_group.is_some()),
        ];
        for (capability, is_present) in present {
            if is_present {
                caps.insert(capability);
            }
        }
        caps
    }

    fn initial_options(&self) -> Properties {
        self.initial_options.clone()
    }

    fn initialize(&self, options: &Properties) -> Outcome {
        self.initialize.as_ref().map_or_else(Outcome::ok, |f| f(options))
    }

    fn track(&self, event: &EventRecord) -> Outcome {
        self.track.as_ref().map_or_else(Outcome::ok, |f| f(event))
    }

    fn identify_user(&self, user: &Properties) -> Outcome {
        self.identify_user.as_ref().map_or_else(Outcome::ok, |f| f(user))
    }

    fn set_options(&self, options: &Properties) {
        if let Some(f) = &self.set_options {
            f(options);
        }
    }

    fn tool_reference(&self) -> Option<ToolReference> {
        self.tool_reference.as_ref().and_then(|f| f())
    }

    fn clear_user_session(&self) {
        if let Some(f) = &self.clear_user_session {
            f();
        }
    }

    fn set_group(&self, name: &str, properties: &Properties) -> Outcome {
        self.set_group.as_ref().map_or_else(Outcome::ok, |f| f(name, properties))
    }
}
