//! Process state
//!
//! One store per engine holding the integrations, the append-only event log,
//! the transform pipeline and the identified user. Readers load the latest
//! snapshot without locking; writers copy the snapshot, replace whole fields
//! and publish a new version under a single write lock.

use crate::event::{EventRecord, Properties};
use crate::integration::Integration;
use crate::transform::Transform;
use crate::utils::lock;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A logged event. Transforms rewrite it in place; the log never drops it.
pub type SharedEvent = Arc<Mutex<EventRecord>>;

/// Immutable view of the process state at one version.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub(crate) version: u64,
    pub(crate) integrations: Vec<Integration>,
    pub(crate) events: Vec<SharedEvent>,
    pub(crate) transforms: Vec<Transform>,
    pub(crate) current_user: Option<Properties>,
}

impl StateSnapshot {
    /// Monotonic counter bumped on every write
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Known integrations in first-reference order
    pub fn integrations(&self) -> &[Integration] {
        &self.integrations
    }

    pub fn integration(&self, name: &str) -> Option<&Integration> {
        self.integrations.iter().find(|i| i.name() == name)
    }

    /// Copies of every logged record, in emission order
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.iter().map(|e| lock(e).clone()).collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn transform_count(&self) -> usize {
        self.transforms.len()
    }

    pub fn current_user(&self) -> Option<&Properties> {
        self.current_user.as_ref()
    }
}

/// Versioned store behind an [`crate::Analytics`] engine.
#[derive(Debug)]
pub struct ProcessState {
    current: ArcSwap<StateSnapshot>,
    write: Mutex<()>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessState {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(StateSnapshot::default())),
            write: Mutex::new(()),
        }
    }

    /// Latest snapshot
    pub fn get(&self) -> Arc<StateSnapshot> {
        self.current.load_full()
    }

    /// Copy the snapshot, let `f` replace fields, then publish the result.
    ///
    /// Runs under the write lock so concurrent writers never lose each
    /// other's changes. `f` must not call user code.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut StateSnapshot) -> R) -> R {
        let _guard = lock(&self.write);
        let mut next = StateSnapshot::clone(&self.current.load());
        let result = f(&mut next);
        next.version += 1;
        self.current.store(Arc::new(next));
        result
    }

    /// Replace everything with an empty store
    pub fn clear(&self) {
        let _guard = lock(&self.write);
        let version = self.current.load().version + 1;
        self.current.store(Arc::new(StateSnapshot {
            version,
            ..StateSnapshot::default()
        }));
        debug!("🧹 Process state cleared (version {})", version);
    }
}
