//! Transform pipeline
//!
//! Transforms rewrite event records. New records run through every
//! registered transform in registration order before they reach the log.
//! A transform registered later is applied once to each record already in
//! the log; the older transforms are not run again.

use crate::event::{EventRecord, TransformOutcome};
use crate::state::SharedEvent;
use crate::utils::lock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type TransformFn = dyn Fn(EventRecord) -> Option<EventRecord> + Send + Sync;

/// A registered event-rewriting function.
///
/// Returning `None` rejects the rewrite and leaves the record as it was.
#[derive(Clone)]
pub struct Transform {
    inner: Arc<TransformFn>,
}

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(EventRecord) -> Option<EventRecord> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Apply this transform to a record in place
    pub fn apply(&self, record: &mut EventRecord) -> TransformOutcome {
        record.apply_transform(|copy| (self.inner)(copy))
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").finish_non_exhaustive()
    }
}

impl<F> From<F> for Transform
where
    F: Fn(EventRecord) -> Option<EventRecord> + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Transform::new(f)
    }
}

/// Run the whole pipeline over a fresh record, in registration order.
///
/// Each transform sees the result of the ones before it. A failing or
/// rejected transform only skips its own rewrite.
pub fn run_all_transforms(transforms: &[Transform], record: &mut EventRecord) {
    for (index, transform) in transforms.iter().enumerate() {
        let outcome = transform.apply(record);
        if outcome != TransformOutcome::Applied {
            debug!("Transform #{} on \"{}\" finished with {:?}", index, record.name, outcome);
        }
    }
}

/// Apply one newly registered transform to every logged record, in log order.
///
/// The record is copied out before the transform runs so no lock is held
/// while user code executes.
pub fn apply_retroactively(transform: &Transform, events: &[SharedEvent]) {
    for shared in events {
        let mut record = lock(shared).clone();
        if transform.apply(&mut record) != TransformOutcome::Rejected {
            *lock(shared) = record;
        }
    }
    debug!("🔁 Applied new transform to {} logged events", events.len());
}
