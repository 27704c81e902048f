//! Utility functions and helpers

use crate::error::IntegrationError;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// User code never runs while one of our locks is held, so a poisoned lock
/// only means a panic inside this crate; the protected data is still valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Extract the message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a user supplied callback, returning the panic message if it panics.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Run an integration capability, converting a panic into an [`IntegrationError`].
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, IntegrationError> {
    catch_panic(f).map_err(IntegrationError::Panicked)
}

/// Drive a detached future to completion without blocking the caller.
///
/// Uses the ambient tokio runtime when there is one. Outside a runtime the
/// future gets its own thread, so a future that never resolves only holds
/// up that thread.
pub(crate) fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            tracing::trace!("No tokio runtime available, driving deferred outcome on its own thread");
            let spawned = thread::Builder::new()
                .name("ui-analytics-deferred".to_string())
                .spawn(move || futures::executor::block_on(future));
            if let Err(e) = spawned {
                tracing::error!("❌ Failed to start a thread for a deferred outcome: {}", e);
            }
        }
    }
}

/// Trim a name and reject it when nothing is left.
pub(crate) fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Remove repeated entries while keeping first-seen order.
pub(crate) fn dedup_ordered(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
