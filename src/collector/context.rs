//! Task-local "current unit of work"
//!
//! Query events, log lines and outgoing HTTP calls are attributed to the unit
//! whose scope the executing task runs in. Tasks spawned with `tokio::spawn`
//! do not inherit the scope; wrap them with [`scope`] to keep attribution.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::unit::UnitOfWork;

/// Shared handle to a unit of work
pub type UnitHandle = Arc<Mutex<UnitOfWork>>;

tokio::task_local! {
    static CURRENT_UNIT: UnitHandle;
}

/// Run `future` with `handle` as the current unit.
pub async fn scope<F>(handle: UnitHandle, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_UNIT.scope(handle, future).await
}

/// Run `f` synchronously with `handle` as the current unit.
pub fn sync_scope<F, R>(handle: UnitHandle, f: F) -> R
where
    F: FnOnce() -> R,
{
    CURRENT_UNIT.sync_scope(handle, f)
}

/// Handle of the current unit, if any
pub fn current() -> Option<UnitHandle> {
    CURRENT_UNIT.try_with(Arc::clone).ok()
}

/// Run `f` against the current unit. Returns `None` outside any unit.
pub fn with_current<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut UnitOfWork) -> R,
{
    let handle = current()?;
    let mut unit = lock(&handle);
    Some(f(&mut unit))
}

/// Like [`with_current`], but gives up instead of blocking when the unit is
/// already locked on this or another thread.
///
/// Used from tracing layers and panic hooks, which may fire while the unit is
/// held by the code that emitted the event.
pub fn try_with_current<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut UnitOfWork) -> R,
{
    let handle = current()?;
    let mut unit = match handle.try_lock() {
        Ok(guard) => guard,
        Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(std::sync::TryLockError::WouldBlock) => return None,
    };
    Some(f(&mut unit))
}

/// Lock a unit, recovering from poisoning; a panicking handler must not
/// prevent its payload from being flushed.
pub fn lock(handle: &UnitHandle) -> MutexGuard<'_, UnitOfWork> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
