//! Lock primitives shared by the pools, swapped for Loom's under `--features loom` tests.

#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::{Mutex, MutexGuard};
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::{Mutex, MutexGuard};

use std::sync::PoisonError;

/// Locks `mutex`, ignoring poisoning: every critical section in this crate leaves the protected
/// state consistent before anything that can panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
