// src/util.rs

use std::sync::{Mutex, MutexGuard};

/// Poison-tolerant lock: a panic while holding the guard must not wedge
/// later callers.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
