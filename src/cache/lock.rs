//! Poison-recovering wrappers around the std locks.
//!
//! A panic while a cache lock is held poisons it. The cache would rather
//! serve possibly half-updated slot state than deadlock every later caller,
//! so these helpers recover the guard and log the incident.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recovered(source: &'static str, op: &'static str, kind: &'static str) {
    warn!(
        source,
        op, kind, "Cache lock was poisoned; recovering the guard"
    );
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        recovered(source, op, "rwlock.read");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        recovered(source, op, "rwlock.write");
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        recovered(source, op, "mutex.lock");
        poisoned.into_inner()
    })
}
