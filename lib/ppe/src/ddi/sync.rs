// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
//!
//! The names follow their kernel counterparts (`KMutex` for mutex(9F),
//! `KRcu` for an RCU-protected pointer) so that it is obvious at the
//! call site which discipline is in use, even though in this crate
//! they are built on top of std and `arc-swap`.
use alloc::sync::Arc;
use arc_swap::ArcSwapOption;
use arc_swap::Guard;
use core::cell::UnsafeCell;
use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread::ThreadId;

/// A mutex usable from packet-processing context.
///
/// Critical sections under a `KMutex` must never sleep or call back
/// into anything which may take the same lock. A poisoned lock is
/// treated as held-and-released: the engine's invariants are restored
/// by each critical section before it can panic.
pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T: Default> Default for KMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> KMutex<T> {
    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        KMutexGuard { guard }
    }
}

/// A pointer published under read-copy-update rules.
///
/// Readers take a snapshot with [`KRcu::read()`] and never block.
/// Writers replace the pointer with [`KRcu::assign()`] or
/// [`KRcu::retract()`]; both return only once every reader that could
/// have observed the previous value has dropped its snapshot (the
/// grace period). Consequently a writer must not hold a read snapshot
/// of the same `KRcu` while publishing.
pub struct KRcu<T> {
    ptr: ArcSwapOption<T>,
}

/// A read-side critical section. The value it refers to stays alive,
/// and is not reclaimed by a writer, until the guard is dropped.
pub struct KRcuReadGuard<T> {
    guard: Guard<Option<Arc<T>>>,
}

impl<T> KRcuReadGuard<T> {
    pub fn get(&self) -> Option<&T> {
        self.guard.as_deref()
    }
}

impl<T> Default for KRcu<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> KRcu<T> {
    pub fn new() -> Self {
        Self { ptr: ArcSwapOption::new(None) }
    }

    pub fn read(&self) -> KRcuReadGuard<T> {
        KRcuReadGuard { guard: self.ptr.load() }
    }

    pub fn is_published(&self) -> bool {
        self.ptr.load().is_some()
    }

    /// Publish `val`, then wait out the readers of whatever was
    /// published before it.
    pub fn assign(&self, val: Arc<T>) {
        if let Some(old) = self.ptr.swap(Some(val)) {
            Self::synchronize(&old);
        }
    }

    /// Unpublish the current value and hand it back once no reader
    /// can still be using it.
    pub fn retract(&self) -> Option<Arc<T>> {
        let old = self.ptr.swap(None)?;
        Self::synchronize(&old);
        Some(old)
    }

    // After a swap `arc-swap` converts outstanding reader debts on the
    // old pointer into strong references, so the grace period is over
    // once ours is the only one left.
    fn synchronize(old: &Arc<T>) {
        while Arc::strong_count(old) > 1 {
            std::thread::yield_now();
        }
    }
}

/// A mutual exclusion mechanism which loans out access to a single
/// internal token. This is used to ensure at most one thread is present
/// in a critical section *without actively holding a [`KMutex`]*.
///
/// The offload path uses this to serialize co-processor attachment
/// and command dispatch, both of which may block on the co-processor
/// and so cannot run under the global flow lock.
pub struct TokenLock<T> {
    holder: Mutex<Option<ThreadId>>,
    cv: Condvar,
    inner: UnsafeCell<T>,
}

// SAFETY: Access to `inner` is only handed out through a `Token`, of
// which at most one exists at a time.
unsafe impl<T: Send> Send for TokenLock<T> {}
unsafe impl<T: Send> Sync for TokenLock<T> {}

impl<T> TokenLock<T> {
    pub fn new(token: T) -> Self {
        Self {
            holder: Mutex::new(None),
            cv: Condvar::new(),
            inner: UnsafeCell::new(token),
        }
    }

    pub fn lock(&self) -> Token<'_, T> {
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());

        while holder.is_some() {
            holder = self.cv.wait(holder).unwrap_or_else(|e| e.into_inner());
        }

        *holder = Some(std::thread::current().id());
        Token { lock: self }
    }
}

pub struct Token<'a, T> {
    lock: &'a TokenLock<T>,
}

impl<T> Deref for Token<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: Only the thread recorded in `holder` can have a
        // `Token`, thus there are no other writers.
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for Token<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: As above, plus Rust guarantees this is the only
        // `&mut` to the token itself.
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for Token<'_, T> {
    fn drop(&mut self) {
        let mut holder =
            self.lock.holder.lock().unwrap_or_else(|e| e.into_inner());
        *holder = None;
        self.lock.cv.notify_all();
    }
}
