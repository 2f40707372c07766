//! Shared handle to the executor.
//!
//! Readers (the HTTP API) and the single writer (the commit bridge) share one
//! executor. Block application takes an [`ApplyToken`]; a second attempt while
//! a token is alive fails fast instead of queueing behind the first.

use crate::error::{Result, StateError};
use crate::executor::StateExecutor;
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    executor: Mutex<StateExecutor>,
    applying: AtomicBool,
}

/// Cloneable, thread-safe handle to a [`StateExecutor`].
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Inner>,
}

impl SharedState {
    /// Wraps an executor.
    pub fn new(executor: StateExecutor) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor: Mutex::new(executor),
                applying: AtomicBool::new(false),
            }),
        }
    }

    /// Takes exclusive write access for applying a block.
    ///
    /// Returns [`StateError::ApplyInProgress`] if another token is alive.
    pub fn try_begin_apply(&self) -> Result<ApplyToken<'_>> {
        if self
            .inner
            .applying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StateError::ApplyInProgress);
        }
        Ok(ApplyToken {
            guard: self.inner.executor.lock(),
            flag: &self.inner.applying,
        })
    }

    /// Returns true while an apply token is alive.
    pub fn is_applying(&self) -> bool {
        self.inner.applying.load(Ordering::Acquire)
    }

    /// Runs a read-only closure against the executor.
    pub fn read<R>(&self, f: impl FnOnce(&StateExecutor) -> R) -> R {
        f(&self.inner.executor.lock())
    }
}

/// Exclusive access to the executor for the duration of one block.
///
/// Dropping the token releases the lock and clears the in-progress flag.
pub struct ApplyToken<'a> {
    guard: MutexGuard<'a, StateExecutor>,
    flag: &'a AtomicBool,
}

impl Deref for ApplyToken<'_> {
    type Target = StateExecutor;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for ApplyToken<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for ApplyToken<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
