//! Basic synchronization primitives.
//!
//! Type models are populated lazily and may be raced during warm-up, so the
//! registry only ever holds short locks and memoizes expensive indexes with
//! [`BuildOnce`].
use std::sync::OnceLock;

pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering},
    Arc, Weak,
};

/// A memoized value that is built without holding a lock.
///
/// Two callers racing on an empty cell both run their builder; the first
/// value stored wins and the other is dropped. Builders must therefore be
/// pure functions of immutable inputs.
pub struct BuildOnce<T> {
    cell: OnceLock<T>,
}

impl<T> BuildOnce<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_built(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get_or_try_build<E>(&self, build: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let value = build()?;
        let mut won = false;
        let stored = self.cell.get_or_init(|| {
            won = true;
            value
        });
        if !won {
            tracing::warn!("discarding duplicate lazily built index");
        }
        Ok(stored)
    }

    pub fn get_or_build(&self, build: impl FnOnce() -> T) -> &T {
        match self.get_or_try_build::<std::convert::Infallible>(|| Ok(build())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<T> Default for BuildOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for BuildOnce<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(v) => f.debug_tuple("BuildOnce").field(v).finish(),
            None => write!(f, "BuildOnce(<unbuilt>)"),
        }
    }
}
