use crate::{
    utils::sync::{AtomicU64, AtomicU8, Condvar, Mutex, Ordering, RwLock},
    value::Value,
};
use gc_arena::{unsafe_empty_collect, Collect};
use std::fmt::{Debug, Formatter};

/// Initialization states for a type's static initializer.
pub const INIT_STATE_UNINITIALIZED: u8 = 0;
pub const INIT_STATE_INITIALIZING: u8 = 1;
pub const INIT_STATE_INITIALIZED: u8 = 2;
pub const INIT_STATE_FAILED: u8 = 3;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    CURRENT_THREAD_ID.with(|id| *id)
}

#[derive(Debug, PartialEq, Eq)]
pub enum StaticInitResult {
    /// This thread must run the static initializer.
    Execute,
    /// The type is already fully initialized.
    Initialized,
    /// The initializer is already running on this thread; proceed with the
    /// storage as it is.
    Recursive,
    /// The initializer failed previously.
    Failed,
    /// Another thread is running the initializer.
    Waiting,
}

/// Static field storage of one closed interpreted type.
pub struct StaticStorage {
    init_state: AtomicU8,
    /// Only meaningful while `init_state` is INITIALIZING.
    initializing_thread: AtomicU64,
    values: RwLock<Vec<Value>>,
    failure: Mutex<Option<String>>,
    init_cond: Condvar,
    init_mutex: Mutex<()>,
}
unsafe_empty_collect!(StaticStorage);

impl StaticStorage {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            init_state: AtomicU8::new(INIT_STATE_UNINITIALIZED),
            initializing_thread: AtomicU64::new(0),
            values: RwLock::new(values),
            failure: Mutex::new(None),
            init_cond: Condvar::new(),
            init_mutex: Mutex::new(()),
        }
    }

    pub fn init_state(&self) -> u8 {
        self.init_state.load(Ordering::Acquire)
    }

    pub fn get(&self, slot: usize) -> Option<Value> {
        self.values.read().get(slot).cloned()
    }

    pub fn set(&self, slot: usize, value: Value) -> bool {
        match self.values.write().get_mut(slot) {
            Some(s) => {
                *s = value;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Decides what the calling thread does about the static initializer.
    ///
    /// The INITIALIZING state is published before the initializer body runs,
    /// so an initializer that touches its own statics observes `Recursive`.
    pub fn begin(&self, has_initializer: bool) -> StaticInitResult {
        let state = self.init_state.load(Ordering::Acquire);
        if state == INIT_STATE_INITIALIZED {
            return StaticInitResult::Initialized;
        }
        if state == INIT_STATE_FAILED {
            return StaticInitResult::Failed;
        }
        if state == INIT_STATE_INITIALIZING
            && self.initializing_thread.load(Ordering::Acquire) == current_thread_id()
        {
            return StaticInitResult::Recursive;
        }

        if !has_initializer {
            self.init_state
                .compare_exchange(
                    INIT_STATE_UNINITIALIZED,
                    INIT_STATE_INITIALIZED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .ok();
            return match self.init_state.load(Ordering::Acquire) {
                INIT_STATE_INITIALIZING => StaticInitResult::Waiting,
                _ => StaticInitResult::Initialized,
            };
        }

        // The owner is published under the init mutex.
        let _lock = self.init_mutex.lock();
        match self.init_state.compare_exchange(
            INIT_STATE_UNINITIALIZED,
            INIT_STATE_INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.initializing_thread
                    .store(current_thread_id(), Ordering::Release);
                StaticInitResult::Execute
            }
            Err(INIT_STATE_INITIALIZED) => StaticInitResult::Initialized,
            Err(INIT_STATE_FAILED) => StaticInitResult::Failed,
            Err(_) => StaticInitResult::Waiting,
        }
    }

    pub fn mark_initialized(&self) {
        self.init_state
            .store(INIT_STATE_INITIALIZED, Ordering::Release);
        let _lock = self.init_mutex.lock();
        self.init_cond.notify_all();
    }

    pub fn mark_failed(&self, reason: String) {
        *self.failure.lock() = Some(reason);
        self.init_state.store(INIT_STATE_FAILED, Ordering::Release);
        let _lock = self.init_mutex.lock();
        self.init_cond.notify_all();
    }

    /// Blocks until the initializer running on another thread finishes.
    pub fn wait_for_init(&self) {
        let mut lock = self.init_mutex.lock();
        while self.init_state.load(Ordering::Acquire) == INIT_STATE_INITIALIZING {
            self.init_cond.wait(&mut lock);
        }
    }
}

impl Debug for StaticStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.init_state.load(Ordering::Acquire) {
            INIT_STATE_INITIALIZED => f.debug_list().entries(self.values.read().iter()).finish(),
            INIT_STATE_INITIALIZING => write!(f, "initializing"),
            INIT_STATE_FAILED => write!(f, "failed"),
            _ => write!(f, "uninitialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sync::{Arc, AtomicUsize};

    #[test]
    fn test_without_initializer_is_initialized() {
        let storage = StaticStorage::new(vec![Value::Null]);
        assert_eq!(storage.begin(false), StaticInitResult::Initialized);
        assert_eq!(storage.init_state(), INIT_STATE_INITIALIZED);
    }

    #[test]
    fn test_reentry_is_recursive() {
        let storage = StaticStorage::new(vec![]);
        assert_eq!(storage.begin(true), StaticInitResult::Execute);
        assert_eq!(storage.begin(true), StaticInitResult::Recursive);
        storage.mark_initialized();
        assert_eq!(storage.begin(true), StaticInitResult::Initialized);
    }

    #[test]
    fn test_failure_is_sticky() {
        let storage = StaticStorage::new(vec![]);
        assert_eq!(storage.begin(true), StaticInitResult::Execute);
        storage.mark_failed("boom".into());
        assert_eq!(storage.begin(true), StaticInitResult::Failed);
        assert_eq!(storage.failure().as_deref(), Some("boom"));
    }

    #[test]
    fn test_only_one_thread_executes() {
        let storage = Arc::new(StaticStorage::new(vec![Value::Int32(0)]));
        let executed = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                let storage = &storage;
                let executed = &executed;
                s.spawn(move || loop {
                    match storage.begin(true) {
                        StaticInitResult::Execute => {
                            executed.fetch_add(1, Ordering::SeqCst);
                            storage.set(0, Value::Int32(42));
                            storage.mark_initialized();
                            break;
                        }
                        StaticInitResult::Waiting => storage.wait_for_init(),
                        StaticInitResult::Initialized => break,
                        other => panic!("unexpected {other:?}"),
                    }
                });
            }
        });
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(storage.get(0), Some(Value::Int32(42)));
    }
}
