//! Synchronization primitives
//!
//! The buffer and inode caches guard their pool bookkeeping with short-held
//! spin locks and their contents with [`SleepLock`]s, which may be held across
//! disk transfers. Suspending a blocked task is delegated to the embedding
//! kernel through [`Scheduler`].

mod sleep_lock;

pub use sleep_lock::{SleepLock, SleepLockGuard};

use alloc::sync::Arc;
use lazy_static::lazy_static;
use spin::RwLock;

/// Task suspension hooks provided by the kernel scheduler.
pub trait Scheduler: Send + Sync {
    /// Identifier of the running task.
    fn current_task(&self) -> usize;
    /// Suspend the running task until [`Scheduler::wakeup`] names it.
    /// Returning early is allowed, callers re-check their condition.
    fn block_current(&self);
    /// Resume a task suspended in [`Scheduler::block_current`].
    fn wakeup(&self, task: usize);
}

lazy_static! {
    static ref SCHEDULER: RwLock<Option<Arc<dyn Scheduler>>> = RwLock::new(None);
}

/// Install the scheduler used by every sleep lock.
///
/// Without one, blocked tasks spin until the lock is released.
pub fn set_scheduler(scheduler: Arc<dyn Scheduler>) {
    *SCHEDULER.write() = Some(scheduler);
}

pub(crate) fn scheduler() -> Option<Arc<dyn Scheduler>> {
    SCHEDULER.read().clone()
}
