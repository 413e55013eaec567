//! Sleep lock

use alloc::collections::VecDeque;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use spin::Mutex;

use super::scheduler;

struct LockState {
    locked: bool,
    /// tasks suspended on this lock, in arrival order
    waiters: VecDeque<usize>,
}

/// A lock whose holder may suspend (e.g. on a disk transfer) while holding it.
///
/// Each release resumes exactly one waiter.
pub struct SleepLock<T> {
    state: Mutex<LockState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SleepLock<T> {}
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(LockState {
                locked: false,
                waiters: VecDeque::new(),
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, suspending the current task while another holds it.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let sched = scheduler();
        loop {
            let mut state = self.state.lock();
            if !state.locked {
                state.locked = true;
                if let Some(sched) = &sched {
                    let me = sched.current_task();
                    state.waiters.retain(|&task| task != me);
                }
                break;
            }
            match &sched {
                Some(sched) => {
                    let me = sched.current_task();
                    if !state.waiters.contains(&me) {
                        state.waiters.push_back(me);
                    }
                    drop(state);
                    sched.block_current();
                }
                None => {
                    drop(state);
                    core::hint::spin_loop();
                }
            }
        }
        SleepLockGuard { lock: self }
    }

    /// Acquire the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(SleepLockGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    fn unlock(&self) {
        let next = {
            let mut state = self.state.lock();
            assert!(state.locked, "unlocking a sleep lock that is not held");
            state.locked = false;
            state.waiters.pop_front()
        };
        if let (Some(task), Some(sched)) = (next, scheduler()) {
            sched.wakeup(task);
        }
    }
}

/// Exclusive access to the data of a [`SleepLock`]; releases it on drop.
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
