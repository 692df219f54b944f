//! Counting (and, as a count capped at 1, binary) semaphores, `spec.md`
//! §4.7. Grounded on `r3_kernel::semaphore::SemaphoreCb`; no priority
//! adjustment applies to semaphore ownership (a semaphore has no single
//! owner to boost), so this module is considerably smaller than
//! `crate::mutex`.

use alloc::collections::VecDeque;

use crate::error::{KernelError, WakeResult};
use crate::kernel::{unlink_wait_object, Kernel};
use crate::port::Port;
use crate::task::WaitObject;
use crate::tick::Tick;

/// Marker type distinguishing semaphore indices.
pub enum SemMarker {}
pub type SemId = crate::arena::Index<SemMarker>;

pub(crate) struct SemRecord {
    pub(crate) count: u32,
    pub(crate) max: u32,
    pub(crate) waiters: VecDeque<crate::task::TaskId>,
}

impl<P: Port> Kernel<P> {
    /// Create a semaphore with `initial` tokens and an upper bound of
    /// `max` (`spec.md` §4.7 `sem_init`). `initial` must not exceed
    /// `max`.
    pub fn sem_init(&self, initial: u32, max: u32) -> Result<SemId, KernelError> {
        if initial > max {
            return Err(KernelError::Invalid);
        }
        Ok(self.with_lock(|inner| {
            inner.semaphores.insert(SemRecord {
                count: initial,
                max,
                waiters: VecDeque::new(),
            })
        }))
    }

    /// Destroy a semaphore, waking every waiter with `KernelError::Deleted`.
    pub fn sem_destroy(&self, sem_id: SemId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let record = inner.semaphores.remove(sem_id)?;
            for waiter in record.waiters {
                unlink_wait_object(inner, waiter);
                crate::wait::cancel_wait(inner, waiter, WakeResult::Deleted);
            }
            self.reschedule(inner);
            Ok(())
        })
    }

    /// Add one token, waking the longest-waiting blocked task if any
    /// (`spec.md` §4.7 `sem_post`). Fails with `KernelError::Overflow` if
    /// the count is already at its maximum and nobody is waiting.
    pub fn sem_post(&self, sem_id: SemId) -> Result<(), KernelError> {
        self.sem_post_n(sem_id, 1)
    }

    /// Add `n` tokens at once, waking up to `n` waiters (`spec.md` §4.7
    /// `sem_post_n`).
    pub fn sem_post_n(&self, sem_id: SemId, n: u32) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            for _ in 0..n {
                let record = inner.semaphores.get_mut(sem_id)?;
                if let Some(waiter) = record.waiters.pop_front() {
                    crate::wait::wake(inner, waiter, WakeResult::Success);
                } else {
                    let record = inner.semaphores.get_mut(sem_id)?;
                    if record.count >= record.max {
                        return Err(KernelError::Overflow);
                    }
                    record.count += 1;
                }
            }
            self.reschedule(inner);
            Ok(())
        })
    }

    /// Take one token, blocking until `deadline` if none are available
    /// (`spec.md` §4.7 `sem_wait_until`; `sem_wait` and `sem_try_wait`
    /// are thin wrappers below).
    pub fn sem_wait_until(&self, sem_id: SemId, deadline: Tick) -> Result<(), KernelError> {
        let blocked = self.with_lock(|inner| {
            let record = inner.semaphores.get_mut(sem_id)?;
            if record.count > 0 {
                record.count -= 1;
                return Ok(false);
            }
            if deadline == crate::tick::IMMEDIATE {
                return Err(KernelError::WouldBlock);
            }
            if crate::wait::already_expired(inner, deadline) {
                return Err(KernelError::Timeout);
            }
            let current = inner.current.expect("sem_wait: no running task");
            crate::wait::insert_by_priority(&inner.tasks, &mut record.waiters, current);
            crate::wait::suspend_current(inner, WaitObject::Semaphore(sem_id), deadline);
            self.reschedule(inner);
            Ok(true)
        })?;
        if !blocked {
            return Ok(());
        }
        let result = self.with_lock(|inner| {
            inner
                .tasks
                .get(inner.current.expect("sem_wait: resumed with no running task"))
                .map(|t| t.wake_result)
                .unwrap_or(WakeResult::Success)
        });
        result.into_result()
    }

    /// Take one token, blocking forever if none are available (`spec.md`
    /// §4.7 `sem_wait`).
    pub fn sem_wait(&self, sem_id: SemId) -> Result<(), KernelError> {
        self.sem_wait_until(sem_id, crate::tick::INFINITE)
    }

    /// Take one token only if one is immediately available (`spec.md`
    /// §4.7 `sem_try_wait`); never blocks.
    pub fn sem_try_wait(&self, sem_id: SemId) -> Result<(), KernelError> {
        self.sem_wait_until(sem_id, crate::tick::IMMEDIATE)
    }
}
