//! Condition variables, `spec.md` §4.8. Semantics for the re-acquire
//! step (`spec.md` §9's open question on exactly how a woken waiter gets
//! the mutex back) are resolved by following the original system this
//! core was distilled from (StateOS, see `original_source/`): a woken
//! waiter does not receive the mutex handed to it — it is simply made
//! ready and re-enters `mutex_lock` itself, contending for the mutex
//! like any other locker. This is also exactly pthread's
//! `pthread_cond_wait` contract, so it needs no bespoke hand-off path in
//! `crate::mutex`.

use alloc::collections::VecDeque;

use crate::error::{KernelError, WakeResult};
use crate::kernel::{unlink_wait_object, Kernel};
use crate::mutex::MutexId;
use crate::port::Port;
use crate::task::WaitObject;
use crate::tick::Tick;

/// Marker type distinguishing condition-variable indices.
pub enum CondMarker {}
pub type CondId = crate::arena::Index<CondMarker>;

pub(crate) struct CondRecord {
    pub(crate) waiters: VecDeque<crate::task::TaskId>,
}

impl<P: Port> Kernel<P> {
    /// Create a condition variable (`spec.md` §4.8 `cond_init`).
    pub fn cond_init(&self) -> CondId {
        self.with_lock(|inner| {
            inner.condvars.insert(CondRecord {
                waiters: VecDeque::new(),
            })
        })
    }

    /// Destroy a condition variable, waking every waiter with
    /// `KernelError::Deleted`. The woken waiters still re-acquire `mutex`
    /// themselves before their `cond_wait_until` call returns the error.
    pub fn cond_destroy(&self, cond_id: CondId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let record = inner.condvars.remove(cond_id)?;
            for waiter in record.waiters {
                unlink_wait_object(inner, waiter);
                crate::wait::cancel_wait(inner, waiter, WakeResult::Deleted);
            }
            self.reschedule(inner);
            Ok(())
        })
    }

    /// Atomically release `mutex` and block on `cond_id` until woken or
    /// `deadline`, then re-acquire `mutex` before returning (`spec.md`
    /// §4.8 `cond_wait_until`; `cond_wait` is a thin wrapper below). The
    /// caller must hold `mutex`.
    pub fn cond_wait_until(
        &self,
        cond_id: CondId,
        mutex: MutexId,
        deadline: Tick,
    ) -> Result<(), KernelError> {
        // `deadline == IMMEDIATE` is the generic `wait_until` try-only
        // sentinel (`spec.md` §4.5): fail immediately without ever
        // releasing `mutex`, exactly like `mutex_try_lock`/`sem_try_wait`
        // never touch ownership on their fast-fail path.
        if deadline == crate::tick::IMMEDIATE {
            return Err(KernelError::WouldBlock);
        }
        // Pushing onto the condvar's waiters and suspending happen in the
        // same `sys_lock`ed region as releasing `mutex`, so no notify can
        // run in between and the wait can never miss a wakeup — only one
        // task ever executes kernel code at a time (`spec.md` §4.2).
        let current = self.with_lock(|inner| {
            let current = inner.current.expect("cond_wait: no running task");
            // `spec.md` §4.5 step 1: a deadline already reached fails with
            // `Timeout` before any queue is touched — the caller is left
            // holding `mutex` exactly as it did on entry.
            if crate::wait::already_expired(inner, deadline) {
                return Err(KernelError::Timeout);
            }
            let record = inner.condvars.get_mut(cond_id)?;
            crate::wait::insert_by_priority(&inner.tasks, &mut record.waiters, current);
            crate::mutex::unlock_owned(self, inner, mutex, current)?;
            crate::wait::suspend_current(inner, WaitObject::Condvar(cond_id), deadline);
            self.reschedule(inner);
            Ok::<_, KernelError>(current)
        })?;
        let result = self.with_lock(|inner| {
            inner
                .tasks
                .get(current)
                .map(|t| t.wake_result)
                .unwrap_or(WakeResult::Success)
        });
        // Re-acquire regardless of how the wait ended — a timed-out or
        // cancelled waiter must still hold `mutex` on return, per the
        // `pthread_cond_wait` contract this module follows.
        self.mutex_lock(mutex)?;
        result.into_result()
    }

    /// Block on `cond_id` forever, releasing and re-acquiring `mutex`
    /// (`spec.md` §4.8 `cond_wait`).
    pub fn cond_wait(&self, cond_id: CondId, mutex: MutexId) -> Result<(), KernelError> {
        self.cond_wait_until(cond_id, mutex, crate::tick::INFINITE)
    }

    /// Wake the single longest-waiting task blocked on `cond_id`
    /// (`spec.md` §4.8 `cond_notify_one`). A no-op if nobody is waiting.
    pub fn cond_notify_one(&self, cond_id: CondId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let waiter = inner.condvars.get_mut(cond_id)?.waiters.pop_front();
            if let Some(waiter) = waiter {
                crate::wait::wake(inner, waiter, WakeResult::Success);
                self.reschedule(inner);
            }
            Ok(())
        })
    }

    /// Wake every task blocked on `cond_id` (`spec.md` §4.8
    /// `cond_notify_all`).
    pub fn cond_notify_all(&self, cond_id: CondId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let waiters = core::mem::take(&mut inner.condvars.get_mut(cond_id)?.waiters);
            for waiter in waiters {
                crate::wait::wake(inner, waiter, WakeResult::Success);
            }
            self.reschedule(inner);
            Ok(())
        })
    }
}
