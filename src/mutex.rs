//! Mutexes: type/protocol flags, priority inheritance, and the ceiling
//! protocol, `spec.md` §4.6. Grounded on `r3_kernel::mutex::MutexCb`,
//! whose `Ceiling`/`InheritRaise` enum this core keeps nearly verbatim;
//! the intrusive "list of mutexes this task owns, used to recompute
//! effective priority on release" becomes the `ArrayVec` on
//! `crate::task::Task` instead of an intrusive linked list (`spec.md`
//! §9).

use alloc::collections::VecDeque;

use crate::error::{KernelError, WakeResult};
use crate::kernel::{unlink_wait_object, Kernel, KernelInner};
use crate::port::Port;
use crate::task::{Priority, TaskId, TaskState, WaitObject};
use crate::tick::Tick;

/// Locking discipline for a mutex already held by its own owner,
/// `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexType {
    /// Relocking from the owner deadlocks (blocks forever against
    /// itself). This core detects the self-relock and returns
    /// `KernelError::Deadlock` immediately instead — see `DESIGN.md` for
    /// why the literal "block forever" reading of `spec.md` §9's open
    /// question was rejected in favor of an immediately observable error.
    Normal,
    /// Relocking from the owner fails with `KernelError::Deadlock`
    /// immediately.
    ErrorCheck,
    /// Relocking from the owner succeeds and increments a hold count;
    /// `mutex_unlock` must be called the same number of times.
    Recursive,
}

/// How ownership of a mutex affects a task's priority, `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexProtocol {
    /// No priority adjustment.
    None,
    /// Classic priority inheritance: the owner's effective priority is
    /// boosted to the highest priority among its waiters for as long as
    /// it holds the mutex.
    PriorityInherit,
    /// Priority ceiling: on lock, the owner's effective priority is
    /// immediately raised to `ceiling` (`spec.md` §4.6), regardless of
    /// whether anyone is waiting.
    PriorityCeiling,
}

/// Marker type distinguishing mutex indices.
pub enum MutexMarker {}
pub type MutexId = crate::arena::Index<MutexMarker>;

pub(crate) struct MutexRecord {
    pub(crate) ty: MutexType,
    pub(crate) protocol: MutexProtocol,
    pub(crate) ceiling: Option<Priority>,
    pub(crate) owner: Option<TaskId>,
    pub(crate) hold_count: u32,
    pub(crate) waiters: VecDeque<TaskId>,
}

impl<P: Port> Kernel<P> {
    /// Create a mutex (`spec.md` §4.6 `mutex_init`). `ceiling` is only
    /// meaningful for [`MutexProtocol::PriorityCeiling`].
    pub fn mutex_init(
        &self,
        ty: MutexType,
        protocol: MutexProtocol,
        ceiling: Option<Priority>,
    ) -> MutexId {
        self.with_lock(|inner| {
            inner.mutexes.insert(MutexRecord {
                ty,
                protocol,
                ceiling,
                owner: None,
                hold_count: 0,
                waiters: VecDeque::new(),
            })
        })
    }

    /// Destroy a mutex, waking every waiter with `KernelError::Deleted`,
    /// whether or not it is currently held (`spec.md` §8 scenario 4: "T1
    /// locks M; T2 blocks on M; a third task destroys M", destroyed out
    /// from under its owner). The owner is not itself notified — it
    /// simply finds `mutex_id` invalid the next time it touches it,
    /// same as any other stale index into a removed arena slot.
    pub fn mutex_destroy(&self, mutex_id: MutexId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let record = inner.mutexes.remove(mutex_id)?;
            for waiter in record.waiters {
                unlink_wait_object(inner, waiter);
                crate::wait::cancel_wait(inner, waiter, WakeResult::Deleted);
            }
            self.reschedule(inner);
            Ok(())
        })
    }

    /// Acquire `mutex_id`, blocking until `deadline` if it is already
    /// held (`spec.md` §4.6 `mutex_lock_until`; `mutex_lock` and
    /// `mutex_try_lock` are thin wrappers below).
    pub fn mutex_lock_until(&self, mutex_id: MutexId, deadline: Tick) -> Result<(), KernelError> {
        let outcome = self.with_lock(|inner| try_acquire_or_block(self, inner, mutex_id, deadline))?;
        match outcome {
            LockOutcome::Acquired => Ok(()),
            LockOutcome::Blocked => {
                // Ownership (or the wake reason, if not success) was
                // already recorded by whoever woke this task — either
                // `unlock_owned` handing the mutex straight to us, or a
                // timeout/cancellation/destruction recording its result.
                let result = self.with_lock(|inner| {
                    inner
                        .tasks
                        .get(inner.current.expect("mutex_lock_until: resumed with no running task"))
                        .map(|t| t.wake_result)
                        .unwrap_or(WakeResult::Success)
                });
                result.into_result()
            }
        }
    }

    /// Acquire `mutex_id`, blocking forever if necessary (`spec.md` §4.6
    /// `mutex_lock`).
    pub fn mutex_lock(&self, mutex_id: MutexId) -> Result<(), KernelError> {
        self.mutex_lock_until(mutex_id, crate::tick::INFINITE)
    }

    /// Acquire `mutex_id` only if it is immediately available (`spec.md`
    /// §4.6 `mutex_try_lock`); never blocks.
    pub fn mutex_try_lock(&self, mutex_id: MutexId) -> Result<(), KernelError> {
        self.mutex_lock_until(mutex_id, crate::tick::IMMEDIATE)
    }

    /// Release `mutex_id` (`spec.md` §4.6 `mutex_unlock`). Fails with
    /// `KernelError::NotOwner` if the caller does not hold it.
    pub fn mutex_unlock(&self, mutex_id: MutexId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let current = inner.current.expect("mutex_unlock: no running task");
            unlock_owned(self, inner, mutex_id, current)
        })
    }
}

enum LockOutcome {
    Acquired,
    Blocked,
}

fn try_acquire_or_block<P: Port>(
    kernel: &Kernel<P>,
    inner: &mut KernelInner<P>,
    mutex_id: MutexId,
    deadline: Tick,
) -> Result<LockOutcome, KernelError> {
    let current = inner.current.expect("mutex lock: no running task");
    let (owner, ty) = {
        let record = inner.mutexes.get(mutex_id)?;
        (record.owner, record.ty)
    };
    match owner {
        None => {
            let record = inner.mutexes.get_mut(mutex_id)?;
            record.owner = Some(current);
            record.hold_count = 1;
            let task = inner.tasks.get_mut(current)?;
            let _ = task.owned_mutexes.try_push(mutex_id);
            apply_ceiling(inner, mutex_id, current);
            Ok(LockOutcome::Acquired)
        }
        Some(owner) if owner == current => match ty {
            MutexType::Recursive => {
                let record = inner.mutexes.get_mut(mutex_id)?;
                record.hold_count += 1;
                Ok(LockOutcome::Acquired)
            }
            MutexType::ErrorCheck | MutexType::Normal => Err(KernelError::Deadlock),
        },
        Some(owner) => {
            if deadline == crate::tick::IMMEDIATE {
                return Err(KernelError::WouldBlock);
            }
            if crate::wait::already_expired(inner, deadline) {
                return Err(KernelError::Timeout);
            }
            let record = inner.mutexes.get_mut(mutex_id)?;
            crate::wait::insert_by_priority(&inner.tasks, &mut record.waiters, current);
            crate::wait::suspend_current(inner, WaitObject::Mutex(mutex_id), deadline);
            if inner.mutexes.get(mutex_id)?.protocol == MutexProtocol::PriorityInherit {
                recompute_effective_priority(inner, owner);
            }
            kernel.reschedule(inner);
            Ok(LockOutcome::Blocked)
        }
    }
}

/// Set `task_id`'s effective priority to the maximum of its base
/// priority, the priority-ceiling of any ceiling-protocol mutex it
/// holds, and the highest priority among the waiters of any priority-
/// inherit mutex it holds — then, if it is itself blocked waiting on a
/// mutex, propagate the recomputation to that mutex's owner in turn
/// (`spec.md` §4.6's inheritance chain).
pub(crate) fn recompute_effective_priority<P: Port>(inner: &mut KernelInner<P>, task_id: TaskId) {
    let mut seen = 0u64; // cycle guard; a real deadlock cycle cannot form
    let mut current = task_id;
    loop {
        let bit = 1u64 << (current.slot() as u64 % 64);
        if seen & bit != 0 {
            break;
        }
        seen |= bit;

        let base = match inner.tasks.get(current) {
            Ok(t) => t.base_priority,
            Err(_) => break,
        };
        let mut boosted = base;
        let owned: alloc::vec::Vec<MutexId> = inner
            .tasks
            .get(current)
            .map(|t| t.owned_mutexes.iter().copied().collect())
            .unwrap_or_default();
        for mutex_id in &owned {
            if let Ok(record) = inner.mutexes.get(*mutex_id) {
                match record.protocol {
                    MutexProtocol::None => {}
                    MutexProtocol::PriorityCeiling => {
                        if let Some(ceiling) = record.ceiling {
                            boosted = boosted.max(ceiling);
                        }
                    }
                    MutexProtocol::PriorityInherit => {
                        for &waiter in &record.waiters {
                            if let Ok(w) = inner.tasks.get(waiter) {
                                boosted = boosted.max(w.effective_priority);
                            }
                        }
                    }
                }
            }
        }
        let (old_prio, state) = match inner.tasks.get(current) {
            Ok(t) => (t.effective_priority, t.state),
            Err(_) => break,
        };
        if boosted == old_prio {
            break;
        }
        inner.tasks.get_mut(current).unwrap().effective_priority = boosted;
        // A `Ready` task is only actually sitting in the ready list if it
        // isn't the one presently running: `reschedule` removes a task
        // from the list the moment it becomes `current`. Reinserting the
        // running task here would leave it on the ready list *and*
        // pointed at by `current` at once; `reschedule` (always called by
        // whoever calls this function) already requeues the outgoing
        // `current` task at its up-to-date priority if it loses the CPU,
        // so there is nothing to do for it here.
        if state == TaskState::Ready && inner.current != Some(current) {
            inner.ready.remove(old_prio, current);
            inner.ready.push_back(boosted, current);
        }

        // Propagate to whatever this task is itself blocked on.
        match inner.tasks.get(current).map(|t| t.wait_object) {
            Ok(WaitObject::Mutex(blocking_on)) => match inner.mutexes.get(blocking_on) {
                Ok(record) => match record.owner {
                    Some(next) => current = next,
                    None => break,
                },
                Err(_) => break,
            },
            _ => break,
        }
    }
}

fn apply_ceiling<P: Port>(inner: &mut KernelInner<P>, mutex_id: MutexId, owner: TaskId) {
    if inner
        .mutexes
        .get(mutex_id)
        .map(|m| m.protocol == MutexProtocol::PriorityCeiling)
        .unwrap_or(false)
    {
        recompute_effective_priority(inner, owner);
    }
}

pub(crate) fn unlock_owned<P: Port>(
    kernel: &Kernel<P>,
    inner: &mut KernelInner<P>,
    mutex_id: MutexId,
    task_id: TaskId,
) -> Result<(), KernelError> {
    {
        let record = inner.mutexes.get(mutex_id)?;
        if record.owner != Some(task_id) {
            return Err(KernelError::NotOwner);
        }
    }
    let record = inner.mutexes.get_mut(mutex_id)?;
    record.hold_count -= 1;
    if record.hold_count > 0 {
        return Ok(());
    }
    let next_owner = record.waiters.pop_front();
    record.owner = next_owner;
    record.hold_count = if next_owner.is_some() { 1 } else { 0 };

    if let Ok(task) = inner.tasks.get_mut(task_id) {
        task.owned_mutexes.retain(|&m| m != mutex_id);
    }
    recompute_effective_priority(inner, task_id);

    if let Some(next) = next_owner {
        if let Ok(task) = inner.tasks.get_mut(next) {
            let _ = task.owned_mutexes.try_push(mutex_id);
        }
        apply_ceiling(inner, mutex_id, next);
        crate::wait::wake(inner, next, WakeResult::Success);
    }
    kernel.reschedule(inner);
    Ok(())
}

/// Release a mutex on behalf of a task being terminated/killed, without
/// the "must be called by the owner" check an ordinary `mutex_unlock`
/// makes (`spec.md` §4.10: terminating a task "releases any resources it
/// still owns").
pub(crate) fn force_unlock<P: Port>(
    kernel: &Kernel<P>,
    inner: &mut KernelInner<P>,
    mutex_id: MutexId,
    task_id: TaskId,
) -> Result<(), KernelError> {
    if let Ok(record) = inner.mutexes.get_mut(mutex_id) {
        record.hold_count = 1; // force full release regardless of recursive depth
    }
    unlock_owned(kernel, inner, mutex_id, task_id)
}

