//! Tasks: the data model of `spec.md` §3 and the lifecycle operations of
//! §4.10, grounded on `r3_kernel::task::TaskCb` with the const-generic
//! `Traits` parameter replaced by arena indices (`spec.md` §9).

use arrayvec::ArrayVec;

use crate::arena::Index;
use crate::condvar::CondId;
use crate::mutex::MutexId;
use crate::semaphore::SemId;
use crate::tick::Tick;

/// A task priority. Larger numbers mean higher priority, matching
/// `spec.md` §8 scenario 1 (`T_high(prio=9)` outranks `T_mid(prio=5)`
/// outranks `T_low(prio=1)`).
pub type Priority = u8;

/// Bound on how many mutexes a single task may hold at once (used to
/// recompute effective priority on release, `spec.md` §4.6). Sized for a
/// deeply embedded target; raising it only costs `ArrayVec` storage.
pub const MAX_OWNED_MUTEXES: usize = 8;

/// Marker type distinguishing task indices from mutex/semaphore/condvar
/// indices at the type level; never instantiated.
pub enum TaskMarker {}

/// A stable reference to a task, valid until the task is destroyed.
pub type TaskId = Index<TaskMarker>;

/// One of the five states a task can be in (`spec.md` §3). A task
/// currently running is represented as `Ready` and additionally being
/// the ready list's head / the kernel's `current` pointer — `spec.md`
/// §3 defines only these five states, so "running" is not a sixth state,
/// it is a distinguished `Ready` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Blocked,
    Delayed,
    Suspended,
    /// Terminal. The terminal transition releases any resources the task
    /// still owns (`spec.md` §3).
    Stopped,
}

/// What a blocked/delayed task is waiting for, and how it should be
/// reported back to it by whoever wakes it. Replaces the raw "pointer to
/// the object it is blocked on" of `spec.md` §3 with a tagged index,
/// since the object may live in any one of several arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    None,
    Sleep,
    Mutex(MutexId),
    Semaphore(SemId),
    Condvar(CondId),
    Join(TaskId),
}

/// Everything recorded about a task while it is not the one making
/// progress.
pub(crate) struct Task<P: crate::port::Port> {
    pub(crate) id: TaskId,
    pub(crate) base_priority: Priority,
    pub(crate) effective_priority: Priority,
    pub(crate) stack_size: usize,
    pub(crate) state: TaskState,
    pub(crate) context: P::Context,
    /// What this task is waiting on, if `state` is `Blocked`/`Delayed`.
    pub(crate) wait_object: WaitObject,
    /// Absolute deadline for the current wait, if any.
    pub(crate) deadline: Tick,
    /// Resumption code written by the waker before the task is allowed
    /// to run again (`spec.md` §4.5/§5: "set by the waker ... before the
    /// woken task is allowed to run").
    pub(crate) wake_result: crate::error::WakeResult,
    /// Mutexes currently owned by this task, for effective-priority
    /// recomputation on release (`spec.md` §3/§4.6).
    pub(crate) owned_mutexes: ArrayVec<MutexId, MAX_OWNED_MUTEXES>,
    /// Tasks blocked in `task_join` on this task's termination.
    pub(crate) joiners: alloc::collections::VecDeque<TaskId>,
    pub(crate) detached: bool,
    pub(crate) started: bool,
}

/// A task entry point: a plain function pointer plus an opaque argument,
/// the form `spec.md` §3 describes ("user-supplied entry function and
/// argument") and what a real port's trampoline can actually call
/// without requiring an allocator for a boxed closure.
pub type TaskEntry = fn(usize);

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn fake_task_id(n: u32) -> TaskId {
        Index::from_raw(n, 0)
    }
}
