//! The generic block/wake primitive behind every blocking call
//! (`mutex_lock`, `sem_wait`, `cond_wait`, `task_join`), `spec.md` §4.5.
//!
//! Grounded on `r3_kernel::wait`'s `WaitQueue`/`wait_for` split between
//! "suspend the current task and record why" and "pick a waiter off a
//! queue and set its resumption code", generalized here to work the same
//! way for every blockable object by keying on [`crate::task::WaitObject`]
//! instead of a wait-queue-specific enum per object type.

use alloc::collections::VecDeque;

use crate::arena::Arena;
use crate::error::WakeResult;
use crate::kernel::KernelInner;
use crate::port::Port;
use crate::task::{Task, TaskId, TaskState, WaitObject};
use crate::tick::Tick;

/// Tasks blocked on one particular object, ordered by effective priority
/// descending with FIFO order preserved among equal-priority waiters
/// (`spec.md` §3/§4.5: "Insert self into `queue` by (effective priority
/// desc, FIFO)"). Callers insert through [`insert_by_priority`] rather
/// than `push_back` directly, and may keep draining the highest-priority
/// waiter with a plain `pop_front`.
pub(crate) type WaitQueue = VecDeque<TaskId>;

/// Insert `task_id` into `queue` in (effective priority descending, FIFO
/// among ties) order — the ordering every priority-aware wait queue uses
/// (`spec.md` §3/§4.5/§4.6's "pop the highest-priority waiter"). Grounded
/// on `r3_kernel::wait::find_insertion_position_by_task_priority`.
pub(crate) fn insert_by_priority<P: Port>(
    tasks: &Arena<Task<P>>,
    queue: &mut WaitQueue,
    task_id: TaskId,
) {
    let prio = tasks.get(task_id).map(|t| t.effective_priority).unwrap_or(0);
    let pos = queue
        .iter()
        .position(|&other| tasks.get(other).map(|t| t.effective_priority).unwrap_or(0) < prio)
        .unwrap_or(queue.len());
    queue.insert(pos, task_id);
}

/// Whether `deadline` has already been reached as of the kernel's current
/// tick (`spec.md` §4.5 step 1: "If `deadline` <= now, fail with
/// `Timeout`" — evaluated before any queue is touched). `INFINITE` never
/// counts as expired.
pub(crate) fn already_expired<P: Port>(inner: &KernelInner<P>, deadline: Tick) -> bool {
    deadline != crate::tick::INFINITE && crate::tick::tick_reached(inner.tick, deadline)
}

/// Remove the current task from the ready list, mark it `Blocked` (or
/// `Delayed` if `deadline` is finite and this is a plain sleep with no
/// wait object), register it in the delay queue if it has a finite
/// deadline, and return its id so the caller can push it onto the
/// object-specific [`WaitQueue`].
///
/// Does not itself trigger a reschedule; the caller must do that (and
/// call `switch_now`) once the task has also been pushed onto the right
/// wait queue, since some callers (ceiling-protocol mutex lock) need to
/// do bookkeeping in between.
pub(crate) fn suspend_current<P: Port>(
    inner: &mut KernelInner<P>,
    wait_object: WaitObject,
    deadline: Tick,
) -> TaskId {
    let current = inner.current.expect("suspend_current with no running task");
    let prio = inner
        .tasks
        .get(current)
        .expect("current task vanished")
        .effective_priority;
    inner.ready.remove(prio, current);
    let task = inner.tasks.get_mut(current).expect("current task vanished");
    task.state = if matches!(wait_object, WaitObject::Sleep) {
        TaskState::Delayed
    } else {
        TaskState::Blocked
    };
    task.wait_object = wait_object;
    task.deadline = deadline;
    task.wake_result = WakeResult::Success;
    if deadline != crate::tick::INFINITE {
        inner.delay.insert(current, deadline);
    }
    current
}

/// Wake one specific task: record `result`, clear its wait bookkeeping,
/// move it back onto the ready list. The caller is responsible for
/// removing it from whatever object-specific [`WaitQueue`] it was on.
///
/// Does not reschedule; call [`crate::kernel::Kernel::reschedule`]
/// afterward.
pub(crate) fn wake<P: Port>(inner: &mut KernelInner<P>, task_id: TaskId, result: WakeResult) {
    inner.delay.remove(task_id);
    let prio = {
        let task = match inner.tasks.get_mut(task_id) {
            Ok(t) => t,
            Err(_) => return,
        };
        task.wait_object = WaitObject::None;
        task.wake_result = result;
        task.state = TaskState::Ready;
        task.effective_priority
    };
    inner.ready.push_back(prio, task_id);
}

/// Cancel a task's wait unconditionally (used by `mutex_destroy` and
/// `task_kill`): wakes it with `result` regardless of what it was
/// waiting for, after the caller has unlinked it from the relevant
/// [`WaitQueue`]. Returns `false` if the task was not actually waiting.
pub(crate) fn cancel_wait<P: Port>(
    inner: &mut KernelInner<P>,
    task_id: TaskId,
    result: WakeResult,
) -> bool {
    let was_waiting = matches!(
        inner.tasks.get(task_id).map(|t| t.state),
        Ok(TaskState::Blocked) | Ok(TaskState::Delayed)
    );
    if was_waiting {
        wake(inner, task_id, result);
    }
    was_waiting
}
