//! The kernel singleton: ready list, delay queue, task table, and the
//! lifecycle operations of `spec.md` §4.10, grounded on
//! `r3_kernel::Kernel`/`r3_kernel::state::KernelCfg2` with the const-
//! generic `Traits` parameter made a type parameter on a value (`Kernel<P>`)
//! instead of a trait implemented by a zero-sized type, since this core
//! has no compile-time object table to generate (`spec.md` §9).

use alloc::boxed::Box;

use crate::arena::Arena;
use crate::condvar::CondRecord;
use crate::config::Config;
use crate::error::{KernelError, WakeResult};
use crate::klock::{sys_lock, sys_unlock, SysCell};
use crate::mutex::MutexRecord;
use crate::once::OnceRecord;
use crate::port::Port;
use crate::prio::ReadyList;
use crate::semaphore::SemRecord;
use crate::task::{Priority, Task, TaskEntry, TaskId, TaskState, WaitObject};
use crate::tick::{DelayQueue, Tick, INFINITE};
use crate::trace::{kdebug, ktrace};

/// Everything the kernel protects with `sys_lock`. Lives inside a
/// [`SysCell`] so every access is forced through [`Kernel::with_lock`].
pub(crate) struct KernelInner<P: Port> {
    pub(crate) tasks: Arena<Task<P>>,
    pub(crate) mutexes: Arena<MutexRecord>,
    pub(crate) semaphores: Arena<SemRecord>,
    pub(crate) condvars: Arena<CondRecord>,
    pub(crate) onces: Arena<OnceRecord>,
    pub(crate) ready: ReadyList,
    pub(crate) delay: DelayQueue,
    pub(crate) current: Option<TaskId>,
    pub(crate) tick: Tick,
    pub(crate) config: Config,
}

impl<P: Port> KernelInner<P> {
    fn new(config: Config) -> Self {
        Self {
            tasks: Arena::new(),
            mutexes: Arena::new(),
            semaphores: Arena::new(),
            condvars: Arena::new(),
            onces: Arena::new(),
            ready: ReadyList::new(),
            delay: DelayQueue::new(),
            current: None,
            tick: 0,
            config,
        }
    }
}

/// The kernel singleton. Applications define one `static KERNEL: Kernel<P>
/// = Kernel::new(CONFIG)` and call its methods directly, including from
/// task bodies — there is no hidden global lookup (`spec.md` §6 describes
/// a flat function-call interface; this core exposes the same surface as
/// inherent methods instead of free functions so a binary can, in
/// principle, host more than one kernel instance for testing).
pub struct Kernel<P: Port> {
    inner: SysCell<KernelInner<P>>,
}

/// What [`trampoline`] needs to run the user's entry function and hand
/// control back to the kernel afterward. Boxed and leaked into the
/// `usize` argument [`Port::ctx_init`] receives, since the task's own id
/// is not known yet at the point `ctx_init` must be called (`spec.md`
/// §4.10's "trampoline which calls the user entry, then on return calls
/// the terminal exit path" does not require the trampoline to know its
/// own task id — the kernel's `current` pointer already does).
struct TrampolineArgs {
    entry: TaskEntry,
    arg: usize,
}

fn trampoline<P: Port>(packed: usize) {
    // Safety: `packed` is always a pointer produced by `Box::into_raw`
    // in `Kernel::task_create` for this exact type, consumed exactly
    // once (a task's trampoline runs at most once).
    let args = unsafe { Box::from_raw(packed as *mut TrampolineArgs) };
    (args.entry)(args.arg);
    Kernel::<P>::current().task_exit_current();
}

fn instance_cell<P: Port>() -> &'static spin::Once<usize> {
    // A `static` declared inside a generic function is monomorphized per
    // instantiation of `P`, giving each port its own singleton cell.
    static CELL: spin::Once<usize> = spin::Once::new();
    &CELL
}

impl<P: Port> Kernel<P> {
    pub const fn new(config: Config) -> Self {
        config.validate();
        Self {
            inner: SysCell::new(KernelInner::new(config)),
        }
    }

    /// Access to the protected inner state. Every operation in this crate
    /// funnels through here; `f` runs with `sys_lock` held for its whole
    /// duration, mirroring `spec.md` §4.2's "a re-entrant-counter-based
    /// critical section".
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce(&mut KernelInner<P>) -> R) -> R {
        sys_lock::<P>();
        // Safety: sys_lock is now held for the duration of this call, and
        // this closure cannot be re-entered for the same `self` without
        // itself going through `with_lock` (which would simply nest the
        // critical section, not alias `&mut`).
        let result = unsafe { self.inner.with_mut(f) };
        sys_unlock::<P>();
        result
    }

    /// Record `self` as *the* kernel instance for `P`, so the internal
    /// trampoline used by ports that spawn deferred execution contexts
    /// (`spec.md` §4.10's "trampoline which calls the user entry") can
    /// find it back. Must be called exactly once, before any task runs.
    pub fn sys_init(&'static self) {
        let cell = instance_cell::<P>();
        let already = cell.is_completed();
        cell.call_once(|| self as *const Self as usize);
        assert!(!already, "Kernel::sys_init called more than once");
    }

    fn current() -> &'static Self {
        let ptr = instance_cell::<P>()
            .get()
            .copied()
            .expect("Kernel::sys_init was never called");
        // Safety: the only pointer ever stored is `self as *const Self`
        // from `sys_init`, called on a `&'static Self`.
        unsafe { &*(ptr as *const Self) }
    }

    /// Current tick count (`spec.md` §4.3/§6 `sys_now`).
    pub fn sys_now(&self) -> Tick {
        self.with_lock(|inner| inner.tick)
    }

    /// Block the calling task for `ticks` ticks (`spec.md` §6 `sys_delay`;
    /// a thin name-matching alias over [`Kernel::task_sleep_for`], which
    /// this crate's task-lifecycle methods are grouped under instead).
    pub fn sys_delay(&self, ticks: Tick) {
        self.task_sleep_for(ticks);
    }

    /// Advance the tick count by one, waking any task whose delay has
    /// elapsed, and reschedule if a woken task now outranks whichever
    /// task is running (`spec.md` §4.3/§4.4). Intended to be driven by
    /// the port's periodic timer interrupt; under [`crate::sim::SimPort`]
    /// tests drive it directly.
    pub fn sys_tick(&self) {
        self.with_lock(|inner| {
            inner.tick = inner.tick.wrapping_add(1);
            let now = inner.tick;
            let expired: alloc::vec::Vec<TaskId> = inner.delay.drain_expired(now).collect();
            for task_id in expired {
                unlink_wait_object(inner, task_id);
                crate::wait::wake(inner, task_id, WakeResult::Timeout);
                ktrace!("task {:?} timed out at tick {}", task_id, now);
            }
            if let Some(hook) = inner.config.hooks.tick_hook {
                hook(now);
            }
            // Under cooperative scheduling the tick ISR only wakes
            // delayed tasks; the currently running task keeps running
            // until it next yields, sleeps, or blocks (`spec.md` §4.4).
            // Preemptive scheduling takes the reschedule point here too.
            if inner.config.scheduling_variant == crate::config::SchedulingVariant::Preemptive {
                self.reschedule(inner);
            }
        });
    }

    /// Pick the highest-priority ready task and, if it differs from the
    /// one currently running, switch to it (`spec.md` §4.4). Must be
    /// called with `sys_lock` already held (i.e., from inside
    /// [`Kernel::with_lock`]).
    pub(crate) fn reschedule(&self, inner: &mut KernelInner<P>) {
        let prev = inner.current;
        if let Some(prev_id) = prev {
            if inner.tasks.get(prev_id).map(|t| t.state) == Ok(TaskState::Ready) {
                // Still runnable, just giving up the CPU for this
                // decision: put it back in contention at its current
                // (possibly just-changed) priority instead of special-
                // casing "whatever was running a moment ago" — notably,
                // this makes "yield with nobody else ready" resolve to
                // picking itself straight back up rather than switching
                // away.
                let prio = inner.tasks.get(prev_id).unwrap().effective_priority;
                inner.ready.push_back(prio, prev_id);
            }
        }
        let next = inner.ready.peek_head();
        if next == prev {
            // Nothing changes: either both sides are idle, or `prev` was
            // just requeued above and is still the best candidate. Pull
            // it back out — a running task is never also on the ready
            // list — and return without a switch.
            if let Some(next_id) = next {
                inner.ready.remove(
                    inner.tasks.get(next_id).unwrap().effective_priority,
                    next_id,
                );
            }
            return;
        }
        if let Some(next) = next {
            inner
                .ready
                .remove(inner.tasks.get(next).unwrap().effective_priority, next);
        }
        inner.current = next;
        kdebug!("switch to {:?}", next);
        let next_context = match next {
            Some(t) => &inner.tasks.get(t).unwrap().context,
            None => P::idle_context(),
        };
        // Safety: called with sys_lock held and the ready list/current
        // pointer already updated to reflect the decision being acted on.
        unsafe { P::switch_now(next_context) };
    }

    /// Create a task in the `Stopped` state (`spec.md` §3/§4.10
    /// `task_create`). Does not make it runnable; call
    /// [`Kernel::task_start`].
    pub fn task_create(
        &'static self,
        entry: TaskEntry,
        arg: usize,
        priority: Priority,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        let trampoline_args = Box::new(TrampolineArgs { entry, arg });
        let packed = Box::into_raw(trampoline_args) as usize;
        let context = P::ctx_init(core::ptr::null_mut(), trampoline::<P>, packed);
        self.with_lock(|inner| {
            let id = inner.tasks.insert(Task {
                id: TaskId::dangling(),
                base_priority: priority,
                effective_priority: priority,
                stack_size,
                state: TaskState::Stopped,
                context,
                wait_object: WaitObject::None,
                deadline: INFINITE,
                wake_result: WakeResult::Success,
                owned_mutexes: arrayvec::ArrayVec::new(),
                joiners: alloc::collections::VecDeque::new(),
                detached: false,
                started: false,
            });
            inner.tasks.get_mut(id).unwrap().id = id;
            Ok(id)
        })
    }

    /// Move a task from `Stopped` into the ready list for the first time
    /// (`spec.md` §4.10 `task_start`). Calling it on an already-started
    /// task is an error.
    pub fn task_start(&self, task_id: TaskId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let task = inner.tasks.get_mut(task_id)?;
            if task.started {
                return Err(KernelError::Invalid);
            }
            task.started = true;
            task.state = TaskState::Ready;
            let prio = task.effective_priority;
            inner.ready.push_back(prio, task_id);
            self.reschedule(inner);
            Ok(())
        })
    }

    /// The caller's own id (`spec.md` §6 `task_this`).
    pub fn task_this(&self) -> TaskId {
        self.with_lock(|inner| inner.current.expect("task_this: no task is running"))
    }

    /// Voluntarily give up the remainder of the current time slice to
    /// other ready tasks at the same priority (`spec.md` §4.10
    /// `task_yield`).
    pub fn task_yield(&self) {
        self.with_lock(|inner| {
            let current = inner.current.expect("task_yield: no task is running");
            let prio = inner.tasks.get(current).unwrap().effective_priority;
            inner.ready.rotate_level(prio);
            self.reschedule(inner);
        });
    }

    /// Block the calling task for `ticks` ticks (`spec.md` §4.10
    /// `task_sleep_for`), or forever if `ticks` is [`INFINITE`].
    pub fn task_sleep_for(&self, ticks: Tick) {
        let deadline_now = self.with_lock(|inner| inner.tick);
        self.task_sleep_until(deadline_now.wrapping_add(ticks));
    }

    /// Block the calling task until absolute tick `deadline` (`spec.md`
    /// §4.10 `task_sleep_until`).
    pub fn task_sleep_until(&self, deadline: Tick) {
        self.with_lock(|inner| {
            crate::wait::suspend_current(inner, WaitObject::Sleep, deadline);
            self.reschedule(inner);
        });
    }

    /// Block until `target` terminates (`spec.md` §4.10 `task_join`).
    /// Fails with `KernelError::Invalid` if `target` is detached or
    /// already reaped, with `KernelError::Deadlock` if `target` is the
    /// caller.
    pub fn task_join(&self, target: TaskId) -> Result<(), KernelError> {
        let already_stopped = self.with_lock(|inner| {
            let current = inner.current.expect("task_join: no task is running");
            if target == current {
                return Err(KernelError::Deadlock);
            }
            let target_task = inner.tasks.get_mut(target)?;
            if target_task.detached {
                return Err(KernelError::Invalid);
            }
            if target_task.state == TaskState::Stopped {
                return Ok(true);
            }
            target_task.joiners.push_back(current);
            crate::wait::suspend_current(inner, WaitObject::Join(target), INFINITE);
            self.reschedule(inner);
            Ok(false)
        })?;
        if already_stopped {
            return Ok(());
        }
        let result = self.with_lock(|inner| {
            inner
                .tasks
                .get(inner.current.expect("task_join: resumed with no running task"))
                .map(|t| t.wake_result)
                .unwrap_or(WakeResult::Success)
        });
        result.into_result()
    }

    /// Detach a task: once it terminates its record is reclaimed
    /// immediately instead of waiting for a joiner (`spec.md` §4.10
    /// `task_detach`).
    pub fn task_detach(&self, task_id: TaskId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let task = inner.tasks.get_mut(task_id)?;
            if !task.joiners.is_empty() {
                return Err(KernelError::Invalid);
            }
            task.detached = true;
            Ok(())
        })
    }

    /// Forcibly terminate `task_id`, releasing any mutexes it owns and
    /// waking its joiners (`spec.md` §4.10 `task_kill`). Killing the
    /// caller itself is equivalent to it returning from its entry
    /// function.
    pub fn task_kill(&self, task_id: TaskId) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            let state = inner.tasks.get(task_id)?.state;
            match state {
                TaskState::Blocked | TaskState::Delayed => {
                    unlink_wait_object(inner, task_id);
                    crate::wait::cancel_wait(inner, task_id, WakeResult::Cancelled);
                }
                TaskState::Ready => {
                    let prio = inner.tasks.get(task_id).unwrap().effective_priority;
                    inner.ready.remove(prio, task_id);
                }
                TaskState::Suspended | TaskState::Stopped => {}
            }
            self.terminate(inner, task_id);
            if inner.current == Some(task_id) {
                self.reschedule(inner);
            }
            Ok(())
        })
    }

    /// Entry point called by the port trampoline when a task's entry
    /// function returns on its own (`spec.md` §4.10: normal exit).
    /// Under [`crate::config::TaskOnExitPolicy::LoopForever`] (the
    /// default) this does not terminate the task at all — it is treated
    /// like a misbehaving task that never should have returned, and is
    /// simply parked, still holding whatever it owned, so a bug surfaces
    /// as a stuck task rather than a silently reclaimed one.
    fn task_exit_current(&self) {
        let policy = self.with_lock(|inner| {
            let current = inner.current.expect("task_exit_current: no task is running");
            let policy = inner.config.task_on_exit_policy;
            if let crate::config::TaskOnExitPolicy::AutoTerminate = policy {
                self.terminate(inner, current);
                self.reschedule(inner);
            }
            policy
        });
        let _ = policy;
        // The calling OS thread (under `SimPort`) or hardware context
        // (under a real port, hypothetically) must not fall off the end
        // of the trampoline: under `AutoTerminate` the reschedule above
        // already transferred control away via `switch_now` and this
        // frame is simply never resumed; under `LoopForever` nothing
        // transferred control away, so park explicitly.
        #[cfg(feature = "sim")]
        crate::sim::park_forever();
    }

    /// Release every mutex `task_id` still owns, wake its joiners, mark
    /// it `Stopped`. Shared by `task_kill` and normal exit.
    fn terminate(&self, inner: &mut KernelInner<P>, task_id: TaskId) {
        let owned: alloc::vec::Vec<_> = inner
            .tasks
            .get(task_id)
            .map(|t| t.owned_mutexes.iter().copied().collect())
            .unwrap_or_default();
        for mutex_id in owned {
            let _ = crate::mutex::force_unlock(self, inner, mutex_id, task_id);
        }
        let joiners: alloc::collections::VecDeque<TaskId> = match inner.tasks.get_mut(task_id) {
            Ok(t) => {
                t.state = TaskState::Stopped;
                core::mem::take(&mut t.joiners)
            }
            Err(_) => return,
        };
        let detached = inner.tasks.get(task_id).map(|t| t.detached).unwrap_or(false);
        for joiner in joiners {
            crate::wait::wake(inner, joiner, WakeResult::Success);
        }
        if detached {
            let _ = inner.tasks.remove(task_id);
        }
        // `inner.current` is left pointing at `task_id` on purpose: it is
        // the sole job of `reschedule` (called by every caller of
        // `terminate`) to notice the mismatch against the ready list and
        // drive the switch away, including the switch to idle when
        // nothing else is ready. Clearing it here would make that switch
        // look like a no-op change (idle to idle) and strand the
        // terminating context as "current" forever.
    }

    /// Change a task's *base* priority (`spec.md` §4.10 `task_set_prio`).
    /// If the task does not currently hold a priority-inheritance boost,
    /// its effective priority changes immediately and a reschedule point
    /// is taken.
    pub fn task_set_prio(&self, task_id: TaskId, priority: Priority) -> Result<(), KernelError> {
        self.with_lock(|inner| {
            inner.tasks.get_mut(task_id)?.base_priority = priority;
            crate::mutex::recompute_effective_priority(inner, task_id);
            self.reschedule(inner);
            Ok(())
        })
    }
}

/// Remove `task_id` from whatever object-specific wait queue its
/// `wait_object` names, without changing its task-table state. Shared by
/// every path that cancels a wait out from under a task: timeout,
/// `task_kill`, and object destruction.
pub(crate) fn unlink_wait_object<P: Port>(inner: &mut KernelInner<P>, task_id: TaskId) {
    let wait_object = match inner.tasks.get(task_id) {
        Ok(t) => t.wait_object,
        Err(_) => return,
    };
    match wait_object {
        WaitObject::None | WaitObject::Sleep => {}
        WaitObject::Mutex(id) => {
            if let Ok(m) = inner.mutexes.get_mut(id) {
                m.waiters.retain(|&t| t != task_id);
            }
        }
        WaitObject::Semaphore(id) => {
            if let Ok(s) = inner.semaphores.get_mut(id) {
                s.waiters.retain(|&t| t != task_id);
            }
        }
        WaitObject::Condvar(id) => {
            if let Ok(c) = inner.condvars.get_mut(id) {
                c.waiters.retain(|&t| t != task_id);
            }
        }
        WaitObject::Join(target) => {
            if let Ok(t) = inner.tasks.get_mut(target) {
                t.joiners.retain(|&j| j != task_id);
            }
        }
    }
}
