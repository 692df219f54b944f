//! Kernel configuration record.
//!
//! `spec.md` §6 enumerates the configuration options the core recognizes
//! as a table. `r3_kernel::cfg` turns the equivalent table into a
//! compile-time `CfgBuilder` because `r3_core`'s kernel objects are sized
//! and laid out at link time via const generics. This core is arena-based
//! (see `crate::arena`), so the same information is carried at runtime in
//! a plain `Config` record supplied once to `Kernel::sys_init`.

use crate::mutex::{MutexProtocol, MutexType};
use crate::task::Priority;

/// Cooperative vs. preemptive scheduling, `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingVariant {
    /// Reschedules happen only at explicit kernel calls and after the tick
    /// ISR returns through a yield point; the ISR never switches directly.
    Cooperative,
    /// The tick ISR (or a dedicated pend exception) may switch directly.
    Preemptive,
}

/// What happens when a task's entry function returns, `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOnExitPolicy {
    /// The task's trampoline loops forever (parking) instead of
    /// terminating.
    LoopForever,
    /// The task is terminated the same way an explicit `task_kill` would
    /// terminate it.
    AutoTerminate,
}

/// Optional user-installable callbacks, the re-architected form of
/// `spec.md` §9's "weak-symbol hooks" note. Every field has a core-
/// provided default; installing `Hooks` at `sys_init` overrides only the
/// fields the caller sets.
#[derive(Clone, Copy)]
pub struct Hooks {
    /// Called from the tick ISR after the tick counter advances and any
    /// expired delays have been woken, before a possible reschedule.
    pub tick_hook: Option<fn(now: u64)>,
    /// Called by the idle task on every pass with nothing else ready to
    /// run. Intended for a CPU sleep primitive; the idle task itself
    /// never blocks or terminates (`spec.md` §4.4).
    pub idle_hook: Option<fn()>,
    /// Called when an internal invariant assertion fails
    /// (`spec.md` §4.11). The default aborts via `core::panic!`. A custom
    /// hook that returns is still followed by an abort — this hook exists
    /// to log or flush state, not to recover.
    pub assert_fail_hook: Option<fn(msg: &str)>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            tick_hook: None,
            idle_hook: None,
            assert_fail_hook: None,
        }
    }
}

impl Hooks {
    pub const fn new() -> Self {
        Self {
            tick_hook: None,
            idle_hook: None,
            assert_fail_hook: None,
        }
    }
}

/// The configuration record passed once to `Kernel::sys_init`.
#[derive(Clone, Copy)]
pub struct Config {
    /// Frequency of the periodic tick interrupt, in Hz. Typically 1 kHz.
    pub tick_rate_hz: u32,
    /// Default stack size reserved per task, in bytes.
    pub stack_size_default: usize,
    /// Stack size reserved for the built-in idle task, in bytes.
    pub idle_stack_size: usize,
    /// Priority assigned to the initial "main" task.
    pub main_priority: Priority,
    /// Cooperative or preemptive scheduling.
    pub scheduling_variant: SchedulingVariant,
    /// Default mutex type for `Mutex::new_default`.
    pub mutex_type_default: MutexType,
    /// Default mutex protocol for `Mutex::new_default`.
    pub mutex_protocol_default: MutexProtocol,
    /// Upper bound for semaphore counts when none is supplied explicitly.
    pub semaphore_max_default: u32,
    /// What happens when a task entry function returns normally.
    pub task_on_exit_policy: TaskOnExitPolicy,
    /// User-overridable hooks.
    pub hooks: Hooks,
}

impl Config {
    /// A configuration with conservative defaults: 1 kHz tick, 4 KiB task
    /// stacks, 512 B idle stack, preemptive scheduling, normal/none
    /// mutexes, semaphore counts capped at `u32::MAX`, and tasks that loop
    /// forever on return.
    pub const fn new() -> Self {
        Self {
            tick_rate_hz: 1000,
            stack_size_default: 4096,
            idle_stack_size: 512,
            main_priority: 0,
            scheduling_variant: SchedulingVariant::Preemptive,
            mutex_type_default: MutexType::Normal,
            mutex_protocol_default: MutexProtocol::None,
            semaphore_max_default: u32::MAX,
            task_on_exit_policy: TaskOnExitPolicy::LoopForever,
            hooks: Hooks::new(),
        }
    }

    /// Compile-time validity check, the re-architected form of `spec.md`
    /// §9's "`static_assert` on clock/prescaler math" note. Call this from
    /// a `const _: () = Config::validate(&MY_CONFIG);` item so a
    /// misconfigured tick rate or semaphore maximum fails the build
    /// instead of misbehaving on target.
    pub const fn validate(&self) {
        if self.tick_rate_hz == 0 {
            panic!("Config::tick_rate_hz must be nonzero");
        }
        if self.semaphore_max_default == 0 {
            panic!("Config::semaphore_max_default must be nonzero");
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = Config::new().validate();
