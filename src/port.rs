//! The architecture adaptation contract, `spec.md` §4.1.
//!
//! Everything above this trait is portable; everything behind it (how a
//! `Context` is laid out, register save order, stack growth direction) is
//! architecture-specific and opaque to the core. `r3_kernel` expresses
//! the same boundary as its `PortThreading` trait plus a handful of free
//! functions generated by `use_port!`; this is the arena-based core's
//! equivalent without the const-generic `Traits` machinery.
//!
//! The core relies on one invariant the port must uphold: **a saved
//! context, once restored, is indistinguishable from the point at which
//! it was saved, including flags** (`spec.md` §4.1).

/// A stack pointer, as far as the portable core is concerned: an opaque
/// address the port alone interprets.
pub type StackPointer = *mut u8;

/// Architecture adaptation. No implementation is provided for real
/// hardware — chip bring-up and register-level context switching are
/// explicitly out of scope (`spec.md` §1) — but [`crate::sim::SimPort`]
/// (behind the `sim` feature) implements this contract on top of real OS
/// threads so the portable core can be driven end to end by tests.
pub trait Port: Sized + 'static {
    /// The saved, callee-saved register image of a non-running task
    /// (`spec.md` §3), plus whatever a concrete port needs to resume a
    /// task exactly where it left off.
    type Context: Send;

    /// Whatever `get_lock`/`put_lock` exchange: the previous
    /// interrupt-enable state, to be restored verbatim, never OR'd in
    /// (`spec.md` §4.1: "`put_lock` MUST be an unconditional write, not
    /// an OR").
    type LockState: Copy;

    /// Construct a fresh `Context` for a task that, when first
    /// scheduled, begins executing `entry(arg)` with its stack pointer
    /// at `stack_top`, and whose register image includes whatever
    /// initial condition/flags register and return-address slot the
    /// restore path expects to pop (`spec.md` §4.1).
    fn ctx_init(stack_top: StackPointer, entry: crate::task::TaskEntry, arg: usize)
        -> Self::Context;

    /// Read the current stack pointer.
    fn get_sp() -> StackPointer;

    /// Overwrite the current stack pointer.
    ///
    /// # Safety
    /// The caller must ensure `sp` points into a stack region that is
    /// valid for the context about to execute.
    unsafe fn set_sp(sp: StackPointer);

    /// Save the calling (outgoing) task's context and restore `next`,
    /// transferring control to it. Safe to call with interrupts disabled;
    /// must leave interrupts enabled or disabled consistently with the
    /// *incoming* task's saved flags, not the outgoing one's. The outgoing
    /// context itself is not named here: a real port tracks "which
    /// context is currently executing" the same way it tracks any other
    /// piece of per-CPU state (e.g. a `pxCurrentTCB`-style pointer it
    /// updates as part of this very call).
    ///
    /// # Safety
    /// Must only be called from within a `sys_lock`ed region, with the
    /// kernel's ready list and delay queue already in their post-switch-
    /// decision state.
    unsafe fn switch_now(next: &Self::Context);

    /// The context switched to when nothing is ready to run (`spec.md`
    /// §4.4's idle point). A real port typically parks the core in a
    /// low-power wait state here; [`crate::sim::SimPort`] resumes whatever
    /// external caller most recently drove the kernel with nothing
    /// scheduled, so a test function picks up exactly where it left off.
    fn idle_context() -> &'static Self::Context;

    /// Read the interrupt-enable state without changing it.
    fn get_lock() -> Self::LockState;

    /// Restore a previously observed interrupt-enable state. Must be an
    /// unconditional write (`spec.md` §4.1).
    ///
    /// # Safety
    /// `saved` must have come from a matching [`Port::get_lock`] call on
    /// the same execution context.
    unsafe fn put_lock(saved: Self::LockState);

    /// Disable interrupts (enter the locked state).
    fn set_lock();

    /// Enable interrupts (leave the locked state).
    fn clr_lock();

    /// Whether the caller is currently executing in interrupt context.
    fn in_isr() -> bool;
}
