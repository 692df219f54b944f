//! `sys_lock`: the kernel-wide critical section, `spec.md` §4.2.
//!
//! Grounded on `r3_kernel::klock::CpuLockCell`, with the token-based
//! `tokenlock` machinery (needed there to let the const-generic `Traits`
//! system prove at compile time that a `CpuLockCell` is only touched
//! while CPU Lock is held) replaced by a runtime nesting counter plus an
//! `UnsafeCell`, exactly as `spec.md` §4.2 describes it: "a re-entrant-
//! counter-based critical section; entry disables interrupts (saving
//! previous state on the first level), exit decrements and on zero
//! restores."
//!
//! This core folds that "save/restore previous state" down to the
//! simpler discipline of calling [`Port::set_lock`]/[`Port::clr_lock`]
//! only on the outermost entry/exit (the same discipline FreeRTOS's
//! `portENTER_CRITICAL`/`portEXIT_CRITICAL` use) rather than chaining
//! [`Port::get_lock`]/[`Port::put_lock`] through every level — for a
//! target with a single binary interrupt-enable flag the two are
//! equivalent, and the simpler one has one fewer place to get wrong.
//! [`Port::get_lock`]/[`Port::put_lock`] remain part of the contract for
//! ports that need to thread through a richer interrupt-priority state,
//! but the generic core does not call them itself. Noted as a resolved
//! open question in `DESIGN.md`.

use core::cell::UnsafeCell;

use crate::port::Port;

#[cfg(feature = "sim")]
std::thread_local! {
    static DEPTH: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
}

#[cfg(not(feature = "sim"))]
struct DepthCell(core::cell::Cell<u32>);
#[cfg(not(feature = "sim"))]
// Safety: a real target this core runs on has exactly one execution
// context at a time (single core, and nesting is only ever adjusted
// with the port's interrupt-enable state already under this module's
// control), so a plain `Cell` shared across "threads" that never truly
// run concurrently is sound. The `sim` port, which backs tasks with real
// OS threads, uses a genuine `thread_local!` instead (see above).
unsafe impl Sync for DepthCell {}
#[cfg(not(feature = "sim"))]
static DEPTH: DepthCell = DepthCell(core::cell::Cell::new(0));

fn depth_enter<P: Port>() -> u32 {
    #[cfg(feature = "sim")]
    {
        DEPTH.with(|d| {
            let nd = d.get() + 1;
            d.set(nd);
            nd
        })
    }
    #[cfg(not(feature = "sim"))]
    {
        let nd = DEPTH.0.get() + 1;
        DEPTH.0.set(nd);
        nd
    }
}

fn depth_exit<P: Port>() -> u32 {
    #[cfg(feature = "sim")]
    {
        DEPTH.with(|d| {
            let nd = d.get().checked_sub(1).expect("sys_unlock without sys_lock");
            d.set(nd);
            nd
        })
    }
    #[cfg(not(feature = "sim"))]
    {
        let nd = DEPTH
            .0
            .get()
            .checked_sub(1)
            .expect("sys_unlock without sys_lock");
        DEPTH.0.set(nd);
        nd
    }
}

/// Enter a `sys_lock`ed region. Pairs with [`sys_unlock`]. Nests freely;
/// only the outermost entry actually disables interrupts.
pub(crate) fn sys_lock<P: Port>() {
    let depth = depth_enter::<P>();
    if depth == 1 && !P::in_isr() {
        P::set_lock();
    }
}

/// Leave a `sys_lock`ed region entered by a matching [`sys_lock`] call.
///
/// # Panics
/// Panics (an internal invariant failure per `spec.md` §4.11) if called
/// without a matching outstanding `sys_lock`.
pub(crate) fn sys_unlock<P: Port>() {
    let depth = depth_exit::<P>();
    if depth == 0 && !P::in_isr() {
        P::clr_lock();
    }
}

/// A cell whose contents may only be soundly accessed while `sys_lock`
/// is held, the runtime-checked counterpart of `r3_kernel`'s statically-
/// checked `CpuLockCell`.
pub(crate) struct SysCell<T> {
    inner: UnsafeCell<T>,
}

// Safety: access to the contents is only ever performed through
// `with_locked`, which requires the caller to already hold `sys_lock`
// (enforced by construction: every call site in this crate goes through
// `Kernel::with_lock`, which itself calls `sys_lock`/`sys_unlock`).
unsafe impl<T: Send> Sync for SysCell<T> {}

impl<T> SysCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
        }
    }

    /// # Safety
    /// The caller must currently hold `sys_lock` for the same `Port`
    /// this cell is shared under, and must not re-enter this method
    /// (directly or through a callback) for the same cell while the
    /// returned reference is alive.
    #[inline]
    pub(crate) unsafe fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(unsafe { &mut *self.inner.get() })
    }
}
