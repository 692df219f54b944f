//! Tick counter, wrap-safe comparisons, and the delay queue.
//!
//! `spec.md` §4.3 picks a tick type (32 or 64 bit) per target and leaves
//! the exact read strategy on 8-bit targets as an open question (§9):
//! "double-read retry" vs. "`sys_lock`ed read" are both correct; this
//! core picks the `sys_lock`ed read uniformly (`Kernel::sys_now`), since
//! the core already pays for a `sys_lock` on every path that needs "now"
//! together with other protected state, and a second, independent
//! locking discipline for ticks alone buys nothing here.

use alloc::vec::Vec;

use crate::task::TaskId;

/// The tick counter's representation. `spec.md` allows 32- or 64-bit
/// ticks depending on target; this core always uses the wider type and
/// leaves truncation to narrower hardware timers to the (unimplemented)
/// port layer, per `spec.md` §9's "choose one and apply uniformly".
pub type Tick = u64;

/// Sentinel meaning "never expires" (`spec.md` §6).
pub const INFINITE: Tick = Tick::MAX;

/// Sentinel meaning "try only, never block" (`spec.md` §6).
pub const IMMEDIATE: Tick = 0;

/// Wrap-safe "has `deadline` been reached as of `now`". Tick differences
/// are compared as signed quantities (`spec.md` §4.3): `now >= deadline`
/// iff `(now - deadline)` does not have its sign bit set when
/// interpreted as a 64-bit two's-complement difference narrower than the
/// full range — in practice, since we never let a single delay span more
/// than half the tick space, a plain wrapping subtraction's sign bit is
/// exactly the wrap-safe answer.
pub(crate) fn tick_reached(now: Tick, deadline: Tick) -> bool {
    if deadline == INFINITE {
        return false;
    }
    (now.wrapping_sub(deadline) as i64) >= 0
}

/// One entry in the delay queue: a task and the absolute deadline it is
/// waiting for.
#[derive(Debug, Clone, Copy)]
struct DelayEntry {
    task: TaskId,
    deadline: Tick,
}

/// Tasks ordered by ascending absolute deadline (`spec.md` §3). Kept as
/// an insertion-sorted `Vec`: insertion is O(n), but so is ready-list
/// insertion (`spec.md` §4.4), and the delay queue is bounded by the
/// number of live tasks, which on a deeply embedded target is small.
#[derive(Default)]
pub(crate) struct DelayQueue {
    entries: Vec<DelayEntry>,
}

impl DelayQueue {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert `task` with the given absolute `deadline`. `INFINITE`
    /// deadlines are never inserted (`spec.md` §4.5: "delay-queue
    /// insertion is suppressed").
    pub(crate) fn insert(&mut self, task: TaskId, deadline: Tick) {
        if deadline == INFINITE {
            return;
        }
        let pos = self
            .entries
            .partition_point(|e| tick_reached(deadline, e.deadline));
        self.entries.insert(pos, DelayEntry { task, deadline });
    }

    pub(crate) fn remove(&mut self, task: TaskId) {
        if let Some(pos) = self.entries.iter().position(|e| e.task == task) {
            self.entries.remove(pos);
        }
    }

    pub(crate) fn contains(&self, task: TaskId) -> bool {
        self.entries.iter().any(|e| e.task == task)
    }

    /// Drain every entry whose deadline has been reached as of `now`.
    pub(crate) fn drain_expired(&mut self, now: Tick) -> impl Iterator<Item = TaskId> + '_ {
        let split = self
            .entries
            .iter()
            .position(|e| !tick_reached(now, e.deadline))
            .unwrap_or(self.entries.len());
        self.entries.drain(..split).map(|e| e.task)
    }

    #[cfg(test)]
    pub(crate) fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| !tick_reached(w[0].deadline, w[1].deadline) || w[0].deadline == w[1].deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Index;

    fn tid(n: u32) -> TaskId {
        // Tests only need distinct, comparable task ids; construct them
        // through the arena they actually come from in `task.rs`.
        crate::task::test_support::fake_task_id(n)
    }

    #[test]
    fn wrap_safe_comparison_handles_wraparound() {
        let now = Tick::MAX - 5;
        let deadline = now.wrapping_add(10); // wraps to 4
        assert!(!tick_reached(now, deadline));
        assert!(tick_reached(now.wrapping_add(10), deadline));
        assert!(tick_reached(now.wrapping_add(11), deadline));
    }

    #[test]
    fn delay_queue_stays_sorted_and_drains_expired() {
        let mut q = DelayQueue::new();
        q.insert(tid(1), 100);
        q.insert(tid(2), 50);
        q.insert(tid(3), 75);
        assert!(q.is_sorted());
        let expired: Vec<_> = q.drain_expired(80).collect();
        assert_eq!(expired, alloc::vec![tid(2), tid(3)]);
        assert!(q.is_sorted());
        assert!(q.contains(tid(1)));
    }

    #[test]
    fn infinite_deadline_is_never_inserted() {
        let mut q = DelayQueue::new();
        q.insert(tid(1), INFINITE);
        assert!(!q.contains(tid(1)));
    }

    #[quickcheck_macros::quickcheck]
    fn delay_queue_invariant_sorted_after_random_ops(ops: Vec<(u8, u64)>) -> bool {
        let mut q = DelayQueue::new();
        for (i, (task, deadline)) in ops.into_iter().enumerate() {
            q.insert(tid(task as u32), deadline.wrapping_add(i as u64 * 0));
        }
        q.is_sorted()
    }
}
