//! End-to-end scenarios from `spec.md` §8, driven on [`SimPort`].
//!
//! `SimPort` is a strictly voluntary baton: exactly one simulated thread
//! ever runs at a time, and it only moves at an explicit kernel call that
//! blocks or yields. That makes every interleaving below fully
//! deterministic — there is no real concurrency to race against, so the
//! assertions pin down an exact sequence of events rather than a
//! probabilistic one.
//!
//! All scenarios here share one process-wide `Kernel<SimPort>`, since
//! [`Kernel::sys_init`] may only be called once per port type per process
//! (see its doc comment); [`GUARD`] serializes the tests so only one
//! drives the kernel at a time. (The tick-wrap boundary scenario needs to
//! set the tick counter directly, which only crate-internal code can do —
//! see the `tick_wrap` test inside `src/sim.rs` instead.)

#![cfg(feature = "sim")]

use std::sync::{Mutex as StdMutex, Once};

use mintrt::{
    Config, Kernel, KernelError, MutexId, MutexProtocol, MutexType, OnceId, SemId, SimPort,
};

static KERNEL: Kernel<SimPort> = Kernel::new(Config::new());
static GUARD: StdMutex<()> = StdMutex::new(());
static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| KERNEL.sys_init());
}

fn lock_guard() -> std::sync::MutexGuard<'static, ()> {
    GUARD.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------
// Scenario 1: priority inheritance chain.
// ---------------------------------------------------------------------

static S1_MUTEX: StdMutex<Option<MutexId>> = StdMutex::new(None);
static S1_GATE: StdMutex<Option<SemId>> = StdMutex::new(None);
static S1_LOG: StdMutex<Vec<&'static str>> = StdMutex::new(Vec::new());

fn s1_low(_arg: usize) {
    let mutex = S1_MUTEX.lock().unwrap().unwrap();
    KERNEL.mutex_lock(mutex).unwrap();
    S1_LOG.lock().unwrap().push("low:locked");

    let mid = KERNEL.task_create(s1_mid, 0, 5, 4096).unwrap();
    KERNEL.task_start(mid).unwrap();
    S1_LOG.lock().unwrap().push("low:after-mid-started");

    let high = KERNEL.task_create(s1_high, 0, 9, 4096).unwrap();
    KERNEL.task_start(high).unwrap();
    S1_LOG.lock().unwrap().push("low:after-high-started");

    // T_high is now blocked on `mutex`, boosting this task's effective
    // priority to 9. Waking T_mid here should not preempt it: at 9, this
    // task still outranks T_mid's 5.
    let gate = S1_GATE.lock().unwrap().unwrap();
    KERNEL.sem_post(gate).unwrap();

    S1_LOG.lock().unwrap().push("low:unlocking");
    KERNEL.mutex_unlock(mutex).unwrap();
    S1_LOG.lock().unwrap().push("low:released");
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

fn s1_mid(_arg: usize) {
    let gate = S1_GATE.lock().unwrap().unwrap();
    KERNEL.sem_wait(gate).unwrap();
    S1_LOG.lock().unwrap().push("mid:ran");
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

fn s1_high(_arg: usize) {
    let mutex = S1_MUTEX.lock().unwrap().unwrap();
    KERNEL.mutex_lock(mutex).unwrap();
    S1_LOG.lock().unwrap().push("high:locked");
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

#[test]
fn priority_inheritance_chain() {
    let _guard = lock_guard();
    ensure_init();

    let mutex = KERNEL.mutex_init(MutexType::Normal, MutexProtocol::PriorityInherit, None);
    let gate = KERNEL.sem_init(0, 1).unwrap();
    *S1_MUTEX.lock().unwrap() = Some(mutex);
    *S1_GATE.lock().unwrap() = Some(gate);
    S1_LOG.lock().unwrap().clear();

    let low = KERNEL.task_create(s1_low, 0, 1, 4096).unwrap();
    KERNEL.task_start(low).unwrap();

    let log = S1_LOG.lock().unwrap();
    assert_eq!(
        *log,
        vec![
            "low:locked",
            "low:after-mid-started",
            "low:after-high-started",
            "low:unlocking",
            "high:locked",
            "mid:ran",
            "low:released",
        ],
    );
}

// ---------------------------------------------------------------------
// Scenario 2: timeout precision.
// ---------------------------------------------------------------------

static S2_SEM: StdMutex<Option<SemId>> = StdMutex::new(None);
static S2_RESULT: StdMutex<Option<(Result<(), KernelError>, u64)>> = StdMutex::new(None);

fn s2_waiter(_arg: usize) {
    let sem = S2_SEM.lock().unwrap().unwrap();
    let result = KERNEL.sem_wait_until(sem, 1050);
    *S2_RESULT.lock().unwrap() = Some((result, KERNEL.sys_now()));
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

#[test]
fn timeout_precision() {
    let _guard = lock_guard();
    ensure_init();

    let sem = KERNEL.sem_init(0, 1).unwrap();
    *S2_SEM.lock().unwrap() = Some(sem);
    *S2_RESULT.lock().unwrap() = None;

    for _ in 0..1000 {
        KERNEL.sys_tick();
    }
    assert_eq!(KERNEL.sys_now(), 1000);

    let task = KERNEL.task_create(s2_waiter, 0, 1, 4096).unwrap();
    KERNEL.task_start(task).unwrap();
    assert!(S2_RESULT.lock().unwrap().is_none(), "woke before its deadline");

    for _ in 0..49 {
        KERNEL.sys_tick();
        assert!(
            S2_RESULT.lock().unwrap().is_none(),
            "timed out before tick 1050"
        );
    }
    KERNEL.sys_tick(); // tick 1050: deadline reached
    let (result, woke_at) = S2_RESULT.lock().unwrap().take().expect("task never woke");
    assert_eq!(result, Err(KernelError::Timeout));
    assert!(woke_at >= 1050);
}

// ---------------------------------------------------------------------
// Scenario 3: once-flag race.
// ---------------------------------------------------------------------

static S3_ONCE: StdMutex<Option<OnceId>> = StdMutex::new(None);
static S3_COUNTER: StdMutex<u32> = StdMutex::new(0);
static S3_RAN: StdMutex<Vec<u32>> = StdMutex::new(Vec::new());

fn s3_task(arg: usize) {
    let once_id = S3_ONCE.lock().unwrap().unwrap();
    KERNEL
        .once_call(once_id, || *S3_COUNTER.lock().unwrap() += 1)
        .unwrap();
    S3_RAN.lock().unwrap().push(arg as u32);
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

#[test]
fn once_flag_race() {
    let _guard = lock_guard();
    ensure_init();

    let once_id = KERNEL.once_init();
    *S3_ONCE.lock().unwrap() = Some(once_id);
    *S3_COUNTER.lock().unwrap() = 0;
    S3_RAN.lock().unwrap().clear();

    for i in 0..4u32 {
        let task = KERNEL.task_create(s3_task, i as usize, 1, 4096).unwrap();
        KERNEL.task_start(task).unwrap();
    }

    assert_eq!(*S3_COUNTER.lock().unwrap(), 1);
    let mut ran = S3_RAN.lock().unwrap().clone();
    ran.sort_unstable();
    assert_eq!(ran, vec![0, 1, 2, 3]);
}

// ---------------------------------------------------------------------
// Scenario 4: mutex destroyed with waiters.
// ---------------------------------------------------------------------

static S4_MUTEX: StdMutex<Option<MutexId>> = StdMutex::new(None);
static S4_T1_LOCKED: StdMutex<bool> = StdMutex::new(false);
static S4_T2_RESULT: StdMutex<Option<Result<(), KernelError>>> = StdMutex::new(None);

fn s4_t1(_arg: usize) {
    let mutex = S4_MUTEX.lock().unwrap().unwrap();
    KERNEL.mutex_lock(mutex).unwrap();
    *S4_T1_LOCKED.lock().unwrap() = true;
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

fn s4_t2(_arg: usize) {
    let mutex = S4_MUTEX.lock().unwrap().unwrap();
    let result = KERNEL.mutex_lock(mutex);
    *S4_T2_RESULT.lock().unwrap() = Some(result);
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

#[test]
fn mutex_destroyed_with_waiters() {
    let _guard = lock_guard();
    ensure_init();

    let mutex = KERNEL.mutex_init(MutexType::Normal, MutexProtocol::None, None);
    *S4_MUTEX.lock().unwrap() = Some(mutex);
    *S4_T1_LOCKED.lock().unwrap() = false;
    *S4_T2_RESULT.lock().unwrap() = None;

    let t1 = KERNEL.task_create(s4_t1, 0, 1, 4096).unwrap();
    KERNEL.task_start(t1).unwrap();
    assert!(*S4_T1_LOCKED.lock().unwrap());

    let t2 = KERNEL.task_create(s4_t2, 0, 1, 4096).unwrap();
    KERNEL.task_start(t2).unwrap();
    assert!(
        S4_T2_RESULT.lock().unwrap().is_none(),
        "T2 should still be blocked on the held mutex"
    );

    // A "third task" destroying M while T1 still owns it: driven directly
    // from here since destroying a mutex needs no task context of its own.
    KERNEL.mutex_destroy(mutex).unwrap();

    let result = S4_T2_RESULT.lock().unwrap().take().expect("T2 never woke");
    assert_eq!(result, Err(KernelError::Deleted));

    assert_eq!(KERNEL.mutex_destroy(mutex), Err(KernelError::Invalid));
}

// ---------------------------------------------------------------------
// Scenario 5: condition variable notify_all.
// ---------------------------------------------------------------------

static S5_MUTEX: StdMutex<Option<MutexId>> = StdMutex::new(None);
static S5_COND: StdMutex<Option<mintrt::CondId>> = StdMutex::new(None);
static S5_PREDICATE: StdMutex<bool> = StdMutex::new(false);
static S5_RESULTS: StdMutex<Vec<(u32, bool, Result<(), KernelError>)>> = StdMutex::new(Vec::new());

fn s5_waiter(arg: usize) {
    let mutex = S5_MUTEX.lock().unwrap().unwrap();
    let cond = S5_COND.lock().unwrap().unwrap();
    KERNEL.mutex_lock(mutex).unwrap();
    let result = KERNEL.cond_wait(cond, mutex);
    let predicate = *S5_PREDICATE.lock().unwrap();
    S5_RESULTS
        .lock()
        .unwrap()
        .push((arg as u32, predicate, result));
    KERNEL.mutex_unlock(mutex).unwrap();
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

fn s5_signaller(_arg: usize) {
    let mutex = S5_MUTEX.lock().unwrap().unwrap();
    let cond = S5_COND.lock().unwrap().unwrap();
    KERNEL.mutex_lock(mutex).unwrap();
    *S5_PREDICATE.lock().unwrap() = true;
    KERNEL.cond_notify_all(cond).unwrap();
    KERNEL.mutex_unlock(mutex).unwrap();
    KERNEL.task_sleep_for(mintrt::INFINITE);
}

#[test]
fn condvar_notify_all() {
    let _guard = lock_guard();
    ensure_init();

    let mutex = KERNEL.mutex_init(MutexType::Normal, MutexProtocol::None, None);
    let cond = KERNEL.cond_init();
    *S5_MUTEX.lock().unwrap() = Some(mutex);
    *S5_COND.lock().unwrap() = Some(cond);
    *S5_PREDICATE.lock().unwrap() = false;
    S5_RESULTS.lock().unwrap().clear();

    for i in 1..=3u32 {
        let task = KERNEL.task_create(s5_waiter, i as usize, 1, 4096).unwrap();
        KERNEL.task_start(task).unwrap();
    }
    assert!(
        S5_RESULTS.lock().unwrap().is_empty(),
        "waiters should still be blocked on the condition variable"
    );

    let signaller = KERNEL.task_create(s5_signaller, 0, 1, 4096).unwrap();
    KERNEL.task_start(signaller).unwrap();

    let results = S5_RESULTS.lock().unwrap();
    assert_eq!(results.len(), 3);
    let mut ids: Vec<u32> = Vec::new();
    for (id, predicate, result) in results.iter() {
        assert!(*predicate, "task {id} did not observe the predicate set");
        assert_eq!(*result, Ok(()));
        ids.push(*id);
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}
