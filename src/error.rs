//! Result-code taxonomy.
//!
//! `spec.md` §7 defines the error taxonomy as result codes, with `Success`
//! folded into the "event observed" case. Idiomatic Rust turns that into
//! `Result<T, KernelError>` with `Ok` standing in for `Success` — there is
//! no `KernelError::Success` variant because the type system already
//! distinguishes it.

use core::fmt;

/// Every way a kernel primitive can fail to complete the way the caller
/// asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum KernelError {
    /// The deadline was reached before the awaited event occurred.
    Timeout,
    /// A try-variant could not proceed without blocking.
    WouldBlock,
    /// `mutex_unlock` called by a task that does not own the mutex.
    NotOwner,
    /// An errorcheck mutex was relocked by its own owner.
    Deadlock,
    /// `sem_post_n` would push the count past the configured maximum.
    Overflow,
    /// The object a task was waiting on was destroyed while it waited.
    Deleted,
    /// The wait was ended by an explicit cancellation.
    Cancelled,
    /// An argument or object-state invariant was violated.
    Invalid,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "deadline reached before the awaited event occurred",
            Self::WouldBlock => "operation would block",
            Self::NotOwner => "mutex released by a task that does not own it",
            Self::Deadlock => "errorcheck mutex relocked by its own owner",
            Self::Overflow => "semaphore count would exceed its configured maximum",
            Self::Deleted => "object was destroyed while a task waited on it",
            Self::Cancelled => "wait was ended by an explicit cancellation",
            Self::Invalid => "argument or object-state invariant violated",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "sim")]
impl std::error::Error for KernelError {}

/// The outcome recorded on a waiting task by whoever wakes it
/// (`spec.md` §4.5/§5). Distinct from [`KernelError`] because `Success`
/// is a real variant here: this is the raw resumption code read back by
/// `wait_until`'s caller before it gets folded into a `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeResult {
    Success,
    Timeout,
    Cancelled,
    Deleted,
}

impl WakeResult {
    /// Turn a raw resumption code into the public `Result` a waiter sees.
    pub(crate) fn into_result(self) -> Result<(), KernelError> {
        match self {
            Self::Success => Ok(()),
            Self::Timeout => Err(KernelError::Timeout),
            Self::Cancelled => Err(KernelError::Cancelled),
            Self::Deleted => Err(KernelError::Deleted),
        }
    }
}
