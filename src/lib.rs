//! A small, portable real-time multitasking kernel core for single-core
//! microcontrollers (`spec.md` §1 OVERVIEW).
//!
//! The crate is organized the way `spec.md` §2 groups it: a portable core
//! (`kernel`, `task`, `mutex`, `semaphore`, `condvar`, `once`, `tick`,
//! `prio`, `wait`, `klock`, `arena`, `error`, `config`) behind one
//! architecture seam (`port`), plus one concrete port (`sim`, behind the
//! `sim` feature) that exists only so the core can be driven end to end
//! by tests without target hardware.
//!
//! `no_std` except for tests and the `sim` feature, both of which need an
//! allocator and, for `sim`, real OS threads. `alloc` is required
//! unconditionally: the arena backing every kernel object, the ready
//! list's per-level queues, and the boxed trampoline arguments all grow
//! at runtime (`spec.md` §9 trades the reference kernel's const-generic,
//! statically sized object table for a heap-backed one, since this core
//! has no macro layer to generate per-object storage at compile time).
#![cfg_attr(not(any(test, feature = "sim")), no_std)]

extern crate alloc;

mod arena;
pub mod condvar;
pub mod config;
pub mod error;
mod klock;
pub mod kernel;
pub mod mutex;
pub mod once;
pub mod port;
mod prio;
pub mod semaphore;
#[cfg(feature = "sim")]
pub mod sim;
pub mod task;
pub mod tick;
mod trace;
mod wait;

pub use condvar::{CondId, CondMarker};
pub use config::{Config, Hooks, SchedulingVariant, TaskOnExitPolicy};
pub use error::KernelError;
pub use kernel::Kernel;
pub use mutex::{MutexId, MutexMarker, MutexProtocol, MutexType};
pub use once::{OnceId, OnceMarker};
pub use port::{Port, StackPointer};
pub use semaphore::{SemId, SemMarker};
#[cfg(feature = "sim")]
pub use sim::SimPort;
pub use task::{Priority, TaskEntry, TaskId, TaskMarker, TaskState};
pub use tick::{Tick, IMMEDIATE, INFINITE};
