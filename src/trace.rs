//! Thin wrappers around the `log` crate.
//!
//! The kernel core calls these instead of `log::trace!`/`log::debug!`
//! directly so that the `log` cargo feature (off by default, see
//! `Cargo.toml`) is the single place that decides whether any of this
//! costs anything. With the feature disabled every call here compiles
//! away to nothing.

#[cfg(feature = "log")]
macro_rules! ktrace {
    ($($arg:tt)*) => { log::trace!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        ()
    };
}

#[cfg(feature = "log")]
macro_rules! kdebug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        ()
    };
}

pub(crate) use kdebug;
pub(crate) use ktrace;
