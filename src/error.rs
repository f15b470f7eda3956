//! Error taxonomy for the scheduler core.
//!
//! Recoverable failures are returned as [`Error`]; invariant breaches
//! (unbalanced critical regions, signalling a null thread, killing a kernel
//! thread, sleep-heap exhaustion) are not represented here and instead
//! `panic!` at the call site, matching the kernel's own treatment of
//! assertion failures as fatal.

use core::fmt;

/// A recoverable error returned by a core operation.
///
/// [`Error::code`] gives the classic small-negative-integer value for
/// integrators that want to preserve the original errno-style convention
/// across an FFI boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// Page or thread-descriptor allocation failed.
    NoMemory,
    /// Bad argument, e.g. a duplicate thread id or an exhausted id registry.
    Invalid,
    /// A wait exceeded its deadline.
    TimedOut,
    /// A non-blocking try-lock could not acquire.
    WouldBlock,
}

impl Error {
    /// The negative-errno-style code for this error.
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            Error::NoMemory => -12,  // -ENOMEM
            Error::Invalid => -22,   // -EINVAL
            Error::TimedOut => -62,  // -ETIME
            Error::WouldBlock => -11, // -EAGAIN
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoMemory => "no memory",
            Error::Invalid => "invalid argument",
            Error::TimedOut => "timed out",
            Error::WouldBlock => "would block",
        };
        f.write_str(msg)
    }
}
