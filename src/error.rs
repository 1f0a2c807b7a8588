//! Kernel errors
//!
//! Two kinds share one enum. Setup calls (`init`, `spawn`, `start`) return
//! the recoverable ones. The fatal ones mean the priority list lost its
//! Idle sentinel; the kernel never hands those back, it halts through
//! the port.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every TCB slot is in use
    ThreadTableFull,
    /// Stack buffer shorter than `config::MIN_STACK_SIZE`
    StackTooSmall,
    /// `init` called twice
    AlreadyInitialized,
    /// `start` called twice
    AlreadyStarted,
    /// The port could not bring up a thread's execution context
    PortFailure,
    /// Fatal: the ready scan found nothing, Idle is missing or blocked
    NoReadyThread,
    /// Fatal: no lower-priority entry to insert in front of
    NoInsertionPoint,
}

impl Error {
    /// Fatal errors halt the system instead of being returned
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Error::NoReadyThread | Error::NoInsertionPoint)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ThreadTableFull => write!(f, "thread table full"),
            Error::StackTooSmall => write!(f, "stack too small"),
            Error::AlreadyInitialized => write!(f, "kernel already initialized"),
            Error::AlreadyStarted => write!(f, "kernel already started"),
            Error::PortFailure => write!(f, "port failed to create context"),
            Error::NoReadyThread => write!(f, "no ready thread"),
            Error::NoInsertionPoint => write!(f, "no insertion point in priority list"),
        }
    }
}
