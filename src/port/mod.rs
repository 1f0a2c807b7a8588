//! Port layer — the machine-specific half of a context switch
//!
//! The kernel decides who runs; a port makes it happen. `create`,
//! `save` and `restore` are called with the kernel lock held (the
//! `CriticalSection` token is the proof). `resume` runs after the lock
//! is dropped and returns once the outgoing thread is scheduled again.
//!
//! A port may perform the actual stack switch in `restore`, while
//! interrupts are still masked, and leave `resume` empty. The AVR port
//! does exactly that. The hosted port hands a baton between OS threads
//! instead and blocks in `resume`.

use critical_section::CriticalSection;

use crate::context::Context;
use crate::error::Error;
use crate::thread::ThreadId;

#[cfg(any(test, feature = "std"))]
pub mod hosted;

#[cfg(target_arch = "avr")]
pub mod avr;

/// Machine-specific context switch primitives
pub trait Port {
    /// Register a thread whose cold-start frame has just been built
    fn create(
        &self,
        cs: CriticalSection<'_>,
        thread: ThreadId,
        context: &Context,
    ) -> Result<(), Error>;

    /// `thread` stops running at this point
    fn save(&self, cs: CriticalSection<'_>, thread: ThreadId);

    /// `thread` is the one to run next
    fn restore(&self, cs: CriticalSection<'_>, thread: ThreadId);

    /// Hand the CPU over
    ///
    /// With `Some(outgoing)`, returns when `outgoing` runs again. With
    /// `None` (system start) there is no caller to return to on real
    /// hardware.
    fn resume(&self, outgoing: Option<ThreadId>);

    /// Stop the system after a kernel fault
    fn halt(&self, error: Error) -> !;
}
