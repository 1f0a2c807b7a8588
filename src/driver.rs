//! Peripheral boundary — completion callbacks and busy latches
//!
//! Drivers are outside the kernel. They offer a blocking form of each
//! operation and an asynchronous form that arms the hardware and
//! returns at once. The asynchronous form reports completion through a
//! [`Completion`] invoked from interrupt context, which normally signals
//! an [`Event`](crate::event::Event) a thread is waiting on.
//!
//! A request made while the peripheral is still busy is dropped, not
//! queued and not reported. [`BusyFlag`] is the latch drivers use to
//! get that behaviour.

use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

/// Runs once, in interrupt context, when an asynchronous operation ends
///
/// Must not block. Typically calls `Kernel::signal_from_interrupt`.
pub type Completion = fn(CriticalSection<'_>);

/// In-flight marker for one peripheral
pub struct BusyFlag {
    busy: Mutex<Cell<bool>>,
}

impl BusyFlag {
    pub const fn new() -> Self {
        Self {
            busy: Mutex::new(Cell::new(false)),
        }
    }

    /// Claim the peripheral; `false` means drop the request
    pub fn try_claim(&self) -> bool {
        critical_section::with(|cs| {
            let busy = self.busy.borrow(cs);
            if busy.get() {
                false
            } else {
                busy.set(true);
                true
            }
        })
    }

    /// Called from the completion interrupt
    pub fn release_from_interrupt(&self, cs: CriticalSection<'_>) {
        self.busy.borrow(cs).set(false);
    }

    pub fn is_busy(&self) -> bool {
        critical_section::with(|cs| self.busy.borrow(cs).get())
    }
}

impl Default for BusyFlag {
    fn default() -> Self {
        Self::new()
    }
}
