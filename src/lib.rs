//! Ember-RTOS — preemptive priority kernel for 8-bit microcontrollers
//!
//! Threads are endless functions on their own static stacks, kept in a
//! priority-sorted list with an Idle thread as the tail sentinel. A
//! 1 kHz timer interrupt preempts the running thread; threads give up
//! the CPU by sleeping or by waiting on an event.
//! - Static thread table (no heap, no allocation)
//! - Strict priority scheduling, Idle always runnable
//! - Tick-driven sleep and drift-free windowed delays
//! - Broadcast events, usable as signals or as mutexes
//! - Interrupt-safe signalling through a `critical-section` lock
//!
//! ```rust,ignore
//! static KERNEL: Kernel<AvrPort> = Kernel::new(AvrPort::new());
//! static DATA_READY: Event = Event::new(EventState::Taken);
//!
//! fn idle() -> ! {
//!     loop {}
//! }
//!
//! fn sensor() -> ! {
//!     let mut last_wake = KERNEL.now();
//!     loop {
//!         KERNEL.delay_windowed(&mut last_wake, 10);
//!         KERNEL.signal(&DATA_READY);
//!     }
//! }
//!
//! KERNEL.init(idle, stack!(128))?;
//! KERNEL.spawn("sensor", Priority::HIGH, sensor, stack!(256))?;
//! KERNEL.start()?;
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod event;
pub mod kernel;
pub mod port;
pub mod scheduler;
pub mod thread;
pub mod timer;

pub use context::{Context, Frame};
pub use driver::{BusyFlag, Completion};
pub use error::Error;
pub use event::{Event, EventState};
pub use kernel::{Kernel, KernelStats};
pub use port::Port;
pub use scheduler::Scheduler;
pub use thread::{Priority, Tcb, ThreadEntry, ThreadId, ThreadState};
pub use timer::{SysTick, Tick, TimerConfig};

#[cfg(any(test, feature = "std"))]
pub use port::hosted::HostedPort;

#[cfg(target_arch = "avr")]
pub use port::avr::AvrPort;

#[doc(hidden)]
pub mod __private {
    pub use static_cell::StaticCell;
}

/// A `'static` thread stack of `$size` bytes
///
/// Each expansion owns one buffer and hands it out once; expanding it
/// inside a loop panics on the second pass.
#[macro_export]
macro_rules! stack {
    ($size:expr) => {{
        static STACK: $crate::__private::StaticCell<[u8; $size]> =
            $crate::__private::StaticCell::new();
        let stack: &'static mut [u8] = STACK.init([0u8; $size]);
        stack
    }};
}
