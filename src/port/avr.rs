//! ATmega328P port
//!
//! Registers are saved on the thread's own stack by a naked switch
//! routine; the port only remembers each thread's stack pointer. The
//! switch happens inside `restore`, with interrupts masked, so a thread
//! switched out inside a critical section finishes that section when it
//! is switched back in.
//!
//! The application provides the `critical-section` implementation
//! (interrupt disable / restore SREG) and wires the tick vector:
//!
//! ```ignore
//! static KERNEL: Kernel<AvrPort> = Kernel::new(AvrPort::new());
//! ember_rtos::tick_vector!(KERNEL);
//!
//! AvrPort::arm_tick(TimerConfig::for_rate(CPU_HZ, TICK_HZ).unwrap());
//! ```

use core::arch::{asm, naked_asm};
use core::cell::{Cell, UnsafeCell};
use core::ptr;

use critical_section::{CriticalSection, Mutex};

use crate::config::MAX_THREADS;
use crate::context::Context;
use crate::error::Error;
use crate::port::Port;
use crate::thread::ThreadId;
use crate::timer::TimerConfig;

// timer0, data-space addresses
const TCCR0A: *mut u8 = 0x44 as *mut u8;
const TCCR0B: *mut u8 = 0x45 as *mut u8;
const TCNT0: *mut u8 = 0x46 as *mut u8;
const OCR0A: *mut u8 = 0x47 as *mut u8;
const TIMSK0: *mut u8 = 0x6E as *mut u8;

const WGM01: u8 = 1 << 1;
const OCIE0A: u8 = 1 << 1;

// sleep mode control
const SMCR: *mut u8 = 0x53 as *mut u8;
const SE: u8 = 1 << 0;
const SM_POWER_DOWN: u8 = 1 << 2;

/// Slot that receives `main`'s stack pointer when the first thread starts
const BOOT_SLOT: usize = MAX_THREADS;

pub struct AvrPort {
    /// Saved SP per thread, plus the boot slot
    stack_pointers: Mutex<UnsafeCell<[u16; MAX_THREADS + 1]>>,
    /// Thread recorded by the last `save`
    outgoing: Mutex<Cell<Option<ThreadId>>>,
}

impl AvrPort {
    pub const fn new() -> Self {
        Self {
            stack_pointers: Mutex::new(UnsafeCell::new([0; MAX_THREADS + 1])),
            outgoing: Mutex::new(Cell::new(None)),
        }
    }

    /// Program timer0 in CTC mode with the compare-match A interrupt
    pub fn arm_tick(config: TimerConfig) {
        critical_section::with(|_| unsafe {
            ptr::write_volatile(TCCR0A, WGM01);
            ptr::write_volatile(TCCR0B, config.prescaler.clock_select());
            ptr::write_volatile(TCNT0, 0);
            ptr::write_volatile(OCR0A, config.compare);
            ptr::write_volatile(TIMSK0, OCIE0A);
        });
    }
}

impl Default for AvrPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for AvrPort {
    fn create(
        &self,
        cs: CriticalSection<'_>,
        thread: ThreadId,
        context: &Context,
    ) -> Result<(), Error> {
        let slots = self.stack_pointers.borrow(cs).get();
        unsafe { (*slots)[thread.index()] = context.stack_address() as u16 };
        Ok(())
    }

    fn save(&self, cs: CriticalSection<'_>, thread: ThreadId) {
        self.outgoing.borrow(cs).set(Some(thread));
    }

    fn restore(&self, cs: CriticalSection<'_>, thread: ThreadId) {
        let from = match self.outgoing.borrow(cs).take() {
            Some(out) if out == thread => return,
            Some(out) => out.index(),
            None => BOOT_SLOT,
        };
        let slots = self.stack_pointers.borrow(cs).get();
        unsafe {
            let save_to = ptr::addr_of_mut!((*slots)[from]);
            switch(save_to, (*slots)[thread.index()]);
        }
    }

    fn resume(&self, _outgoing: Option<ThreadId>) {}

    /// Power-down sleep with interrupts off; only a reset wakes the part
    fn halt(&self, _error: Error) -> ! {
        unsafe {
            asm!("cli");
            ptr::write_volatile(SMCR, SM_POWER_DOWN | SE);
        }
        loop {
            unsafe { asm!("sleep") };
        }
    }
}

/// Push the live context, store SP to `save_to`, load `load` into SP,
/// pop the other context and return into it
///
/// Stack layout matches `context::Frame`: r0, SREG (as it was before
/// `cli`), r1..r31, below the return address.
#[unsafe(naked)]
unsafe extern "C" fn switch(save_to: *mut u16, load: u16) {
    naked_asm!(
        "push r0",
        "in r0, 0x3f",
        "cli",
        "push r0",
        "push r1",
        "push r2",
        "push r3",
        "push r4",
        "push r5",
        "push r6",
        "push r7",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "push r16",
        "push r17",
        "push r18",
        "push r19",
        "push r20",
        "push r21",
        "push r22",
        "push r23",
        "push r24",
        "push r25",
        "push r26",
        "push r27",
        "push r28",
        "push r29",
        "push r30",
        "push r31",
        // *save_to = SP
        "movw r26, r24",
        "in r0, 0x3d",
        "st X+, r0",
        "in r0, 0x3e",
        "st X, r0",
        // SP = load
        "out 0x3d, r22",
        "out 0x3e, r23",
        "pop r31",
        "pop r30",
        "pop r29",
        "pop r28",
        "pop r27",
        "pop r26",
        "pop r25",
        "pop r24",
        "pop r23",
        "pop r22",
        "pop r21",
        "pop r20",
        "pop r19",
        "pop r18",
        "pop r17",
        "pop r16",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop r7",
        "pop r6",
        "pop r5",
        "pop r4",
        "pop r3",
        "pop r2",
        "pop r1",
        "pop r0",
        "out 0x3f, r0",
        "pop r0",
        "ret",
    )
}

/// Define the TIMER0_COMPA vector and route it to `Kernel::tick`
///
/// The calling crate needs `#![feature(abi_avr_interrupt)]`.
#[macro_export]
macro_rules! tick_vector {
    ($kernel:path) => {
        #[no_mangle]
        pub unsafe extern "avr-interrupt" fn __vector_14() {
            $kernel.tick();
        }
    };
}
