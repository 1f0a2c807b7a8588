//! Execution context — per-thread stack and entry point
//!
//! General registers never live in the TCB. They sit on the thread's
//! own stack, so a context is just the stack buffer, the entry address
//! and the stack pointer.
//!
//! The cold-start frame follows the AVR convention. `SP` points at the
//! next free byte, every push writes then decrements, and the frame
//! (top down) is:
//!
//! ```text
//! top      PCL        return address, popped last by `ret`/`reti`
//! top-1    PCH
//! top-2    r0
//! top-3    SREG       I flag set
//! top-4    r1         ┐
//!  ...                │ zeroed
//! top-34   r31        ┘
//! top-35   <- SP
//! ```

use crate::config::{MIN_STACK_SIZE, STACK_PAINT};
use crate::error::Error;
use crate::thread::ThreadEntry;
use static_assertions::const_assert;

const_assert!(MIN_STACK_SIZE > Frame::SIZE);

/// Register frame popped by a context restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Program counter popped by `reti`
    pub pc: u16,
    /// Status register
    pub sreg: u8,
    /// r0..r31
    pub registers: [u8; 32],
}

impl Frame {
    /// Bytes occupied on the stack: PC (2), SREG (1), r0..r31 (32)
    pub const SIZE: usize = 35;

    /// SREG global interrupt enable bit
    pub const SREG_I: u8 = 1 << 7;

    /// Write a fresh frame below `top`, returning the new stack pointer
    fn write(stack: &mut [u8], top: usize, pc: u16) -> usize {
        let [pch, pcl] = pc.to_be_bytes();
        stack[top] = pcl;
        stack[top - 1] = pch;
        stack[top - 2] = 0; // r0
        stack[top - 3] = Self::SREG_I;
        for r in 1..32 {
            stack[top - 3 - r] = 0;
        }
        top - Self::SIZE
    }

    /// Decode the frame sitting just above `sp`, in pop order
    pub fn read(stack: &[u8], sp: usize) -> Self {
        let mut registers = [0u8; 32];
        let mut at = sp;
        for r in (1..32).rev() {
            at += 1;
            registers[r] = stack[at];
        }
        let sreg = stack[at + 1];
        registers[0] = stack[at + 2];
        let pc = u16::from_be_bytes([stack[at + 3], stack[at + 4]]);
        Self { pc, sreg, registers }
    }
}

/// Saved execution context of one thread
pub struct Context {
    /// Thread body
    entry: ThreadEntry,
    /// Stack buffer owned by this thread for the life of the system
    stack: &'static mut [u8],
    /// Offset of the next free byte (the AVR `SP` value, relative to the buffer)
    sp: usize,
}

impl Context {
    /// Record the entry point and top of stack; no frame is built yet
    pub fn init(entry: ThreadEntry, stack: &'static mut [u8]) -> Result<Self, Error> {
        if stack.len() < MIN_STACK_SIZE {
            return Err(Error::StackTooSmall);
        }
        stack.fill(STACK_PAINT);
        let sp = stack.len() - 1;
        Ok(Self { entry, stack, sp })
    }

    /// Build the cold-start frame so the first resume lands on `entry`
    /// with zeroed registers and interrupts enabled
    pub fn create(&mut self) {
        let top = self.stack_top();
        self.sp = Frame::write(self.stack, top, self.entry_address());
    }

    /// Frame the next restore would pop
    pub fn resume_frame(&self) -> Frame {
        Frame::read(self.stack, self.sp)
    }

    /// Offset of the last byte of the stack
    pub fn stack_top(&self) -> usize {
        self.stack.len() - 1
    }

    /// Current stack pointer, relative to the buffer
    pub fn stack_pointer(&self) -> usize {
        self.sp
    }

    /// Current stack pointer as a machine address
    pub fn stack_address(&self) -> usize {
        self.stack.as_ptr() as usize + self.sp
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn entry(&self) -> ThreadEntry {
        self.entry
    }

    /// Program-memory address of the entry point as the CPU sees it
    pub fn entry_address(&self) -> u16 {
        self.entry as *const () as usize as u16
    }

    /// High-water mark: bytes ever written below the top of stack
    pub fn stack_usage(&self) -> usize {
        let untouched = self.stack.iter().take_while(|&&b| b == STACK_PAINT).count();
        self.stack.len() - untouched
    }
}
