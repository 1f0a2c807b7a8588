//! Build-time configuration
//!
//! Limits are fixed at compile time; nothing in the kernel allocates.
//! Values match an ATmega328P at 16 MHz with a 1 ms scheduler tick.

use static_assertions::const_assert;

/// Maximum threads the kernel can manage, Idle included
pub const MAX_THREADS: usize = 8;

/// Thread name length (ASCII bytes, zero padded)
pub const NAME_LEN: usize = 8;

/// Scheduler tick rate
pub const TICK_HZ: u32 = 1_000;

/// Core clock of the reference board
pub const CPU_HZ: u32 = 16_000_000;

/// Smallest stack a thread may be given (bytes)
///
/// Must hold the 35-byte register frame plus room for the entry
/// function's own locals before the first context save.
pub const MIN_STACK_SIZE: usize = 64;

/// Fill pattern written over fresh stacks for high-water-mark tracking
pub const STACK_PAINT: u8 = 0xA5;

// Thread ids are stored as u8
const_assert!(MAX_THREADS <= u8::MAX as usize);
// Idle plus at least one application thread
const_assert!(MAX_THREADS >= 2);
const_assert!(NAME_LEN > 0);
const_assert!(TICK_HZ > 0 && TICK_HZ <= CPU_HZ);
