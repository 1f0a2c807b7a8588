//! System tick — the scheduler's only time source
//!
//! One periodic compare-match interrupt (1 ms by default) advances a
//! 32-bit tick counter. An 8-bit core cannot read that counter
//! atomically, so every read goes through the kernel's critical
//! section.
//!
//! This module also holds the arithmetic behind windowed delays and
//! the prescaler/compare search for the 8-bit CTC timer.

/// Scheduler time, in ticks since start. Wraps after ~49 days at 1 kHz.
pub type Tick = u32;

/// Monotonic tick counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysTick {
    /// Ticks since boot
    ticks: Tick,
    /// Number of wraps of `ticks`
    overflows: u32,
}

impl SysTick {
    pub const fn new() -> Self {
        Self { ticks: 0, overflows: 0 }
    }

    /// Count one timer interrupt
    pub fn advance(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks == 0 {
            self.overflows += 1;
        }
    }

    /// Current tick
    pub fn now(&self) -> Tick {
        self.ticks
    }

    /// Number of counter wraps
    pub fn overflows(&self) -> u32 {
        self.overflows
    }
}

impl Default for SysTick {
    fn default() -> Self {
        Self::new()
    }
}

/// Ticks left until `last_wake + period`, never less than one
///
/// A thread that is already late still sleeps one tick, so a periodic
/// loop whose body overruns cannot starve lower priorities.
pub fn window_remaining(last_wake: Tick, period: Tick, now: Tick) -> Tick {
    let target = last_wake.wrapping_add(period);
    let remaining = target.wrapping_sub(now) as i32;
    if remaining <= 0 {
        1
    } else {
        remaining as Tick
    }
}

/// Timer0 clock divider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prescaler {
    Div1,
    Div8,
    Div64,
    Div256,
    Div1024,
}

impl Prescaler {
    const ALL: [Prescaler; 5] = [
        Prescaler::Div1,
        Prescaler::Div8,
        Prescaler::Div64,
        Prescaler::Div256,
        Prescaler::Div1024,
    ];

    pub const fn divisor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div8 => 8,
            Prescaler::Div64 => 64,
            Prescaler::Div256 => 256,
            Prescaler::Div1024 => 1024,
        }
    }

    /// CS0[2:0] clock-select bits for TCCR0B
    pub const fn clock_select(self) -> u8 {
        match self {
            Prescaler::Div1 => 0b001,
            Prescaler::Div8 => 0b010,
            Prescaler::Div64 => 0b011,
            Prescaler::Div256 => 0b100,
            Prescaler::Div1024 => 0b101,
        }
    }
}

/// Tick timer setup: CTC mode, interrupt on compare match A
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub cpu_hz: u32,
    pub prescaler: Prescaler,
    /// OCR0A value; the timer period is `compare + 1` counts
    pub compare: u8,
}

impl TimerConfig {
    /// Smallest prescaler whose compare value fits the 8-bit counter
    ///
    /// Returns `None` when the rate cannot be reached with timer0.
    pub fn for_rate(cpu_hz: u32, tick_hz: u32) -> Option<Self> {
        if tick_hz == 0 {
            return None;
        }
        Prescaler::ALL.iter().find_map(|&prescaler| {
            let counts = cpu_hz / prescaler.divisor() / tick_hz;
            if (1..=256).contains(&counts) {
                Some(Self {
                    cpu_hz,
                    prescaler,
                    compare: (counts - 1) as u8,
                })
            } else {
                None
            }
        })
    }

    /// Interrupt rate this configuration actually produces
    pub fn actual_hz(&self) -> u32 {
        self.cpu_hz / self.prescaler.divisor() / (self.compare as u32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CPU_HZ, TICK_HZ};

    #[test]
    fn test_systick_advance() {
        let mut clock = SysTick::new();
        assert_eq!(clock.now(), 0);
        clock.advance();
        clock.advance();
        assert_eq!(clock.now(), 2);
    }

    #[test]
    fn test_systick_wraps() {
        let mut clock = SysTick { ticks: Tick::MAX, overflows: 0 };
        clock.advance();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.overflows(), 1);
    }

    #[test]
    fn test_window_on_time() {
        // woke at 100, period 10, now 103: sleep the remaining 7
        assert_eq!(window_remaining(100, 10, 103), 7);
        assert_eq!(window_remaining(100, 10, 100), 10);
    }

    #[test]
    fn test_window_late_sleeps_one_tick() {
        assert_eq!(window_remaining(100, 10, 110), 1);
        assert_eq!(window_remaining(100, 10, 125), 1);
    }

    #[test]
    fn test_window_across_wrap() {
        assert_eq!(window_remaining(Tick::MAX - 2, 10, Tick::MAX), 8);
        assert_eq!(window_remaining(Tick::MAX - 2, 10, 3), 4);
    }

    #[test]
    fn test_window_does_not_drift() {
        // Each period the body runs 3 ticks, then waits out the window.
        let period = 10;
        let mut last_wake: Tick = 0;
        let mut now: Tick = 0;
        for cycle in 1..=50u32 {
            now += 3;
            now += window_remaining(last_wake, period, now);
            last_wake = now;
            assert_eq!(last_wake, cycle * period);
        }
    }

    #[test]
    fn test_reference_board_timer() {
        // 16 MHz / 64 / 250 = 1 kHz
        let cfg = TimerConfig::for_rate(CPU_HZ, TICK_HZ).unwrap();
        assert_eq!(cfg.prescaler, Prescaler::Div64);
        assert_eq!(cfg.compare, 249);
        assert_eq!(cfg.prescaler.clock_select(), 0b011);
        assert_eq!(cfg.actual_hz(), 1_000);
    }

    #[test]
    fn test_timer_8mhz() {
        let cfg = TimerConfig::for_rate(8_000_000, 1_000).unwrap();
        assert_eq!(cfg.prescaler, Prescaler::Div64);
        assert_eq!(cfg.compare, 124);
    }

    #[test]
    fn test_timer_unreachable_rate() {
        // Too slow even at /1024 with 256 counts
        assert!(TimerConfig::for_rate(16_000_000, 10).is_none());
        assert!(TimerConfig::for_rate(16_000_000, 0).is_none());
    }
}
