//! Thread control blocks — static, no-alloc thread descriptors
//!
//! Each thread is an endless function running on its own stack. The
//! TCB records where it sits in the priority list, what it is blocked
//! on, and the context needed to cold-start or resume it.

use crate::config::NAME_LEN;
use crate::context::Context;
use crate::event::Event;

/// Thread body. Threads run forever; there is no exit.
pub type ThreadEntry = fn() -> !;

/// Index of a TCB in the kernel's thread table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) u8);

impl ThreadId {
    /// Slot in the thread table
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Thread priority (higher number = higher priority)
///
/// Idle owns 0 and acts as the sentinel at the tail of the list, so
/// application threads start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Reserved for the Idle thread
    pub const IDLE: Priority = Priority(0);
    /// Background work (logging, housekeeping)
    pub const LOW: Priority = Priority(1);
    /// Sensor polling, protocol handling
    pub const NORMAL: Priority = Priority(2);
    /// Control loops
    pub const HIGH: Priority = Priority(3);
    /// Hard deadlines
    pub const CRITICAL: Priority = Priority(4);
}

/// Thread execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Currently executing (exactly one thread once started)
    Running,
    /// Runnable, waiting to be picked
    Ready,
    /// Sleeping until its tick countdown reaches zero
    Suspended,
    /// Blocked on an event until it is signaled
    Waiting,
    /// Not yet in the scheduler list
    Disabled,
}

impl ThreadState {
    /// Transitions the scheduler is allowed to make from this state
    pub fn can_become(self, next: ThreadState) -> bool {
        use ThreadState::*;
        matches!(
            (self, next),
            (Disabled, Ready)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Suspended)
                | (Running, Waiting)
                | (Suspended, Ready)
                | (Waiting, Ready)
        )
    }
}

/// Thread control block
pub struct Tcb {
    /// Thread name (ASCII, zero padded)
    name: [u8; NAME_LEN],
    /// Next TCB in priority order
    pub(crate) next: Option<ThreadId>,
    /// Scheduling priority
    priority: Priority,
    /// Current state
    pub(crate) state: ThreadState,
    /// Entry point and stack
    pub(crate) context: Context,
    /// Ticks left before a Suspended thread becomes Ready
    pub(crate) suspended_timer: u32,
    /// Event a Waiting thread is blocked on
    pub(crate) waiting_event: Option<&'static Event>,
    /// False until the context has been cold-started once
    pub(crate) existing: bool,
}

impl Tcb {
    /// New thread descriptor, not yet schedulable
    pub fn new(name: &str, priority: Priority, context: Context) -> Self {
        let mut n = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        n[..len].copy_from_slice(&name.as_bytes()[..len]);

        Self {
            name: n,
            next: None,
            priority,
            state: ThreadState::Disabled,
            context,
            suspended_timer: 0,
            waiting_event: None,
            existing: false,
        }
    }

    /// Thread name
    ///
    /// Truncation can split a multi-byte character; the valid prefix is kept.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        match core::str::from_utf8(&self.name[..len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.name[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Remaining sleep ticks (meaningful while Suspended)
    pub fn suspended_timer(&self) -> u32 {
        self.suspended_timer
    }

    /// Is this thread blocked on `event`?
    pub fn is_waiting_on(&self, event: &Event) -> bool {
        self.state == ThreadState::Waiting
            && self.waiting_event.is_some_and(|e| core::ptr::eq(e, event))
    }

    /// Has the context been cold-started?
    pub fn is_existing(&self) -> bool {
        self.existing
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub(crate) fn set_state(&mut self, next: ThreadState) {
        debug_assert!(
            self.state == next || self.state.can_become(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}
