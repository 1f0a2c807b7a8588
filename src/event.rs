//! Events — binary, broadcast-wake synchronization objects
//!
//! An event is owned by the application (usually a `static`), never by
//! the scheduler. Threads block on it with `Kernel::wait` and every
//! waiter becomes Ready on `Kernel::signal`. The same object doubles as
//! a mutex through `Kernel::take` / `Kernel::release`, which track the
//! owning thread.
//!
//! ```ignore
//! static I2C_DONE: Event = Event::new(EventState::Taken);
//!
//! fn i2c_done(cs: CriticalSection<'_>) {
//!     KERNEL.signal_from_interrupt(cs, &I2C_DONE);
//! }
//! ```

use core::cell::Cell;
use core::fmt;
use critical_section::{CriticalSection, Mutex};

use crate::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Free,
    Taken,
}

#[derive(Clone, Copy)]
struct Slot {
    state: EventState,
    owner: Option<ThreadId>,
}

pub struct Event {
    slot: Mutex<Cell<Slot>>,
}

impl Event {
    pub const fn new(state: EventState) -> Self {
        Self {
            slot: Mutex::new(Cell::new(Slot { state, owner: None })),
        }
    }

    pub fn state(&self) -> EventState {
        critical_section::with(|cs| self.slot.borrow(cs).get().state)
    }

    /// Thread holding the event through `take`
    pub fn owner(&self) -> Option<ThreadId> {
        critical_section::with(|cs| self.slot.borrow(cs).get().owner)
    }

    /// Re-initialise state and forget the owner
    pub(crate) fn reset(&self, cs: CriticalSection<'_>, state: EventState) {
        self.slot.borrow(cs).set(Slot { state, owner: None });
    }

    /// Claim a Free event for `who`
    pub(crate) fn try_take(&self, cs: CriticalSection<'_>, who: ThreadId) -> bool {
        let slot = self.slot.borrow(cs);
        if slot.get().state == EventState::Taken {
            return false;
        }
        slot.set(Slot {
            state: EventState::Taken,
            owner: Some(who),
        });
        true
    }

    /// Free the event if `who` owns it
    pub(crate) fn release(&self, cs: CriticalSection<'_>, who: ThreadId) -> bool {
        let slot = self.slot.borrow(cs);
        let current = slot.get();
        if current.state != EventState::Taken || current.owner != Some(who) {
            return false;
        }
        slot.set(Slot {
            state: EventState::Free,
            owner: None,
        });
        true
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = critical_section::with(|cs| self.slot.borrow(cs).get());
        f.debug_struct("Event")
            .field("state", &slot.state)
            .field("owner", &slot.owner)
            .finish()
    }
}
