//! Hosted port — kernel threads as OS-thread fibers
//!
//! Each kernel thread runs on its own OS thread but only while it holds
//! its baton, so exactly one of them executes at a time. `save` revokes
//! the outgoing baton, `restore` grants the incoming one and `resume`
//! blocks until the caller's baton comes back.
//!
//! There is no timer hardware. Tests (or a simulator) queue interrupts
//! with [`HostedPort::raise_tick`] and [`HostedPort::raise`]; the running
//! fiber takes them at its next [`Kernel::preemption_point`], on its own
//! OS thread, the way an ISR runs on the interrupted thread's stack.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use critical_section::CriticalSection;

use crate::config::MAX_THREADS;
use crate::context::Context;
use crate::driver::Completion;
use crate::error::Error;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::thread::ThreadId;

/// Idle poll interval of `wait_for_interrupt`
const IDLE_POLL: Duration = Duration::from_micros(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run permission for one fiber
struct Baton {
    held: Mutex<bool>,
    granted: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            held: Mutex::new(false),
            granted: Condvar::new(),
        }
    }

    fn grant(&self) {
        *lock(&self.held) = true;
        self.granted.notify_one();
    }

    fn revoke(&self) {
        *lock(&self.held) = false;
    }

    fn wait(&self) {
        let mut held = lock(&self.held);
        while !*held {
            held = self
                .granted
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Emulated interrupt
#[derive(Clone, Copy)]
pub(crate) enum Irq {
    Tick,
    Completion(Completion),
}

struct Pending {
    ticks: u32,
    completions: VecDeque<Completion>,
}

pub struct HostedPort {
    fibers: Mutex<[Option<Arc<Baton>>; MAX_THREADS]>,
    pending: Mutex<Pending>,
    powered: AtomicBool,
}

impl HostedPort {
    pub const fn new() -> Self {
        Self {
            fibers: Mutex::new([const { None }; MAX_THREADS]),
            pending: Mutex::new(Pending {
                ticks: 0,
                completions: VecDeque::new(),
            }),
            powered: AtomicBool::new(true),
        }
    }

    /// Queue one timer interrupt
    pub fn raise_tick(&self) {
        self.raise_ticks(1);
    }

    /// Queue `n` timer interrupts
    pub fn raise_ticks(&self, n: u32) {
        let mut pending = lock(&self.pending);
        pending.ticks = pending.ticks.saturating_add(n);
    }

    /// Queue a peripheral completion interrupt
    pub fn raise(&self, completion: Completion) {
        lock(&self.pending).completions.push_back(completion);
    }

    /// Interrupts raised but not yet taken
    pub fn pending(&self) -> usize {
        let pending = lock(&self.pending);
        pending.ticks as usize + pending.completions.len()
    }

    /// Park every fiber at its next preemption point
    pub fn power_off(&self) {
        self.powered.store(false, Ordering::Release);
    }

    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    /// Completions are delivered before ticks
    pub(crate) fn next_interrupt(&self) -> Option<Irq> {
        let mut pending = lock(&self.pending);
        if let Some(completion) = pending.completions.pop_front() {
            return Some(Irq::Completion(completion));
        }
        if pending.ticks > 0 {
            pending.ticks -= 1;
            return Some(Irq::Tick);
        }
        None
    }

    fn baton(&self, thread: ThreadId) -> Option<Arc<Baton>> {
        lock(&self.fibers)[thread.index()].clone()
    }
}

impl Default for HostedPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for HostedPort {
    fn create(
        &self,
        _cs: CriticalSection<'_>,
        thread: ThreadId,
        context: &Context,
    ) -> Result<(), Error> {
        let baton = Arc::new(Baton::new());
        let gate = Arc::clone(&baton);
        let entry = context.entry();
        thread::Builder::new()
            .name(format!("fiber{}", thread.index()))
            .spawn(move || {
                gate.wait();
                entry()
            })
            .map_err(|_| Error::PortFailure)?;
        lock(&self.fibers)[thread.index()] = Some(baton);
        Ok(())
    }

    fn save(&self, _cs: CriticalSection<'_>, thread: ThreadId) {
        if let Some(baton) = self.baton(thread) {
            baton.revoke();
        }
    }

    fn restore(&self, _cs: CriticalSection<'_>, thread: ThreadId) {
        if let Some(baton) = self.baton(thread) {
            baton.grant();
        }
    }

    fn resume(&self, outgoing: Option<ThreadId>) {
        // None: the starting thread becomes the interrupt source
        if let Some(baton) = outgoing.and_then(|t| self.baton(t)) {
            baton.wait();
        }
    }

    fn halt(&self, error: Error) -> ! {
        panic!("kernel halted: {}", error)
    }
}

impl Kernel<HostedPort> {
    /// Take every pending interrupt
    ///
    /// Thread bodies call this in their loops; it is where ticks can
    /// preempt them. After `power_off` the calling fiber never returns.
    pub fn preemption_point(&self) {
        loop {
            if !self.port().is_powered() {
                loop {
                    thread::park();
                }
            }
            match self.port().next_interrupt() {
                Some(Irq::Tick) => self.tick(),
                Some(Irq::Completion(completion)) => self.interrupt(completion),
                None => return,
            }
        }
    }

    /// Idle-loop body: take pending interrupts, then nap briefly
    pub fn wait_for_interrupt(&self) {
        self.preemption_point();
        thread::sleep(IDLE_POLL);
    }
}
