//! Kernel — context switch orchestration and the public API
//!
//! All scheduler, clock and thread state sits behind one
//! `critical_section::Mutex`. Every operation that can change who runs
//! goes through the same sequence:
//!
//! 1. save the outgoing thread
//! 2. update thread states (sleep, block, wake)
//! 3. reschedule
//! 4. create (first run) or restore the winner
//! 5. resume, outside the lock
//!
//! Blocking calls set their own state in step 2; the tick and other
//! interrupts run their handler there through [`Kernel::interrupt`].
//! Kernel faults (no ready thread, corrupt priority list) are logged and
//! passed to [`Port::halt`]; they never reach the caller.

use core::cell::RefCell;
use critical_section::{CriticalSection, Mutex};
use log::{debug, error, info, trace, warn};

use crate::context::Context;
use crate::error::Error;
use crate::event::{Event, EventState};
use crate::port::Port;
use crate::scheduler::Scheduler;
use crate::thread::{Priority, Tcb, ThreadEntry, ThreadId, ThreadState};
use crate::timer::{window_remaining, SysTick, Tick};

struct KernelState {
    scheduler: Scheduler,
    clock: SysTick,
    started: bool,
}

impl KernelState {
    const fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            clock: SysTick::new(),
            started: false,
        }
    }

    /// Running thread, once the kernel is started
    fn current(&self) -> Option<ThreadId> {
        if self.started {
            self.scheduler.running()
        } else {
            None
        }
    }
}

/// Single-core priority kernel
///
/// Meant to live in a `static`; all methods take `&self`.
pub struct Kernel<P: Port> {
    state: Mutex<RefCell<KernelState>>,
    port: P,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            state: Mutex::new(RefCell::new(KernelState::new())),
            port,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Install the Idle thread, the priority-0 sentinel of the ready list
    ///
    /// Idle must never block: it is the thread that runs when nobody
    /// else can.
    pub fn init(&self, idle: ThreadEntry, stack: &'static mut [u8]) -> Result<ThreadId, Error> {
        let context = Context::init(idle, stack)?;
        let tcb = Tcb::new("idle", Priority::IDLE, context);
        let id = critical_section::with(|cs| self.state.borrow_ref_mut(cs).scheduler.install_idle(tcb))?;
        info!("kernel initialised, idle is {:?}", id);
        Ok(id)
    }

    /// Create a thread and add it to the ready list
    ///
    /// The thread is Ready immediately but first runs at the next
    /// reschedule. Priority must be above `Priority::IDLE`.
    pub fn spawn(
        &self,
        name: &str,
        priority: Priority,
        entry: ThreadEntry,
        stack: &'static mut [u8],
    ) -> Result<ThreadId, Error> {
        let context = Context::init(entry, stack)?;
        let tcb = Tcb::new(name, priority, context);
        let result = critical_section::with(|cs| self.add(cs, tcb));
        self.escalate(result)
    }

    /// `spawn` for callers already inside a critical section
    pub fn spawn_from_interrupt(
        &self,
        cs: CriticalSection<'_>,
        name: &str,
        priority: Priority,
        entry: ThreadEntry,
        stack: &'static mut [u8],
    ) -> Result<ThreadId, Error> {
        let context = Context::init(entry, stack)?;
        let result = self.add(cs, Tcb::new(name, priority, context));
        self.escalate(result)
    }

    fn add(&self, cs: CriticalSection<'_>, tcb: Tcb) -> Result<ThreadId, Error> {
        let mut state = self.state.borrow_ref_mut(cs);
        let id = state.scheduler.add(tcb)?;
        if let Some(tcb) = state.scheduler.thread(id) {
            debug!("spawned {} (priority {}) as {:?}", tcb.name(), tcb.priority().0, id);
        }
        Ok(id)
    }

    /// Pick the first thread and hand the CPU to it
    ///
    /// On hardware this does not return. The hosted port returns and
    /// the caller carries on as the interrupt source.
    pub fn start(&self) -> Result<(), Error> {
        let result = critical_section::with(|cs| -> Result<(), Error> {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.started {
                return Err(Error::AlreadyStarted);
            }
            state.started = true;
            let first = match self.elect(cs, &mut *state) {
                Ok(first) => first,
                Err(e) => {
                    state.started = false;
                    state.scheduler.abandon_start();
                    return Err(e);
                }
            };
            info!("kernel started, first thread {:?}", first);
            drop(state);
            self.port.restore(cs, first);
            Ok(())
        });
        self.escalate(result)?;
        self.port.resume(None);
        Ok(())
    }

    /// Timer interrupt body: advance the clock, wake expired sleepers
    pub fn tick(&self) {
        self.interrupt(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.clock.advance();
            let woken = state.scheduler.expire_sleepers();
            if woken > 0 {
                trace!("tick {}: {} sleeper(s) ready", state.clock.now(), woken);
            }
        });
    }

    /// Interrupt trampoline
    ///
    /// Saves the preempted thread, runs `handler` with the kernel lock
    /// held, reschedules and switches to the winner. Handlers may call
    /// the `_from_interrupt` operations but must not block. Before
    /// `start` only the handler runs.
    pub fn interrupt<F>(&self, handler: F)
    where
        F: FnOnce(CriticalSection<'_>),
    {
        let outcome = critical_section::with(|cs| -> Result<Option<ThreadId>, Error> {
            let current = self.state.borrow_ref(cs).current();
            let Some(current) = current else {
                handler(cs);
                return Ok(None);
            };
            self.port.save(cs, current);
            handler(cs);

            let mut state = self.state.borrow_ref_mut(cs);
            let next = self.elect(cs, &mut *state)?;
            drop(state);
            self.port.restore(cs, next);
            Ok(Some(current))
        });
        self.finish(outcome);
    }

    /// Ticks since boot
    pub fn now(&self) -> Tick {
        critical_section::with(|cs| self.now_from_interrupt(cs))
    }

    pub fn now_from_interrupt(&self, cs: CriticalSection<'_>) -> Tick {
        self.state.borrow_ref(cs).clock.now()
    }

    /// Sleep for `ticks` timer interrupts
    ///
    /// `delay(0)` sleeps not at all; it is a plain reschedule point.
    pub fn delay(&self, ticks: Tick) {
        self.yield_with("delay", |_, state, me| {
            if ticks > 0 {
                state.scheduler.suspend(me, ticks);
            }
            true
        });
    }

    /// Sleep until `*last_wake + period`, then set `*last_wake` to now
    ///
    /// Sleeps at least one tick even when already late.
    pub fn delay_windowed(&self, last_wake: &mut Tick, period: Tick) {
        let from = *last_wake;
        self.yield_with("delay_windowed", |_, state, me| {
            let remaining = window_remaining(from, period, state.clock.now());
            state.scheduler.suspend(me, remaining);
            true
        });
        *last_wake = self.now();
    }

    /// (Re)initialise an event, forgetting any owner
    pub fn event_create(&self, event: &Event, initial: EventState) {
        critical_section::with(|cs| event.reset(cs, initial));
        debug!("event {:p} reset to {:?}", event, initial);
    }

    /// Block until `event` is signaled
    ///
    /// Unconditional: the event's state is not consulted.
    pub fn wait(&self, event: &'static Event) {
        self.yield_with("wait", |_, state, me| {
            state.scheduler.block_on(me, event);
            true
        });
    }

    /// Make every thread waiting on `event` Ready, then reschedule
    pub fn signal(&self, event: &Event) {
        self.yield_with("signal", |_, state, _| {
            let woken = state.scheduler.wake_waiters(event);
            trace!("signal {:p}: {} waiter(s) ready", event, woken);
            true
        });
    }

    /// Wake waiters from interrupt context
    ///
    /// The switch to a woken thread happens when the surrounding
    /// [`Kernel::interrupt`] exits, or at the next tick otherwise.
    pub fn signal_from_interrupt(&self, cs: CriticalSection<'_>, event: &Event) {
        let woken = self.state.borrow_ref_mut(cs).scheduler.wake_waiters(event);
        trace!("signal {:p} from interrupt: {} waiter(s) ready", event, woken);
    }

    /// Acquire `event` as a mutex, blocking while another thread holds it
    pub fn take(&self, event: &'static Event) {
        loop {
            let mut acquired = false;
            let started = self.yield_with("take", |cs, state, me| {
                if event.try_take(cs, me) {
                    acquired = true;
                    return false;
                }
                state.scheduler.block_on(me, event);
                true
            });
            if acquired || !started {
                return;
            }
        }
    }

    /// Free `event` and wake its waiters; no-op unless the caller owns it
    pub fn release(&self, event: &Event) {
        self.yield_with("release", |cs, state, me| {
            if !event.release(cs, me) {
                trace!("{:?} does not own {:p}, release ignored", me, event);
                return false;
            }
            state.scheduler.wake_waiters(event);
            true
        });
    }

    /// Thread currently running
    pub fn current(&self) -> Option<ThreadId> {
        critical_section::with(|cs| self.state.borrow_ref(cs).current())
    }

    pub fn is_started(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).started)
    }

    pub fn thread_state(&self, id: ThreadId) -> Option<ThreadState> {
        self.inspect(|sched| sched.thread(id).map(|t| t.state()))
    }

    /// Stack high-water mark of a thread, in bytes
    pub fn stack_usage(&self, id: ThreadId) -> Option<usize> {
        self.inspect(|sched| sched.thread(id).map(|t| t.context().stack_usage()))
    }

    pub fn stats(&self) -> KernelStats {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            KernelStats {
                ticks: state.clock.now(),
                tick_overflows: state.clock.overflows(),
                context_switches: state.scheduler.context_switches,
                threads: state.scheduler.len(),
                running: state.current(),
            }
        })
    }

    /// Run `f` against the scheduler with the kernel locked
    pub fn inspect<R>(&self, f: impl FnOnce(&Scheduler) -> R) -> R {
        critical_section::with(|cs| f(&self.state.borrow_ref(cs).scheduler))
    }

    /// Voluntary switch point shared by the blocking calls
    ///
    /// `block` updates the caller's state and returns whether to
    /// reschedule. Returns false when the kernel is not started yet.
    fn yield_with<F>(&self, op: &'static str, block: F) -> bool
    where
        F: FnOnce(CriticalSection<'_>, &mut KernelState, ThreadId) -> bool,
    {
        // Err(None): not started yet
        let outcome = critical_section::with(|cs| -> Result<Option<ThreadId>, Option<Error>> {
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(me) = state.current() else {
                return Err(None);
            };
            if !block(cs, &mut *state, me) {
                return Ok(None);
            }
            self.port.save(cs, me);
            let next = self.elect(cs, &mut *state).map_err(Some)?;
            drop(state);
            self.port.restore(cs, next);
            Ok(Some(me))
        });
        match outcome {
            Err(None) => {
                warn!("{} called before the kernel started", op);
                false
            }
            Err(Some(e)) => self.fault(e),
            Ok(switch) => {
                self.finish(Ok(switch));
                true
            }
        }
    }

    /// Reschedule and make sure the winner has a context to restore
    fn elect(&self, cs: CriticalSection<'_>, state: &mut KernelState) -> Result<ThreadId, Error> {
        let previous = state.scheduler.running();
        let next = state.scheduler.reschedule()?;
        let tcb = state.scheduler.thread_mut(next);
        if !tcb.existing {
            tcb.context.create();
            self.port.create(cs, next, &tcb.context)?;
            tcb.existing = true;
        }
        if previous != Some(next) {
            trace!("switch {:?} -> {:?}", previous, next);
        }
        Ok(next)
    }

    fn finish(&self, outcome: Result<Option<ThreadId>, Error>) {
        match outcome {
            Ok(Some(outgoing)) => self.port.resume(Some(outgoing)),
            Ok(None) => {}
            Err(e) => self.fault(e),
        }
    }

    /// Pass recoverable errors through, halt on kernel faults
    fn escalate<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        match result {
            Err(e) if e.is_fatal() => self.fault(e),
            other => other,
        }
    }

    fn fault(&self, e: Error) -> ! {
        error!("kernel fault: {}", e);
        self.port.halt(e)
    }
}

/// Kernel statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Ticks since boot
    pub ticks: Tick,
    /// Times `ticks` has wrapped
    pub tick_overflows: u32,
    /// Context switches since start
    pub context_switches: u32,
    /// Threads in the list, Idle included
    pub threads: usize,
    /// Thread running at the time of the snapshot
    pub running: Option<ThreadId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Frame;
    use core::cell::Cell;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Create(ThreadId),
        Save(ThreadId),
        Restore(ThreadId),
        Resume(Option<ThreadId>),
    }

    /// Records port calls; `resume` returns at once so the test thread
    /// plays whichever thread the kernel says is running
    struct RecordingPort {
        calls: StdMutex<Vec<Call>>,
        refuse_create: Cell<bool>,
    }

    impl RecordingPort {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                refuse_create: Cell::new(false),
            }
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn take_calls(&self) -> Vec<Call> {
            core::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl Port for RecordingPort {
        fn create(&self, _: CriticalSection<'_>, thread: ThreadId, _: &Context) -> Result<(), Error> {
            if self.refuse_create.get() {
                return Err(Error::PortFailure);
            }
            self.record(Call::Create(thread));
            Ok(())
        }

        fn save(&self, _: CriticalSection<'_>, thread: ThreadId) {
            self.record(Call::Save(thread));
        }

        fn restore(&self, _: CriticalSection<'_>, thread: ThreadId) {
            self.record(Call::Restore(thread));
        }

        fn resume(&self, outgoing: Option<ThreadId>) {
            self.record(Call::Resume(outgoing));
        }

        fn halt(&self, error: Error) -> ! {
            panic!("halted: {}", error)
        }
    }

    fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack() -> &'static mut [u8] {
        Box::leak(Box::new([0u8; 96]))
    }

    fn event(state: EventState) -> &'static Event {
        Box::leak(Box::new(Event::new(state)))
    }

    fn kernel() -> Kernel<RecordingPort> {
        let kernel = Kernel::new(RecordingPort::new());
        kernel.init(spin, stack()).unwrap();
        kernel
    }

    fn ticks(kernel: &Kernel<RecordingPort>, n: u32) {
        for _ in 0..n {
            kernel.tick();
        }
    }

    fn running_count(kernel: &Kernel<RecordingPort>) -> usize {
        kernel.inspect(|s| s.iter().filter(|(_, t)| t.state() == ThreadState::Running).count())
    }

    #[test]
    fn test_init_twice() {
        let kernel = kernel();
        assert_eq!(kernel.init(spin, stack()), Err(Error::AlreadyInitialized));
    }

    #[test]
    fn test_start_runs_highest_priority() {
        let kernel = kernel();
        kernel.spawn("low", Priority::LOW, spin, stack()).unwrap();
        let high = kernel.spawn("high", Priority::HIGH, spin, stack()).unwrap();
        assert_eq!(kernel.current(), None);

        kernel.start().unwrap();
        assert_eq!(kernel.current(), Some(high));
        assert_eq!(
            kernel.port().take_calls(),
            [Call::Create(high), Call::Restore(high), Call::Resume(None)]
        );
        assert_eq!(kernel.start(), Err(Error::AlreadyStarted));
    }

    #[test]
    fn test_start_retries_after_port_failure() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        kernel.port().refuse_create.set(true);

        assert_eq!(kernel.start(), Err(Error::PortFailure));
        assert!(!kernel.is_started());
        assert_eq!(kernel.current(), None);
        assert_eq!(kernel.thread_state(a), Some(ThreadState::Ready));
        assert!(!kernel.inspect(|s| s.thread(a).unwrap().is_existing()));
        assert_eq!(kernel.stats().context_switches, 0);
        // nothing runs until a start succeeds
        kernel.tick();
        assert!(kernel.port().take_calls().is_empty());

        kernel.port().refuse_create.set(false);
        kernel.start().unwrap();
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(
            kernel.port().take_calls(),
            [Call::Create(a), Call::Restore(a), Call::Resume(None)]
        );
    }

    #[test]
    fn test_only_idle_runs() {
        let kernel = kernel();
        kernel.start().unwrap();
        let idle = kernel.current().unwrap();
        assert!(kernel.inspect(|s| s.thread(idle).unwrap().name() == "idle"));
        ticks(&kernel, 3);
        assert_eq!(kernel.current(), Some(idle));
    }

    #[test]
    fn test_delay_then_preempt() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        let b = kernel.spawn("b", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();
        assert_eq!(kernel.current(), Some(a));

        // as A
        kernel.delay(100);
        assert_eq!(kernel.current(), Some(b));
        assert_eq!(kernel.thread_state(a), Some(ThreadState::Suspended));

        for t in 1..100 {
            kernel.tick();
            assert_eq!(kernel.current(), Some(b), "A woke early at tick {t}");
            assert_eq!(running_count(&kernel), 1);
        }
        kernel.tick();
        assert_eq!(kernel.now(), 100);
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(kernel.thread_state(b), Some(ThreadState::Ready));
        assert_eq!(running_count(&kernel), 1);
    }

    #[test]
    fn test_cold_create_then_warm_restore() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        let b = kernel.spawn("b", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();
        kernel.port().take_calls();

        kernel.delay(2);
        assert_eq!(
            kernel.port().take_calls(),
            [Call::Save(a), Call::Create(b), Call::Restore(b), Call::Resume(Some(a))]
        );

        ticks(&kernel, 2);
        let calls = kernel.port().take_calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Create(_))));
        assert_eq!(calls[calls.len() - 3..], [Call::Save(b), Call::Restore(a), Call::Resume(Some(b))]);
        assert!(kernel.inspect(|s| s.thread(a).unwrap().is_existing()));
    }

    #[test]
    fn test_tick_without_expiry_keeps_running_thread() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        kernel.start().unwrap();
        let switches = kernel.stats().context_switches;
        kernel.port().take_calls();

        kernel.tick();
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(kernel.stats().context_switches, switches);
        // symmetric save / restore of the same thread
        assert_eq!(
            kernel.port().take_calls(),
            [Call::Save(a), Call::Restore(a), Call::Resume(Some(a))]
        );
    }

    #[test]
    fn test_delay_zero_is_reschedule_point() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        kernel.start().unwrap();
        kernel.delay(0);
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(kernel.thread_state(a), Some(ThreadState::Running));
    }

    #[test]
    fn test_windowed_delay_sleeps_remaining() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        kernel.spawn("b", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();

        // as A, 10 ticks period, 3 ticks already spent
        let mut last_wake = kernel.now();
        ticks(&kernel, 3);
        kernel.delay_windowed(&mut last_wake, 10);
        assert_eq!(kernel.inspect(|s| s.thread(a).unwrap().suspended_timer()), 7);

        ticks(&kernel, 7);
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(kernel.now(), 10);
    }

    #[test]
    fn test_event_created_taken_blocks_until_signal() {
        let kernel = kernel();
        let ev = event(EventState::Free);
        kernel.event_create(ev, EventState::Taken);
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        let b = kernel.spawn("b", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();

        kernel.wait(ev);
        assert_eq!(kernel.current(), Some(b));
        ticks(&kernel, 500);
        assert_eq!(kernel.thread_state(a), Some(ThreadState::Waiting));

        // as B
        kernel.signal(ev);
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(kernel.thread_state(b), Some(ThreadState::Ready));
    }

    #[test]
    fn test_signal_broadcasts() {
        let kernel = kernel();
        let ev = event(EventState::Taken);
        let waiters: Vec<ThreadId> = (0..3)
            .map(|i| kernel.spawn("w", Priority(3 + i), spin, stack()).unwrap())
            .collect();
        let signaller = kernel.spawn("s", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();

        for _ in 0..3 {
            kernel.wait(ev);
        }
        assert_eq!(kernel.current(), Some(signaller));

        kernel.signal(ev);
        for &w in &waiters {
            assert_ne!(kernel.thread_state(w), Some(ThreadState::Waiting));
        }
        assert_eq!(kernel.current(), waiters.last().copied());
    }

    #[test]
    fn test_signal_from_interrupt_switches_on_exit() {
        let kernel = kernel();
        let ev = event(EventState::Taken);
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        let b = kernel.spawn("b", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();
        kernel.wait(ev);
        assert_eq!(kernel.current(), Some(b));

        kernel.interrupt(|cs| kernel.signal_from_interrupt(cs, ev));
        assert_eq!(kernel.current(), Some(a));
    }

    #[test]
    fn test_take_and_release() {
        let kernel = kernel();
        let lock = event(EventState::Free);
        let high = kernel.spawn("high", Priority(3), spin, stack()).unwrap();
        let low = kernel.spawn("low", Priority(1), spin, stack()).unwrap();
        let gate = event(EventState::Taken);
        kernel.start().unwrap();

        // H parks so L can take the lock first
        kernel.wait(gate);
        kernel.take(lock);
        assert_eq!(lock.owner(), Some(low));
        assert_eq!(kernel.current(), Some(low));

        // L wakes H, which contends for the lock and blocks
        kernel.signal(gate);
        assert_eq!(kernel.current(), Some(high));
        kernel.wait(lock);
        assert_eq!(kernel.current(), Some(low));

        // L releases: H is woken and wins the reschedule
        kernel.release(lock);
        assert_eq!(lock.state(), EventState::Free);
        assert_eq!(kernel.current(), Some(high));
        kernel.take(lock);
        assert_eq!(lock.owner(), Some(high));
    }

    #[test]
    fn test_release_by_non_owner_ignored() {
        let kernel = kernel();
        let lock = event(EventState::Free);
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        kernel.start().unwrap();
        critical_section::with(|cs| lock.try_take(cs, ThreadId(0)));

        kernel.port().take_calls();
        kernel.release(lock);
        assert_eq!(lock.owner(), Some(ThreadId(0)));
        assert!(kernel.port().take_calls().is_empty());
        assert_eq!(kernel.current(), Some(a));
    }

    #[test]
    fn test_blocking_before_start_is_noop() {
        let kernel = kernel();
        let ev = event(EventState::Taken);
        kernel.delay(10);
        kernel.wait(ev);
        kernel.take(ev);
        assert!(kernel.port().take_calls().is_empty());
        assert!(!kernel.is_started());
    }

    #[test]
    fn test_tick_before_start_advances_clock() {
        let kernel = kernel();
        ticks(&kernel, 5);
        assert_eq!(kernel.now(), 5);
        assert!(kernel.port().take_calls().is_empty());
    }

    #[test]
    fn test_spawn_from_interrupt() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();

        let b = critical_section::with(|cs| {
            kernel.spawn_from_interrupt(cs, "b", Priority(4), spin, stack()).unwrap()
        });
        // no switch until the next reschedule
        assert_eq!(kernel.current(), Some(a));
        kernel.tick();
        assert_eq!(kernel.current(), Some(b));
    }

    #[test]
    fn test_now_from_interrupt() {
        let kernel = kernel();
        kernel.start().unwrap();
        ticks(&kernel, 42);
        let seen = critical_section::with(|cs| kernel.now_from_interrupt(cs));
        assert_eq!(seen, 42);
    }

    #[test]
    fn test_spawn_recoverable_errors() {
        let kernel = kernel();
        let small: &'static mut [u8] = Box::leak(Box::new([0u8; 16]));
        assert_eq!(kernel.spawn("tiny", Priority(1), spin, small), Err(Error::StackTooSmall));
        for _ in 1..crate::config::MAX_THREADS {
            kernel.spawn("t", Priority(1), spin, stack()).unwrap();
        }
        assert_eq!(kernel.spawn("over", Priority(1), spin, stack()), Err(Error::ThreadTableFull));
    }

    #[test]
    fn test_stats() {
        let kernel = kernel();
        let a = kernel.spawn("a", Priority(2), spin, stack()).unwrap();
        kernel.spawn("b", Priority(1), spin, stack()).unwrap();
        kernel.start().unwrap();
        kernel.delay(1);
        kernel.tick();

        let stats = kernel.stats();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.tick_overflows, 0);
        assert_eq!(stats.threads, 3);
        assert_eq!(stats.running, Some(a));
        // start, A -> B, B -> A
        assert_eq!(stats.context_switches, 3);
        assert_eq!(kernel.stack_usage(a), Some(Frame::SIZE));
    }

    #[test]
    #[should_panic(expected = "no ready thread")]
    fn test_idle_blocking_halts() {
        let kernel = kernel();
        kernel.start().unwrap();
        kernel.delay(1);
    }

    #[test]
    #[should_panic(expected = "no insertion point")]
    fn test_priority_zero_thread_halts() {
        let kernel = kernel();
        let _ = kernel.spawn("zero", Priority::IDLE, spin, stack());
    }

    #[test]
    #[should_panic(expected = "no insertion point")]
    fn test_spawn_before_init_halts() {
        let kernel = Kernel::new(RecordingPort::new());
        let _ = kernel.spawn("early", Priority(1), spin, stack());
    }
}
