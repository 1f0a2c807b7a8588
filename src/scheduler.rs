//! Priority scheduler — sorted singly-linked list of TCBs
//!
//! The list is ordered by non-increasing priority with the Idle thread
//! (priority 0) as the tail sentinel. Picking the next thread is a
//! linear scan for the first Ready entry; equal priorities resolve in
//! list order, which is insertion order.
//!
//! Static thread table, no dynamic allocation. TCBs live in a fixed
//! arena and link to each other by `ThreadId`.

use heapless::Vec;

use crate::config::MAX_THREADS;
use crate::error::Error;
use crate::event::Event;
use crate::thread::{Priority, Tcb, ThreadId, ThreadState};

/// Priority-ordered ready list
pub struct Scheduler {
    /// TCB arena, indexed by `ThreadId`
    threads: Vec<Tcb, MAX_THREADS>,
    /// Highest-priority TCB
    head: Option<ThreadId>,
    /// TCB currently executing (None before start)
    running: Option<ThreadId>,
    /// Total context switches
    pub context_switches: u32,
}

impl Scheduler {
    /// Create an empty scheduler
    pub const fn new() -> Self {
        Self {
            threads: Vec::new(),
            head: None,
            running: None,
            context_switches: 0,
        }
    }

    /// Install the Idle thread as the list's only entry
    pub fn install_idle(&mut self, mut idle: Tcb) -> Result<ThreadId, Error> {
        if self.head.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        idle.set_priority(Priority::IDLE);
        idle.next = None;
        idle.set_state(ThreadState::Ready);
        let id = self.push(idle)?;
        self.head = Some(id);
        Ok(id)
    }

    /// Insert in front of the first entry with strictly lower priority
    ///
    /// With the Idle sentinel in place that entry always exists for
    /// priorities above 0. Not finding one is `Error::NoInsertionPoint`.
    pub fn add(&mut self, mut tcb: Tcb) -> Result<ThreadId, Error> {
        let mut prev: Option<ThreadId> = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = &self.threads[id.index()];
            if node.priority() < tcb.priority() {
                break;
            }
            prev = cursor;
            cursor = node.next;
        }
        let successor = cursor.ok_or(Error::NoInsertionPoint)?;

        tcb.next = Some(successor);
        tcb.set_state(ThreadState::Ready);
        let id = self.push(tcb)?;
        match prev {
            None => self.head = Some(id),
            Some(p) => self.threads[p.index()].next = Some(id),
        }
        Ok(id)
    }

    fn push(&mut self, tcb: Tcb) -> Result<ThreadId, Error> {
        let id = ThreadId(self.threads.len() as u8);
        self.threads.push(tcb).map_err(|_| Error::ThreadTableFull)?;
        Ok(id)
    }

    /// First Ready TCB in priority order
    pub fn pick_ready(&self) -> Result<ThreadId, Error> {
        self.iter()
            .find(|(_, tcb)| tcb.state() == ThreadState::Ready)
            .map(|(id, _)| id)
            .ok_or(Error::NoReadyThread)
    }

    /// Elect the next thread and mark it Running
    ///
    /// A caller still Running is demoted to Ready first, so it competes
    /// with everyone else. Callers that block set their own state
    /// before calling this. The context switch itself is the caller's job.
    pub fn reschedule(&mut self) -> Result<ThreadId, Error> {
        if let Some(current) = self.running {
            let tcb = &mut self.threads[current.index()];
            if tcb.state() == ThreadState::Running {
                tcb.set_state(ThreadState::Ready);
            }
        }

        let next = self.pick_ready()?;
        self.threads[next.index()].set_state(ThreadState::Running);
        if self.running != Some(next) {
            self.context_switches = self.context_switches.wrapping_add(1);
            self.running = Some(next);
        }
        Ok(next)
    }

    /// Undo the first `reschedule` when the winner could not be started
    pub(crate) fn abandon_start(&mut self) {
        if let Some(id) = self.running.take() {
            let tcb = &mut self.threads[id.index()];
            if tcb.state() == ThreadState::Running {
                tcb.set_state(ThreadState::Ready);
            }
            self.context_switches = self.context_switches.wrapping_sub(1);
        }
    }

    /// Put `id` to sleep for `ticks` timer interrupts
    pub fn suspend(&mut self, id: ThreadId, ticks: u32) {
        let tcb = &mut self.threads[id.index()];
        tcb.suspended_timer = ticks;
        tcb.set_state(ThreadState::Suspended);
    }

    /// Block `id` on `event`
    pub fn block_on(&mut self, id: ThreadId, event: &'static Event) {
        let tcb = &mut self.threads[id.index()];
        tcb.waiting_event = Some(event);
        tcb.set_state(ThreadState::Waiting);
    }

    /// Make every thread waiting on `event` Ready; returns how many woke
    pub fn wake_waiters(&mut self, event: &Event) -> usize {
        let mut woken = 0;
        for tcb in self.threads.iter_mut() {
            if tcb.is_waiting_on(event) {
                tcb.waiting_event = None;
                tcb.set_state(ThreadState::Ready);
                woken += 1;
            }
        }
        woken
    }

    /// One tick of every sleeper's countdown; returns how many woke
    pub fn expire_sleepers(&mut self) -> usize {
        let mut woken = 0;
        for tcb in self.threads.iter_mut() {
            if tcb.state() != ThreadState::Suspended {
                continue;
            }
            tcb.suspended_timer = tcb.suspended_timer.saturating_sub(1);
            if tcb.suspended_timer == 0 {
                tcb.set_state(ThreadState::Ready);
                woken += 1;
            }
        }
        woken
    }

    /// TCB currently executing
    pub fn running(&self) -> Option<ThreadId> {
        self.running
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Tcb> {
        self.threads.get(id.index())
    }

    pub(crate) fn thread_mut(&mut self, id: ThreadId) -> &mut Tcb {
        &mut self.threads[id.index()]
    }

    /// Walk the list in priority order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            threads: &self.threads,
            cursor: self.head,
        }
    }

    /// Number of threads, Idle included
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Priority-order iterator over the TCB list
pub struct Iter<'a> {
    threads: &'a [Tcb],
    cursor: Option<ThreadId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (ThreadId, &'a Tcb);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let tcb = &self.threads[id.index()];
        self.cursor = tcb.next;
        Some((id, tcb))
    }
}
