//! Round-Robin Scheduler
//!
//! One ready queue, served strictly FIFO. Every dispatch grants one
//! [`QUANTUM`]; whoever notices the quantum expiring puts the process back at
//! the tail and runs the cycle again.
//!
//! # Dispatch cycle
//!
//! 1. Charge the outgoing process for the time since it was dispatched
//! 2. Pop the head of the ready queue
//! 3. Found one: make it current, stamp the clock, arm the local timer
//! 4. Queue empty:
//!    - no processes left → halt
//!    - someone waits on a device → disarm the local timer and wait; the
//!      caller enables interrupts once it has let go of the nucleus
//!    - everyone waits on something no interrupt will signal → deadlock

use pandos_abi::timing::{QUANTUM, TIMER_DISABLED};

use crate::error::NucleusError;
use crate::machine::{Machine, Ticks};
use crate::sched::queue::ProcessQueue;
use crate::sched::task::{PcbTable, Pid};

/// What the processor should do after a trip through the nucleus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Restore this process' saved context
    Run(Pid),
    /// Nothing is runnable yet; wait for a device interrupt
    Wait,
    /// No processes left
    Halt,
    /// Unrecoverable kernel fault
    Panic(NucleusError),
}

/// Scheduler state
#[derive(Debug)]
pub struct Scheduler {
    /// Runnable processes not holding the CPU
    pub ready_queue: ProcessQueue,
    /// Process holding the CPU
    pub current: Option<Pid>,
    /// Live processes: running, ready or blocked
    pub process_count: usize,
    /// Processes blocked on a device semaphore
    pub soft_block_count: usize,
    /// Clock value when `current` was dispatched
    dispatched_at: Ticks,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ready_queue: ProcessQueue::new(),
            current: None,
            process_count: 0,
            soft_block_count: 0,
            dispatched_at: 0,
        }
    }

    /// Run the dispatch cycle and decide what the processor does next.
    ///
    /// The outgoing process (if any) must already be wherever it belongs:
    /// the ready queue, a semaphore queue, or gone.
    pub fn schedule<M: Machine>(&mut self, pcbs: &mut PcbTable, hw: &mut M) -> Dispatch {
        if let Some(outgoing) = self.current.take() {
            let used = self.elapsed(hw);
            pcbs[outgoing].cpu_time += used;
        }

        if let Some(next) = self.ready_queue.remove_head(pcbs) {
            self.current = Some(next);
            self.dispatched_at = hw.read_clock();
            hw.load_local_timer(QUANTUM);
            log::trace!("[Scheduler] dispatching {:?}", next);
            return Dispatch::Run(next);
        }

        if self.process_count == 0 {
            log::info!("[Scheduler] no processes left, halting");
            Dispatch::Halt
        } else if self.soft_block_count > 0 {
            log::trace!(
                "[Scheduler] idle, {} of {} processes waiting on devices",
                self.soft_block_count,
                self.process_count
            );
            hw.load_local_timer(TIMER_DISABLED);
            Dispatch::Wait
        } else {
            log::error!(
                "[Scheduler] deadlock: {} processes blocked, none on a device",
                self.process_count
            );
            Dispatch::Panic(NucleusError::Deadlock)
        }
    }

    /// Time the current process has run since its last dispatch
    pub fn elapsed<M: Machine>(&self, hw: &M) -> Ticks {
        hw.read_clock().saturating_sub(self.dispatched_at)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
