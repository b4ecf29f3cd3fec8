//! Nucleus State
//!
//! Everything the nucleus keeps between kernel entries, in one struct: the
//! process table, the ASL, the scheduler and the device semaphores. Tests
//! build a fresh one per case; the running kernel keeps one in
//! [`globals::NUCLEUS`](crate::globals::NUCLEUS).

use pandos_abi::device::{DEVICE_SEMAPHORES, PSEUDO_CLOCK};
use pandos_abi::timing::INTERVAL;

use crate::asl::{Asl, SemKey};
use crate::device::Device;
use crate::error::{NucleusError, NucleusResult};
use crate::machine::{Machine, ProcessorState};
use crate::sched::{Dispatch, PcbTable, Pid, Scheduler};

pub struct Nucleus {
    pub pcbs: PcbTable,
    pub asl: Asl,
    pub scheduler: Scheduler,
    /// Synchronization semaphores, one per device (sub)unit, then the pseudo-clock
    device_semaphores: [i32; DEVICE_SEMAPHORES],
    /// Completion status of an interrupt nobody was waiting for yet
    pub(crate) device_status: [u32; DEVICE_SEMAPHORES],
}

impl Nucleus {
    /// Empty nucleus: no processes, every descriptor free
    pub fn new() -> Self {
        Self {
            pcbs: PcbTable::new(),
            asl: Asl::new(),
            scheduler: Scheduler::new(),
            device_semaphores: [0; DEVICE_SEMAPHORES],
            device_status: [0; DEVICE_SEMAPHORES],
        }
    }

    /// Bring the nucleus up with a single ready process running `initial`,
    /// and start the pseudo-clock.
    ///
    /// Failing to get a block for that first process is fatal to the caller.
    pub fn boot<M: Machine>(initial: ProcessorState, hw: &mut M) -> NucleusResult<Self> {
        let mut nucleus = Self::new();

        let Some(pid) = nucleus.pcbs.alloc() else {
            log::error!("[Nucleus] no control block for the initial process");
            return Err(NucleusError::ProcessTableExhausted);
        };
        nucleus.pcbs[pid].state = initial;
        nucleus.scheduler.ready_queue.insert(&mut nucleus.pcbs, pid);
        nucleus.scheduler.process_count = 1;
        hw.load_interval_timer(INTERVAL);

        log::info!("[Nucleus] booted, initial process {:?} at {:#x}", pid, initial.pc);
        Ok(nucleus)
    }

    /// Run the dispatch cycle
    pub fn schedule<M: Machine>(&mut self, hw: &mut M) -> Dispatch {
        self.scheduler.schedule(&mut self.pcbs, hw)
    }

    pub fn current(&self) -> Option<Pid> {
        self.scheduler.current
    }

    /// Saved context of `pid`
    pub fn state(&self, pid: Pid) -> &ProcessorState {
        &self.pcbs[pid].state
    }

    pub fn device_semaphore(&self, device: Device) -> i32 {
        self.device_semaphores[device.index()]
    }

    pub fn clock_semaphore(&self) -> i32 {
        self.device_semaphores[PSEUDO_CLOCK]
    }

    /// Copy the context captured at kernel entry into the running process
    pub(crate) fn save_current(&mut self, saved: &ProcessorState) -> Option<Pid> {
        let pid = self.scheduler.current?;
        self.pcbs[pid].state = *saved;
        Some(pid)
    }

    /// Put `pid` on the ready queue
    pub(crate) fn make_ready(&mut self, pid: Pid) {
        self.scheduler.ready_queue.insert(&mut self.pcbs, pid);
    }

    /// Block the running process on `key` and pick someone else
    pub(crate) fn block_current<M: Machine>(&mut self, key: SemKey, hw: &mut M) -> Dispatch {
        let Some(pid) = self.scheduler.current else {
            return Dispatch::Panic(NucleusError::NoCurrentProcess);
        };
        if let Err(e) = self.asl.insert_blocked(&mut self.pcbs, key, pid) {
            return Dispatch::Panic(e);
        }
        if key.is_device() {
            self.scheduler.soft_block_count += 1;
        }
        self.schedule(hw)
    }

    /// Resume the interrupted process, or dispatch if there was none
    pub(crate) fn resume<M: Machine>(&mut self, hw: &mut M) -> Dispatch {
        match self.scheduler.current {
            Some(pid) => Dispatch::Run(pid),
            None => self.schedule(hw),
        }
    }

    pub(crate) fn device_semaphore_mut(&mut self, device: Device) -> &mut i32 {
        &mut self.device_semaphores[device.index()]
    }

    pub(crate) fn clock_semaphore_mut(&mut self) -> &mut i32 {
        &mut self.device_semaphores[PSEUDO_CLOCK]
    }
}

impl Default for Nucleus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::{Event, MockMachine};
    use pandos_abi::limits::MAXPROC;

    #[test]
    fn boot_readies_initial_process() {
        let mut hw = MockMachine::at(0);
        let nucleus = Nucleus::boot(ProcessorState::new(0x8000, 0x2000_0000, 0), &mut hw).unwrap();
        assert_eq!(nucleus.scheduler.process_count, 1);
        assert_eq!(nucleus.scheduler.soft_block_count, 0);
        assert_eq!(nucleus.current(), None);

        let pid = nucleus.scheduler.ready_queue.head().unwrap();
        assert_eq!(nucleus.state(pid).pc, 0x8000);
        assert_eq!(nucleus.pcbs[pid].cpu_time, 0);
        assert_eq!(nucleus.pcbs[pid].sem_key, None);
        assert_eq!(nucleus.asl.free_len(), MAXPROC);
        assert_eq!(nucleus.clock_semaphore(), 0);
    }

    #[test]
    fn boot_starts_pseudo_clock() {
        let mut hw = MockMachine::at(0);
        Nucleus::boot(ProcessorState::new(0x8000, 0x1000, 0), &mut hw).unwrap();
        assert_eq!(hw.events, vec![Event::IntervalTimer(INTERVAL)]);
    }

    #[test]
    fn first_dispatch_runs_initial_process() {
        let mut hw = MockMachine::at(5);
        let mut nucleus = Nucleus::boot(ProcessorState::new(0x8000, 0x1000, 0), &mut hw).unwrap();

        let Dispatch::Run(pid) = nucleus.schedule(&mut hw) else {
            panic!("initial process not dispatched");
        };
        assert_eq!(nucleus.current(), Some(pid));
        assert_eq!(nucleus.state(pid).pc, 0x8000);
    }
}
