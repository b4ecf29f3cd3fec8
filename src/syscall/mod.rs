//! Syscall Interface
//!
//! Entered with the context the running process trapped with. `args[0]` is the
//! syscall number, `args[1..]` its arguments; results go back in `ret`.
//!
//! | nr | call             | arguments                       |
//! |----|------------------|---------------------------------|
//! | 1  | CREATEPROCESS    | pc, sp                          |
//! | 2  | TERMINATEPROCESS |                                 |
//! | 3  | PASSEREN         | semaphore address               |
//! | 4  | VERHOGEN         | semaphore address               |
//! | 5  | WAITIO           | line, device, terminal read     |
//! | 6  | GETCPUTIME       |                                 |
//! | 7  | WAITCLOCK        |                                 |
//!
//! There is no support level to pass exceptions up to, so an unknown number,
//! a bad argument or a program trap terminates the caller.

use core::mem::align_of;

use crate::asl::SemKey;
use crate::device::Device;
use crate::error::{NucleusError, NucleusResult};
use crate::machine::{Machine, ProcessorState, Ticks};
use crate::nucleus::Nucleus;
use crate::sched::{Dispatch, Pid};

pub use pandos_abi::syscall as numbers;

// Resolve a semaphore address passed by the caller
unsafe fn user_semaphore<'a>(addr: u64) -> NucleusResult<&'a mut i32> {
    let addr = usize::try_from(addr).map_err(|_| NucleusError::BadSemaphoreAddress)?;
    let key = SemKey::from_addr(addr);
    if key.is_sentinel() || key.is_device() || addr % align_of::<i32>() != 0 {
        log::warn!("[Syscall] bad semaphore address {:#x}", addr);
        return Err(NucleusError::BadSemaphoreAddress);
    }
    Ok(&mut *(addr as *mut i32))
}

impl Nucleus {
    /// Main syscall dispatcher
    pub fn syscall<M: Machine>(&mut self, saved: &ProcessorState, hw: &mut M) -> Dispatch {
        let Some(caller) = self.save_current(saved) else {
            return Dispatch::Panic(NucleusError::NoCurrentProcess);
        };
        let [nr, arg1, arg2, arg3] = saved.args;

        match nr {
            numbers::CREATEPROCESS => {
                let status = self.pcbs[caller].state.status;
                let ret = match self.create_process(ProcessorState::new(arg1, arg2, status)) {
                    Ok(_) => 0,
                    Err(_) => -1,
                };
                self.pcbs[caller].state.set_return(ret);
                Dispatch::Run(caller)
            }
            numbers::TERMINATEPROCESS => {
                self.terminate(caller);
                self.schedule(hw)
            }
            // SAFETY: the cell lives in the caller's memory, which the nucleus
            // shares; nothing else holds a reference to it during the call.
            numbers::PASSEREN => match unsafe { user_semaphore(arg1) } {
                Ok(sem) => self.passeren(sem, hw),
                Err(_) => self.kill_current(hw),
            },
            // SAFETY: as for PASSEREN
            numbers::VERHOGEN => match unsafe { user_semaphore(arg1) } {
                Ok(sem) => {
                    self.verhogen(sem);
                    Dispatch::Run(caller)
                }
                Err(_) => self.kill_current(hw),
            },
            numbers::WAITIO => {
                let device = u8::try_from(arg1)
                    .ok()
                    .zip(u8::try_from(arg2).ok())
                    .and_then(|(line, number)| Device::from_line(line, number, arg3 != 0));
                match device {
                    Some(device) => self.wait_for_io(device, hw),
                    None => {
                        log::warn!("[Syscall] WAITIO on unknown device {}:{}", arg1, arg2);
                        self.kill_current(hw)
                    }
                }
            }
            numbers::GETCPUTIME => {
                let time = self.cpu_time(hw);
                self.pcbs[caller].state.set_return(time as i64);
                Dispatch::Run(caller)
            }
            numbers::WAITCLOCK => self.wait_for_clock(hw),
            _ => {
                log::warn!("[Syscall] unknown syscall {} from {:?}", nr, caller);
                self.kill_current(hw)
            }
        }
    }

    /// Any other synchronous exception: the caller dies
    pub fn program_trap<M: Machine>(&mut self, saved: &ProcessorState, hw: &mut M) -> Dispatch {
        self.save_current(saved);
        log::warn!("[Syscall] program trap in {:?} at {:#x}", self.current(), saved.pc);
        self.kill_current(hw)
    }

    /// Create a ready process, as a child of the running one if there is one
    pub fn create_process(&mut self, state: ProcessorState) -> NucleusResult<Pid> {
        let Some(pid) = self.pcbs.alloc() else {
            log::warn!("[Syscall] process table full");
            return Err(NucleusError::ProcessTableExhausted);
        };
        self.pcbs[pid].state = state;
        if let Some(parent) = self.scheduler.current {
            self.pcbs.insert_child(parent, pid);
        }
        self.make_ready(pid);
        self.scheduler.process_count += 1;

        log::debug!("[Syscall] created {:?} at {:#x}", pid, state.pc);
        Ok(pid)
    }

    /// Terminate `pid` and all of its progeny
    pub fn terminate(&mut self, pid: Pid) {
        self.pcbs.out_child(pid);
        self.kill_tree(pid);
    }

    fn kill_tree(&mut self, pid: Pid) {
        while let Some(child) = self.pcbs.remove_child(pid) {
            self.kill_tree(child);
        }

        if self.scheduler.current == Some(pid) {
            self.scheduler.current = None;
        } else if let Some(key) = self.pcbs[pid].sem_key {
            if self.asl.out_blocked(&mut self.pcbs, pid).is_none() {
                log::error!("[Syscall] {:?} claims to wait on {:#x} but is not queued there", pid, key.addr());
            } else if key.is_device() {
                // The pending I/O still completes and signals the semaphore
                self.scheduler.soft_block_count -= 1;
            } else {
                // SAFETY: `key` was taken from a live cell passed to PASSEREN,
                // and that cell outlives every process blocked on it.
                unsafe { *(key.addr() as *mut i32) += 1 };
            }
        } else if self.scheduler.ready_queue.remove(&mut self.pcbs, pid).is_none() {
            log::error!("[Syscall] {:?} is neither running, blocked nor ready", pid);
        }

        self.pcbs.free(pid);
        self.scheduler.process_count -= 1;
        log::debug!("[Syscall] terminated {:?}", pid);
    }

    /// P: take one unit of `sem`, blocking the caller if none is left
    pub fn passeren<M: Machine>(&mut self, sem: &mut i32, hw: &mut M) -> Dispatch {
        *sem -= 1;
        if *sem < 0 {
            self.block_current(SemKey::of(sem), hw)
        } else {
            self.resume(hw)
        }
    }

    /// V: release one unit of `sem`, readying its first waiter if any
    pub fn verhogen(&mut self, sem: &mut i32) -> Option<Pid> {
        *sem += 1;
        if *sem > 0 {
            return None;
        }
        let pid = self.asl.remove_blocked(&mut self.pcbs, SemKey::of(sem))?;
        self.make_ready(pid);
        Some(pid)
    }

    /// Wait for the next completion on `device`.
    ///
    /// The device status is delivered in the caller's return word.
    pub fn wait_for_io<M: Machine>(&mut self, device: Device, hw: &mut M) -> Dispatch {
        let sem = self.device_semaphore_mut(device);
        *sem -= 1;
        if *sem < 0 {
            return self.block_current(device.key(), hw);
        }

        // Completion already arrived
        let status = self.device_status[device.index()];
        if let Some(pid) = self.scheduler.current {
            self.pcbs[pid].state.set_return(i64::from(status));
        }
        self.resume(hw)
    }

    /// Wait for the next pseudo-clock tick
    pub fn wait_for_clock<M: Machine>(&mut self, hw: &mut M) -> Dispatch {
        let sem = self.clock_semaphore_mut();
        *sem -= 1;
        if *sem < 0 {
            self.block_current(SemKey::PSEUDO_CLOCK, hw)
        } else {
            self.resume(hw)
        }
    }

    /// CPU time of the running process, including the slice in progress
    pub fn cpu_time<M: Machine>(&self, hw: &M) -> Ticks {
        match self.scheduler.current {
            Some(pid) => self.pcbs[pid].cpu_time + self.scheduler.elapsed(hw),
            None => 0,
        }
    }

    fn kill_current<M: Machine>(&mut self, hw: &mut M) -> Dispatch {
        if let Some(pid) = self.scheduler.current {
            self.terminate(pid);
        }
        self.schedule(hw)
    }
}
