//! Interrupt Handling
//!
//! The local timer ends the running process' quantum. The interval timer
//! ticks the pseudo-clock, releasing every process waiting for it. Device
//! completions signal the device's semaphore. Acknowledging the device and
//! capturing the interrupted context is the architecture layer's job; it hands
//! the result in here.

use pandos_abi::timing::INTERVAL;

use crate::asl::SemKey;
use crate::device::Device;
use crate::machine::{Machine, ProcessorState};
use crate::nucleus::Nucleus;
use crate::sched::{Dispatch, Pid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Quantum expired
    LocalTimer,
    /// Pseudo-clock tick
    IntervalTimer,
    /// `device` finished an operation and reported `status`
    Device { device: Device, status: u32 },
}

impl Nucleus {
    /// Handle an interrupt taken with `saved` as the interrupted context
    pub fn interrupt<M: Machine>(&mut self, irq: Interrupt, saved: &ProcessorState, hw: &mut M) -> Dispatch {
        let interrupted = self.save_current(saved);

        match irq {
            Interrupt::LocalTimer => {
                // Preempted: back of the line
                if let Some(pid) = interrupted {
                    log::trace!("[Interrupt] quantum expired for {:?}", pid);
                    self.make_ready(pid);
                }
                self.schedule(hw)
            }
            Interrupt::IntervalTimer => {
                self.clock_tick(hw);
                self.resume(hw)
            }
            Interrupt::Device { device, status } => {
                self.device_done(device, status);
                self.resume(hw)
            }
        }
    }

    /// Release everyone waiting on the pseudo-clock and start the next tick
    fn clock_tick<M: Machine>(&mut self, hw: &mut M) {
        hw.load_interval_timer(INTERVAL);

        let mut woken = 0;
        while let Some(pid) = self.asl.remove_blocked(&mut self.pcbs, SemKey::PSEUDO_CLOCK) {
            self.scheduler.soft_block_count -= 1;
            self.make_ready(pid);
            woken += 1;
        }
        *self.clock_semaphore_mut() = 0;

        log::trace!("[Interrupt] pseudo-clock tick, {} woken", woken);
    }

    /// V on the device semaphore, handing `status` to the waiter it wakes
    fn device_done(&mut self, device: Device, status: u32) -> Option<Pid> {
        let sem = self.device_semaphore_mut(device);
        *sem += 1;
        if *sem > 0 {
            // Nobody waiting yet; keep the status for the next WAITIO
            self.device_status[device.index()] = status;
            return None;
        }

        let Some(pid) = self.asl.remove_blocked(&mut self.pcbs, device.key()) else {
            // The waiter was terminated while the operation was in flight
            log::debug!("[Interrupt] {:?} completed with nobody left waiting", device);
            return None;
        };
        self.pcbs[pid].state.set_return(i64::from(status));
        self.scheduler.soft_block_count -= 1;
        self.make_ready(pid);
        log::trace!("[Interrupt] {:?} woke {:?}", device, pid);
        Some(pid)
    }
}
