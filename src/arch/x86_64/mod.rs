//! x86_64 implementation of the machine interface
//!
//! The local timer and the interval timer share PIT channel 0. Each keeps a
//! deadline on the TSC clock and the PIT counts down to the earlier one; the
//! IRQ0 entry asks [`Hardware::expired_timer`] which of the two it stands for.

pub mod pit;

use core::arch::asm;
use core::sync::atomic::{AtomicU64, Ordering};

use ::x86_64::instructions::{hlt, interrupts};
use ::x86_64::registers::rflags::RFlags;
use ::x86_64::instructions::segmentation::{Segment, CS, SS};
use pandos_abi::timing::TIMER_DISABLED;

use crate::interrupts::Interrupt;
use crate::machine::{Machine, ProcessorState, Ticks};

/// Deadline of a disarmed timer
const NEVER: Ticks = u64::MAX;

static LOCAL_DEADLINE: AtomicU64 = AtomicU64::new(NEVER);
static INTERVAL_DEADLINE: AtomicU64 = AtomicU64::new(NEVER);

/// TSC increments per microsecond; 1 GHz until calibrated
static TSC_PER_MICROSECOND: AtomicU64 = AtomicU64::new(1_000);

/// Set the TSC rate measured at bring-up
pub fn calibrate(tsc_per_microsecond: u64) {
    TSC_PER_MICROSECOND.store(tsc_per_microsecond.max(1), Ordering::Relaxed);
    log::info!("[Arch] TSC calibrated at {} ticks/us", tsc_per_microsecond);
}

/// Timer due at `now`, the interval timer first when both are
fn due(now: Ticks, local: Ticks, interval: Ticks) -> Option<Interrupt> {
    if interval <= now {
        Some(Interrupt::IntervalTimer)
    } else if local <= now {
        Some(Interrupt::LocalTimer)
    } else {
        None
    }
}

/// The processor the nucleus runs on
pub struct Hardware;

impl Hardware {
    /// Decode an IRQ0: the timer that expired, which is then disarmed.
    ///
    /// `None` means the countdown ended early because the next deadline was out
    /// of the PIT's range; the PIT has been set for the rest.
    pub fn expired_timer(&mut self) -> Option<Interrupt> {
        let now = self.read_clock();
        let local = LOCAL_DEADLINE.load(Ordering::Relaxed);
        let interval = INTERVAL_DEADLINE.load(Ordering::Relaxed);

        let timer = due(now, local, interval);
        match timer {
            Some(Interrupt::IntervalTimer) => INTERVAL_DEADLINE.store(NEVER, Ordering::Relaxed),
            Some(Interrupt::LocalTimer) => LOCAL_DEADLINE.store(NEVER, Ordering::Relaxed),
            _ => {}
        }
        self.rearm(now);
        timer
    }

    /// Point the PIT at the earlier deadline
    fn rearm(&self, now: Ticks) {
        let local = LOCAL_DEADLINE.load(Ordering::Relaxed);
        let interval = INTERVAL_DEADLINE.load(Ordering::Relaxed);
        match local.min(interval) {
            NEVER => pit::disarm(),
            deadline => pit::arm(deadline.saturating_sub(now)),
        }
    }
}

impl Machine for Hardware {
    fn read_clock(&self) -> Ticks {
        let tsc = unsafe { core::arch::x86_64::_rdtsc() };
        tsc / TSC_PER_MICROSECOND.load(Ordering::Relaxed)
    }

    fn load_local_timer(&mut self, ticks: Ticks) {
        let now = self.read_clock();
        let deadline = if ticks == TIMER_DISABLED { NEVER } else { now.saturating_add(ticks) };
        LOCAL_DEADLINE.store(deadline, Ordering::Relaxed);
        self.rearm(now);
    }

    fn load_interval_timer(&mut self, ticks: Ticks) {
        let now = self.read_clock();
        INTERVAL_DEADLINE.store(now.saturating_add(ticks), Ordering::Relaxed);
        self.rearm(now);
    }

    fn enable_interrupts(&mut self) {
        interrupts::enable();
    }

    fn wait_for_interrupt(&mut self) {
        interrupts::enable_and_hlt();
    }

    fn halt(&mut self) -> ! {
        log::info!("[Arch] system halted");
        interrupts::disable();
        loop {
            hlt();
        }
    }

    fn panic(&mut self) -> ! {
        interrupts::disable();
        loop {
            hlt();
        }
    }

    fn load_state(&mut self, state: &ProcessorState) -> ! {
        let cs = CS::get_reg().0 as u64;
        let ss = SS::get_reg().0 as u64;
        // Processes always run preemptible
        let rflags = state.status | RFlags::INTERRUPT_FLAG.bits();

        // Build an interrupt return frame and leave through it
        unsafe {
            asm!(
                "push {ss}",
                "push {sp}",
                "push {rflags}",
                "push {cs}",
                "push {pc}",
                "iretq",
                ss = in(reg) ss,
                sp = in(reg) state.sp,
                rflags = in(reg) rflags,
                cs = in(reg) cs,
                pc = in(reg) state.pc,
                in("rax") state.ret,
                in("rdi") state.args[0],
                in("rsi") state.args[1],
                in("rdx") state.args[2],
                in("rcx") state.args[3],
                options(noreturn)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_timer_wins_a_tie() {
        assert_eq!(due(100, 100, 100), Some(Interrupt::IntervalTimer));
        assert_eq!(due(100, 90, 200), Some(Interrupt::LocalTimer));
        assert_eq!(due(100, NEVER, 50), Some(Interrupt::IntervalTimer));
        assert_eq!(due(100, 150, NEVER), None);
    }
}
