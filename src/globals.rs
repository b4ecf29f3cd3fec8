use spin::Mutex;
use lazy_static::lazy_static;

use crate::error::NucleusError;
use crate::machine::{Machine, ProcessorState};
use crate::nucleus::Nucleus;
use crate::sched::Dispatch;

lazy_static! {
    pub static ref NUCLEUS: Mutex<Option<Nucleus>> = Mutex::new(None);
}

/// What to do once the lock is released
enum Next {
    Load(ProcessorState),
    Wait,
    Halt,
    Panic(NucleusError),
}

/// Run one kernel event against the nucleus in `cell`, then act on the
/// outcome. Never returns: control goes to a process, to the halt or panic
/// routine, or back around after a wait.
///
/// The lock is dropped before touching the processor, and interrupts are
/// only enabled after that, so an interrupt taken while waiting can enter
/// here again.
pub fn execute<M, F>(cell: &Mutex<Option<Nucleus>>, hw: &mut M, event: F) -> !
where
    M: Machine,
    F: FnOnce(&mut Nucleus, &mut M) -> Dispatch,
{
    let mut event = Some(event);
    loop {
        let next = {
            let mut guard = cell.lock();
            let Some(nucleus) = guard.as_mut() else {
                log::error!("[Nucleus] kernel entry before boot");
                hw.panic();
            };

            let dispatch = match event.take() {
                Some(handler) => handler(nucleus, &mut *hw),
                None => nucleus.schedule(hw),
            };
            match dispatch {
                Dispatch::Run(pid) => Next::Load(*nucleus.state(pid)),
                Dispatch::Wait => Next::Wait,
                Dispatch::Halt => Next::Halt,
                Dispatch::Panic(e) => Next::Panic(e),
            }
        };

        match next {
            Next::Load(state) => hw.load_state(&state),
            Next::Wait => {
                hw.enable_interrupts();
                hw.wait_for_interrupt();
            }
            Next::Halt => hw.halt(),
            Next::Panic(e) => {
                log::error!("[Nucleus] PANIC: {}", e);
                hw.panic();
            }
        }
    }
}

/// Install `nucleus` as the running kernel
pub fn install(nucleus: Nucleus) {
    *NUCLEUS.lock() = Some(nucleus);
}

/// Dispatch from the global nucleus on the real machine
#[cfg(target_arch = "x86_64")]
pub fn scheduler() -> ! {
    let mut hw = crate::arch::x86_64::Hardware;
    execute(&NUCLEUS, &mut hw, |nucleus, hw| nucleus.schedule(hw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;
    use crate::machine::Ticks;

    fn booted() -> Mutex<Option<Nucleus>> {
        let mut hw = MockMachine::at(0);
        let nucleus = Nucleus::boot(ProcessorState::new(0x4000, 0x9000, 0), &mut hw).unwrap();
        Mutex::new(Some(nucleus))
    }

    /// Checks the nucleus is unlocked whenever interrupts are let in
    struct LockWatch<'a> {
        cell: &'a Mutex<Option<Nucleus>>,
        enabled: bool,
    }

    impl Machine for LockWatch<'_> {
        fn read_clock(&self) -> Ticks {
            0
        }

        fn load_local_timer(&mut self, _: Ticks) {}

        fn load_interval_timer(&mut self, _: Ticks) {}

        fn enable_interrupts(&mut self) {
            assert!(!self.cell.is_locked(), "interrupts enabled under the nucleus lock");
            self.enabled = true;
        }

        fn wait_for_interrupt(&mut self) {
            assert!(!self.cell.is_locked(), "waiting under the nucleus lock");
            assert!(self.enabled, "waiting with interrupts masked");
            panic!("idle with the nucleus unlocked");
        }

        fn halt(&mut self) -> ! {
            panic!("unexpected halt");
        }

        fn panic(&mut self) -> ! {
            panic!("unexpected machine panic");
        }

        fn load_state(&mut self, _: &ProcessorState) -> ! {
            panic!("unexpected dispatch");
        }
    }

    #[test]
    #[should_panic(expected = "mock: load state pc=0x4000")]
    fn dispatches_ready_process() {
        let cell = booted();
        let mut hw = MockMachine::at(0);
        execute(&cell, &mut hw, |n, hw| n.schedule(hw));
    }

    #[test]
    #[should_panic(expected = "mock: halt")]
    fn halts_when_last_process_terminates() {
        let cell = booted();
        let mut hw = MockMachine::at(0);
        execute(&cell, &mut hw, |n, hw| {
            let Dispatch::Run(pid) = n.schedule(hw) else {
                panic!("initial process not dispatched");
            };
            n.terminate(pid);
            n.schedule(hw)
        });
    }

    #[test]
    #[should_panic(expected = "mock: wait for interrupt")]
    fn waits_for_pending_device() {
        use crate::device::{Device, DeviceClass};

        let cell = booted();
        let mut hw = MockMachine::at(0);
        execute(&cell, &mut hw, |n, hw| {
            n.schedule(hw);
            n.wait_for_io(Device::new(DeviceClass::Printer, 0), hw)
        });
    }

    #[test]
    #[should_panic(expected = "mock: machine panic")]
    fn panics_without_nucleus() {
        let cell = Mutex::new(None);
        let mut hw = MockMachine::at(0);
        execute(&cell, &mut hw, |n, hw| n.schedule(hw));
    }

    #[test]
    #[should_panic(expected = "mock: machine panic")]
    fn panics_on_deadlock() {
        let cell = booted();
        let mut hw = MockMachine::at(0);
        let mut sem = 0;
        execute(&cell, &mut hw, move |n, hw| {
            n.schedule(hw);
            n.passeren(&mut sem, hw)
        });
    }

    #[test]
    #[should_panic(expected = "idle with the nucleus unlocked")]
    fn waits_with_nucleus_unlocked() {
        use crate::device::{Device, DeviceClass};

        let cell = booted();
        let mut hw = LockWatch { cell: &cell, enabled: false };
        execute(&cell, &mut hw, |n, hw| {
            n.schedule(hw);
            n.wait_for_io(Device::new(DeviceClass::Printer, 0), hw)
        });
    }

    #[test]
    fn install_sets_global() {
        let mut hw = MockMachine::at(0);
        install(Nucleus::boot(ProcessorState::new(0x4000, 0x9000, 0), &mut hw).unwrap());
        let count = NUCLEUS.lock().as_ref().map(|n| n.scheduler.process_count);
        assert_eq!(count, Some(1));
    }
}
