//! Machine Interface
//!
//! The nucleus never touches hardware directly. Everything it needs from the
//! processor goes through [`Machine`]: the clock, the local (preemption) timer
//! and the interval timer behind the pseudo-clock, interrupt enabling, the
//! low-power wait, halting, the fault trap and context restore.

/// Processor clock reading, in microseconds
pub type Ticks = u64;

/// Saved execution context of a process.
///
/// The architecture layer decides which registers back each slot. `args[0]`
/// carries the syscall number on the way in and `ret` the result on the way out.
///
/// This is the whole context the nucleus keeps: registers outside these slots
/// are not preserved across a switch. There is no privilege level either, so
/// on x86_64 every process runs on the kernel's own code and stack segments
/// (ring 0), and only `ret` and `args` (rax, rdi, rsi, rdx, rcx) are restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ProcessorState {
    pub pc: u64,
    pub sp: u64,
    pub status: u64,
    pub args: [u64; 4],
    pub ret: u64,
}

impl ProcessorState {
    /// Context that starts executing at `pc` with stack top `sp`
    pub const fn new(pc: u64, sp: u64, status: u64) -> Self {
        Self {
            pc,
            sp,
            status,
            args: [0; 4],
            ret: 0,
        }
    }

    /// Store a signed result in the return word
    pub fn set_return(&mut self, value: i64) {
        self.ret = value as u64;
    }
}

/// Hardware primitives the nucleus depends on
pub trait Machine {
    /// Current clock value
    fn read_clock(&self) -> Ticks;

    /// Arm the local timer to fire after `ticks`.
    /// [`TIMER_DISABLED`](pandos_abi::timing::TIMER_DISABLED) keeps it from firing.
    fn load_local_timer(&mut self, ticks: Ticks);

    /// Arm the interval timer, which drives the pseudo-clock, to fire after `ticks`
    fn load_interval_timer(&mut self, ticks: Ticks);

    /// Unmask interrupts
    fn enable_interrupts(&mut self);

    /// Enter the low-power wait state until the next interrupt has been handled
    fn wait_for_interrupt(&mut self);

    /// Stop the processor (normal shutdown)
    fn halt(&mut self) -> !;

    /// Irrecoverable kernel fault
    fn panic(&mut self) -> !;

    /// Transfer control to a saved context
    fn load_state(&mut self, state: &ProcessorState) -> !;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{Machine, ProcessorState, Ticks};
    use std::vec::Vec;

    /// Everything a [`MockMachine`] was asked to do
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        LocalTimer(Ticks),
        IntervalTimer(Ticks),
        EnableInterrupts,
        Wait,
        Halt,
        Panic,
        Load(u64),
    }

    /// Recording machine with a settable clock.
    ///
    /// Diverging primitives panic so tests can catch them with `should_panic`.
    #[derive(Debug, Default)]
    pub struct MockMachine {
        pub clock: Ticks,
        pub events: Vec<Event>,
    }

    impl MockMachine {
        pub fn at(clock: Ticks) -> Self {
            Self {
                clock,
                events: Vec::new(),
            }
        }
    }

    impl Machine for MockMachine {
        fn read_clock(&self) -> Ticks {
            self.clock
        }

        fn load_local_timer(&mut self, ticks: Ticks) {
            self.events.push(Event::LocalTimer(ticks));
        }

        fn load_interval_timer(&mut self, ticks: Ticks) {
            self.events.push(Event::IntervalTimer(ticks));
        }

        fn enable_interrupts(&mut self) {
            self.events.push(Event::EnableInterrupts);
        }

        fn wait_for_interrupt(&mut self) {
            self.events.push(Event::Wait);
            panic!("mock: wait for interrupt");
        }

        fn halt(&mut self) -> ! {
            self.events.push(Event::Halt);
            panic!("mock: halt");
        }

        fn panic(&mut self) -> ! {
            self.events.push(Event::Panic);
            panic!("mock: machine panic");
        }

        fn load_state(&mut self, state: &ProcessorState) -> ! {
            self.events.push(Event::Load(state.pc));
            panic!("mock: load state pc={:#x}", state.pc);
        }
    }
}
