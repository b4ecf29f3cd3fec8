//! Pandos ABI
//!
//! Constants shared between the nucleus and anything that talks to it:
//! table sizes, timer values, device geometry and syscall numbers.

#![no_std]

/// Kernel table sizes. Every table is sized once, at build time.
pub mod limits {
    /// Maximum number of live processes
    pub const MAXPROC: usize = 20;

    /// Semaphore descriptors, including the two ASL sentinels
    pub const SEMD_SLOTS: usize = MAXPROC + 2;
}

/// Timer values, in microseconds of processor clock.
pub mod timing {
    /// Time slice granted to a process before preemption (5ms)
    pub const QUANTUM: u64 = 5_000;

    /// Value loaded into the local timer when no process should be preempted
    pub const TIMER_DISABLED: u64 = u64::MAX;

    /// Pseudo-clock tick: period of the interval timer (100ms)
    pub const INTERVAL: u64 = 100_000;
}

/// Device geometry.
///
/// Devices are grouped by interrupt line, eight per line. Terminals are two
/// devices in one (receiver and transmitter), so they get two semaphores each.
pub mod device {
    /// First interrupt line carrying peripheral devices
    pub const FIRST_DEVICE_LINE: u8 = 3;

    /// Interrupt line of the terminals
    pub const TERMINAL_LINE: u8 = 7;

    /// Number of interrupt lines carrying peripheral devices
    pub const DEVICE_LINES: usize = 5;

    /// Devices attached to each line
    pub const DEVICES_PER_LINE: usize = 8;

    /// One semaphore per device, one extra line for terminal transmitters,
    /// and the pseudo-clock
    pub const DEVICE_SEMAPHORES: usize = (DEVICE_LINES + 1) * DEVICES_PER_LINE + 1;

    /// Slot of the pseudo-clock semaphore, last in the table
    pub const PSEUDO_CLOCK: usize = DEVICE_SEMAPHORES - 1;
}

/// Syscall numbers, passed in the first argument word
pub mod syscall {
    pub const CREATEPROCESS: u64 = 1;
    pub const TERMINATEPROCESS: u64 = 2;
    pub const PASSEREN: u64 = 3;
    pub const VERHOGEN: u64 = 4;
    pub const WAITIO: u64 = 5;
    pub const GETCPUTIME: u64 = 6;
    pub const WAITCLOCK: u64 = 7;
}
