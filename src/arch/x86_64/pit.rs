//! 8253/8254 Programmable Interval Timer, channel 0
//!
//! Carries both nucleus timers: a one-shot countdown (mode 0) that raises IRQ0
//! when it reaches zero.

use ::x86_64::instructions::port::Port;

use crate::machine::Ticks;

/// PIT input clock, Hz
const PIT_FREQUENCY: u64 = 1_193_182;

const COMMAND: u16 = 0x43;
const CHANNEL0: u16 = 0x40;

/// Channel 0, Lo/Hi Byte, Interrupt On Terminal Count (Mode 0), Binary
const ONE_SHOT: u8 = 0x30;

/// Reload value for a countdown of `micros`
pub fn count_for(micros: Ticks) -> u16 {
    let count = micros.saturating_mul(PIT_FREQUENCY) / 1_000_000;
    count.clamp(1, u16::MAX as u64) as u16
}

/// Fire IRQ0 once, `micros` from now
pub fn arm(micros: Ticks) {
    let mut command_port = Port::<u8>::new(COMMAND);
    let mut data_port = Port::<u8>::new(CHANNEL0);
    let count = count_for(micros);

    unsafe {
        command_port.write(ONE_SHOT);
        data_port.write((count & 0xFF) as u8);
        data_port.write((count >> 8) as u8);
    }
}

/// Stop the countdown.
/// In mode 0 the counter holds after a control word until a count is written.
pub fn disarm() {
    let mut command_port = Port::<u8>::new(COMMAND);
    unsafe { command_port.write(ONE_SHOT) };
}
