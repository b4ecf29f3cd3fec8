//! Device Addressing
//!
//! Maps a peripheral (interrupt line + device number) to its synchronization
//! semaphore. Terminals carry two semaphores, one per direction.

use pandos_abi::device::{DEVICES_PER_LINE, FIRST_DEVICE_LINE, TERMINAL_LINE};

use crate::asl::SemKey;

/// Device class, in semaphore table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceClass {
    Disk = 0,
    Flash = 1,
    Network = 2,
    Printer = 3,
    TerminalReceive = 4,
    TerminalTransmit = 5,
}

/// One peripheral device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub class: DeviceClass,
    pub number: u8,
}

impl Device {
    pub const fn new(class: DeviceClass, number: u8) -> Self {
        Self { class, number }
    }

    /// Resolve an interrupt line and device number.
    /// On the terminal line `read` selects the receiver.
    pub fn from_line(line: u8, number: u8, read: bool) -> Option<Self> {
        if number as usize >= DEVICES_PER_LINE {
            return None;
        }
        let class = match line {
            3 => DeviceClass::Disk,
            4 => DeviceClass::Flash,
            5 => DeviceClass::Network,
            6 => DeviceClass::Printer,
            TERMINAL_LINE if read => DeviceClass::TerminalReceive,
            TERMINAL_LINE => DeviceClass::TerminalTransmit,
            _ => return None,
        };
        Some(Self { class, number })
    }

    /// Interrupt line this device raises
    pub fn line(self) -> u8 {
        match self.class {
            DeviceClass::TerminalReceive | DeviceClass::TerminalTransmit => TERMINAL_LINE,
            class => FIRST_DEVICE_LINE + class as u8,
        }
    }

    /// Slot in the device semaphore table
    pub fn index(self) -> usize {
        self.class as usize * DEVICES_PER_LINE + self.number as usize
    }

    pub fn key(self) -> SemKey {
        SemKey::device(self.index())
    }
}
