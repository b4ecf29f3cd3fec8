//! Pandos nucleus
//!
//! Process bookkeeping for a single-processor kernel: the active semaphore
//! list, round-robin scheduling with CPU time accounting, and the syscall
//! and interrupt layers that drive them. Hardware is reached through the
//! [`Machine`] trait; the running kernel keeps its state in
//! [`globals::NUCLEUS`].

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod asl;        // Active semaphore list
pub mod device;
pub mod error;
pub mod globals;
pub mod interrupts;
pub mod machine;
pub mod nucleus;
pub mod sched;      // Process control blocks, queues, dispatch
pub mod syscall;

pub use asl::{ActiveSemaphoreList, Asl, SemKey};
pub use device::{Device, DeviceClass};
pub use error::{NucleusError, NucleusResult};
pub use interrupts::Interrupt;
pub use machine::{Machine, ProcessorState, Ticks};
pub use nucleus::Nucleus;
pub use sched::{Dispatch, Pid};
