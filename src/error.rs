//! Nucleus Errors

use core::fmt;

/// Nucleus result type
pub type NucleusResult<T> = Result<T, NucleusError>;

/// Nucleus error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NucleusError {
    /// No free semaphore descriptor left to activate a semaphore
    DescriptorPoolExhausted,
    /// Key collides with an ASL sentinel
    ReservedSemaphore,
    /// No free process control block
    ProcessTableExhausted,
    /// A process-level request arrived while nothing was running
    NoCurrentProcess,
    /// Semaphore address is null, misaligned or inside the device key range
    BadSemaphoreAddress,
    /// Every live process is blocked and no interrupt can wake any of them
    Deadlock,
}

impl fmt::Display for NucleusError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
