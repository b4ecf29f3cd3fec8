//! Process Scheduler

pub mod queue;     // Process queues
pub mod scheduler; // Dispatch cycle
pub mod task;      // Process control blocks

pub use queue::ProcessQueue;
pub use scheduler::{Dispatch, Scheduler};
pub use task::{Pcb, PcbTable, Pid};
