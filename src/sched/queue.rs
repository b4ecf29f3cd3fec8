//! Process Queue
//!
//! FIFO of processes, threaded through the `next`/`prev` links of the blocks
//! themselves. A process sits in at most one queue at a time: the ready queue
//! or the wait queue of one semaphore.

use crate::sched::task::{PcbTable, Pid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessQueue {
    head: Option<Pid>,
    tail: Option<Pid>,
}

impl ProcessQueue {
    /// An empty queue
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Process at the front, without removing it
    pub fn head(&self) -> Option<Pid> {
        self.head
    }

    /// Append `pid` at the tail
    pub fn insert(&mut self, pcbs: &mut PcbTable, pid: Pid) {
        pcbs[pid].next = None;
        pcbs[pid].prev = self.tail;
        match self.tail {
            Some(tail) => pcbs[tail].next = Some(pid),
            None => self.head = Some(pid),
        }
        self.tail = Some(pid);
    }

    /// Pop the process at the front
    pub fn remove_head(&mut self, pcbs: &mut PcbTable) -> Option<Pid> {
        let head = self.head?;
        self.unlink(pcbs, head);
        Some(head)
    }

    /// Remove `pid` from anywhere in the queue.
    /// Returns `None` if it is not in this queue.
    pub fn remove(&mut self, pcbs: &mut PcbTable, pid: Pid) -> Option<Pid> {
        if !self.contains(pcbs, pid) {
            return None;
        }
        self.unlink(pcbs, pid);
        Some(pid)
    }

    pub fn contains(&self, pcbs: &PcbTable, pid: Pid) -> bool {
        self.iter(pcbs).any(|p| p == pid)
    }

    /// Queued processes, front to back
    pub fn iter<'a>(&self, pcbs: &'a PcbTable) -> impl Iterator<Item = Pid> + 'a {
        core::iter::successors(self.head, move |p| pcbs[*p].next)
    }

    pub fn len(&self, pcbs: &PcbTable) -> usize {
        self.iter(pcbs).count()
    }

    fn unlink(&mut self, pcbs: &mut PcbTable, pid: Pid) {
        let (prev, next) = (pcbs[pid].prev, pcbs[pid].next);
        match prev {
            Some(prev) => pcbs[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => pcbs[next].prev = prev,
            None => self.tail = prev,
        }
        pcbs[pid].next = None;
        pcbs[pid].prev = None;
    }
}
