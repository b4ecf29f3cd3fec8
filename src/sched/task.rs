//! Process Control Blocks
//!
//! A fixed table of [`Pcb`]s with a free list. Blocks are addressed by [`Pid`],
//! which is simply the slot index, so handles stay valid for as long as the
//! block is allocated. Besides the execution context each block carries the
//! links of the process queue it sits in and of the progeny tree.

use core::ops::{Index, IndexMut};

use pandos_abi::limits::MAXPROC;

use crate::asl::SemKey;
use crate::machine::{ProcessorState, Ticks};

/// Process handle (index into the [`PcbTable`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(usize);

impl Pid {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A Process Control Block
#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    /// Saved execution context
    pub state: ProcessorState,
    /// CPU time consumed so far
    pub cpu_time: Ticks,
    /// Semaphore this process is blocked on
    pub sem_key: Option<SemKey>,

    // Process queue links
    pub(crate) next: Option<Pid>,
    pub(crate) prev: Option<Pid>,

    // Progeny tree
    parent: Option<Pid>,
    child: Option<Pid>,
    sibling_next: Option<Pid>,
    sibling_prev: Option<Pid>,
}

impl Pcb {
    const EMPTY: Pcb = Pcb {
        state: ProcessorState::new(0, 0, 0),
        cpu_time: 0,
        sem_key: None,
        next: None,
        prev: None,
        parent: None,
        child: None,
        sibling_next: None,
        sibling_prev: None,
    };

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn is_blocked(&self) -> bool {
        self.sem_key.is_some()
    }
}

/// Fixed-size process table
pub struct PcbTable {
    pcbs: [Pcb; MAXPROC],
    /// Free list, threaded through `next`
    free: Option<Pid>,
    allocated: usize,
}

impl PcbTable {
    /// Build the table with every block on the free list
    pub fn new() -> Self {
        let mut table = Self {
            pcbs: [Pcb::EMPTY; MAXPROC],
            free: None,
            allocated: MAXPROC,
        };
        for i in 0..MAXPROC {
            table.free(Pid(i));
        }
        table
    }

    /// Take a block off the free list, reset to an empty process
    pub fn alloc(&mut self) -> Option<Pid> {
        let pid = self.free?;
        self.free = self.pcbs[pid.0].next;
        self.pcbs[pid.0] = Pcb::EMPTY;
        self.allocated += 1;
        Some(pid)
    }

    /// Return a block to the free list
    pub fn free(&mut self, pid: Pid) {
        self.pcbs[pid.0].next = self.free;
        self.free = Some(pid);
        self.allocated -= 1;
    }

    /// Number of blocks currently handed out
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    // Progeny tree

    /// Make `child` the newest child of `parent`
    pub fn insert_child(&mut self, parent: Pid, child: Pid) {
        let first = self.pcbs[parent.0].child;
        if let Some(first) = first {
            self.pcbs[first.0].sibling_prev = Some(child);
        }
        let c = &mut self.pcbs[child.0];
        c.parent = Some(parent);
        c.sibling_next = first;
        c.sibling_prev = None;
        self.pcbs[parent.0].child = Some(child);
    }

    /// Detach and return the first child of `parent`
    pub fn remove_child(&mut self, parent: Pid) -> Option<Pid> {
        let child = self.pcbs[parent.0].child?;
        self.out_child(child)
    }

    /// Detach `pid` from its parent, wherever it sits among its siblings.
    /// Returns `None` if it has no parent.
    pub fn out_child(&mut self, pid: Pid) -> Option<Pid> {
        let parent = self.pcbs[pid.0].parent?;
        let (prev, next) = (self.pcbs[pid.0].sibling_prev, self.pcbs[pid.0].sibling_next);

        match prev {
            Some(prev) => self.pcbs[prev.0].sibling_next = next,
            None => self.pcbs[parent.0].child = next,
        }
        if let Some(next) = next {
            self.pcbs[next.0].sibling_prev = prev;
        }

        let p = &mut self.pcbs[pid.0];
        p.parent = None;
        p.sibling_next = None;
        p.sibling_prev = None;
        Some(pid)
    }

    /// Children of `parent`, newest first
    pub fn children(&self, parent: Pid) -> impl Iterator<Item = Pid> + '_ {
        core::iter::successors(self.pcbs[parent.0].child, move |c| {
            self.pcbs[c.0].sibling_next
        })
    }
}

impl Default for PcbTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Pid> for PcbTable {
    type Output = Pcb;

    fn index(&self, pid: Pid) -> &Pcb {
        &self.pcbs[pid.0]
    }
}

impl IndexMut<Pid> for PcbTable {
    fn index_mut(&mut self, pid: Pid) -> &mut Pcb {
        &mut self.pcbs[pid.0]
    }
}
