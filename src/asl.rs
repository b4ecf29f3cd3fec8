//! Active Semaphore List
//!
//! The ASL maps a semaphore's identity to the FIFO of processes blocked on it.
//! A semaphore is *active* while at least one process waits on it; only active
//! semaphores have a descriptor in the list.
//!
//! # Layout
//!
//! ```text
//!  semds[0]           semds[i]        semds[j]          semds[1]
//! ┌─────────┐ next  ┌─────────┐     ┌─────────┐      ┌──────────┐
//! │ key MIN │──────▶│ key  k1 │────▶│ key  k2 │─────▶│ key MAX  │──▶ None
//! │ (head)  │       │ q: p p  │     │ q: p    │      │ (tail)   │
//! └─────────┘       └─────────┘     └─────────┘      └──────────┘
//!
//!  free ──▶ semds[m] ──▶ semds[n] ──▶ ... ──▶ None      (LIFO stack)
//! ```
//!
//! All descriptors live in one fixed array and refer to each other by index.
//! Slot 0 and slot 1 are the head and tail sentinels: they are linked first and
//! last forever and never go back to the free list, so a search never runs off
//! the end and never special-cases an empty list.

use crate::error::{NucleusError, NucleusResult};
use crate::sched::queue::ProcessQueue;
use crate::sched::task::{PcbTable, Pid};

use pandos_abi::device::{DEVICE_SEMAPHORES, PSEUDO_CLOCK};
use pandos_abi::limits::SEMD_SLOTS;

/// Semaphore identity.
///
/// Keys are compared, never dereferenced by the ASL. A user semaphore is keyed
/// by the address of its integer cell. Device semaphores take the keys just
/// above [`SemKey::MIN`], a range no valid cell address can fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemKey(usize);

impl SemKey {
    /// Key of the head sentinel
    pub const MIN: SemKey = SemKey(0);
    /// Key of the tail sentinel
    pub const MAX: SemKey = SemKey(usize::MAX);
    /// Key of the pseudo-clock semaphore
    pub const PSEUDO_CLOCK: SemKey = SemKey::device(PSEUDO_CLOCK);

    /// Key of the semaphore cell at `addr`
    pub const fn from_addr(addr: usize) -> Self {
        SemKey(addr)
    }

    /// Key of the semaphore stored in `cell`
    pub fn of(cell: &i32) -> Self {
        SemKey(cell as *const i32 as usize)
    }

    /// Key of device semaphore number `index`
    pub const fn device(index: usize) -> Self {
        SemKey(1 + index)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    /// Index of the device semaphore this key names, if any
    pub fn device_index(self) -> Option<usize> {
        if self.is_device() {
            Some(self.0 - 1)
        } else {
            None
        }
    }

    pub const fn is_device(self) -> bool {
        self.0 >= 1 && self.0 <= DEVICE_SEMAPHORES
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::MIN || self == Self::MAX
    }
}

/// Head sentinel slot
const HEAD: usize = 0;
/// Tail sentinel slot
const TAIL: usize = 1;

/// Semaphore descriptor
#[derive(Debug, Clone, Copy)]
struct Semd {
    key: SemKey,
    queue: ProcessQueue,
    /// Next descriptor, in the ASL or on the free list
    next: Option<usize>,
}

impl Semd {
    const EMPTY: Semd = Semd {
        key: SemKey::MIN,
        queue: ProcessQueue::new(),
        next: None,
    };
}

/// ASL over `SLOTS` descriptors, two of which are the sentinels
pub struct ActiveSemaphoreList<const SLOTS: usize> {
    semds: [Semd; SLOTS],
    free: Option<usize>,
}

/// The nucleus' ASL: one descriptor per process that can be blocked
pub type Asl = ActiveSemaphoreList<SEMD_SLOTS>;

impl<const SLOTS: usize> ActiveSemaphoreList<SLOTS> {
    /// Set up both sentinels and put every other slot on the free list
    pub fn new() -> Self {
        assert!(SLOTS >= 2, "ASL needs room for both sentinels");

        let mut asl = Self {
            semds: [Semd::EMPTY; SLOTS],
            free: None,
        };

        asl.semds[HEAD] = Semd {
            key: SemKey::MIN,
            queue: ProcessQueue::new(),
            next: Some(TAIL),
        };
        asl.semds[TAIL] = Semd {
            key: SemKey::MAX,
            queue: ProcessQueue::new(),
            next: None,
        };

        for slot in 2..SLOTS {
            asl.free_semd(slot);
        }
        asl
    }

    /// Block `pid` on `key`, at the tail of its wait queue.
    ///
    /// Activates the semaphore if needed. Fails without touching anything when
    /// a descriptor is needed and none is free.
    pub fn insert_blocked(&mut self, pcbs: &mut PcbTable, key: SemKey, pid: Pid) -> NucleusResult<()> {
        if key.is_sentinel() {
            return Err(NucleusError::ReservedSemaphore);
        }

        let pred = self.search(key);
        let slot = match self.successor(pred) {
            Some(found) if self.semds[found].key == key => found,
            _ => {
                let Some(slot) = self.alloc_semd() else {
                    log::error!("[ASL] descriptor pool exhausted blocking on {:#x}", key.addr());
                    return Err(NucleusError::DescriptorPoolExhausted);
                };
                self.semds[slot] = Semd {
                    key,
                    queue: ProcessQueue::new(),
                    next: self.semds[pred].next,
                };
                self.semds[pred].next = Some(slot);
                log::debug!("[ASL] activated {:#x}", key.addr());
                slot
            }
        };

        pcbs[pid].sem_key = Some(key);
        self.semds[slot].queue.insert(pcbs, pid);
        Ok(())
    }

    /// Wake the first process blocked on `key`
    pub fn remove_blocked(&mut self, pcbs: &mut PcbTable, key: SemKey) -> Option<Pid> {
        let (pred, slot) = self.find(key)?;
        let pid = self.semds[slot].queue.remove_head(pcbs)?;
        pcbs[pid].sem_key = None;
        self.release_if_idle(pred, slot);
        Some(pid)
    }

    /// Pull `pid` out of the queue of the semaphore it is blocked on.
    ///
    /// `None` means the process claims to be blocked but is not where it says,
    /// which callers should report.
    pub fn out_blocked(&mut self, pcbs: &mut PcbTable, pid: Pid) -> Option<Pid> {
        let key = pcbs[pid].sem_key?;
        let (pred, slot) = self.find(key)?;
        self.semds[slot].queue.remove(pcbs, pid)?;
        pcbs[pid].sem_key = None;
        self.release_if_idle(pred, slot);
        Some(pid)
    }

    /// First process blocked on `key`, left in place
    pub fn head_blocked(&self, key: SemKey) -> Option<Pid> {
        let (_, slot) = self.find(key)?;
        self.semds[slot].queue.head()
    }

    /// Descriptors available for activation (sentinels excluded)
    pub const fn capacity(&self) -> usize {
        SLOTS - 2
    }

    /// Descriptors on the free list
    pub fn free_len(&self) -> usize {
        core::iter::successors(self.free, |&s| self.semds[s].next).count()
    }

    /// Active semaphores, in list order
    pub fn active_keys(&self) -> impl Iterator<Item = SemKey> + '_ {
        self.active_slots().map(move |s| self.semds[s].key)
    }

    /// Wait queue of an active semaphore
    pub fn queue(&self, key: SemKey) -> Option<&ProcessQueue> {
        self.find(key).map(|(_, slot)| &self.semds[slot].queue)
    }

    /// Non-sentinel descriptors linked in the list
    fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(self.semds[HEAD].next, move |&s| self.semds[s].next)
            .take_while(|&s| s != TAIL)
    }

    /// Walk from the head while the next key is below `key`.
    /// Returns the last descriptor passed: the insertion point.
    fn search(&self, key: SemKey) -> usize {
        let mut at = HEAD;
        while let Some(next) = self.semds[at].next {
            if self.semds[next].key < key {
                at = next;
            } else {
                break;
            }
        }
        at
    }

    /// `(predecessor, slot)` of the active descriptor for `key`
    fn find(&self, key: SemKey) -> Option<(usize, usize)> {
        if key.is_sentinel() {
            return None;
        }
        let pred = self.search(key);
        let slot = self.successor(pred)?;
        (self.semds[slot].key == key).then_some((pred, slot))
    }

    fn successor(&self, slot: usize) -> Option<usize> {
        self.semds[slot].next
    }

    /// Unlink and free `slot` once its queue has drained
    fn release_if_idle(&mut self, pred: usize, slot: usize) {
        if self.semds[slot].queue.is_empty() {
            self.semds[pred].next = self.semds[slot].next;
            log::debug!("[ASL] deactivated {:#x}", self.semds[slot].key.addr());
            self.free_semd(slot);
        }
    }

    fn alloc_semd(&mut self) -> Option<usize> {
        let slot = self.free?;
        self.free = self.semds[slot].next;
        self.semds[slot] = Semd::EMPTY;
        Some(slot)
    }

    fn free_semd(&mut self, slot: usize) {
        self.semds[slot].next = self.free;
        self.free = Some(slot);
    }
}

impl<const SLOTS: usize> Default for ActiveSemaphoreList<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three usable descriptors
    type SmallAsl = ActiveSemaphoreList<5>;

    fn setup(n: usize) -> (PcbTable, Vec<Pid>) {
        let mut pcbs = PcbTable::new();
        let pids = (0..n).map(|_| pcbs.alloc().unwrap()).collect();
        (pcbs, pids)
    }

    fn key(addr: usize) -> SemKey {
        SemKey::from_addr(addr)
    }

    /// Sorted, no empty queues, and every descriptor accounted for
    fn assert_invariants<const N: usize>(asl: &ActiveSemaphoreList<N>) {
        let keys: Vec<SemKey> = asl.active_keys().collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "unsorted: {:?}", keys);
        for k in &keys {
            assert!(!asl.queue(*k).unwrap().is_empty(), "empty descriptor {:?}", k);
        }
        assert_eq!(asl.free_len() + keys.len(), asl.capacity());
    }

    #[test]
    fn init_state() {
        let asl = SmallAsl::new();
        assert_eq!(asl.capacity(), 3);
        assert_eq!(asl.free_len(), 3);
        assert_eq!(asl.active_keys().count(), 0);

        let asl = Asl::new();
        assert_eq!(asl.capacity(), pandos_abi::limits::MAXPROC);
    }

    #[test]
    fn pool_exhaustion_scenario() {
        let (mut pcbs, p) = setup(5);
        let mut asl = SmallAsl::new();

        asl.insert_blocked(&mut pcbs, key(0xa000), p[0]).unwrap();
        asl.insert_blocked(&mut pcbs, key(0xa000), p[1]).unwrap();
        assert_eq!(asl.free_len(), 2);
        assert_eq!(
            asl.queue(key(0xa000)).unwrap().iter(&pcbs).collect::<Vec<_>>(),
            vec![p[0], p[1]]
        );

        asl.insert_blocked(&mut pcbs, key(0xb000), p[2]).unwrap();
        assert_eq!(asl.free_len(), 1);

        // Use up the last descriptor, then try one more
        asl.insert_blocked(&mut pcbs, key(0xd000), p[3]).unwrap();
        assert_eq!(asl.free_len(), 0);

        let before: Vec<SemKey> = asl.active_keys().collect();
        assert_eq!(
            asl.insert_blocked(&mut pcbs, key(0xc000), p[4]),
            Err(NucleusError::DescriptorPoolExhausted)
        );
        assert_eq!(pcbs[p[4]].sem_key, None);
        assert_eq!(asl.active_keys().collect::<Vec<_>>(), before);
        assert_invariants(&asl);

        // An active key still takes more waiters with the pool empty
        asl.insert_blocked(&mut pcbs, key(0xb000), p[4]).unwrap();
        assert_eq!(asl.head_blocked(key(0xb000)), Some(p[2]));
    }

    #[test]
    fn keys_stay_sorted() {
        let (mut pcbs, p) = setup(8);
        let mut asl = Asl::new();
        let addrs = [0x5000, 0x1000, 0x9000, 0x3000, 0x7000, 0x1000, 0x2000, 0x9000];

        for (pid, addr) in p.iter().zip(addrs) {
            asl.insert_blocked(&mut pcbs, key(addr), *pid).unwrap();
            assert_invariants(&asl);
        }
        assert_eq!(
            asl.active_keys().map(SemKey::addr).collect::<Vec<_>>(),
            vec![0x1000, 0x2000, 0x3000, 0x5000, 0x7000, 0x9000]
        );

        asl.remove_blocked(&mut pcbs, key(0x3000)).unwrap();
        asl.out_blocked(&mut pcbs, p[5]).unwrap();
        asl.remove_blocked(&mut pcbs, key(0x9000)).unwrap();
        assert_invariants(&asl);
        assert_eq!(
            asl.active_keys().map(SemKey::addr).collect::<Vec<_>>(),
            vec![0x1000, 0x2000, 0x5000, 0x7000, 0x9000]
        );
    }

    #[test]
    fn round_trip_restores_list() {
        let (mut pcbs, p) = setup(2);
        let mut asl = Asl::new();
        asl.insert_blocked(&mut pcbs, key(0x4000), p[0]).unwrap();
        let before: Vec<SemKey> = asl.active_keys().collect();
        let free_before = asl.free_len();

        asl.insert_blocked(&mut pcbs, key(0x2000), p[1]).unwrap();
        assert_eq!(pcbs[p[1]].sem_key, Some(key(0x2000)));
        assert_eq!(asl.remove_blocked(&mut pcbs, key(0x2000)), Some(p[1]));

        assert_eq!(pcbs[p[1]].sem_key, None);
        assert_eq!(asl.active_keys().collect::<Vec<_>>(), before);
        assert_eq!(asl.free_len(), free_before);
    }

    #[test]
    fn waiters_leave_in_arrival_order() {
        let (mut pcbs, p) = setup(3);
        let mut asl = Asl::new();
        for &pid in &p {
            asl.insert_blocked(&mut pcbs, key(0x8000), pid).unwrap();
        }

        assert_eq!(asl.remove_blocked(&mut pcbs, key(0x8000)), Some(p[0]));
        assert_eq!(asl.remove_blocked(&mut pcbs, key(0x8000)), Some(p[1]));
        assert_eq!(asl.remove_blocked(&mut pcbs, key(0x8000)), Some(p[2]));
        assert_eq!(asl.remove_blocked(&mut pcbs, key(0x8000)), None);
        assert_eq!(asl.free_len(), asl.capacity());
    }

    #[test]
    fn out_blocked_removes_any_position() {
        let (mut pcbs, p) = setup(3);
        let mut asl = Asl::new();
        for &pid in &p {
            asl.insert_blocked(&mut pcbs, key(0x6000), pid).unwrap();
        }

        assert_eq!(asl.out_blocked(&mut pcbs, p[1]), Some(p[1]));
        assert_eq!(pcbs[p[1]].sem_key, None);
        assert_eq!(
            asl.queue(key(0x6000)).unwrap().iter(&pcbs).collect::<Vec<_>>(),
            vec![p[0], p[2]]
        );

        assert_eq!(asl.out_blocked(&mut pcbs, p[0]), Some(p[0]));
        assert_eq!(asl.head_blocked(key(0x6000)), Some(p[2]));
        assert_eq!(asl.out_blocked(&mut pcbs, p[2]), Some(p[2]));
        assert_eq!(asl.head_blocked(key(0x6000)), None);
        assert_invariants(&asl);
    }

    #[test]
    fn out_blocked_misses() {
        let (mut pcbs, p) = setup(3);
        let mut asl = Asl::new();

        // Not blocked at all
        assert_eq!(asl.out_blocked(&mut pcbs, p[0]), None);

        // Claims a semaphore that is not active
        pcbs[p[0]].sem_key = Some(key(0x1000));
        assert_eq!(asl.out_blocked(&mut pcbs, p[0]), None);

        // Claims an active semaphore but is not in its queue
        asl.insert_blocked(&mut pcbs, key(0x1000), p[1]).unwrap();
        assert_eq!(asl.out_blocked(&mut pcbs, p[0]), None);
        assert_eq!(asl.head_blocked(key(0x1000)), Some(p[1]));
        assert_invariants(&asl);
    }

    #[test]
    fn lookups_need_exact_key() {
        let (mut pcbs, p) = setup(1);
        let mut asl = Asl::new();
        asl.insert_blocked(&mut pcbs, key(0x3000), p[0]).unwrap();

        assert_eq!(asl.head_blocked(key(0x2000)), None);
        assert_eq!(asl.remove_blocked(&mut pcbs, key(0x2000)), None);
        assert_eq!(asl.head_blocked(key(0x4000)), None);
        assert_eq!(asl.head_blocked(key(0x3000)), Some(p[0]));
    }

    #[test]
    fn sentinel_keys_rejected() {
        let (mut pcbs, p) = setup(1);
        let mut asl = Asl::new();

        assert_eq!(
            asl.insert_blocked(&mut pcbs, SemKey::MIN, p[0]),
            Err(NucleusError::ReservedSemaphore)
        );
        assert_eq!(
            asl.insert_blocked(&mut pcbs, SemKey::MAX, p[0]),
            Err(NucleusError::ReservedSemaphore)
        );
        assert_eq!(asl.head_blocked(SemKey::MAX), None);
        assert_eq!(asl.remove_blocked(&mut pcbs, SemKey::MIN), None);
        assert_eq!(pcbs[p[0]].sem_key, None);
    }

    #[test]
    fn device_keys() {
        assert!(SemKey::device(0).is_device());
        assert!(SemKey::device(DEVICE_SEMAPHORES - 1).is_device());
        assert_eq!(SemKey::device(7).device_index(), Some(7));
        assert!(!SemKey::MIN.is_device());
        assert!(!SemKey::from_addr(0x1000).is_device());
        assert!(SemKey::device(DEVICE_SEMAPHORES - 1) < SemKey::from_addr(0x1000));
        assert!(SemKey::PSEUDO_CLOCK.is_device());
        assert_eq!(SemKey::PSEUDO_CLOCK.device_index(), Some(DEVICE_SEMAPHORES - 1));
    }
}
