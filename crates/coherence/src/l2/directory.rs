//! L2 storage, directory entries and the sharer heap.
//!
//! The L2 is inclusive: every line cached by an L1 is present here, and
//! each L2 line carries a directory entry tracking its L1 copies. The
//! sharer set is stored either directly in the entry (single owner) or as
//! a linked list of heap cells when more than one cache holds the line.
//!
//! Directory invariants enforced here:
//! - the sharer count equals the length of the list;
//! - a `ValidExclusive` entry has count 1 and its owner is the unique
//!   holder;
//! - directory entries never reference a line absent from the storage.

use crate::common::{CcId, NLine};

/// State of a directory entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirState {
    /// No L1 copy.
    #[default]
    Empty,
    /// Two or more readers (sharer list in the heap).
    Valid,
    /// Exactly one owner.
    ValidExclusive,
    /// Eviction in flight: copies being invalidated, no new copies.
    Zombi,
}

/// One L1 copy: cache identity plus the instruction/data side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Owner {
    /// Global cache identity.
    pub cc_id: CcId,
    /// `true` for an instruction-cache copy.
    pub inst: bool,
}

/// Sentinel for "no heap cell".
pub const HEAP_NIL: usize = usize::MAX;

/// A directory entry attached to one L2 line.
#[derive(Clone, Copy, Debug)]
pub struct DirEntry {
    /// Sharer-tracking state.
    pub state: DirState,
    /// Number of L1 copies.
    pub count: usize,
    /// The single owner when `count == 1`; head cell owner otherwise.
    pub owner: Owner,
    /// Head of the heap list when `count > 1`.
    pub ptr: usize,
}

impl Default for DirEntry {
    fn default() -> Self {
        Self {
            state: DirState::Empty,
            count: 0,
            owner: Owner::default(),
            ptr: HEAP_NIL,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct HeapCell {
    owner: Owner,
    next: usize,
}

/// Pool of sharer-list cells with an explicit free list.
pub struct SharerHeap {
    cells: Vec<HeapCell>,
    free: usize,
}

impl SharerHeap {
    /// Creates a heap of `size` cells, all free.
    pub fn new(size: usize) -> Self {
        let cells = (0..size)
            .map(|i| HeapCell {
                owner: Owner::default(),
                next: if i + 1 < size { i + 1 } else { HEAP_NIL },
            })
            .collect();
        Self {
            cells,
            free: if size == 0 { HEAP_NIL } else { 0 },
        }
    }

    fn alloc(&mut self, owner: Owner, next: usize) -> Option<usize> {
        let idx = self.free;
        if idx == HEAP_NIL {
            return None;
        }
        self.free = self.cells[idx].next;
        self.cells[idx] = HeapCell { owner, next };
        Some(idx)
    }

    fn release(&mut self, idx: usize) {
        self.cells[idx].next = self.free;
        self.free = idx;
    }
}

/// The directory of one L2 bank.
pub struct Directory {
    entries: Vec<DirEntry>,
    heap: SharerHeap,
    sets: usize,
}

impl Directory {
    /// Creates an empty directory for `ways` × `sets` lines with a heap
    /// of `heap_size` cells.
    pub fn new(ways: usize, sets: usize, heap_size: usize) -> Self {
        Self {
            entries: vec![DirEntry::default(); ways * sets],
            heap: SharerHeap::new(heap_size),
            sets,
        }
    }

    #[inline]
    fn slot(&self, way: usize, set: usize) -> usize {
        way * self.sets + set
    }

    /// The entry of one line.
    #[inline]
    pub fn entry(&self, way: usize, set: usize) -> DirEntry {
        self.entries[self.slot(way, set)]
    }

    /// Overwrites the state of one entry (used for ZOMBI transitions).
    pub fn set_state(&mut self, way: usize, set: usize, state: DirState) {
        let slot = self.slot(way, set);
        self.entries[slot].state = state;
    }

    /// Adds a copy. Idempotent for an already-registered owner. Returns
    /// `false` if the heap is exhausted.
    pub fn add_sharer(&mut self, way: usize, set: usize, owner: Owner) -> bool {
        let slot = self.slot(way, set);
        let entry = self.entries[slot];
        match entry.state {
            DirState::Empty => {
                self.entries[slot] = DirEntry {
                    state: DirState::ValidExclusive,
                    count: 1,
                    owner,
                    ptr: HEAP_NIL,
                };
                true
            }
            DirState::ValidExclusive => {
                if entry.owner == owner {
                    return true;
                }
                // grow to a two-element heap list
                let Some(second) = self.heap.alloc(owner, HEAP_NIL) else {
                    return false;
                };
                let Some(first) = self.heap.alloc(entry.owner, second) else {
                    self.heap.release(second);
                    return false;
                };
                self.entries[slot] = DirEntry {
                    state: DirState::Valid,
                    count: 2,
                    owner: entry.owner,
                    ptr: first,
                };
                true
            }
            DirState::Valid => {
                if self.contains(way, set, owner) {
                    return true;
                }
                let Some(cell) = self.heap.alloc(owner, entry.ptr) else {
                    return false;
                };
                self.entries[slot].ptr = cell;
                self.entries[slot].count += 1;
                true
            }
            // no new copies while an eviction is in flight
            DirState::Zombi => false,
        }
    }

    /// Removes a copy. Returns `false` if the owner was not registered.
    pub fn remove_sharer(&mut self, way: usize, set: usize, owner: Owner) -> bool {
        let slot = self.slot(way, set);
        let entry = self.entries[slot];
        match entry.count {
            0 => false,
            1 => {
                let registered = if entry.ptr == HEAP_NIL {
                    entry.owner
                } else {
                    self.heap.cells[entry.ptr].owner
                };
                if registered != owner {
                    return false;
                }
                if entry.ptr != HEAP_NIL {
                    self.heap.release(entry.ptr);
                }
                let state = if entry.state == DirState::Zombi {
                    DirState::Zombi
                } else {
                    DirState::Empty
                };
                self.entries[slot] = DirEntry {
                    state,
                    ..DirEntry::default()
                };
                true
            }
            _ => {
                // unlink from the heap list
                let mut prev = HEAP_NIL;
                let mut cur = entry.ptr;
                while cur != HEAP_NIL {
                    if self.heap.cells[cur].owner == owner {
                        let next = self.heap.cells[cur].next;
                        if prev == HEAP_NIL {
                            self.entries[slot].ptr = next;
                        } else {
                            self.heap.cells[prev].next = next;
                        }
                        self.heap.release(cur);
                        self.entries[slot].count -= 1;
                        if self.entries[slot].count == 1
                            && self.entries[slot].state == DirState::Valid
                        {
                            // collapse back to a single registered owner
                            let head = self.entries[slot].ptr;
                            self.entries[slot].owner = self.heap.cells[head].owner;
                            self.heap.release(head);
                            self.entries[slot].ptr = HEAP_NIL;
                            self.entries[slot].state = DirState::ValidExclusive;
                        }
                        return true;
                    }
                    prev = cur;
                    cur = self.heap.cells[cur].next;
                }
                false
            }
        }
    }

    /// `true` if `owner` holds a copy of the line.
    pub fn contains(&self, way: usize, set: usize, owner: Owner) -> bool {
        let entry = self.entries[self.slot(way, set)];
        match entry.count {
            0 => false,
            1 => {
                if entry.ptr == HEAP_NIL {
                    entry.owner == owner
                } else {
                    self.heap.cells[entry.ptr].owner == owner
                }
            }
            _ => {
                let mut cur = entry.ptr;
                while cur != HEAP_NIL {
                    if self.heap.cells[cur].owner == owner {
                        return true;
                    }
                    cur = self.heap.cells[cur].next;
                }
                false
            }
        }
    }

    /// All registered copies of the line.
    pub fn sharers(&self, way: usize, set: usize) -> Vec<Owner> {
        let entry = self.entries[self.slot(way, set)];
        match entry.count {
            0 => Vec::new(),
            1 if entry.ptr == HEAP_NIL => vec![entry.owner],
            _ => {
                let mut out = Vec::with_capacity(entry.count);
                let mut cur = entry.ptr;
                while cur != HEAP_NIL {
                    out.push(self.heap.cells[cur].owner);
                    cur = self.heap.cells[cur].next;
                }
                out
            }
        }
    }
}

/// The data storage of one L2 bank: tags, line data, dirty bits.
pub struct L2Storage {
    ways: usize,
    sets: usize,
    words: usize,
    tags: Vec<u64>,
    valid: Vec<bool>,
    dirty: Vec<bool>,
    data: Vec<u32>,
    age: Vec<u64>,
    tick: u64,
}

impl L2Storage {
    /// Creates empty storage of `ways` × `sets` lines of `words` words.
    pub fn new(ways: usize, sets: usize, words: usize) -> Self {
        Self {
            ways,
            sets,
            words,
            tags: vec![0; ways * sets],
            valid: vec![false; ways * sets],
            dirty: vec![false; ways * sets],
            data: vec![0; ways * sets * words],
            age: vec![0; ways * sets],
            tick: 0,
        }
    }

    /// Words per line.
    #[inline]
    pub const fn words(&self) -> usize {
        self.words
    }

    /// Associativity.
    #[inline]
    pub const fn ways(&self) -> usize {
        self.ways
    }

    #[inline]
    fn slot(&self, way: usize, set: usize) -> usize {
        way * self.sets + set
    }

    /// Set index of a line number.
    #[inline]
    pub fn set_of(&self, nline: NLine) -> usize {
        (nline.val() as usize) & (self.sets - 1)
    }

    fn tag_of(&self, nline: NLine) -> u64 {
        nline.val() / (self.sets as u64)
    }

    /// Finds a resident line.
    pub fn lookup(&mut self, nline: NLine) -> Option<(usize, usize)> {
        let set = self.set_of(nline);
        let tag = self.tag_of(nline);
        for way in 0..self.ways {
            let slot = self.slot(way, set);
            if self.valid[slot] && self.tags[slot] == tag {
                self.tick += 1;
                self.age[slot] = self.tick;
                return Some((way, set));
            }
        }
        None
    }

    /// Least-recently-used way of a set among `candidates` (a way is a
    /// candidate when its directory entry is not in transition).
    pub fn select_victim(&self, set: usize, selectable: impl Fn(usize) -> bool) -> Option<usize> {
        for way in 0..self.ways {
            if !self.valid[self.slot(way, set)] && selectable(way) {
                return Some(way);
            }
        }
        let mut best: Option<(usize, u64)> = None;
        for way in 0..self.ways {
            if selectable(way) {
                let age = self.age[self.slot(way, set)];
                if best.is_none_or(|(_, b)| age < b) {
                    best = Some((way, age));
                }
            }
        }
        best.map(|(way, _)| way)
    }

    /// `true` when the slot holds a valid line.
    #[inline]
    pub fn is_valid(&self, way: usize, set: usize) -> bool {
        self.valid[self.slot(way, set)]
    }

    /// `true` when the slot's line was modified since its fill.
    #[inline]
    pub fn is_dirty(&self, way: usize, set: usize) -> bool {
        self.dirty[self.slot(way, set)]
    }

    /// Line number held by a slot.
    pub fn slot_nline(&self, way: usize, set: usize) -> NLine {
        NLine(self.tags[self.slot(way, set)] * (self.sets as u64) + set as u64)
    }

    /// Installs a clean line in a slot.
    pub fn install(&mut self, way: usize, set: usize, nline: NLine, data: &[u32]) {
        let slot = self.slot(way, set);
        self.tags[slot] = self.tag_of(nline);
        self.valid[slot] = true;
        self.dirty[slot] = false;
        self.tick += 1;
        self.age[slot] = self.tick;
        self.data[slot * self.words..(slot + 1) * self.words].copy_from_slice(data);
    }

    /// Drops a line from the storage.
    pub fn invalidate(&mut self, way: usize, set: usize) {
        let slot = self.slot(way, set);
        self.valid[slot] = false;
        self.dirty[slot] = false;
    }

    /// Reads one word.
    #[inline]
    pub fn read_word(&self, way: usize, set: usize, word: usize) -> u32 {
        self.data[self.slot(way, set) * self.words + word]
    }

    /// Copies a whole line out.
    pub fn read_line(&self, way: usize, set: usize) -> Vec<u32> {
        let slot = self.slot(way, set);
        self.data[slot * self.words..(slot + 1) * self.words].to_vec()
    }

    /// Writes one word under byte enables and marks the line dirty.
    pub fn write_word(&mut self, way: usize, set: usize, word: usize, wdata: u32, be: u8) {
        let slot = self.slot(way, set);
        let idx = slot * self.words + word;
        let mut value = self.data[idx];
        for byte in 0..4 {
            if be & (1 << byte) != 0 {
                let mask = 0xFFu32 << (byte * 8);
                value = (value & !mask) | (wdata & mask);
            }
        }
        self.data[idx] = value;
        self.dirty[slot] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(id: u32) -> Owner {
        Owner {
            cc_id: CcId(id),
            inst: false,
        }
    }

    #[test]
    fn first_copy_is_exclusive() {
        let mut dir = Directory::new(2, 4, 16);
        assert!(dir.add_sharer(0, 0, owner(1)));
        let e = dir.entry(0, 0);
        assert_eq!(e.state, DirState::ValidExclusive);
        assert_eq!(e.count, 1);
        assert!(dir.contains(0, 0, owner(1)));
    }

    #[test]
    fn sharer_list_grows_and_collapses() {
        let mut dir = Directory::new(2, 4, 16);
        for id in 1..=3 {
            assert!(dir.add_sharer(0, 0, owner(id)));
        }
        let e = dir.entry(0, 0);
        assert_eq!(e.state, DirState::Valid);
        assert_eq!(e.count, 3);
        assert_eq!(dir.sharers(0, 0).len(), 3);

        assert!(dir.remove_sharer(0, 0, owner(2)));
        assert_eq!(dir.entry(0, 0).count, 2);
        assert!(dir.remove_sharer(0, 0, owner(1)));
        let e = dir.entry(0, 0);
        assert_eq!(e.state, DirState::ValidExclusive);
        assert_eq!(e.count, 1);
        assert!(dir.contains(0, 0, owner(3)));

        assert!(dir.remove_sharer(0, 0, owner(3)));
        assert_eq!(dir.entry(0, 0).state, DirState::Empty);
    }

    #[test]
    fn add_is_idempotent_per_owner() {
        let mut dir = Directory::new(2, 4, 16);
        assert!(dir.add_sharer(0, 0, owner(1)));
        assert!(dir.add_sharer(0, 0, owner(1)));
        assert_eq!(dir.entry(0, 0).count, 1);
    }

    #[test]
    fn inst_and_data_copies_are_distinct() {
        let mut dir = Directory::new(2, 4, 16);
        let data = owner(1);
        let inst = Owner {
            cc_id: CcId(1),
            inst: true,
        };
        assert!(dir.add_sharer(0, 0, data));
        assert!(dir.add_sharer(0, 0, inst));
        assert_eq!(dir.entry(0, 0).count, 2);
        assert!(dir.remove_sharer(0, 0, inst));
        assert!(dir.contains(0, 0, data));
    }

    #[test]
    fn zombi_refuses_new_sharers_and_survives_drain() {
        let mut dir = Directory::new(2, 4, 16);
        assert!(dir.add_sharer(0, 0, owner(1)));
        dir.set_state(0, 0, DirState::Zombi);
        assert!(!dir.add_sharer(0, 0, owner(2)));
        assert!(dir.remove_sharer(0, 0, owner(1)));
        // the entry stays ZOMBI until the eviction engine releases it
        assert_eq!(dir.entry(0, 0).state, DirState::Zombi);
        assert_eq!(dir.entry(0, 0).count, 0);
    }

    #[test]
    fn heap_exhaustion_is_reported() {
        let mut dir = Directory::new(1, 1, 2);
        assert!(dir.add_sharer(0, 0, owner(1)));
        assert!(dir.add_sharer(0, 0, owner(2))); // uses both cells
        assert!(!dir.add_sharer(0, 0, owner(3)));
    }

    #[test]
    fn storage_victim_prefers_invalid_ways() {
        let mut st = L2Storage::new(2, 4, 4);
        st.install(0, 1, NLine(1), &[1, 2, 3, 4]);
        assert_eq!(st.select_victim(1, |_| true), Some(1));
        st.install(1, 1, NLine(5), &[5, 6, 7, 8]);
        let _ = st.lookup(NLine(5));
        // way 0 is now least recently used
        assert_eq!(st.select_victim(1, |_| true), Some(0));
    }
}
