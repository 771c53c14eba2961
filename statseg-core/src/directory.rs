// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::CString;
use std::mem::size_of;
use std::sync::atomic::Ordering;

use crate::epoch::{EpochLock, WriterTxn};
use crate::error::StatSegError;
use crate::header::ShmHeader;
use crate::heap::SegmentHeap;

/// Bound on a directory entry's name, including the NUL terminator. An ABI constant: raising it
/// is a `version` bump, not a patch.
pub const MAX_NAME_LEN: usize = 128;

/// The type tag of a directory entry's payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Empty = 0,
    ScalarIndex = 1,
    CounterVectorSimple = 2,
    CounterVectorCombined = 3,
    ErrorIndex = 4,
    NameVector = 5,
    Symlink = 6,
}

/// A fixed-size record describing one exported metric.
///
/// The payload is a fixed `[u8; 16]` byte array with typed accessors rather than a C union: a
/// real union would require every read to be unsafe and defeats the point of giving callers a
/// typed view. 16 bytes covers the largest variant (two `u32` indices, a `u64` scalar, or a
/// `u64` segment-heap offset) with room to grow.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirectoryEntry {
    name: [u8; MAX_NAME_LEN],
    kind: EntryKind,
    payload: [u8; 16],
}

impl DirectoryEntry {
    fn empty() -> Self {
        DirectoryEntry {
            name: [0u8; MAX_NAME_LEN],
            kind: EntryKind::Empty,
            payload: [0u8; 16],
        }
    }

    fn set_name(&mut self, name: &str) {
        assert!(
            name.len() < MAX_NAME_LEN,
            "entry name exceeds the {MAX_NAME_LEN}-byte ABI limit"
        );
        self.name = [0u8; MAX_NAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn name(&self) -> &str {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..nul]).unwrap_or("")
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Value of a `ScalarIndex` entry.
    pub fn scalar(&self) -> u64 {
        u64::from_ne_bytes(self.payload[0..8].try_into().unwrap())
    }

    pub fn set_scalar(&mut self, value: u64) {
        self.payload[0..8].copy_from_slice(&value.to_ne_bytes());
    }

    /// Floating-point view of a `ScalarIndex` entry's payload. VPP's own `.value` field is a
    /// plain `f64`; most of this crate's scalars (heartbeat, thread counts) are integral and read
    /// just as well through [`DirectoryEntry::scalar`], but rate/timestamp gauges (`input_rate`,
    /// `last_update`, `last_stats_clear`) need the fractional part, so both views are exposed over
    /// the same 8 bytes.
    pub fn scalar_f64(&self) -> f64 {
        f64::from_bits(self.scalar())
    }

    pub fn set_scalar_f64(&mut self, value: f64) {
        self.set_scalar(value.to_bits());
    }

    /// Byte offset into the segment heap where a vector entry's storage begins.
    pub fn heap_offset(&self) -> u64 {
        u64::from_ne_bytes(self.payload[0..8].try_into().unwrap())
    }

    pub fn set_heap_offset(&mut self, offset: u64) {
        self.payload[0..8].copy_from_slice(&offset.to_ne_bytes());
    }

    /// `(index1, index2)` of a `Symlink` entry: the target entry and a sub-element within it.
    pub fn symlink_target(&self) -> (u32, u32) {
        let index1 = u32::from_ne_bytes(self.payload[0..4].try_into().unwrap());
        let index2 = u32::from_ne_bytes(self.payload[4..8].try_into().unwrap());
        (index1, index2)
    }

    pub fn set_symlink_target(&mut self, index1: u32, index2: u32) {
        self.payload[0..4].copy_from_slice(&index1.to_ne_bytes());
        self.payload[4..8].copy_from_slice(&index2.to_ne_bytes());
    }

    /// `(heap_offset, threads, objects)` of a `CounterVectorSimple`/`CounterVectorCombined`
    /// entry. The dimensions travel with the entry, not just the storage offset, so a reader
    /// mapping the segment fd can decode the matrix without a side channel.
    pub fn counter_vector(&self) -> (u64, u32, u32) {
        let offset = u64::from_ne_bytes(self.payload[0..8].try_into().unwrap());
        let threads = u32::from_ne_bytes(self.payload[8..12].try_into().unwrap());
        let objects = u32::from_ne_bytes(self.payload[12..16].try_into().unwrap());
        (offset, threads, objects)
    }

    pub fn set_counter_vector(&mut self, offset: u64, threads: u32, objects: u32) {
        self.payload[0..8].copy_from_slice(&offset.to_ne_bytes());
        self.payload[8..12].copy_from_slice(&threads.to_ne_bytes());
        self.payload[12..16].copy_from_slice(&objects.to_ne_bytes());
    }

    /// `(heap_offset, len)` of a `NameVector` entry.
    pub fn name_vector(&self) -> (u64, u32) {
        let offset = u64::from_ne_bytes(self.payload[0..8].try_into().unwrap());
        let len = u32::from_ne_bytes(self.payload[8..12].try_into().unwrap());
        (offset, len)
    }

    pub fn set_name_vector(&mut self, offset: u64, len: u32) {
        self.payload[0..8].copy_from_slice(&offset.to_ne_bytes());
        self.payload[8..12].copy_from_slice(&len.to_ne_bytes());
    }

    /// Column index of an `ErrorIndex` entry within the shared per-thread error vector.
    pub fn error_index(&self) -> u32 {
        u32::from_ne_bytes(self.payload[0..4].try_into().unwrap())
    }

    pub fn set_error_index(&mut self, object_index: u32) {
        self.payload[0..4].copy_from_slice(&object_index.to_ne_bytes());
    }
}

impl std::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.name())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Construct the symlink name for a per-object counter, replacing interior slashes of the
/// borrowed object name with underscore so the result stays a single path segment per level,
/// e.g. `symlink_name("nodes", "ip4-input", "calls")` is `/nodes/ip4-input/calls`.
pub fn symlink_name(category: &str, object_name: &str, counter_class: &str) -> String {
    let sanitized = object_name.replace('/', "_");
    format!("/{category}/{sanitized}/{counter_class}")
}

/// String-indexed map from entry name to directory index, owned on the writer's private heap.
/// Never lives inside the mapped segment: its internal pointers would embed writer-local
/// addresses that mean nothing to a reader in another process.
pub type NameIndex = HashMap<CString, u32>;

/// The directory table: a self-describing vector of [`DirectoryEntry`] values stored inside the
/// segment heap, plus the name index that sits beside it.
pub struct Directory<'seg> {
    header: &'seg ShmHeader,
    heap: &'seg SegmentHeap,
    lock: EpochLock<'seg>,
    names: NameIndex,
    vector_offset: Cell<usize>,
    len: Cell<usize>,
    cap: Cell<usize>,
}

impl<'seg> Directory<'seg> {
    /// Create an empty directory with initial capacity `initial_cap` allocated from `heap`, and
    /// publish its location into `header`.
    pub fn new(header: &'seg ShmHeader, heap: &'seg SegmentHeap, initial_cap: usize) -> Self {
        let initial_cap = initial_cap.max(1);
        let offset = heap
            .alloc_array::<DirectoryEntry>(initial_cap)
            .expect("segment heap too small for the initial directory vector");
        // SAFETY: `offset` was just carved out of `heap` and is large enough for `initial_cap`
        // entries; no other reference to this range exists yet.
        unsafe {
            let base = heap.ptr_at(offset) as *mut DirectoryEntry;
            for i in 0..initial_cap {
                base.add(i).write(DirectoryEntry::empty());
            }
        }
        header.base.store(heap.base_addr(), Ordering::Relaxed);
        header
            .directory_vector
            .store(offset as u64, Ordering::Release);
        header.directory_len.store(0, Ordering::Release);

        Directory {
            header,
            heap,
            lock: EpochLock::new(header),
            names: NameIndex::new(),
            vector_offset: Cell::new(offset),
            len: Cell::new(0),
            cap: Cell::new(initial_cap),
        }
    }

    /// Begin a writer transaction spanning multiple directory operations, for callers (the
    /// Collector's per-tick resync) that need several mutations to become visible to readers as
    /// one atomic step.
    pub fn transaction(&self) -> WriterTxn<'seg> {
        self.lock.begin()
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry_ptr(&self, index: u32) -> *mut DirectoryEntry {
        let offset = self.vector_offset.get() + index as usize * size_of::<DirectoryEntry>();
        // SAFETY: callers of this private helper always pass an index `< self.cap.get()`.
        unsafe { self.heap.ptr_at(offset) as *mut DirectoryEntry }
    }

    /// Read a copy of the entry at `index`. Panics if `index` is out of bounds; directory
    /// indices are stable and never out of bounds once allocated.
    pub fn entry(&self, index: u32) -> DirectoryEntry {
        assert!((index as usize) < self.len.get(), "directory index out of range");
        // SAFETY: `index` is in bounds and no `&mut` alias into this slot is live: all mutation
        // goes through `&mut self` methods on `Directory`, which this shared borrow excludes.
        unsafe { *self.entry_ptr(index) }
    }

    pub fn lookup(&self, name: &str) -> Result<u32, StatSegError> {
        let key = CString::new(name).map_err(|_| StatSegError::NotFound(name.to_string()))?;
        self.names
            .get(&key)
            .copied()
            .ok_or_else(|| StatSegError::NotFound(name.to_string()))
    }

    fn grow(&mut self) {
        let new_cap = (self.cap.get() * 2).max(16);
        let new_offset = self
            .heap
            .alloc_array::<DirectoryEntry>(new_cap)
            .expect("segment heap exhausted while growing the directory vector");
        // SAFETY: `new_offset` is freshly carved out of the heap, large enough, and not aliased;
        // the source range `[vector_offset, vector_offset + len)` is disjoint from it because the
        // heap never reuses freed space.
        unsafe {
            let dst = self.heap.ptr_at(new_offset) as *mut DirectoryEntry;
            let src = self.entry_ptr(0);
            std::ptr::copy_nonoverlapping(src, dst, self.cap.get());
            for i in self.cap.get()..new_cap {
                dst.add(i).write(DirectoryEntry::empty());
            }
        }
        self.vector_offset.set(new_offset);
        self.cap.set(new_cap);
        // Reallocation moved the vector: republish before anything else can observe it.
        self.header
            .directory_vector
            .store(new_offset as u64, Ordering::Release);
    }

    /// Find the highest-indexed empty slot, scanning tail to head, or `None` if every allocated
    /// slot is occupied. VPP's `vec_foreach_index_backwards` scan: reusing the tombstone closest
    /// to the end of the vector makes it likelier that a later `grow` finds the vector already
    /// shrunk back to its live length.
    fn find_empty_slot(&self) -> Option<u32> {
        for index in (0..self.len.get()).rev() {
            // SAFETY: `index < self.len.get() <= self.cap.get()`.
            if unsafe { (*self.entry_ptr(index as u32)).kind } == EntryKind::Empty {
                return Some(index as u32);
            }
        }
        None
    }

    fn publish_at(&mut self, index: u32, entry: DirectoryEntry) {
        // SAFETY: `index < self.cap.get()`, established by callers.
        unsafe { self.entry_ptr(index).write(entry) };
        if index as usize >= self.len.get() {
            self.len.set(index as usize + 1);
            self.header
                .directory_len
                .store(self.len.get() as u32, Ordering::Release);
        }
    }

    fn allocate_slot(&mut self) -> u32 {
        if let Some(index) = self.find_empty_slot() {
            return index;
        }
        if self.len.get() == self.cap.get() {
            self.grow();
        }
        self.len.get() as u32
    }

    /// Register a new, empty-payload entry named `name`. Fails with `AlreadyExists` if the name
    /// is already live, or `ConfigError` if `name` contains an interior NUL byte (names reach
    /// here from externally supplied node/interface names, so this is a data error, not a
    /// programmer error, and must be validated before anything is published).
    pub fn new_entry(&mut self, name: &str, kind: EntryKind) -> Result<u32, StatSegError> {
        if self.lookup(name).is_ok() {
            return Err(StatSegError::AlreadyExists(name.to_string()));
        }
        let key = CString::new(name).map_err(|_| StatSegError::ConfigError(name.to_string()))?;

        let _txn = self.transaction();
        let index = self.allocate_slot();
        let mut entry = DirectoryEntry::empty();
        entry.set_name(name);
        entry.kind = kind;
        self.publish_at(index, entry);

        self.names.insert(key, index);
        Ok(index)
    }

    /// Remove the entry at `index` from the name index and mark its slot empty. The index
    /// remains allocated and may be reused by a future `new_entry`.
    pub fn delete(&mut self, index: u32) {
        let _txn = self.transaction();
        let name = self.entry(index).name().to_string();
        if let Ok(key) = CString::new(name) {
            self.names.remove(&key);
        }
        self.publish_at(index, DirectoryEntry::empty());
    }

    /// Rename the entry at `index`, moving the name index entry along with it. Fails with
    /// `ConfigError` if `new_name` contains an interior NUL byte; validated up front so a
    /// rejected rename leaves both the published entry and the name index untouched.
    pub fn rename(&mut self, index: u32, new_name: &str) -> Result<(), StatSegError> {
        let new_key = CString::new(new_name).map_err(|_| StatSegError::ConfigError(new_name.to_string()))?;

        let _txn = self.transaction();
        let mut entry = self.entry(index);
        let old_name = entry.name().to_string();
        if let Ok(old_key) = CString::new(old_name) {
            self.names.remove(&old_key);
        }
        entry.set_name(new_name);
        self.publish_at(index, entry);
        self.names.insert(new_key, index);
        Ok(())
    }

    /// Register a symlink entry aliasing `(index1, index2)` under `name`. A no-op, returning the
    /// existing index, if `name` already resolves. `want_lock` lets a caller that is already
    /// inside a [`Directory::transaction`] avoid nesting a second one. Fails with `ConfigError`
    /// if `name` contains an interior NUL byte, validated up front for the same reason as
    /// [`Directory::new_entry`]: `name` is built from externally supplied node/interface names.
    pub fn register_symlink(
        &mut self,
        name: &str,
        index1: u32,
        index2: u32,
        want_lock: bool,
    ) -> Result<u32, StatSegError> {
        if let Ok(existing) = self.lookup(name) {
            return Ok(existing);
        }
        let key = CString::new(name).map_err(|_| StatSegError::ConfigError(name.to_string()))?;
        debug_assert!(
            self.entry(index1).kind() != EntryKind::Symlink,
            "a symlink must never target another symlink"
        );
        let _txn = want_lock.then(|| self.transaction());
        let index = self.allocate_slot();
        let mut entry = DirectoryEntry::empty();
        entry.set_name(name);
        entry.kind = EntryKind::Symlink;
        entry.set_symlink_target(index1, index2);
        self.publish_at(index, entry);
        self.names.insert(key, index);
        Ok(index)
    }

    /// Overwrite the entry at `index` in place via `f`, preserving its name and name-index
    /// entry. Used to publish a counter storage offset after `new_entry`, and by provider
    /// callbacks updating a scalar's value each Collector tick. Does not open its own
    /// transaction: callers performing a single update may wrap it in one, and the Collector
    /// wraps an entire tick's worth of updates in one outer transaction instead.
    pub fn update_entry<F: FnOnce(&mut DirectoryEntry)>(&mut self, index: u32, f: F) {
        let mut entry = self.entry(index);
        f(&mut entry);
        // SAFETY: `index` is in bounds (checked by `self.entry`); `f` does not touch `name`, so
        // the name index stays consistent with the published entry.
        unsafe { self.entry_ptr(index).write(entry) };
    }

    /// Copy every non-empty entry under the writer lock, sorted by name, for a CLI-style
    /// renderer to consume.
    pub fn snapshot_sorted(&self) -> Vec<DirectoryEntry> {
        let _txn = self.transaction();
        let mut entries: Vec<DirectoryEntry> = (0..self.len.get() as u32)
            .map(|i| self.entry(i))
            .filter(|e| e.kind() != EntryKind::Empty)
            .collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    /// Publish the byte offset of the shared per-thread error counter vector into
    /// `shared_header.error_vector`.
    pub fn set_error_vector_offset(&self, offset: u64) {
        self.header.error_vector.store(offset, Ordering::Release);
    }

    /// Raw name→index pairs of the name index, sorted by name, for a `show statistics hash`
    /// style renderer.
    pub fn name_index_pairs(&self) -> Vec<(String, u32)> {
        let mut pairs: Vec<(String, u32)> = self
            .names
            .iter()
            .map(|(name, index)| (name.to_string_lossy().into_owned(), *index))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_heap_and_header() -> (Box<ShmHeader>, Box<[u8]>) {
        use crate::header::{SHM_MAGIC, SHM_VERSION};
        use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8};

        let header = Box::new(ShmHeader {
            magic: SHM_MAGIC,
            segsize: AtomicU32::new(0),
            version: AtomicU16::new(SHM_VERSION),
            epoch: AtomicU64::new(0),
            in_progress: AtomicU8::new(0),
            base: AtomicU64::new(0),
            directory_vector: AtomicU64::new(0),
            directory_len: AtomicU32::new(0),
            error_vector: AtomicU64::new(0),
        });
        let backing = vec![0u8; 64 * 1024].into_boxed_slice();
        (header, backing)
    }

    fn with_directory<F: FnOnce(&mut Directory)>(f: F) {
        let (header, mut backing) = new_heap_and_header();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut dir = Directory::new(&header, &heap, 4);
        f(&mut dir);
    }

    #[test]
    fn unique_names_enforced_on_registration() {
        with_directory(|dir| {
            let idx = dir.new_entry("x", EntryKind::ScalarIndex).unwrap();
            assert_eq!(idx, 0);
            let second = dir.new_entry("x", EntryKind::ScalarIndex);
            assert!(matches!(second, Err(StatSegError::AlreadyExists(_))));
        });
    }

    #[test]
    fn lookup_returns_stable_index_until_deleted() {
        with_directory(|dir| {
            let idx = dir.new_entry("/sys/heartbeat", EntryKind::ScalarIndex).unwrap();
            assert_eq!(dir.lookup("/sys/heartbeat").unwrap(), idx);
            dir.delete(idx);
            assert!(dir.lookup("/sys/heartbeat").is_err());
        });
    }

    #[test]
    fn epoch_strictly_increases_per_transaction() {
        with_directory(|dir| {
            let e0 = dir.transaction();
            drop(e0);
            let before = dir.header.epoch.load(Ordering::Acquire);
            dir.new_entry("a", EntryKind::ScalarIndex).unwrap();
            let after = dir.header.epoch.load(Ordering::Acquire);
            assert!(after > before);
        });
    }

    #[test]
    fn slot_reuse_picks_the_single_freed_index() {
        with_directory(|dir| {
            let a = dir.new_entry("A", EntryKind::ScalarIndex).unwrap();
            let b = dir.new_entry("B", EntryKind::ScalarIndex).unwrap();
            let _c = dir.new_entry("C", EntryKind::ScalarIndex).unwrap();
            dir.delete(b);
            let d = dir.new_entry("D", EntryKind::ScalarIndex).unwrap();
            assert_eq!(d, b);
            assert_eq!(dir.lookup("D").unwrap(), b);
            assert!(dir.lookup("B").is_err());
            assert_ne!(a, d);
        });
    }

    #[test]
    fn slot_reuse_picks_the_highest_freed_index_when_several_are_free() {
        with_directory(|dir| {
            let _a = dir.new_entry("A", EntryKind::ScalarIndex).unwrap();
            let b = dir.new_entry("B", EntryKind::ScalarIndex).unwrap();
            let _c = dir.new_entry("C", EntryKind::ScalarIndex).unwrap();
            let d = dir.new_entry("D", EntryKind::ScalarIndex).unwrap();
            dir.delete(b);
            dir.delete(d);
            let e = dir.new_entry("E", EntryKind::ScalarIndex).unwrap();
            assert_eq!(e, d, "the highest-indexed tombstone (D) should be reused before B");
            assert_eq!(dir.lookup("E").unwrap(), d);
            assert!(dir.lookup("B").is_err());
        });
    }

    #[test]
    fn slot_reuse_extends_vector_when_nothing_free() {
        with_directory(|dir| {
            dir.new_entry("A", EntryKind::ScalarIndex).unwrap();
            dir.new_entry("B", EntryKind::ScalarIndex).unwrap();
            dir.new_entry("C", EntryKind::ScalarIndex).unwrap();
            let d = dir.new_entry("D", EntryKind::ScalarIndex).unwrap();
            assert_eq!(d, 3);
            assert_eq!(dir.len(), 4);
        });
    }

    #[test]
    fn rename_moves_name_index_entry_and_preserves_index() {
        with_directory(|dir| {
            let idx = dir.new_entry("/nodes/ip4-input/calls", EntryKind::Symlink).unwrap();
            dir.rename(idx, "/nodes/ip4-input-rx/calls").unwrap();
            assert!(dir.lookup("/nodes/ip4-input/calls").is_err());
            assert_eq!(dir.lookup("/nodes/ip4-input-rx/calls").unwrap(), idx);
        });
    }

    #[test]
    fn register_symlink_is_noop_when_name_exists() {
        with_directory(|dir| {
            let target = dir.new_entry("/nodes/ip4-input", EntryKind::ScalarIndex).unwrap();
            let first = dir
                .register_symlink("/nodes/ip4-input/calls", target, 0, true)
                .unwrap();
            let second = dir
                .register_symlink("/nodes/ip4-input/calls", target, 0, true)
                .unwrap();
            assert_eq!(first, second);
        });
    }

    #[test]
    fn symlink_names_sanitize_interior_slashes() {
        assert_eq!(
            symlink_name("nodes", "ip4-input", "calls"),
            "/nodes/ip4-input/calls"
        );
        assert_eq!(
            symlink_name("nodes", "tap0/1", "drops"),
            "/nodes/tap0_1/drops"
        );
    }

    #[test]
    fn duplicate_registration_leaves_directory_unchanged() {
        with_directory(|dir| {
            let idx = dir.new_entry("x", EntryKind::ScalarIndex).unwrap();
            assert_eq!(idx, 0);
            assert!(dir.new_entry("x", EntryKind::ScalarIndex).is_err());
            assert_eq!(dir.len(), 1);
        });
    }

    #[test]
    fn new_entry_rejects_interior_nul_without_mutating_the_directory() {
        with_directory(|dir| {
            let name = "bad\0name";
            let result = dir.new_entry(name, EntryKind::ScalarIndex);
            assert!(matches!(result, Err(StatSegError::ConfigError(_))));
            assert_eq!(dir.len(), 0);
            assert!(dir.lookup(name).is_err());
        });
    }

    #[test]
    fn rename_rejects_interior_nul_leaving_the_old_name_resolvable() {
        with_directory(|dir| {
            let idx = dir.new_entry("old-name", EntryKind::ScalarIndex).unwrap();
            let result = dir.rename(idx, "bad\0name");
            assert!(matches!(result, Err(StatSegError::ConfigError(_))));
            assert_eq!(dir.lookup("old-name").unwrap(), idx);
        });
    }

    #[test]
    fn snapshot_sorted_excludes_empty_slots_and_is_ordered() {
        with_directory(|dir| {
            let b = dir.new_entry("b", EntryKind::ScalarIndex).unwrap();
            dir.new_entry("a", EntryKind::ScalarIndex).unwrap();
            dir.new_entry("c", EntryKind::ScalarIndex).unwrap();
            dir.delete(b);
            let snapshot = dir.snapshot_sorted();
            let names: Vec<&str> = snapshot.iter().map(|e| e.name()).collect();
            assert_eq!(names, vec!["a", "c"]);
        });
    }

    #[test]
    fn name_index_pairs_mirrors_live_entries() {
        with_directory(|dir| {
            dir.new_entry("b", EntryKind::ScalarIndex).unwrap();
            dir.new_entry("a", EntryKind::ScalarIndex).unwrap();
            let pairs = dir.name_index_pairs();
            let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["a", "b"]);
        });
    }
}
