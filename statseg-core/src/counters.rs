// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::cell::Cell;
use std::mem::size_of;

use crate::directory::{Directory, EntryKind};
use crate::error::StatSegError;
use crate::heap::SegmentHeap;

/// Rows (per worker thread) are aligned to a cache line so that one thread's hot-path writes
/// never share a line with another thread's.
pub const CACHE_LINE_SIZE: usize = 64;

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// A per-thread array of plain 64-bit counters, indexed `[thread][object]`.
///
/// Growth is monotonic in both dimensions and never shrinks. Because growing either dimension
/// changes the row stride, a grow reallocates the whole matrix from the segment heap and copies
/// every existing row across; the old block is abandoned, the same tradeoff
/// [`crate::directory::Directory`] makes when its own vector grows, since the segment heap never
/// frees.
pub struct CounterVectorSimple<'seg> {
    heap: &'seg SegmentHeap,
    offset: Cell<usize>,
    threads: Cell<usize>,
    objects: Cell<usize>,
    stride: Cell<usize>,
}

impl<'seg> CounterVectorSimple<'seg> {
    pub fn new(heap: &'seg SegmentHeap) -> Self {
        CounterVectorSimple {
            heap,
            offset: Cell::new(0),
            threads: Cell::new(0),
            objects: Cell::new(0),
            stride: Cell::new(0),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads.get()
    }

    pub fn objects(&self) -> usize {
        self.objects.get()
    }

    pub fn heap_offset(&self) -> u64 {
        self.offset.get() as u64
    }

    /// Grow the matrix, if needed, so it has room for at least `threads` rows of `objects`
    /// columns each. A no-op if the current capacity already covers the request.
    pub fn ensure_capacity(&self, threads: usize, objects: usize) {
        if threads <= self.threads.get() && objects <= self.objects.get() {
            return;
        }
        let new_threads = threads.max(self.threads.get());
        let new_objects = objects.max(self.objects.get());
        let new_stride = align_up(new_objects * size_of::<u64>(), CACHE_LINE_SIZE);
        let new_offset = self
            .heap
            .alloc(new_stride * new_threads, CACHE_LINE_SIZE)
            .expect("segment heap exhausted while growing a simple counter vector");

        // SAFETY: `new_offset..new_offset + new_stride * new_threads` was just carved out of
        // `heap` and is not aliased; the old range (if any) is disjoint since the heap never
        // reuses freed space.
        unsafe {
            let dst = self.heap.ptr_at(new_offset);
            std::ptr::write_bytes(dst, 0, new_stride * new_threads);
            for t in 0..self.threads.get() {
                let src = self.heap.ptr_at(self.offset.get() + t * self.stride.get());
                let row_dst = dst.add(t * new_stride);
                std::ptr::copy_nonoverlapping(src, row_dst, self.objects.get() * size_of::<u64>());
            }
        }

        self.offset.set(new_offset);
        self.threads.set(new_threads);
        self.objects.set(new_objects);
        self.stride.set(new_stride);
    }

    fn cell_ptr(&self, thread: usize, object: usize) -> *mut u64 {
        assert!(thread < self.threads.get() && object < self.objects.get());
        // SAFETY: bounds checked above.
        unsafe {
            self.heap
                .ptr_at(self.offset.get() + thread * self.stride.get() + object * size_of::<u64>())
                as *mut u64
        }
    }

    /// Read the counter at `(thread, object)`. A `volatile` read: this vector is written by
    /// worker threads without any lock, so ordinary loads would let the compiler assume no
    /// concurrent writer.
    pub fn get(&self, thread: usize, object: usize) -> u64 {
        // SAFETY: `cell_ptr` asserts bounds and returns a pointer into live heap storage.
        unsafe { self.cell_ptr(thread, object).read_volatile() }
    }

    /// Write the counter at `(thread, object)` in place. Not synchronized with readers or other
    /// threads beyond what a volatile, naturally aligned `u64` write gives for free: torn-free
    /// per-counter, possibly inconsistent across counters, by design.
    pub fn set(&self, thread: usize, object: usize, value: u64) {
        // SAFETY: `cell_ptr` asserts bounds and returns a pointer into live heap storage.
        unsafe { self.cell_ptr(thread, object).write_volatile(value) };
    }

    pub fn increment(&self, thread: usize, object: usize, delta: u64) {
        self.set(thread, object, self.get(thread, object) + delta);
    }
}

/// A `{packets, bytes}` pair, the payload of [`CounterVectorCombined`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CombinedCounterValue {
    pub packets: u64,
    pub bytes: u64,
}

/// A per-thread array of `{packets, bytes}` pairs, indexed `[thread][object]`. Same growth
/// discipline as [`CounterVectorSimple`].
pub struct CounterVectorCombined<'seg> {
    heap: &'seg SegmentHeap,
    offset: Cell<usize>,
    threads: Cell<usize>,
    objects: Cell<usize>,
    stride: Cell<usize>,
}

impl<'seg> CounterVectorCombined<'seg> {
    pub fn new(heap: &'seg SegmentHeap) -> Self {
        CounterVectorCombined {
            heap,
            offset: Cell::new(0),
            threads: Cell::new(0),
            objects: Cell::new(0),
            stride: Cell::new(0),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads.get()
    }

    pub fn objects(&self) -> usize {
        self.objects.get()
    }

    pub fn heap_offset(&self) -> u64 {
        self.offset.get() as u64
    }

    pub fn ensure_capacity(&self, threads: usize, objects: usize) {
        if threads <= self.threads.get() && objects <= self.objects.get() {
            return;
        }
        let new_threads = threads.max(self.threads.get());
        let new_objects = objects.max(self.objects.get());
        let new_stride = align_up(new_objects * size_of::<CombinedCounterValue>(), CACHE_LINE_SIZE);
        let new_offset = self
            .heap
            .alloc(new_stride * new_threads, CACHE_LINE_SIZE)
            .expect("segment heap exhausted while growing a combined counter vector");

        // SAFETY: see `CounterVectorSimple::ensure_capacity`; the same argument applies here.
        unsafe {
            let dst = self.heap.ptr_at(new_offset);
            std::ptr::write_bytes(dst, 0, new_stride * new_threads);
            for t in 0..self.threads.get() {
                let src = self.heap.ptr_at(self.offset.get() + t * self.stride.get());
                let row_dst = dst.add(t * new_stride);
                std::ptr::copy_nonoverlapping(
                    src,
                    row_dst,
                    self.objects.get() * size_of::<CombinedCounterValue>(),
                );
            }
        }

        self.offset.set(new_offset);
        self.threads.set(new_threads);
        self.objects.set(new_objects);
        self.stride.set(new_stride);
    }

    fn cell_ptr(&self, thread: usize, object: usize) -> *mut CombinedCounterValue {
        assert!(thread < self.threads.get() && object < self.objects.get());
        // SAFETY: bounds checked above.
        unsafe {
            self.heap.ptr_at(
                self.offset.get()
                    + thread * self.stride.get()
                    + object * size_of::<CombinedCounterValue>(),
            ) as *mut CombinedCounterValue
        }
    }

    pub fn get(&self, thread: usize, object: usize) -> CombinedCounterValue {
        // SAFETY: `cell_ptr` asserts bounds; `CombinedCounterValue` is `Copy` and has no
        // validity invariants beyond being initialized, which `ensure_capacity` guarantees by
        // zeroing new storage.
        unsafe { self.cell_ptr(thread, object).read_volatile() }
    }

    pub fn set(&self, thread: usize, object: usize, value: CombinedCounterValue) {
        // SAFETY: see `get`.
        unsafe { self.cell_ptr(thread, object).write_volatile(value) };
    }

    pub fn increment(&self, thread: usize, object: usize, packets: u64, bytes: u64) {
        let current = self.get(thread, object);
        self.set(
            thread,
            object,
            CombinedCounterValue {
                packets: current.packets + packets,
                bytes: current.bytes + bytes,
            },
        );
    }
}

/// Which kind of counter storage a [`CounterMain`] owns.
pub enum CounterStorage<'seg> {
    Simple(CounterVectorSimple<'seg>),
    Combined(CounterVectorCombined<'seg>),
}

/// A dataplane-side structure owning raw counter storage for one family of metrics, published
/// into the segment by installing its storage offset as a directory entry's payload.
pub struct CounterMain<'seg> {
    storage: CounterStorage<'seg>,
    directory_index: Option<u32>,
}

impl<'seg> CounterMain<'seg> {
    pub fn new(storage: CounterStorage<'seg>) -> Self {
        CounterMain {
            storage,
            directory_index: None,
        }
    }

    pub fn storage(&self) -> &CounterStorage<'seg> {
        &self.storage
    }

    pub fn directory_index(&self) -> Option<u32> {
        self.directory_index
    }

    fn dims(&self) -> (u64, u32, u32) {
        match &self.storage {
            CounterStorage::Simple(s) => (s.heap_offset(), s.threads() as u32, s.objects() as u32),
            CounterStorage::Combined(c) => (c.heap_offset(), c.threads() as u32, c.objects() as u32),
        }
    }

    /// Create `name`'s directory entry and publish this counter main's storage offset and
    /// dimensions as its payload. Subsequent counter writes go straight to the storage and need
    /// no further segment-level coordination.
    pub fn publish(&mut self, directory: &mut Directory<'seg>, name: &str) -> Result<u32, StatSegError> {
        let kind = match &self.storage {
            CounterStorage::Simple(_) => EntryKind::CounterVectorSimple,
            CounterStorage::Combined(_) => EntryKind::CounterVectorCombined,
        };
        let (offset, threads, objects) = self.dims();
        let _txn = directory.transaction();
        let index = directory.new_entry(name, kind)?;
        directory.update_entry(index, |entry| entry.set_counter_vector(offset, threads, objects));
        self.directory_index = Some(index);
        Ok(index)
    }

    /// Re-publish this counter main's storage offset and dimensions after a capacity grow moved
    /// or widened the underlying matrix. A no-op if this counter main was never published.
    pub fn republish(&self, directory: &mut Directory<'seg>) {
        if let Some(index) = self.directory_index {
            let (offset, threads, objects) = self.dims();
            directory.update_entry(index, |entry| entry.set_counter_vector(offset, threads, objects));
        }
    }

    /// Tear down this counter main's directory entry, if published. Called when the dataplane
    /// structure owning the raw counters is itself being torn down.
    pub fn unpublish(&mut self, directory: &mut Directory<'seg>) {
        if let Some(index) = self.directory_index.take() {
            directory.delete(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing_heap(bytes: usize) -> (Box<[u8]>, ()) {
        (vec![0u8; bytes].into_boxed_slice(), ())
    }

    #[test]
    fn simple_counters_grow_without_losing_data() {
        let (mut backing, _) = backing_heap(64 * 1024);
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let counters = CounterVectorSimple::new(&heap);

        counters.ensure_capacity(2, 4);
        counters.set(0, 3, 42);
        counters.set(1, 0, 7);

        counters.ensure_capacity(4, 8);
        assert_eq!(counters.get(0, 3), 42);
        assert_eq!(counters.get(1, 0), 7);
        assert_eq!(counters.get(3, 7), 0);
    }

    #[test]
    fn combined_counters_increment_both_fields() {
        let (mut backing, _) = backing_heap(64 * 1024);
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let counters = CounterVectorCombined::new(&heap);
        counters.ensure_capacity(1, 1);

        counters.increment(0, 0, 10, 640);
        counters.increment(0, 0, 5, 320);
        let value = counters.get(0, 0);
        assert_eq!(value.packets, 15);
        assert_eq!(value.bytes, 960);
    }

    #[test]
    fn rows_are_cache_line_aligned() {
        let (mut backing, _) = backing_heap(64 * 1024);
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let counters = CounterVectorSimple::new(&heap);
        counters.ensure_capacity(3, 1);
        assert_eq!(counters.stride.get() % CACHE_LINE_SIZE, 0);
    }
}
