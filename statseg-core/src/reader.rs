// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;
use std::num::NonZeroUsize;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::counters::{align_up, CombinedCounterValue, CACHE_LINE_SIZE};
use crate::directory::DirectoryEntry;
use crate::error::StatSegError;
use crate::header::ShmHeader;

/// Reader for a statseg shared memory segment, mapped read-only from a file descriptor received
/// over the handoff socket.
///
/// There is no writer lock a reader can take: the segment is updated by a single producer while
/// being read by arbitrarily many consumer processes with no synchronization primitive shared
/// between them. Consistency instead relies on the epoch/in-progress protocol in
/// [`crate::epoch`]: `snapshot_directory` re-reads until it observes a read that started and
/// ended on the same completed epoch with no write in flight.
pub struct ShmReader {
    base: *const u8,
    size: usize,
}

// SAFETY: `ShmReader` only ever hands out copies read through volatile loads from a read-only
// mapping; it holds no interior mutable cache, so sharing it across threads (or sending it to
// another) is sound.
unsafe impl Send for ShmReader {}
unsafe impl Sync for ShmReader {}

impl ShmReader {
    /// Map `fd` read-only. Takes ownership of `fd`: it is consumed (read to validate the header,
    /// then closed) since `mmap` does not need the descriptor kept open past the call.
    pub fn from_fd(fd: RawFd) -> Result<Self, StatSegError> {
        let header = ShmHeader::read(fd)?;
        let size = header.segsize.load(Ordering::Relaxed) as usize;

        // SAFETY: `fd` names a memfd created and sized by `Segment::create`; `size` was just
        // validated against the header read from the same descriptor.
        let base = unsafe {
            mmap(
                None,
                NonZeroUsize::new(size).ok_or(StatSegError::SegmentMalformed)?,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
            .map_err(|_| StatSegError::Syscall(errno::errno(), "mmap"))?
        } as *const u8;

        // SAFETY: `fd` is not retained past this point; the mapping stays valid independently.
        unsafe {
            let _ = nix::unistd::close(fd);
        }

        Ok(ShmReader { base, size })
    }

    /// Borrow the header at the base of the mapping.
    pub fn header(&self) -> &ShmHeader {
        // SAFETY: `self.base` was validated by `ShmHeader::read` in `from_fd` and stays mapped
        // for the lifetime of `self`.
        unsafe { &*(self.base as *const ShmHeader) }
    }

    /// Address the writer has this segment mapped at in its own process. Segment-internal
    /// references are always stored as offsets from this address rather than raw pointers; this
    /// accessor exists for callers that need to report or log the writer's view alongside the
    /// reader's own, never to dereference across processes.
    pub fn writer_base(&self) -> u64 {
        self.header().base.load(Ordering::Acquire)
    }

    fn heap_base(&self) -> *const u8 {
        // SAFETY: the heap starts exactly one page past the header, the same convention
        // `Segment::build_heap` uses on the writer side.
        unsafe { self.base.add(page_size()) }
    }

    // SAFETY: caller guarantees `offset .. offset + len * size_of::<DirectoryEntry>()` lies
    // within the mapped heap region; satisfied by construction since `offset`/`len` are read
    // fresh from the header immediately before this is called.
    unsafe fn read_entries(&self, offset: usize, len: usize) -> Vec<DirectoryEntry> {
        let base = self.heap_base().add(offset) as *const DirectoryEntry;
        (0..len).map(|i| base.add(i).read_volatile()).collect()
    }

    /// Read a consistent snapshot of the directory vector: read the epoch, confirm no write is
    /// in flight, read the entries, then confirm the epoch has not moved and no write is in
    /// flight. Retries on a torn read; gives up after a large, fixed number of attempts so a
    /// writer that died mid-update cannot hang a reader forever.
    pub fn snapshot_directory(&self) -> Result<Vec<DirectoryEntry>, StatSegError> {
        let header = self.header();
        let mut retries = 1_000_000;
        loop {
            let e0 = header.epoch.load(Ordering::Acquire);
            if header.in_progress.load(Ordering::Acquire) == 0 {
                let offset = header.directory_vector.load(Ordering::Acquire) as usize;
                let len = header.directory_len.load(Ordering::Acquire) as usize;
                // SAFETY: `offset`/`len` were just read from the live header.
                let entries = unsafe { self.read_entries(offset, len) };
                let e1 = header.epoch.load(Ordering::Acquire);
                if e1 == e0 && header.in_progress.load(Ordering::Acquire) == 0 {
                    return Ok(entries);
                }
            }
            retries -= 1;
            if retries == 0 {
                return Err(StatSegError::SegmentMalformed);
            }
        }
    }

    /// Look up a directory entry by name in a fresh snapshot.
    pub fn lookup(&self, name: &str) -> Result<DirectoryEntry, StatSegError> {
        self.snapshot_directory()?
            .into_iter()
            .find(|entry| entry.name() == name)
            .ok_or_else(|| StatSegError::NotFound(name.to_string()))
    }

    /// Decode one cell of a `CounterVectorSimple` entry.
    pub fn counter_simple(&self, entry: &DirectoryEntry, thread: usize, object: usize) -> u64 {
        let (offset, threads, objects) = entry.counter_vector();
        assert!(thread < threads as usize && object < objects as usize);
        let stride = align_up(objects as usize * size_of::<u64>(), CACHE_LINE_SIZE);
        // SAFETY: bounds asserted above; `offset`/`stride` describe a live counter matrix
        // published by `CounterMain::publish`/`republish`.
        unsafe {
            let ptr = self
                .heap_base()
                .add(offset as usize + thread * stride + object * size_of::<u64>())
                as *const u64;
            ptr.read_volatile()
        }
    }

    /// Decode one cell of a `CounterVectorCombined` entry.
    pub fn counter_combined(
        &self,
        entry: &DirectoryEntry,
        thread: usize,
        object: usize,
    ) -> CombinedCounterValue {
        let (offset, threads, objects) = entry.counter_vector();
        assert!(thread < threads as usize && object < objects as usize);
        let stride = align_up(objects as usize * size_of::<CombinedCounterValue>(), CACHE_LINE_SIZE);
        // SAFETY: see `counter_simple`.
        unsafe {
            let ptr = self
                .heap_base()
                .add(offset as usize + thread * stride + object * size_of::<CombinedCounterValue>())
                as *const CombinedCounterValue;
            ptr.read_volatile()
        }
    }

    /// Decode one slot of a `NameVector` entry.
    pub fn name_vector_entry(&self, entry: &DirectoryEntry, object: usize) -> String {
        use crate::namevec::NAME_SLOT_LEN;
        let (offset, len) = entry.name_vector();
        assert!(object < len as usize, "name vector index out of range");
        // SAFETY: `offset`/`len` come from a published `NameVector` entry; `object` is checked.
        unsafe {
            let ptr = self.heap_base().add(offset as usize + object * NAME_SLOT_LEN);
            let bytes = std::slice::from_raw_parts(ptr, NAME_SLOT_LEN);
            let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..nul]).into_owned()
        }
    }
}

impl Drop for ShmReader {
    fn drop(&mut self) {
        // SAFETY: `self.base`/`self.size` describe exactly the mapping created in `from_fd`.
        unsafe {
            let _ = munmap(self.base as *mut std::ffi::c_void, self.size);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: `sysconf(_SC_PAGESIZE)` has no preconditions.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        4096
    } else {
        ret as usize
    }
}
