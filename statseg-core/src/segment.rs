// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! The segment allocator: an anonymous, `memfd`-backed shared memory object that owns the
//! header, directory vector and heap a [`crate::directory::Directory`] is built on.
//!
//! Anonymous rather than named-file backed: the segment is handed to readers by passing its file
//! descriptor over the handoff socket, never by path, and it must not survive on disk once the
//! writer exits.

use std::mem::size_of;
use std::num::NonZeroUsize;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8};

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::unistd::ftruncate;

use crate::directory::Directory;
use crate::error::StatSegError;
use crate::header::{ShmHeader, SHM_MAGIC, SHM_VERSION};
use crate::heap::SegmentHeap;
use crate::syserror;

/// Default segment size, matching VPP's default stats segment size.
pub const DEFAULT_SEGMENT_SIZE: usize = 32 * 1024 * 1024;

/// Directory vector capacity a freshly created segment reserves room for before its first grow.
const INITIAL_DIRECTORY_CAPACITY: usize = 128;

/// Owns the mapped shared memory region backing one statseg segment: the anonymous file
/// descriptor, the mapping, and the header at its base.
///
/// Deliberately does not also own a `Directory<'_>` alongside these fields: a `Directory`
/// borrows `&'seg ShmHeader`/`&'seg SegmentHeap` out of this struct, and nesting both as sibling
/// fields of one struct would make that struct self-referential (moving it would invalidate the
/// borrow). The enclosing runtime instead holds a `Segment` and constructs its `Directory` as a
/// sibling local or field, borrowing from it.
pub struct Segment {
    fd: RawFd,
    base: *mut u8,
    size: usize,
}

// SAFETY: `Segment` hands out shared access to a single mapped region; it is moved between
// threads whole (never aliased while moving) by the `std::thread::scope` construction the
// statsegd binary uses to run the Collector alongside the handoff listener.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a new anonymous segment of `size` bytes, initialize its header, and reserve an
    /// empty directory vector and heap.
    pub fn create(name: &str, size: usize) -> Result<Self, StatSegError> {
        let size = size.max(page_size() * 2);
        let fd = memfd_create(name, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|_| syserror_now("memfd_create"))?;
        ftruncate(fd, size as i64).map_err(|_| syserror_now("ftruncate"))?;

        // SAFETY: `fd` was just created with `size` bytes reserved by `ftruncate`, and no other
        // mapping of it exists yet.
        let base = unsafe {
            mmap(
                None,
                NonZeroUsize::new(size).expect("segment size must be nonzero"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
            .map_err(|_| syserror_now("mmap"))?
        } as *mut u8;

        let segment = Segment { fd, base, size };
        segment.init_header();
        Ok(segment)
    }

    fn init_header(&self) {
        let header = ShmHeader {
            magic: SHM_MAGIC,
            segsize: AtomicU32::new(self.size as u32),
            version: AtomicU16::new(SHM_VERSION),
            epoch: AtomicU64::new(0),
            in_progress: AtomicU8::new(0),
            base: AtomicU64::new(self.base as u64),
            directory_vector: AtomicU64::new(0),
            directory_len: AtomicU32::new(0),
            error_vector: AtomicU64::new(0),
        };
        // SAFETY: `self.base` points to `self.size` bytes this `Segment` exclusively owns, and
        // `size_of::<ShmHeader>()` fits within the two-page minimum enforced by `create`.
        unsafe {
            (self.base as *mut ShmHeader).write(header);
        }
    }

    /// Borrow the header at the base of the mapping.
    pub fn header(&self) -> &ShmHeader {
        // SAFETY: `self.base` was initialized with a valid `ShmHeader` by `init_header` and
        // stays mapped for the lifetime of `self`.
        unsafe { &*(self.base as *const ShmHeader) }
    }

    /// Build a `SegmentHeap` over the region one page past the header, the boundary VPP reserves
    /// for the header and initial directory metadata to grow into without colliding with heap
    /// allocations.
    ///
    /// # Safety
    /// Must be called at most once per `Segment` instance; the returned heap assumes it has
    /// exclusive ownership of `[page_size(), size)`.
    pub unsafe fn build_heap(&self) -> SegmentHeap {
        let offset = page_size();
        SegmentHeap::new(self.base.add(offset), self.size - offset)
    }

    /// Construct a fresh, empty directory over this segment's heap. Convenience for the common
    /// "new segment, new directory" path; `Directory::new` remains available directly for
    /// advanced callers (e.g. tests constructing a heap with a non-default capacity).
    pub fn new_directory<'seg>(&'seg self, heap: &'seg SegmentHeap) -> Directory<'seg> {
        Directory::new(self.header(), heap, INITIAL_DIRECTORY_CAPACITY)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The underlying `memfd` descriptor, to be duplicated and sent across the handoff socket.
    /// The segment keeps its own copy open; callers must `dup` before sending if they intend to
    /// close their copy independently.
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl AsRawFd for Segment {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: `self.base`/`self.size` describe exactly the mapping created in `create`, and
        // no other code holds a `&SegmentHeap`/`&ShmHeader` past this point because `Segment`'s
        // borrows are required to be scoped to its own lifetime.
        unsafe {
            let _ = munmap(self.base as *mut std::ffi::c_void, self.size);
            let _ = nix::unistd::close(self.fd);
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

fn syserror_now(origin: &'static str) -> StatSegError {
    StatSegError::Syscall(errno::errno(), origin)
}

const _: () = assert!(size_of::<ShmHeader>() <= 4096, "header must fit in one page");
