// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::mem::{size_of, MaybeUninit};
use std::sync::atomic::{self, AtomicU16, AtomicU32, AtomicU64, AtomicU8};

use crate::error::StatSegError;
use crate::syserror;

/// Magic number identifying a statseg shared memory segment.
pub const SHM_MAGIC: [u32; 2] = [0x53544154, 0x53454731];

/// Layout version of the directory and entry structures that follow the header.
pub const SHM_VERSION: u16 = 1;

/// Fixed header at the base of every statseg segment.
///
/// A fixed set of atomics a reader can validate and poll without walking anything else in the
/// segment. "Is a write in progress" and "how many writes have committed" are kept as two
/// separate fields rather than folded into one generation counter, because the registry's rename
/// and delete operations need a counter that strictly increases across the run (`epoch`)
/// independent of the odd/even in-progress flag a reader spins on (`in_progress`).
#[repr(C, align(8))]
#[derive(Debug)]
pub struct ShmHeader {
    /// Identifies the segment contents as belonging to this crate.
    pub magic: [u32; 2],

    /// Total size, in bytes, of the region the writer has committed to shared memory.
    pub segsize: AtomicU32,

    /// Layout version of the directory and entries that follow this header.
    pub version: AtomicU16,

    /// Monotonically increasing count of completed writer transactions.
    pub epoch: AtomicU64,

    /// Nonzero while a writer transaction is in flight; readers must not trust the data.
    pub in_progress: AtomicU8,

    /// Address the writer has this segment mapped at in its own process, stored as a plain
    /// integer so it survives being read by a reader mapped at a different address: every other
    /// offset in this header is relative to this base, never an absolute pointer.
    pub base: AtomicU64,

    /// Offset, in bytes from `base`, to the start of the directory vector.
    pub directory_vector: AtomicU64,

    /// Number of slots currently allocated in the directory vector (live and tombstoned).
    pub directory_len: AtomicU32,

    /// Offset, in bytes from `base`, to the start of the error counter vector.
    pub error_vector: AtomicU64,
}

impl ShmHeader {
    /// Read and validate a header from an open file descriptor.
    pub fn read(fdesc: i32) -> Result<Self, StatSegError> {
        let mut header_buf: MaybeUninit<ShmHeader> = MaybeUninit::uninit();
        // SAFETY: `header_buf` points to `size_of::<ShmHeader>()` bytes of valid, owned memory.
        match unsafe {
            libc::read(
                fdesc,
                header_buf.as_mut_ptr().cast(),
                size_of::<ShmHeader>(),
            )
        } {
            ret if ret < 0 => return syserror!("read statseg header"),
            ret if (ret as usize) < size_of::<ShmHeader>() => {
                return Err(StatSegError::SegmentMalformed)
            }
            _ => (),
        };

        // SAFETY: the branch above guarantees a full read of `size_of::<ShmHeader>()` bytes.
        let header = unsafe { header_buf.assume_init() };
        header.validate()?;
        Ok(header)
    }

    fn matches_magic(&self) -> bool {
        self.magic == SHM_MAGIC
    }

    fn has_valid_version(&self) -> bool {
        self.version.load(atomic::Ordering::Relaxed) == SHM_VERSION
    }

    fn is_well_formed(&self) -> bool {
        self.segsize.load(atomic::Ordering::Relaxed) as usize >= size_of::<Self>()
    }

    fn validate(&self) -> Result<(), StatSegError> {
        if !self.matches_magic() || !self.has_valid_version() {
            return Err(StatSegError::SegmentMalformed);
        }
        if !self.is_well_formed() {
            return Err(StatSegError::SegmentMalformed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{NativeEndian, WriteBytesExt};
    use std::ffi::CString;
    use std::fs::File;
    use std::io::Write;
    // Use tempfile::NamedTempFile so these tests don't collide with each other or leave
    // files behind when run in parallel.
    use tempfile::NamedTempFile;

    #[allow(clippy::too_many_arguments)]
    fn write_header(
        file: &mut File,
        magic_0: u32,
        magic_1: u32,
        segsize: u32,
        version: u16,
        epoch: u64,
        in_progress: u8,
        base: u64,
        directory_vector: u64,
        directory_len: u32,
        error_vector: u64,
    ) {
        file.write_u32::<NativeEndian>(magic_0).unwrap();
        file.write_u32::<NativeEndian>(magic_1).unwrap();
        file.write_u32::<NativeEndian>(segsize).unwrap();
        file.write_u16::<NativeEndian>(version).unwrap();
        // Padding to keep `epoch` 8-byte aligned, matching the `repr(C, align(8))` layout.
        file.write_u16::<NativeEndian>(0).unwrap();
        file.write_u32::<NativeEndian>(0).unwrap();
        file.write_u64::<NativeEndian>(epoch).unwrap();
        file.write_u8(in_progress).unwrap();
        file.write_all(&[0u8; 7]).unwrap();
        file.write_u64::<NativeEndian>(base).unwrap();
        file.write_u64::<NativeEndian>(directory_vector).unwrap();
        file.write_u32::<NativeEndian>(directory_len).unwrap();
        file.write_all(&[0u8; 4]).unwrap();
        file.write_u64::<NativeEndian>(error_vector).unwrap();
        file.sync_all().unwrap();
    }

    fn open_ro(path: &str) -> i32 {
        let cpath = CString::new(path).unwrap();
        unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY) }
    }

    #[test]
    fn valid_header_reads_back() {
        let tempfile = NamedTempFile::new().expect("create test header file failed");
        let temppath = tempfile.into_temp_path();
        let path = temppath.to_str().unwrap();
        let mut file = File::create(path).unwrap();
        write_header(
            &mut file, SHM_MAGIC[0], SHM_MAGIC[1], 4096, SHM_VERSION, 7, 0, 0x7f0000, 64, 3, 512,
        );

        let header = ShmHeader::read(open_ro(path)).expect("valid header");
        assert_eq!(header.epoch.into_inner(), 7);
        assert_eq!(header.directory_len.into_inner(), 3);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let tempfile = NamedTempFile::new().expect("create test header file failed");
        let temppath = tempfile.into_temp_path();
        let path = temppath.to_str().unwrap();
        let mut file = File::create(path).unwrap();
        write_header(
            &mut file, 0xdeadbeef, 0x0badcafe, 4096, SHM_VERSION, 1, 0, 0, 64, 0, 0,
        );

        assert!(ShmHeader::read(open_ro(path)).is_err());
    }

    #[test]
    fn bad_segsize_is_rejected() {
        let tempfile = NamedTempFile::new().expect("create test header file failed");
        let temppath = tempfile.into_temp_path();
        let path = temppath.to_str().unwrap();
        let mut file = File::create(path).unwrap();
        write_header(
            &mut file, SHM_MAGIC[0], SHM_MAGIC[1], 4, SHM_VERSION, 1, 0, 0, 64, 0, 0,
        );

        assert!(ShmHeader::read(open_ro(path)).is_err());
    }

    #[test]
    fn bad_version_is_rejected() {
        let tempfile = NamedTempFile::new().expect("create test header file failed");
        let temppath = tempfile.into_temp_path();
        let path = temppath.to_str().unwrap();
        let mut file = File::create(path).unwrap();
        write_header(
            &mut file, SHM_MAGIC[0], SHM_MAGIC[1], 4096, 0, 1, 0, 0, 64, 0, 0,
        );

        assert!(ShmHeader::read(open_ro(path)).is_err());
    }
}
