// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use errno::Errno;

use crate::directory::EntryKind;

/// Convenience macro to build a `StatSegError::Syscall` with extra info from errno and a static
/// origin string.
#[macro_export]
macro_rules! syserror {
    ($origin:expr) => {
        Err($crate::error::StatSegError::Syscall(
            ::errno::errno(),
            $origin,
        ))
    };
}

/// Error taxonomy returned by the low-level statseg APIs.
///
/// `SegmentInit` and `Syscall` are fatal / not retried by the caller, while `AlreadyExists` /
/// `NotFound` / `InvalidKind` / `ConfigError` are surfaced to callers who are expected to handle
/// them. Programmer errors (wrong-heap invocation, symlink chaining, rename-of-unknown-symlink)
/// are `assert!`/`debug_assert!` elsewhere in this crate, not represented here.
#[derive(Debug)]
pub enum StatSegError {
    /// A system call failed while creating, truncating or mapping the backing object.
    Syscall(Errno, &'static str),

    /// Creation of the segment (shared memory object, truncation, mapping) failed.
    SegmentInit(String),

    /// The shared memory segment is initialized but malformed (bad magic, truncated header).
    SegmentMalformed,

    /// Registration for a name that already maps to a live directory entry.
    AlreadyExists(String),

    /// Lookup for a name or index that does not exist in the directory.
    NotFound(String),

    /// An operation expected a directory entry of one kind but found another.
    InvalidKind {
        index: u32,
        expected: EntryKind,
        actual: EntryKind,
    },

    /// An unrecognized configuration option was supplied.
    ConfigError(String),
}

impl std::fmt::Display for StatSegError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatSegError::Syscall(errno, origin) => {
                write!(f, "system call failed during {origin}: {errno}")
            }
            StatSegError::SegmentInit(cause) => write!(f, "segment initialization failed: {cause}"),
            StatSegError::SegmentMalformed => write!(f, "shared memory segment is malformed"),
            StatSegError::AlreadyExists(name) => {
                write!(f, "directory entry already exists: {name}")
            }
            StatSegError::NotFound(what) => write!(f, "directory entry not found: {what}"),
            StatSegError::InvalidKind {
                index,
                expected,
                actual,
            } => write!(
                f,
                "directory entry {index} has kind {actual:?}, expected {expected:?}"
            ),
            StatSegError::ConfigError(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for StatSegError {}
