// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! statseg-core
//!
//! Low-level implementation of a shared-memory statistics segment for a packet-forwarding
//! dataplane: the segment allocator, the self-describing directory table and name index, the
//! single-writer/many-reader epoch protocol, counter-vector management, and the reader-side
//! snapshot API external processes use once they have the segment's file descriptor.
//!
//! Writer-side types (`segment`, directory mutation, `counters::CounterMain::publish`) are gated
//! behind the `writer` feature so that pure read-only clients are not forced to link allocator
//! code they never call. `segment` and `directory` are private modules for the same reason the
//! teacher keeps its `writer` module private: the only path to their mutating types is the
//! feature-gated re-export below, not the module path itself.

pub mod common;
pub mod config;
pub mod counters;
mod directory;
pub mod epoch;
pub mod error;
pub mod header;
pub mod heap;
pub mod namevec;
mod reader;
mod segment;

// `DirectoryEntry`/`EntryKind` describe the on-disk entry format a reader decodes; they carry no
// access to the live shared heap, so they are exported unconditionally for `ShmReader`'s benefit.
pub use crate::directory::{DirectoryEntry, EntryKind};
pub use crate::error::StatSegError;
pub use crate::header::ShmHeader;
pub use crate::reader::ShmReader;

// `Directory` holds the mutating registry API (`new_entry`/`delete`/`rename`/`register_symlink`)
// and `Segment` owns the writer-only `memfd_create`/`mmap` allocation path; both are re-exported
// only under the `writer` feature so read-only clients cannot reach them by any path at all.
#[cfg(feature = "writer")]
pub use crate::directory::{symlink_name, Directory};
#[cfg(feature = "writer")]
pub use crate::segment::Segment;
