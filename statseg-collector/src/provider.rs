// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! Provider pool: callback-driven scalar gauges refreshed once per Collector tick, grounded
//! directly on VPP's `stat_segment_poll_add`/`stat_segment_register_gauge`/
//! `stat_segment_register_state_counter`.

use statseg_core::error::StatSegError;
use statseg_core::{Directory, DirectoryEntry, EntryKind};

/// One registered data provider: a callback invoked with the directory entry it owns and the
/// caller-supplied token identifying which of the caller's internal objects it refreshes.
///
/// `interval` is recorded but not yet consulted for per-provider scheduling: every provider runs
/// on every Collector tick, matching the original's own `TODO: Add support for per-provider
/// interval.` rather than inventing scheduling the source never had.
struct ProviderEntry {
    directory_index: u32,
    caller_index: u32,
    interval: u32,
    callback: Box<dyn FnMut(&mut DirectoryEntry, u32) + Send>,
}

/// The set of data providers a [`crate::collector::Collector`] invokes once per tick.
#[derive(Default)]
pub struct ProviderPool {
    entries: Vec<ProviderEntry>,
}

impl ProviderPool {
    pub fn new() -> Self {
        ProviderPool::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a callback against an already-existing directory entry at `directory_index`.
    pub fn poll_add(
        &mut self,
        directory_index: u32,
        caller_index: u32,
        interval: u32,
        callback: impl FnMut(&mut DirectoryEntry, u32) + Send + 'static,
    ) {
        self.entries.push(ProviderEntry {
            directory_index,
            caller_index,
            interval,
            callback: Box::new(callback),
        });
    }

    /// Create a new scalar entry named `name` and register a provider for it in one step. Fails
    /// with `AlreadyExists` if `name` is already registered.
    pub fn register_gauge(
        &mut self,
        directory: &mut Directory,
        name: &str,
        caller_index: u32,
        callback: impl FnMut(&mut DirectoryEntry, u32) + Send + 'static,
    ) -> Result<u32, StatSegError> {
        let index = directory.new_entry(name, EntryKind::ScalarIndex)?;
        self.poll_add(index, caller_index, 0, callback);
        Ok(index)
    }

    /// Invoke every registered provider, passing it the directory entry it owns. Callers
    /// (`Collector::tick`) wrap this in a writer transaction spanning the rest of the tick.
    pub fn poll(&mut self, directory: &mut Directory) {
        for entry in &mut self.entries {
            directory.update_entry(entry.directory_index, |e| {
                (entry.callback)(e, entry.caller_index)
            });
        }
    }
}

/// Create a scalar entry intended for direct external updates via [`set_state_counter`], rather
/// than a polled provider callback.
pub fn register_state_counter(directory: &mut Directory, name: &str) -> Result<u32, StatSegError> {
    directory.new_entry(name, EntryKind::ScalarIndex)
}

pub fn set_state_counter(directory: &mut Directory, index: u32, value: u64) {
    directory.update_entry(index, |entry| entry.set_scalar(value));
}

/// Remove a state counter's directory entry. Fails with `InvalidKind` if `index` does not name a
/// scalar entry, mirroring `stat_segment_deregister_state_counter`'s type check.
pub fn deregister_state_counter(directory: &mut Directory, index: u32) -> Result<(), StatSegError> {
    let entry = directory.entry(index);
    if entry.kind() != EntryKind::ScalarIndex {
        return Err(StatSegError::InvalidKind {
            index,
            expected: EntryKind::ScalarIndex,
            actual: entry.kind(),
        });
    }
    directory.delete(index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use statseg_core::header::{ShmHeader, SHM_MAGIC, SHM_VERSION};
    use statseg_core::heap::SegmentHeap;
    use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8};

    fn new_directory_fixture() -> (Box<ShmHeader>, Box<[u8]>) {
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
        (header, vec![0u8; 64 * 1024].into_boxed_slice())
    }

    #[test]
    fn register_gauge_wires_a_provider_callback() {
        let (header, mut backing) = new_directory_fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 4);
        let mut pool = ProviderPool::new();

        let index = pool
            .register_gauge(&mut directory, "/sys/input_rate", 7, |entry, caller| {
                entry.set_scalar(caller as u64 * 2)
            })
            .unwrap();

        pool.poll(&mut directory);
        assert_eq!(directory.entry(index).scalar(), 14);
    }

    #[test]
    fn register_gauge_rejects_duplicate_names() {
        let (header, mut backing) = new_directory_fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 4);
        let mut pool = ProviderPool::new();

        pool.register_gauge(&mut directory, "/sys/heartbeat", 0, |_, _| {}).unwrap();
        let second = pool.register_gauge(&mut directory, "/sys/heartbeat", 0, |_, _| {});
        assert!(matches!(second, Err(StatSegError::AlreadyExists(_))));
    }

    #[test]
    fn state_counters_set_and_deregister() {
        let (header, mut backing) = new_directory_fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 4);

        let index = register_state_counter(&mut directory, "/if/0/link-state").unwrap();
        set_state_counter(&mut directory, index, 1);
        assert_eq!(directory.entry(index).scalar(), 1);

        deregister_state_counter(&mut directory, index).unwrap();
        assert!(directory.lookup("/if/0/link-state").is_err());
    }

    #[test]
    fn deregister_rejects_non_scalar_entries() {
        let (header, mut backing) = new_directory_fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 4);

        let index = directory.new_entry("/nodes/ip4-input", EntryKind::CounterVectorSimple).unwrap();
        let result = deregister_state_counter(&mut directory, index);
        assert!(matches!(result, Err(StatSegError::InvalidKind { .. })));
    }
}
