// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! The dataplane-facing surface the Collector polls every tick, grounded on VPP's
//! `vlib_node_t`/`vlib_interface_main_t` bookkeeping that `update_node_counters` and the
//! interface add/delete notification path read from.

use statseg_core::error::StatSegError;
use statseg_core::{symlink_name, Directory, EntryKind};

/// One dataplane processing node's name and lifetime counters, as the Collector sees it on a
/// given tick. `stats_total` is the cumulative counter since the node was created; `stats_last_clear`
/// is the value `stats_total` held the last time counters were reset to zero externally, so the
/// Collector can publish `stats_total - stats_last_clear`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub clocks: u64,
    pub vectors: u64,
    pub calls: u64,
    pub suspends: u64,
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub index: usize,
    pub name: String,
    pub stats_total: NodeStats,
    pub stats_last_clear: NodeStats,
}

/// The embedding dataplane's view of its own worker threads and processing nodes. Implemented by
/// the runtime that owns the actual packet-forwarding graph; `statsegd` ships a synthetic
/// implementation for demonstration and testing.
///
/// Node names and node count are shared across threads (there is one processing graph, cloned
/// per worker thread at runtime); per-node counters are not, so `nodes` is parameterized by
/// `thread` and returns one [`NodeInfo`] per node as that thread sees it, mirroring
/// `vlib_node_get_runtime(vm, node_index)` being called against a per-thread `vlib_main_t`.
pub trait NodeRuntime: Send {
    fn thread_count(&self) -> usize;
    fn nodes(&self, thread: usize) -> Vec<NodeInfo>;
    fn aggregate_rx_packets(&self) -> u64;

    /// Timestamp (seconds, same clock as the Collector's own `now`) of the last time runtime
    /// stats were cleared externally, published verbatim into `/sys/last_stats_clear` each tick.
    fn last_stats_clear(&self) -> f64;
}

/// Directory category under which per-node counters and the per-interface symlinks created by
/// [`InterfaceRegistry`] are published, under a `/nodes/<name>/<class>` convention.
pub const NODE_CATEGORY: &str = "nodes";
pub const INTERFACE_CATEGORY: &str = "if";

/// Per-interface counter classes a dataplane publishes symlinks for, mirroring the counter
/// classes VPP registers under `/if/<name>/<class>` for each interface (`rx`, `tx`, `drops`,
/// `rx-error`, ... are all instances of this pattern; the set itself is owned by the caller).
pub struct InterfaceCounterClass {
    pub directory_index: u32,
    pub object: u32,
}

/// Tracks the symlinks registered for each known interface so they can be torn down cleanly when
/// an interface is deleted, grounded on `vnet_delete_hw_interface`'s call into
/// `stat_segment_deregister_state_counter`/symlink removal for every counter class the interface
/// owned.
#[derive(Default)]
pub struct InterfaceRegistry {
    symlinks: std::collections::HashMap<u32, Vec<u32>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        InterfaceRegistry::default()
    }

    /// Register one symlink per counter class for a newly created interface, naming each
    /// `/if/<name>/<class>`.
    pub fn on_interface_add(
        &mut self,
        directory: &mut Directory,
        sw_if_index: u32,
        name: &str,
        classes: &[(&str, InterfaceCounterClass)],
    ) -> Result<(), StatSegError> {
        let _txn = directory.transaction();
        let mut registered = Vec::with_capacity(classes.len());
        for (class, counter) in classes {
            let link_name = symlink_name(INTERFACE_CATEGORY, name, class);
            let index = directory.register_symlink(
                &link_name,
                counter.directory_index,
                counter.object,
                false,
            )?;
            registered.push(index);
        }
        self.symlinks.insert(sw_if_index, registered);
        Ok(())
    }

    /// Remove every symlink registered for `sw_if_index`. A no-op if the interface was never
    /// registered (or was already removed).
    pub fn on_interface_del(&mut self, directory: &mut Directory, sw_if_index: u32) {
        if let Some(indices) = self.symlinks.remove(&sw_if_index) {
            let _txn = directory.transaction();
            for index in indices {
                directory.delete(index);
            }
        }
    }

    /// Rename every symlink registered for `sw_if_index` to reflect a new interface name (e.g.
    /// after a Linux netdevice rename), mirroring the directory-rename step
    /// `update_node_counters` performs for a renamed node.
    pub fn on_interface_rename(
        &mut self,
        directory: &mut Directory,
        sw_if_index: u32,
        new_name: &str,
        class_names: &[&str],
    ) -> Result<(), StatSegError> {
        let Some(indices) = self.symlinks.get(&sw_if_index) else {
            return Ok(());
        };
        let _txn = directory.transaction();
        for (index, class) in indices.iter().zip(class_names) {
            directory.rename(*index, &symlink_name(INTERFACE_CATEGORY, new_name, class))?;
        }
        Ok(())
    }
}

/// Create the per-entry-kind storage for one node counter class, publishing it under
/// `/nodes/<category>/<class>` so a reader can find the matrix without per-node lookups, the same
/// convention VPP uses for `/sys/node/<thread>/<node>/clocks` et al. exposed as one vector + a
/// `name_vector` of node names rather than one scalar per node.
pub fn ensure_node_counter_entry(
    directory: &mut Directory,
    class: &str,
) -> Result<u32, StatSegError> {
    let name = format!("/{NODE_CATEGORY}/{class}");
    match directory.lookup(&name) {
        Ok(index) => Ok(index),
        Err(StatSegError::NotFound(_)) => directory.new_entry(&name, EntryKind::CounterVectorSimple),
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statseg_core::header::{ShmHeader, SHM_MAGIC, SHM_VERSION};
    use statseg_core::heap::SegmentHeap;
    use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8};

    fn fixture() -> (Box<ShmHeader>, Box<[u8]>) {
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
        (header, vec![0u8; 128 * 1024].into_boxed_slice())
    }

    #[test]
    fn interface_add_registers_one_symlink_per_class() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 8);
        let target = directory.new_entry("/if/rx", EntryKind::CounterVectorSimple).unwrap();

        let mut registry = InterfaceRegistry::new();
        registry
            .on_interface_add(
                &mut directory,
                0,
                "eth0",
                &[("rx", InterfaceCounterClass { directory_index: target, object: 0 })],
            )
            .unwrap();

        assert!(directory.lookup("/if/eth0/rx").is_ok());
    }

    #[test]
    fn interface_del_removes_its_symlinks() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 8);
        let target = directory.new_entry("/if/rx", EntryKind::CounterVectorSimple).unwrap();

        let mut registry = InterfaceRegistry::new();
        registry
            .on_interface_add(
                &mut directory,
                3,
                "eth1",
                &[("rx", InterfaceCounterClass { directory_index: target, object: 0 })],
            )
            .unwrap();
        registry.on_interface_del(&mut directory, 3);

        assert!(directory.lookup("/if/eth1/rx").is_err());
    }

    #[test]
    fn ensure_node_counter_entry_is_idempotent() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 8);

        let first = ensure_node_counter_entry(&mut directory, "calls").unwrap();
        let second = ensure_node_counter_entry(&mut directory, "calls").unwrap();
        assert_eq!(first, second);
    }
}
