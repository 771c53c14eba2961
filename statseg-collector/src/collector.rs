// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! The Collector: the single background thread that owns write access to the directory,
//! periodically resyncing dataplane-visible counters into it and invoking the provider pool.
//! Grounded on VPP's `do_stat_segment_updates` and `update_node_counters`.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use tracing::{debug, info, warn};

use statseg_core::common::monotonic_now_f64;
use statseg_core::counters::{CounterMain, CounterStorage, CounterVectorSimple};
use statseg_core::namevec::NameVector;
use statseg_core::{symlink_name, Directory, EntryKind};

use crate::hooks::{NodeRuntime, NODE_CATEGORY};
use crate::provider::ProviderPool;
use crate::Message;

/// The four per-node counter classes published under `/nodes/<class>`, in the order VPP's
/// `update_node_counters` refreshes them.
const NODE_COUNTER_CLASSES: [&str; 4] = ["clocks", "vectors", "calls", "suspends"];

struct NodeCounters<'seg> {
    clocks: CounterMain<'seg>,
    vectors: CounterMain<'seg>,
    calls: CounterMain<'seg>,
    suspends: CounterMain<'seg>,
}

impl<'seg> NodeCounters<'seg> {
    fn new(heap: &'seg statseg_core::heap::SegmentHeap) -> Self {
        let make = || CounterMain::new(CounterStorage::Simple(CounterVectorSimple::new(heap)));
        NodeCounters {
            clocks: make(),
            vectors: make(),
            calls: make(),
            suspends: make(),
        }
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (&'static str, &mut CounterMain<'seg>)> {
        [
            ("clocks", &mut self.clocks),
            ("vectors", &mut self.vectors),
            ("calls", &mut self.calls),
            ("suspends", &mut self.suspends),
        ]
        .into_iter()
    }

    fn simple(storage: &CounterStorage<'seg>) -> &CounterVectorSimple<'seg> {
        match storage {
            CounterStorage::Simple(s) => s,
            CounterStorage::Combined(_) => unreachable!("node counters are always simple vectors"),
        }
    }
}

/// The periodic refresh engine owning Collector-private state across ticks: the per-node counter
/// storage, the node name vector, the Provider Pool, and the running input-rate computation.
pub struct Collector<'seg> {
    runtime: Box<dyn NodeRuntime>,
    provider_pool: ProviderPool,
    per_node_counters: bool,
    node_counters: NodeCounters<'seg>,
    node_names: NameVector<'seg>,
    node_names_published: bool,
    symlinked_nodes: usize,
    /// Node name last observed for each known node index, so a rename (same index, new name) can
    /// be told apart from a brand-new node. Indexed the same way as `runtime.nodes()`; grows
    /// alongside `symlinked_nodes`.
    known_node_names: Vec<String>,
    num_worker_threads_index: Option<u32>,
    heartbeat_index: Option<u32>,
    input_rate_index: Option<u32>,
    last_update_index: Option<u32>,
    last_stats_clear_index: Option<u32>,
    last_input_packets: u64,
}

impl<'seg> Collector<'seg> {
    pub fn new(
        heap: &'seg statseg_core::heap::SegmentHeap,
        runtime: Box<dyn NodeRuntime>,
        per_node_counters: bool,
    ) -> Self {
        Collector {
            runtime,
            provider_pool: ProviderPool::new(),
            per_node_counters,
            node_counters: NodeCounters::new(heap),
            node_names: NameVector::new(heap),
            node_names_published: false,
            symlinked_nodes: 0,
            known_node_names: Vec::new(),
            num_worker_threads_index: None,
            heartbeat_index: None,
            input_rate_index: None,
            last_update_index: None,
            last_stats_clear_index: None,
            last_input_packets: 0,
        }
    }

    pub fn provider_pool_mut(&mut self) -> &mut ProviderPool {
        &mut self.provider_pool
    }

    /// Run one refresh cycle: publish static facts once, recompute the input rate, resync
    /// per-node counters (if enabled), poll every registered provider, and bump the heartbeat.
    /// All of a tick's directory mutations happen inside a single [`Directory::transaction`] so
    /// readers never observe a partially updated tick.
    pub fn tick(&mut self, directory: &mut Directory<'seg>) {
        let _txn = directory.transaction();

        self.publish_num_worker_threads(directory);
        self.refresh_input_rate(directory);
        if self.per_node_counters {
            self.refresh_node_counters(directory);
        }
        self.provider_pool.poll(directory);
        self.bump_heartbeat(directory);
    }

    fn publish_num_worker_threads(&mut self, directory: &mut Directory<'seg>) {
        if self.num_worker_threads_index.is_some() {
            return;
        }
        let index = match directory.new_entry("/sys/num_worker_threads", EntryKind::ScalarIndex) {
            Ok(index) => index,
            Err(_) => directory.lookup("/sys/num_worker_threads").expect(
                "num_worker_threads entry must exist if its creation raced with another writer",
            ),
        };
        directory.update_entry(index, |entry| entry.set_scalar(self.runtime.thread_count() as u64));
        self.num_worker_threads_index = Some(index);
    }

    /// Recompute `input_rate` the way VPP's `do_stat_segment_updates` does: `dt` is measured
    /// against the *previous* tick's published `last_update` value rather than Collector-private
    /// state, so the three scalars stay mutually consistent for a reader that samples them
    /// together.
    fn refresh_input_rate(&mut self, directory: &mut Directory<'seg>) {
        let last_update_index = *self.last_update_index.get_or_insert_with(|| {
            directory
                .new_entry("/sys/last_update", EntryKind::ScalarIndex)
                .expect("last_update is only ever registered once, by the Collector")
        });
        let input_rate_index = *self.input_rate_index.get_or_insert_with(|| {
            directory
                .new_entry("/sys/input_rate", EntryKind::ScalarIndex)
                .expect("input_rate is only ever registered once, by the Collector")
        });
        let last_stats_clear_index = *self.last_stats_clear_index.get_or_insert_with(|| {
            directory
                .new_entry("/sys/last_stats_clear", EntryKind::ScalarIndex)
                .expect("last_stats_clear is only ever registered once, by the Collector")
        });

        let now = monotonic_now_f64();
        let previous_update = directory.entry(last_update_index).scalar_f64();
        let dt = now - previous_update;
        let current_packets = self.runtime.aggregate_rx_packets();
        let rate = if previous_update > 0.0 && dt > 0.0 {
            (current_packets.saturating_sub(self.last_input_packets)) as f64 / dt
        } else {
            0.0
        };
        self.last_input_packets = current_packets;

        directory.update_entry(input_rate_index, |entry| entry.set_scalar_f64(rate));
        directory.update_entry(last_update_index, |entry| entry.set_scalar_f64(now));
        directory.update_entry(last_stats_clear_index, |entry| {
            entry.set_scalar_f64(self.runtime.last_stats_clear())
        });
    }

    fn bump_heartbeat(&mut self, directory: &mut Directory<'seg>) {
        let index = match self.heartbeat_index {
            Some(index) => index,
            None => {
                let index = directory
                    .new_entry("/sys/heartbeat", EntryKind::ScalarIndex)
                    .expect("heartbeat is only ever registered once, by the Collector");
                self.heartbeat_index = Some(index);
                index
            }
        };
        directory.update_entry(index, |entry| entry.set_scalar(entry.scalar() + 1));
    }

    /// Resync the four per-node counter vectors and the node name vector, growing them and
    /// registering `/nodes/<name>/<class>` symlinks as new nodes appear.
    fn refresh_node_counters(&mut self, directory: &mut Directory<'seg>) {
        let threads = self.runtime.thread_count().max(1);
        let nodes = self.runtime.nodes(0);
        let node_count = nodes.len();
        if node_count == 0 {
            return;
        }

        for (class, counter_main) in self.node_counters.iter_mut() {
            let storage = NodeCounters::simple(counter_main.storage());
            storage.ensure_capacity(threads, node_count);
            if counter_main.directory_index().is_none() {
                if let Err(err) = counter_main.publish(directory, &format!("/{NODE_CATEGORY}/{class}")) {
                    warn!("failed to publish node counter class {class}: {err}");
                }
            } else {
                counter_main.republish(directory);
            }
        }

        self.node_names.ensure_capacity(node_count);
        if !self.node_names_published {
            match directory.new_entry(&format!("/{NODE_CATEGORY}/names"), EntryKind::NameVector) {
                Ok(index) => {
                    directory.update_entry(index, |entry| {
                        entry.set_name_vector(self.node_names.heap_offset(), node_count as u32)
                    });
                    self.node_names_published = true;
                }
                Err(err) => warn!("failed to publish node name vector: {err}"),
            }
        }

        for thread in 0..threads {
            let nodes = self.runtime.nodes(thread);
            for node in &nodes {
                let total = node.stats_total;
                let cleared = node.stats_last_clear;
                if let CounterStorage::Simple(s) = self.node_counters.clocks.storage() {
                    s.set(thread, node.index, total.clocks.saturating_sub(cleared.clocks));
                }
                if let CounterStorage::Simple(s) = self.node_counters.vectors.storage() {
                    s.set(thread, node.index, total.vectors.saturating_sub(cleared.vectors));
                }
                if let CounterStorage::Simple(s) = self.node_counters.calls.storage() {
                    s.set(thread, node.index, total.calls.saturating_sub(cleared.calls));
                }
                if let CounterStorage::Simple(s) = self.node_counters.suspends.storage() {
                    s.set(thread, node.index, total.suspends.saturating_sub(cleared.suspends));
                }
            }
        }

        for node in &nodes {
            self.node_names.set(node.index, &node.name);
        }

        // Rename every per-node-counter-class symlink for a node whose name changed since the
        // last tick, under the same writer transaction as everything else this tick publishes.
        // A node that is renamed the very tick it is first seen has no prior symlinks and falls
        // through to the "new node" pass below instead.
        for node in nodes.iter().filter(|n| n.index < self.known_node_names.len()) {
            let old_name = &self.known_node_names[node.index];
            if old_name == &node.name {
                continue;
            }
            for class in NODE_COUNTER_CLASSES {
                let old_link = symlink_name(NODE_CATEGORY, old_name, class);
                let new_link = symlink_name(NODE_CATEGORY, &node.name, class);
                let index = directory
                    .lookup(&old_link)
                    .unwrap_or_else(|_| panic!("renamed node {old_name:?} has no {old_link} symlink to rename"));
                directory
                    .rename(index, &new_link)
                    .expect("renaming a symlink only fails on a malformed new name");
            }
            self.known_node_names[node.index] = node.name.clone();
        }

        if node_count > self.symlinked_nodes {
            for node in nodes.iter().filter(|n| n.index >= self.symlinked_nodes) {
                for class in NODE_COUNTER_CLASSES {
                    let (directory_index, object) = match class {
                        "clocks" => (self.node_counters.clocks.directory_index(), node.index),
                        "vectors" => (self.node_counters.vectors.directory_index(), node.index),
                        "calls" => (self.node_counters.calls.directory_index(), node.index),
                        "suspends" => (self.node_counters.suspends.directory_index(), node.index),
                        _ => unreachable!(),
                    };
                    let Some(directory_index) = directory_index else { continue };
                    let link_name = symlink_name(NODE_CATEGORY, &node.name, class);
                    if let Err(err) =
                        directory.register_symlink(&link_name, directory_index, object as u32, false)
                    {
                        warn!("failed to register node symlink {link_name}: {err}");
                    }
                }
                if node.index >= self.known_node_names.len() {
                    self.known_node_names.resize(node.index + 1, String::new());
                }
                self.known_node_names[node.index] = node.name.clone();
            }
            self.symlinked_nodes = node_count;
        }
    }

    /// Run the Collector forever, sleeping for `update_interval` between ticks via `mbox`'s
    /// timeout so a [`Message::ThreadAbort`] interrupts promptly instead of waiting out a long
    /// interval. Any other message received is logged and ignored: the Collector thread has
    /// nothing else to react to.
    pub fn run(&mut self, directory: &mut Directory<'seg>, mbox: &Receiver<Message>, update_interval: Duration) {
        info!("Collector starting, update interval {:?}", update_interval);
        loop {
            self.tick(directory);
            debug!("Collector tick complete");
            match mbox.recv_timeout(update_interval) {
                Ok(Message::ThreadAbort) | Err(RecvTimeoutError::Disconnected) => {
                    info!("Collector stopping");
                    return;
                }
                Ok(other) => debug!("Collector ignoring unexpected message: {:?}", other),
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NodeInfo;
    use statseg_core::header::{ShmHeader, SHM_MAGIC, SHM_VERSION};
    use statseg_core::heap::SegmentHeap;
    use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8};
    use std::sync::Mutex;

    struct FakeRuntime {
        threads: usize,
        rx_packets: Mutex<u64>,
        nodes: Mutex<Vec<(String, u64)>>,
    }

    impl FakeRuntime {
        fn with_nodes(threads: usize, nodes: Vec<(&'static str, u64)>) -> Self {
            FakeRuntime {
                threads,
                rx_packets: Mutex::new(0),
                nodes: Mutex::new(nodes.into_iter().map(|(n, c)| (n.to_string(), c)).collect()),
            }
        }

        fn rename_node(&self, index: usize, new_name: &str) {
            self.nodes.lock().unwrap()[index].0 = new_name.to_string();
        }
    }

    impl NodeRuntime for std::sync::Arc<FakeRuntime> {
        fn thread_count(&self) -> usize {
            (**self).thread_count()
        }

        fn nodes(&self, thread: usize) -> Vec<NodeInfo> {
            (**self).nodes(thread)
        }

        fn aggregate_rx_packets(&self) -> u64 {
            (**self).aggregate_rx_packets()
        }

        fn last_stats_clear(&self) -> f64 {
            (**self).last_stats_clear()
        }
    }

    impl NodeRuntime for FakeRuntime {
        fn thread_count(&self) -> usize {
            self.threads
        }

        fn nodes(&self, _thread: usize) -> Vec<NodeInfo> {
            self.nodes
                .lock()
                .unwrap()
                .iter()
                .enumerate()
                .map(|(index, (name, calls))| NodeInfo {
                    index,
                    name: name.clone(),
                    stats_total: crate::hooks::NodeStats { calls: *calls, ..Default::default() },
                    stats_last_clear: crate::hooks::NodeStats::default(),
                })
                .collect()
        }

        fn aggregate_rx_packets(&self) -> u64 {
            *self.rx_packets.lock().unwrap()
        }

        fn last_stats_clear(&self) -> f64 {
            0.0
        }
    }

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
        (header, vec![0u8; 1024 * 1024].into_boxed_slice())
    }

    #[test]
    fn tick_publishes_static_entries_once() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 16);
        let runtime = Box::new(FakeRuntime::with_nodes(2, vec![]));
        let mut collector = Collector::new(&heap, runtime, false);

        collector.tick(&mut directory);
        collector.tick(&mut directory);

        let entry = directory.lookup("/sys/num_worker_threads").unwrap();
        assert_eq!(directory.entry(entry).scalar(), 2);
        let heartbeat = directory.lookup("/sys/heartbeat").unwrap();
        assert_eq!(directory.entry(heartbeat).scalar(), 2);
    }

    #[test]
    fn tick_resyncs_node_counters_and_registers_symlinks() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 16);
        let runtime = Box::new(FakeRuntime::with_nodes(1, vec![("ip4-input", 10)]));
        let mut collector = Collector::new(&heap, runtime, true);

        collector.tick(&mut directory);

        let calls_entry = directory.lookup("/nodes/calls").unwrap();
        let entry = directory.entry(calls_entry);
        assert_eq!(entry.kind(), EntryKind::CounterVectorSimple);

        let symlink = directory.lookup("/nodes/ip4-input/calls").unwrap();
        assert_eq!(directory.entry(symlink).kind(), EntryKind::Symlink);
    }

    #[test]
    fn tick_is_idempotent_about_new_nodes() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 16);
        let runtime = Box::new(FakeRuntime::with_nodes(1, vec![("ip4-input", 10), ("ip4-lookup", 5)]));
        let mut collector = Collector::new(&heap, runtime, true);

        collector.tick(&mut directory);
        collector.tick(&mut directory);

        assert!(directory.lookup("/nodes/ip4-input/calls").is_ok());
        assert!(directory.lookup("/nodes/ip4-lookup/calls").is_ok());
    }

    #[test]
    fn input_rate_and_last_update_are_published_and_monotone() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 16);
        let runtime = Box::new(FakeRuntime::with_nodes(1, vec![]));
        let mut collector = Collector::new(&heap, runtime, false);

        collector.tick(&mut directory);
        let first_update = directory
            .entry(directory.lookup("/sys/last_update").unwrap())
            .scalar_f64();
        // Nothing has been observed yet on the very first tick (no prior `last_update`), so the
        // rate is 0 rather than divide-by-zero garbage.
        assert_eq!(
            directory.entry(directory.lookup("/sys/input_rate").unwrap()).scalar_f64(),
            0.0
        );

        std::thread::sleep(Duration::from_millis(5));
        collector.tick(&mut directory);
        let second_update = directory
            .entry(directory.lookup("/sys/last_update").unwrap())
            .scalar_f64();
        assert!(second_update > first_update);
        assert!(directory.lookup("/sys/last_stats_clear").is_ok());
    }

    #[test]
    fn node_rename_moves_every_counter_class_symlink() {
        let (header, mut backing) = fixture();
        let heap = unsafe { SegmentHeap::new(backing.as_mut_ptr(), backing.len()) };
        let mut directory = Directory::new(&header, &heap, 16);
        let runtime = std::sync::Arc::new(FakeRuntime::with_nodes(1, vec![("ip4-input", 10)]));
        let mut collector = Collector::new(&heap, Box::new(std::sync::Arc::clone(&runtime)), true);

        collector.tick(&mut directory);
        for class in NODE_COUNTER_CLASSES {
            assert!(directory.lookup(&symlink_name(NODE_CATEGORY, "ip4-input", class)).is_ok());
        }

        runtime.rename_node(0, "ip4-input-rx");
        collector.tick(&mut directory);

        for class in NODE_COUNTER_CLASSES {
            assert!(
                directory.lookup(&symlink_name(NODE_CATEGORY, "ip4-input", class)).is_err(),
                "old symlink for {class} should be gone after rename"
            );
            assert!(
                directory.lookup(&symlink_name(NODE_CATEGORY, "ip4-input-rx", class)).is_ok(),
                "new symlink for {class} should exist after rename"
            );
        }
    }
}
