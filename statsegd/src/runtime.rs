// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! A deterministic, in-memory `NodeRuntime` used when no real dataplane is embedding this crate:
//! it stands in for the packet-forwarding graph a real caller would expose, built the way a test
//! harness builds fake data rather than driving real hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use statseg_collector::hooks::{NodeInfo, NodeRuntime, NodeStats};

/// One synthetic processing node: a fixed name plus a monotonically increasing call counter
/// advanced by [`SyntheticNodeRuntime::advance`], standing in for a worker thread's dispatch loop
/// incrementing `vlib_node_runtime_t` counters on every packet it processes.
struct SyntheticNode {
    name: Mutex<String>,
    calls: AtomicU64,
    vectors: AtomicU64,
    clocks: AtomicU64,
}

/// A single-worker-thread synthetic runtime with a small, fixed set of named processing nodes.
/// Every [`advance`](SyntheticNodeRuntime::advance) call simulates one tick of packet processing.
pub struct SyntheticNodeRuntime {
    nodes: Vec<SyntheticNode>,
    rx_packets: AtomicU64,
}

impl SyntheticNodeRuntime {
    pub fn new() -> Self {
        let names = ["ip4-input", "ip4-lookup", "ip4-rewrite", "interface-output"];
        SyntheticNodeRuntime {
            nodes: names
                .iter()
                .map(|name| SyntheticNode {
                    name: Mutex::new((*name).to_string()),
                    calls: AtomicU64::new(0),
                    vectors: AtomicU64::new(0),
                    clocks: AtomicU64::new(0),
                })
                .collect(),
            rx_packets: AtomicU64::new(0),
        }
    }

    /// Simulate `packets` packets flowing through every node once, advancing counters the way a
    /// real dataplane's worker loop would between two Collector ticks.
    pub fn advance(&self, packets: u64) {
        for node in &self.nodes {
            node.calls.fetch_add(1, Ordering::Relaxed);
            node.vectors.fetch_add(packets, Ordering::Relaxed);
            node.clocks.fetch_add(packets * 3, Ordering::Relaxed);
        }
        self.rx_packets.fetch_add(packets, Ordering::Relaxed);
    }

    /// Rename the node at `index`, exercising the Collector's node-rename symlink migration end
    /// to end in the reference daemon.
    pub fn rename_node(&self, index: usize, new_name: &str) {
        if let Some(node) = self.nodes.get(index) {
            *node.name.lock().unwrap() = new_name.to_string();
        }
    }
}

impl Default for SyntheticNodeRuntime {
    fn default() -> Self {
        SyntheticNodeRuntime::new()
    }
}

impl NodeRuntime for SyntheticNodeRuntime {
    fn thread_count(&self) -> usize {
        1
    }

    fn nodes(&self, _thread: usize) -> Vec<NodeInfo> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeInfo {
                index,
                name: node.name.lock().unwrap().clone(),
                stats_total: NodeStats {
                    clocks: node.clocks.load(Ordering::Relaxed),
                    vectors: node.vectors.load(Ordering::Relaxed),
                    calls: node.calls.load(Ordering::Relaxed),
                    suspends: 0,
                },
                stats_last_clear: NodeStats::default(),
            })
            .collect()
    }

    fn aggregate_rx_packets(&self) -> u64 {
        self.rx_packets.load(Ordering::Relaxed)
    }

    fn last_stats_clear(&self) -> f64 {
        // This runtime never clears its counters, so there has never been a clear event.
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_grows_every_node_counter() {
        let runtime = SyntheticNodeRuntime::new();
        runtime.advance(10);
        let nodes = runtime.nodes(0);
        assert_eq!(nodes.len(), 4);
        assert!(nodes.iter().all(|n| n.stats_total.calls == 1));
        assert_eq!(runtime.aggregate_rx_packets(), 10);
    }

    #[test]
    fn rename_node_changes_only_the_targeted_node() {
        let runtime = SyntheticNodeRuntime::new();
        runtime.rename_node(0, "ip4-input-rx");
        let nodes = runtime.nodes(0);
        assert_eq!(nodes[0].name, "ip4-input-rx");
        assert_eq!(nodes[1].name, "ip4-lookup");
    }
}
