// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! Configuration recognized by the enclosing runtime. `statseg-core` and `statseg-collector`
//! never parse CLI arguments themselves; the `statsegd` binary is the only place a
//! `clap::Parser` lives, keeping argument parsing separate from the library it drives.

use std::path::PathBuf;
use std::time::Duration;

use crate::segment::DEFAULT_SEGMENT_SIZE;

/// Backing page size for the segment's anonymous memory object.
///
/// VPP's `page-size <tag>` option picks among the page sizes Linux huge page support exposes
/// (`4k`, `2m`, `1g`, or the kernel default). `memfd_create` does not expose hugetlb selection
/// without also threading `MFD_HUGETLB`/`MFD_HUGE_*` flags through every call site that touches
/// the descriptor, so only `Default` is implemented for now; `Requested` is accepted from
/// configuration and round-tripped, but `Segment::create` treats it identically to `Default`
/// until hugetlb support is added (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Default,
    Requested(usize),
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::Default
    }
}

/// Configuration for one statseg segment and its Collector, parsed by the embedding runtime.
#[derive(Debug, Clone)]
pub struct StatSegConfig {
    /// Path for the handoff socket.
    pub socket_name: PathBuf,

    /// Segment size, in bytes.
    pub size: usize,

    /// Backing page size tag.
    pub page_size: PageSize,

    /// Enables the Collector's per-node counter refresh pass.
    pub per_node_counters: bool,

    /// Collector period.
    pub update_interval: Duration,
}

impl Default for StatSegConfig {
    fn default() -> Self {
        StatSegConfig {
            socket_name: default_socket_path(),
            size: DEFAULT_SEGMENT_SIZE,
            page_size: PageSize::Default,
            per_node_counters: true,
            update_interval: Duration::from_secs_f64(10.0),
        }
    }
}

fn default_socket_path() -> PathBuf {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/run"));
    runtime_dir.join("stats.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = StatSegConfig::default();
        assert_eq!(config.size, 32 * 1024 * 1024);
        assert_eq!(config.page_size, PageSize::Default);
        assert!(config.per_node_counters);
        assert_eq!(config.update_interval, Duration::from_secs_f64(10.0));
        assert_eq!(config.socket_name.file_name().unwrap(), "stats.sock");
    }
}
