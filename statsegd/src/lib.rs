// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! statsegd
//!
//! Reference daemon wiring `statseg-core` and `statseg-collector` to a handoff socket: a
//! segment, a Collector thread running against a pluggable
//! `statseg_collector::hooks::NodeRuntime` (here, [`runtime::SyntheticNodeRuntime`]), and a
//! listener serving the segment's file descriptor to connecting readers.

pub mod handoff;
pub mod runtime;
pub mod signal;
