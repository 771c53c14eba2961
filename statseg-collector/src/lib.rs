// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! statseg-collector
//!
//! The periodic Collector and Provider Pool that drive a `statseg-core` directory: the
//! background thread an embedding dataplane runs to keep per-node counters, input rate,
//! heartbeat, and registered data providers in sync once per tick.

pub mod channels;
pub mod collector;
pub mod context;
pub mod hooks;
pub mod provider;

/// The set of channel identities used for message passing around the Collector thread.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ChannelId {
    /// The main thread.
    MainThread,

    /// The thread running the Collector's tick loop.
    Collector,
}

/// The type of messages exchanged between threads.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A thread signalling it has terminated.
    ThreadTerminate(ChannelId),

    /// A thread signalling it has panicked.
    ThreadPanic(ChannelId),

    /// Stop all threads and processing.
    ThreadAbort,
}
