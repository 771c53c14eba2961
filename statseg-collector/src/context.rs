// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::sync::mpsc::Receiver;
use std::thread::panicking;

use tracing::{debug, error};

use crate::channels::DispatchBox;
use crate::{ChannelId, Message};

/// Context a spawned thread owns for the lifetime of its work.
///
/// Bundles the receiving end of this thread's channel with a `DispatchBox` it can use to reach
/// every other thread. `Drop` is the hook: whether the thread's closure returns normally or
/// unwinds from a panic, dropping its `Context` tells the main thread so it can decide to bring
/// the rest of the fleet down rather than run on with one thread silently gone.
pub struct Context {
    /// The channel identifier for this thread.
    pub channel_id: ChannelId,

    /// The receiving end of the MPSC channel this thread receives on.
    pub mbox: Receiver<Message>,

    /// The DispatchBox to send a message to any other thread.
    pub dbox: DispatchBox<ChannelId, Message>,
}

impl Drop for Context {
    fn drop(&mut self) {
        let message = if panicking() {
            Message::ThreadPanic(self.channel_id.clone())
        } else {
            Message::ThreadTerminate(self.channel_id.clone())
        };

        match self.dbox.send(&ChannelId::MainThread, message) {
            Ok(()) => debug!("Thread {:?} signalled the main thread it Drop'ed", self.channel_id),
            Err(_) => error!("Thread {:?} failed to signal back to the main thread", self.channel_id),
        }
    }
}
