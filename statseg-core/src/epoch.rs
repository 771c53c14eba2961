// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::Ordering;

use crate::header::ShmHeader;

/// Writer-side half of the single-writer/many-reader epoch protocol.
///
/// The reader-side retry loop this unlocks is documented on [`crate::reader::ShmReader::snapshot`]
/// and implemented there for completeness; `EpochLock` only ever runs in the writer process.
///
/// ```text
/// reader protocol (informative):
///   loop {
///     e0 = epoch.load()
///     if in_progress.load() != 0 { continue }
///     let snapshot = read_entries()
///     e1 = epoch.load()
///     if e1 == e0 && in_progress was never observed set during the read { return snapshot }
///   }
/// ```
pub struct EpochLock<'seg> {
    header: &'seg ShmHeader,
}

/// A held writer transaction. While alive, `in_progress` is set; dropping it increments `epoch`
/// and clears `in_progress`, in that order, so a reader can never observe an epoch bump without
/// also observing `in_progress` having been set for the whole transaction.
#[must_use = "the transaction must stay alive for the duration of the mutation it guards"]
pub struct WriterTxn<'seg> {
    header: &'seg ShmHeader,
}

impl<'seg> EpochLock<'seg> {
    pub fn new(header: &'seg ShmHeader) -> Self {
        EpochLock { header }
    }

    /// Begin a writer transaction. There is exactly one writer identity per segment; this is not
    /// a mutual-exclusion lock across OS threads, only the bookkeeping readers rely on.
    pub fn begin(&self) -> WriterTxn<'seg> {
        self.header.in_progress.store(1, Ordering::Release);
        WriterTxn {
            header: self.header,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.header.epoch.load(Ordering::Acquire)
    }
}

impl<'seg> Drop for WriterTxn<'seg> {
    fn drop(&mut self) {
        self.header.epoch.fetch_add(1, Ordering::Release);
        self.header.in_progress.store(0, Ordering::Release);
    }
}
