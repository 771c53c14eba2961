// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! statsegd
//!
//! Reference daemon wiring `statseg-core` and `statseg-collector` to a handoff socket: creates a
//! segment, runs the Collector against a synthetic node runtime, and serves the segment's file
//! descriptor to connecting readers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lazy_static::lazy_static;
use nix::sys::signal::Signal;
use tracing::{error, info, warn, Level};

use statseg_collector::channels::{self, DispatchBox};
use statseg_collector::collector::Collector;
use statseg_collector::context::Context;
use statseg_collector::{ChannelId, Message};
use statseg_core::config::{PageSize, StatSegConfig};
use statseg_core::Segment;

use statsegd::runtime::SyntheticNodeRuntime;
use statsegd::{handoff, signal};

#[derive(Parser, Debug)]
#[command(author, name = "statsegd", version, about, long_about = None)]
struct Cli {
    /// Path for the handoff socket. Defaults to `<runtime-dir>/stats.sock`.
    #[arg(long)]
    socket_name: Option<PathBuf>,

    /// Segment size in bytes.
    #[arg(long, default_value_t = StatSegConfig::default().size)]
    size: usize,

    /// Requested backing page size in bytes. Omit to use the system default.
    #[arg(long)]
    page_size: Option<usize>,

    /// Enables the Collector's per-node counter refresh pass.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    per_node_counters: bool,

    /// Collector period, in seconds.
    #[arg(long, default_value_t = StatSegConfig::default().update_interval.as_secs_f64())]
    update_interval: f64,

    /// Emit structured log messages. Default to human readable.
    #[arg(short, long)]
    json_output: bool,

    /// Print the directory contents once, sorted by name, and exit without starting the
    /// Collector or handoff socket. A "show statistics segment" smoke test.
    #[arg(long)]
    dump: bool,
}

impl Cli {
    fn into_config(self) -> StatSegConfig {
        let mut config = StatSegConfig::default();
        if let Some(socket_name) = self.socket_name {
            config.socket_name = socket_name;
        }
        config.size = self.size;
        if let Some(requested) = self.page_size {
            config.page_size = PageSize::Requested(requested);
        }
        config.per_node_counters = self.per_node_counters;
        config.update_interval = Duration::from_secs_f64(self.update_interval);
        config
    }
}

lazy_static! {
    static ref SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
}

fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

fn init_tracing(json_output: bool) {
    // Configure the fields emitted in log messages.
    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let builder = tracing_subscriber::fmt().with_max_level(Level::DEBUG);
    if json_output {
        builder.event_format(format.json().flatten_event(true)).init();
    } else {
        builder.event_format(format).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_output);

    let dump_only = cli.dump;
    let config = cli.into_config();

    info!("statsegd is starting, socket at {}", config.socket_name.display());

    let segment = Segment::create("statseg", config.size)
        .map_err(|err| anyhow::anyhow!("failed to create segment: {err}"))?;
    // SAFETY: called exactly once for this segment, as `build_heap` requires.
    let heap = unsafe { segment.build_heap() };
    let mut directory = segment.new_directory(&heap);

    if dump_only {
        for entry in directory.snapshot_sorted() {
            println!("{} {:?}", entry.name(), entry.kind());
        }
        return Ok(());
    }

    let runtime = Arc::new(SyntheticNodeRuntime::new());
    let mut collector = Collector::new(&heap, Box::new(Arc::clone(&runtime)), config.per_node_counters);

    let listener = handoff::HandoffListener::bind(&config.socket_name)
        .map_err(|err| anyhow::anyhow!("failed to bind handoff socket: {err}"))?;

    let (mut mailbox, dispatchbox) = channels::new_channel_web::<ChannelId, Message>(vec![
        ChannelId::MainThread,
        ChannelId::Collector,
    ]);
    let collector_mbox = mailbox
        .get_mailbox(&ChannelId::Collector)
        .expect("Collector channel was just created by new_channel_web");
    let main_mbox = mailbox
        .get_mailbox(&ChannelId::MainThread)
        .expect("MainThread channel was just created by new_channel_web");

    register_shutdown_signals()?;

    std::thread::scope(|scope| {
        let collector_dbox = dispatchbox.clone();
        scope.spawn(move || {
            let context = Context {
                channel_id: ChannelId::Collector,
                mbox: collector_mbox,
                dbox: collector_dbox,
            };
            collector.run(&mut directory, &context.mbox, config.update_interval);
        });

        scope.spawn(|| traffic_generator(&runtime));

        scope.spawn(|| listener.serve(segment.fd(), shutdown_requested));

        wait_for_shutdown(&main_mbox);

        info!("stopping the Collector");
        broadcast_abort(&dispatchbox);
    });

    info!("statsegd is exiting");
    Ok(())
}

/// Block until told to shut down, either by a signal (observed by polling
/// [`shutdown_requested`]) or by the Collector thread's own [`Context`] reporting it stopped —
/// normally or via panic — before anything asked it to.
fn wait_for_shutdown(main_mbox: &std::sync::mpsc::Receiver<Message>) {
    loop {
        if shutdown_requested() {
            return;
        }
        match main_mbox.recv_timeout(Duration::from_millis(200)) {
            Ok(Message::ThreadTerminate(channel_id)) => {
                error!("Collector thread {:?} stopped unexpectedly, shutting down", channel_id);
                request_shutdown();
                return;
            }
            Ok(Message::ThreadPanic(channel_id)) => {
                error!("Collector thread {:?} panicked, shutting down", channel_id);
                request_shutdown();
                return;
            }
            Ok(Message::ThreadAbort) => continue,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Advance the synthetic runtime's counters once a second so the Collector's input-rate and
/// per-node counters have something to publish, standing in for a real dataplane's worker
/// threads incrementing counters on the hot path.
fn traffic_generator(runtime: &SyntheticNodeRuntime) {
    while !shutdown_requested() {
        runtime.advance(1_000);
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn broadcast_abort(dispatchbox: &DispatchBox<ChannelId, Message>) {
    if dispatchbox.send(&ChannelId::Collector, Message::ThreadAbort).is_err() {
        warn!("failed to signal the Collector thread to abort");
    }
}

fn register_shutdown_signals() -> anyhow::Result<()> {
    signal::register_signal_callback(Signal::SIGINT, request_shutdown)
        .map_err(|e| anyhow::anyhow!("failed to register SIGINT handler: {e}"))?;
    signal::register_signal_callback(Signal::SIGTERM, request_shutdown)
        .map_err(|e| anyhow::anyhow!("failed to register SIGTERM handler: {e}"))?;
    Ok(())
}
