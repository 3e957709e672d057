//! Spawns the simulated devices and waits for all of them.
//!
//! Flow:
//! 1. Build the admission system around a channel sink, drained by a blocking
//!    writer task that feeds the console (tracing) and file sinks
//! 2. Start devices C1..Cn with a random stagger between starts
//! 3. Close the gate if the shutdown future resolves first
//! 4. Join every device, drain the writer and tally outcomes

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wifigate::lifecycle::jitter;
use wifigate::{
    AdmissionSystem, ChannelSink, ClientAbort, ClientEvent, ClientRecord, DeviceKind, EventSink,
    FanoutSink, LineSink, TracingSink, run_client,
};

use crate::config::SimConfig;

pub const SUMMARY_LINE: &str = "All devices done!";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimReport {
    /// Devices that reached DISCONNECTED.
    pub completed: usize,
    /// Devices stopped before admission (gate closed).
    pub interrupted: usize,
    /// Devices that hit a contract violation or panicked.
    pub failed: usize,
}

impl SimReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Run a whole simulation, writing event lines to `writer`.
pub async fn run<W, S>(config: &SimConfig, writer: W, shutdown: S) -> anyhow::Result<SimReport>
where
    W: Write + Send + 'static,
    S: Future<Output = ()> + Send + 'static,
{
    let system = AdmissionSystem::new(config.capacity)?;
    let lines = Arc::new(LineSink::new(writer));
    let (sink, rx) = ChannelSink::channel();
    let event_writer = spawn_event_writer(rx, Arc::clone(&lines));
    let system = Arc::new(system.with_sink(Arc::new(sink)));

    info!(
        capacity = config.capacity,
        devices = config.devices,
        "Starting simulation"
    );

    let watcher = {
        let system = Arc::clone(&system);
        tokio::spawn(async move {
            shutdown.await;
            warn!("Shutdown requested, closing admission gate");
            system.close();
        })
    };

    let report = spawn_and_join(&system, config).await;
    watcher.abort();
    // Wait for the watcher's copy of the system to drop.
    let _ = watcher.await;
    let snapshot = system.snapshot();

    // Last sender goes with the system; the writer then drains and exits.
    drop(system);
    event_writer.await.context("event writer task failed")?;

    lines.write_line(SUMMARY_LINE);
    lines.flush()?;

    info!(
        completed = report.completed,
        interrupted = report.interrupted,
        failed = report.failed,
        available_permits = snapshot.available_permits,
        "{SUMMARY_LINE}"
    );

    Ok(report)
}

/// Record events off the async workers, in the order they were sent.
fn spawn_event_writer<W>(
    mut rx: mpsc::UnboundedReceiver<ClientEvent>,
    lines: Arc<LineSink<W>>,
) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let sink = FanoutSink::new().with(Arc::new(TracingSink)).with(lines);
        while let Some(event) = rx.blocking_recv() {
            sink.record(&event);
        }
    })
}

async fn spawn_and_join(system: &Arc<AdmissionSystem>, config: &SimConfig) -> SimReport {
    let mut handles = Vec::with_capacity(config.devices);
    for index in 0..config.devices {
        if system.gate().is_closed() {
            info!(remaining = config.devices - index, "Gate closed, not starting remaining devices");
            break;
        }

        let record = ClientRecord::new(format!("C{}", index + 1), DeviceKind::for_index(index));
        let system = Arc::clone(system);
        let pacing = config.pacing;
        handles.push(tokio::spawn(async move {
            run_client(record, &system, &pacing).await
        }));

        let stagger = jitter(config.stagger_max);
        if !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }
    }

    let mut report = SimReport::default();
    for result in join_all(handles).await {
        match result {
            Ok(Ok(_)) => report.completed += 1,
            Ok(Err(ClientAbort { record, error })) if error.is_cancellation() => {
                info!(client = %record.id(), state = %record.state(), %error, "Device stopped early");
                report.interrupted += 1;
            }
            Ok(Err(abort)) => {
                error!(error = %abort, "Device hit a contract violation");
                report.failed += 1;
            }
            Err(e) => {
                error!(error = %e, "Device task panicked");
                report.failed += 1;
            }
        }
    }
    report
}
