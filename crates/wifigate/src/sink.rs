//! Event sinks.
//!
//! The admission system only knows [`EventSink`]; where events end up (tracing,
//! a log file, an in-memory channel for tests) is decided by whoever builds it.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::event::ClientEvent;

/// Anything that accepts client events. Must not block for long: some events
/// are recorded while the slot allocator lock is held.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &ClientEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: &ClientEvent) {}
}

/// Emits each event as a structured `tracing` event at INFO.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &ClientEvent) {
        tracing::info!(
            target: "wifigate::events",
            client = %event.client_id,
            event = event.kind.as_str(),
            device = ?event.device,
            slot = ?event.slot.map(|s| s.index()),
            "{}",
            event
        );
    }
}

/// Forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn record(&self, event: &ClientEvent) {
        if self.tx.is_closed() {
            return;
        }
        let _ = self.tx.send(event.clone());
    }
}

/// Collect everything currently buffered in a [`ChannelSink`] receiver.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Writes one human-readable line per event.
///
/// Writes happen on the caller's thread. Slot events are recorded under the
/// allocator lock, so for file output put this behind a [`ChannelSink`] and
/// drain it elsewhere.
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    // A panic mid-write leaves at worst a partial line; keep writing.
    fn lock(&self) -> MutexGuard<'_, W> {
        self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Line sink mutex poisoned - recovering writer");
            poisoned.into_inner()
        })
    }

    /// Write a free-form line (e.g. a run summary) through the same writer.
    pub fn write_line(&self, line: &str) {
        if let Err(e) = writeln!(self.lock(), "{line}") {
            tracing::warn!(error = %e, "Failed to write event line");
        }
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.lock().flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> EventSink for LineSink<W> {
    fn record(&self, event: &ClientEvent) {
        self.write_line(&event.to_string());
    }
}

/// Delivers each event to every inner sink, in insertion order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &ClientEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
