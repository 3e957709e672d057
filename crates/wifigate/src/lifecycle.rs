//! Client lifecycle: arrive, wait for admission, be served, disconnect.
//!
//! A [`ClientRecord`] is owned by exactly one task. The task body
//! ([`run_client`]) receives the shared [`AdmissionSystem`] explicitly and
//! drives it in a fixed order: acquire, assign, serve, release slot, release permit.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{AdmitError, ContractViolation};
use crate::event::ClientEvent;
use crate::permit::SlotId;
use crate::system::AdmissionSystem;

/// Cosmetic device type. Never affects admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Mobile,
    Pc,
    Tablet,
}

impl DeviceKind {
    const ROTATION: [DeviceKind; 3] = [DeviceKind::Mobile, DeviceKind::Pc, DeviceKind::Tablet];

    /// Kinds rotate mobile, pc, tablet by index.
    pub fn for_index(index: usize) -> Self {
        Self::ROTATION[index % Self::ROTATION.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Pc => "pc",
            Self::Tablet => "tablet",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Arrived,
    Waiting,
    Admitted,
    Served,
    Disconnected,
}

impl ClientState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Only forward moves are legal; `Waiting` may be skipped.
    pub fn can_advance_to(&self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (*self, next),
            (Arrived, Waiting)
                | (Arrived, Admitted)
                | (Waiting, Admitted)
                | (Admitted, Served)
                | (Served, Disconnected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arrived => "arrived",
            Self::Waiting => "waiting",
            Self::Admitted => "admitted",
            Self::Served => "served",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRecord {
    id: String,
    kind: DeviceKind,
    assigned_slot: Option<SlotId>,
    state: ClientState,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            assigned_slot: None,
            state: ClientState::Arrived,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn assigned_slot(&self) -> Option<SlotId> {
        self.assigned_slot
    }

    pub fn advance(&mut self, next: ClientState) -> Result<(), ContractViolation> {
        if !self.state.can_advance_to(next) {
            tracing::error!(
                client = %self.id,
                from = %self.state,
                to = %next,
                "Illegal lifecycle transition"
            );
            return Err(ContractViolation::IllegalTransition {
                client: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Move to `Admitted` holding `slot`. The slot never changes afterwards.
    pub fn admit(&mut self, slot: SlotId) -> Result<(), ContractViolation> {
        self.advance(ClientState::Admitted)?;
        self.assigned_slot = Some(slot);
        Ok(())
    }
}

/// Upper bounds for the random delays around each lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between arriving and asking for admission.
    pub arrival_max: Duration,
    /// Between admission and being served.
    pub connect_max: Duration,
    /// Between being served and disconnecting.
    pub serve_max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            arrival_max: Duration::from_millis(1000),
            connect_max: Duration::from_millis(1000),
            serve_max: Duration::from_millis(2000),
        }
    }
}

impl Pacing {
    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            arrival_max: Duration::ZERO,
            connect_max: Duration::ZERO,
            serve_max: Duration::ZERO,
        }
    }

    /// Same upper bound for every step.
    pub fn uniform(max: Duration) -> Self {
        Self {
            arrival_max: max,
            connect_max: max,
            serve_max: max,
        }
    }
}

/// Uniform random duration in `[0, max]`, at microsecond resolution.
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let micros = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(rand::thread_rng().gen_range(0..=micros))
}

async fn pause(max: Duration) {
    let delay = jitter(max);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// A client task that stopped before disconnecting.
#[derive(Debug, thiserror::Error)]
#[error("client {} stopped while {}: {error}", .record.id(), .record.state())]
pub struct ClientAbort {
    pub record: ClientRecord,
    #[source]
    pub error: AdmitError,
}

/// Run one client through its whole lifecycle.
pub async fn run_client(
    record: ClientRecord,
    system: &AdmissionSystem,
    pacing: &Pacing,
) -> Result<ClientRecord, ClientAbort> {
    run(record, system, pacing, None).await
}

/// Like [`run_client`], but gives up (with [`AdmitError::Cancelled`]) if
/// `cancel` fires before the client is admitted. Once admitted, the client
/// always completes so its slot and permit are returned.
pub async fn run_client_until(
    record: ClientRecord,
    system: &AdmissionSystem,
    pacing: &Pacing,
    cancel: &CancellationToken,
) -> Result<ClientRecord, ClientAbort> {
    run(record, system, pacing, Some(cancel)).await
}

async fn run(
    mut record: ClientRecord,
    system: &AdmissionSystem,
    pacing: &Pacing,
    cancel: Option<&CancellationToken>,
) -> Result<ClientRecord, ClientAbort> {
    let span = tracing::info_span!("client", client = %record.id(), device = %record.kind());
    let result = drive(&mut record, system, pacing, cancel)
        .instrument(span)
        .await;
    match result {
        Ok(()) => Ok(record),
        Err(error) => Err(ClientAbort { record, error }),
    }
}

async fn drive(
    record: &mut ClientRecord,
    system: &AdmissionSystem,
    pacing: &Pacing,
    cancel: Option<&CancellationToken>,
) -> Result<(), AdmitError> {
    let id = record.id().to_string();
    let device = record.kind();

    system.emit(ClientEvent::arrived(&id).with_device(device));

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AdmitError::Cancelled),
                _ = pause(pacing.arrival_max) => {}
            }
        }
        None => pause(pacing.arrival_max).await,
    }

    // Best-effort: the count may change before acquire runs.
    if system.available_permits() == 0 {
        record.advance(ClientState::Waiting)?;
        system.emit(ClientEvent::waiting(&id).with_device(device));
    }

    let slot = match cancel {
        Some(token) => system.admit_until(&id, token).await?,
        None => system.admit(&id).await?,
    };
    record.admit(slot)?;

    pause(pacing.connect_max).await;

    record.advance(ClientState::Served)?;
    system.emit(ClientEvent::served(&id, slot));

    pause(pacing.serve_max).await;

    system.depart(&id, slot)?;
    record.advance(ClientState::Disconnected)?;
    tracing::debug!(%slot, "Client finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::EventKind;
    use crate::sink::{ChannelSink, drain_events};

    #[test]
    fn device_kinds_rotate() {
        let kinds: Vec<DeviceKind> = (0..4).map(DeviceKind::for_index).collect();
        assert_eq!(
            kinds,
            vec![
                DeviceKind::Mobile,
                DeviceKind::Pc,
                DeviceKind::Tablet,
                DeviceKind::Mobile,
            ]
        );
    }

    #[test]
    fn waiting_is_optional_but_nothing_else_is() {
        let mut direct = ClientRecord::new("C1", DeviceKind::Pc);
        direct.admit(SlotId::new(0)).unwrap();
        direct.advance(ClientState::Served).unwrap();
        direct.advance(ClientState::Disconnected).unwrap();
        assert!(direct.state().is_terminal());

        let mut skipping = ClientRecord::new("C2", DeviceKind::Pc);
        let err = skipping.advance(ClientState::Served).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::IllegalTransition {
                client: "C2".to_string(),
                from: ClientState::Arrived,
                to: ClientState::Served,
            }
        );
        assert_eq!(skipping.state(), ClientState::Arrived);
    }

    #[test]
    fn disconnected_is_absorbing() {
        use ClientState::*;
        for next in [Arrived, Waiting, Admitted, Served, Disconnected] {
            assert!(!Disconnected.can_advance_to(next));
        }
    }

    #[test]
    fn jitter_stays_within_bound() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(3)) <= Duration::from_millis(3));
        }
    }

    #[tokio::test]
    async fn client_walks_every_state_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        let system = AdmissionSystem::new(1).unwrap().with_sink(Arc::new(sink));

        let record = ClientRecord::new("C1", DeviceKind::Mobile);
        let record = run_client(record, &system, &Pacing::immediate())
            .await
            .unwrap();

        assert_eq!(record.state(), ClientState::Disconnected);
        assert_eq!(record.assigned_slot(), Some(SlotId::new(0)));

        let kinds: Vec<EventKind> = drain_events(&mut rx).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Arrived,
                EventKind::Admitted,
                EventKind::Served,
                EventKind::Disconnected,
            ]
        );
        assert_eq!(system.available_permits(), 1);
    }

    #[tokio::test]
    async fn exhausted_gate_marks_client_waiting() {
        let (sink, mut rx) = ChannelSink::channel();
        let system = Arc::new(AdmissionSystem::new(1).unwrap().with_sink(Arc::new(sink)));
        let held = system.admit("C0").await.unwrap();

        let task = {
            let system = Arc::clone(&system);
            tokio::spawn(async move {
                run_client(
                    ClientRecord::new("C1", DeviceKind::Pc),
                    &system,
                    &Pacing::immediate(),
                )
                .await
            })
        };
        while system.snapshot().waiting == 0 {
            tokio::task::yield_now().await;
        }
        system.depart("C0", held).unwrap();

        let record = task.await.unwrap().unwrap();
        assert_eq!(record.state(), ClientState::Disconnected);

        let waiting: Vec<ClientEvent> = drain_events(&mut rx)
            .into_iter()
            .filter(|e| e.kind == EventKind::Waiting)
            .collect();
        assert_eq!(
            waiting,
            vec![ClientEvent::waiting("C1").with_device(DeviceKind::Pc)]
        );
    }

    #[tokio::test]
    async fn cancelled_client_stops_while_waiting() {
        let system = Arc::new(AdmissionSystem::new(1).unwrap());
        let held = system.admit("C0").await.unwrap();
        let cancel = CancellationToken::new();

        let task = {
            let system = Arc::clone(&system);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_client_until(
                    ClientRecord::new("C1", DeviceKind::Tablet),
                    &system,
                    &Pacing::immediate(),
                    &cancel,
                )
                .await
            })
        };
        while system.snapshot().waiting == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let abort = task.await.unwrap().unwrap_err();
        assert_eq!(abort.error, AdmitError::Cancelled);
        assert_eq!(abort.record.state(), ClientState::Waiting);
        assert_eq!(abort.record.assigned_slot(), None);

        let snapshot = system.snapshot();
        assert_eq!(snapshot.waiting, 0);
        assert_eq!(snapshot.holders, 1);

        system.depart("C0", held).unwrap();
        assert_eq!(system.available_permits(), 1);
    }
}
