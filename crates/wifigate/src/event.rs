//! Client lifecycle events delivered to an [`EventSink`](crate::sink::EventSink).

use serde::Serialize;

use crate::lifecycle::DeviceKind;
use crate::permit::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Arrived,
    Waiting,
    Admitted,
    Served,
    Disconnected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arrived => "ARRIVED",
            Self::Waiting => "WAITING",
            Self::Admitted => "ADMITTED",
            Self::Served => "SERVED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEvent {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceKind>,
    #[serde(rename = "event")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotId>,
}

impl ClientEvent {
    fn new(client_id: &str, kind: EventKind, slot: Option<SlotId>) -> Self {
        Self {
            client_id: client_id.to_string(),
            device: None,
            kind,
            slot,
        }
    }

    pub fn arrived(client_id: &str) -> Self {
        Self::new(client_id, EventKind::Arrived, None)
    }

    pub fn waiting(client_id: &str) -> Self {
        Self::new(client_id, EventKind::Waiting, None)
    }

    pub fn admitted(client_id: &str, slot: SlotId) -> Self {
        Self::new(client_id, EventKind::Admitted, Some(slot))
    }

    pub fn served(client_id: &str, slot: SlotId) -> Self {
        Self::new(client_id, EventKind::Served, Some(slot))
    }

    pub fn disconnected(client_id: &str, slot: SlotId) -> Self {
        Self::new(client_id, EventKind::Disconnected, Some(slot))
    }

    pub fn with_device(mut self, device: DeviceKind) -> Self {
        self.device = Some(device);
        self
    }
}

/// Human-readable log line, one per event.
impl std::fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = &self.client_id;
        match (self.kind, self.slot) {
            (EventKind::Arrived, _) => match self.device {
                Some(device) => write!(f, "({id})({device}) arrived"),
                None => write!(f, "({id}) arrived"),
            },
            (EventKind::Waiting, _) => match self.device {
                Some(device) => write!(f, "{id}({device}) arrived and waiting"),
                None => write!(f, "{id} arrived and waiting"),
            },
            (kind, Some(slot)) => {
                let action = match kind {
                    EventKind::Admitted => "Occupied",
                    EventKind::Served => "Being Served",
                    _ => "Logged out",
                };
                write!(f, "Connection {}: {id} {action}", slot.connection_number())
            }
            (kind, None) => write!(f, "{id} {}", kind.as_str()),
        }
    }
}
