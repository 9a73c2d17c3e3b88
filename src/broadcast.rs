use crate::models::{AlertRecord, ConnectionStatus, MarketSnapshot};
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatusEvent {
    pub status: ConnectionStatus,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Everything pushed to live viewers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    DataUpdate(Box<MarketSnapshot>),
    Alert(AlertRecord),
    ConnectionStatus(ConnectionStatusEvent),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::DataUpdate(_) => "data_update",
            MonitorEvent::Alert(_) => "alert",
            MonitorEvent::ConnectionStatus(_) => "connection_status",
        }
    }
}

/// Fan-out to any number of subscribers. Publishing with nobody listening is fine.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        let name = event.name();
        let reached = self.tx.send(event).unwrap_or(0);
        trace!(event = name, reached, "published");
        reached
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
