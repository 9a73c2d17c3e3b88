use super::orchestrator::MarketMonitor;
use crate::models::ConnectionStatus;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct HealthState {
    connected: bool,
    last_data_at: Option<DateTime<Local>>,
    // Last sign of life: fresh data, a (re)start or a successful reconnect
    last_heartbeat: Option<DateTime<Local>>,
    reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub status: ConnectionStatus,
    pub last_data_at: Option<DateTime<Local>>,
    pub seconds_since_last_data: Option<i64>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCheck {
    /// Monitoring is off, nothing to watch.
    Idle,
    Healthy,
    Reconnected { restarted_loop: bool },
    ReconnectFailed,
}

#[derive(Debug, Default)]
pub struct ConnectionHealth {
    state: Mutex<HealthState>,
}

impl ConnectionHealth {
    pub async fn record_data(&self, now: DateTime<Local>) {
        let mut s = self.state.lock().await;
        s.connected = true;
        s.last_data_at = Some(now);
        s.last_heartbeat = Some(now);
    }

    /// Starts the staleness clock without claiming data has arrived.
    pub async fn mark_started(&self, now: DateTime<Local>) {
        self.state.lock().await.last_heartbeat = Some(now);
    }

    pub async fn mark_disconnected(&self) {
        self.state.lock().await.connected = false;
    }

    pub async fn record_reconnect(&self, now: DateTime<Local>, succeeded: bool) {
        let mut s = self.state.lock().await;
        s.reconnect_attempts += 1;
        if succeeded {
            s.connected = true;
            s.last_heartbeat = Some(now);
        }
    }

    /// True when the last heartbeat is older than `timeout`.
    pub async fn is_stale(&self, now: DateTime<Local>, timeout: Duration) -> bool {
        let s = self.state.lock().await;
        s.last_heartbeat.is_some_and(|hb| {
            (now - hb)
                .to_std()
                .map(|since| since > timeout)
                .unwrap_or(false)
        })
    }

    pub async fn status(&self) -> ConnectionStatus {
        if self.state.lock().await.connected {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub async fn report(&self, now: DateTime<Local>) -> ConnectionReport {
        let s = self.state.lock().await;
        ConnectionReport {
            status: if s.connected {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            },
            last_data_at: s.last_data_at,
            seconds_since_last_data: s.last_data_at.map(|t| (now - t).num_seconds()),
            reconnect_attempts: s.reconnect_attempts,
        }
    }
}

/// Periodically checks the feed for staleness and reconnects, until shutdown.
pub async fn stale_monitor_task(
    monitor: Arc<MarketMonitor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let check_interval = monitor.config().stale_check_interval;
    info!(check_secs = check_interval.as_secs(), "stale connection monitor started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(check_interval) => {
                let outcome = monitor.check_connection().await;
                debug!(?outcome, "connection check");
            }
            _ = shutdown_rx.recv() => {
                info!("stale connection monitor shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn fresh_health_is_never_stale() {
        let health = ConnectionHealth::default();
        assert!(!health.is_stale(Local::now(), Duration::from_secs(60)).await);
        assert_eq!(health.status().await, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn stale_after_timeout_without_data() {
        let health = ConnectionHealth::default();
        let t0 = Local::now();
        health.record_data(t0).await;

        let timeout = Duration::from_secs(60);
        assert!(!health.is_stale(t0 + TimeDelta::seconds(60), timeout).await);
        assert!(health.is_stale(t0 + TimeDelta::seconds(61), timeout).await);
    }

    #[tokio::test]
    async fn successful_reconnect_resets_the_clock() {
        let health = ConnectionHealth::default();
        let t0 = Local::now();
        health.record_data(t0).await;
        health.mark_disconnected().await;

        let later = t0 + TimeDelta::seconds(90);
        health.record_reconnect(later, true).await;

        assert!(!health.is_stale(later + TimeDelta::seconds(30), Duration::from_secs(60)).await);
        let report = health.report(later).await;
        assert_eq!(report.reconnect_attempts, 1);
        assert_eq!(report.status, ConnectionStatus::Connected);
        assert_eq!(report.seconds_since_last_data, Some(90));
    }
}
