pub mod connection;
pub mod orchestrator;

use crate::config::{
    CHART_HISTORY_CAPACITY, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_CYCLE_SECS,
    DEFAULT_QUOTE_TIMEOUT_SECS, DEFAULT_STALE_CHECK_SECS, RECENT_ALERTS_CAPACITY,
};
use crate::rules::AlertCadence;
use chrono::{DateTime, Local, NaiveDate};
use std::time::Duration;

pub use connection::{ConnectionCheck, ConnectionHealth, ConnectionReport, stale_monitor_task};
pub use orchestrator::{
    CycleReport, MarketMonitor, MonitorStatus, SettingsUpdateOutcome, SharedMonitor, StartOutcome,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cycle_interval: Duration,
    pub quote_timeout: Duration,
    pub connection_timeout: Duration,
    pub stale_check_interval: Duration,
    pub alert_cadence: AlertCadence,
    pub chart_capacity: usize,
    pub recent_alerts_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_SECS),
            quote_timeout: Duration::from_secs(DEFAULT_QUOTE_TIMEOUT_SECS),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            stale_check_interval: Duration::from_secs(DEFAULT_STALE_CHECK_SECS),
            alert_cadence: AlertCadence::EveryCycle,
            chart_capacity: CHART_HISTORY_CAPACITY,
            recent_alerts_capacity: RECENT_ALERTS_CAPACITY,
        }
    }
}
