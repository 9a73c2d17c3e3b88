//! Market data orchestrator.
//!
//! Owns the live `MarketSnapshot` and drives the INACTIVE/ACTIVE state machine.
//! While active, a background task runs one cycle per `cycle_interval`:
//! fetch quotes, aggregate, persist, alert, swap the snapshot, broadcast.
//! Readers get clones out of a `watch` channel and never see a half-built snapshot.

use super::connection::{ConnectionCheck, ConnectionHealth, ConnectionReport};
use super::{Clock, MonitorConfig};
use crate::allocator::allocate;
use crate::broadcast::{Broadcaster, ConnectionStatusEvent, MonitorEvent};
use crate::config::Basket;
use crate::error::{ConfigError, MonitorError, QuoteError};
use crate::expiry::{MonitoringWindow, days_to_expiry, monitoring_window, resolve_expiry};
use crate::models::{
    AlertRecord, ChartPoint, ConnectionStatus, ConstituentQuote, ExportRow, HistoricalRecord,
    HistoryByLevel, Instrument, MarketSnapshot, MoneynessLevel, Settings, SettingsUpdate,
};
use crate::processor::{compute_all_levels, freeze_all_levels};
use crate::provider::{FetchOutcome, SharedQuoteProvider};
use crate::rules::{self, AlertGate};
use crate::store::SharedMarketStore;
use crate::utility::Timer;
use chrono::{DateTime, Local, NaiveDate};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SLOW_CYCLE_MS: u128 = 10_000;

pub type SharedMonitor = Arc<MarketMonitor>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { window: MonitoringWindow },
    AlreadyActive { window: MonitoringWindow },
    OutsideWindow { window: MonitoringWindow },
}

impl StartOutcome {
    pub fn is_active(&self) -> bool {
        !matches!(self, StartOutcome::OutsideWindow { .. })
    }

    pub fn window(&self) -> &MonitoringWindow {
        match self {
            StartOutcome::Started { window }
            | StartOutcome::AlreadyActive { window }
            | StartOutcome::OutsideWindow { window } => window,
        }
    }

    pub fn message(&self) -> String {
        let w = self.window();
        match self {
            StartOutcome::Started { .. } => format!(
                "Monitoring started. {} days to expiry ({})",
                w.days_to_expiry, w.expiry.date
            ),
            StartOutcome::AlreadyActive { .. } => "Monitoring is already active".to_string(),
            StartOutcome::OutsideWindow { .. } => format!(
                "Monitoring will start {} days from now. Current days to expiry: {}",
                w.days_to_expiry - w.monitoring_days as i64,
                w.days_to_expiry
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Local>,
    pub expiry_date: NaiveDate,
    pub days_to_expiry: i64,
    pub fresh_instruments: usize,
    pub unavailable: Vec<String>,
    pub frozen_levels: Vec<MoneynessLevel>,
    pub persisted: bool,
    pub alerts: Vec<AlertRecord>,
    pub net_premium: BTreeMap<MoneynessLevel, f64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsUpdateOutcome {
    pub settings: Settings,
    /// False when the store rejected the write; the new values still apply in memory.
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub monitoring_active: bool,
    pub connection: ConnectionReport,
    pub expiry_date: Option<NaiveDate>,
    pub days_to_expiry: i64,
    pub last_updated: Option<DateTime<Local>>,
    pub last_persisted_at: Option<DateTime<Local>>,
    pub net_premium: BTreeMap<MoneynessLevel, f64>,
    pub subscribers: usize,
    pub provider: &'static str,
}

pub struct MarketMonitor {
    basket: Basket,
    provider: SharedQuoteProvider,
    store: SharedMarketStore,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    broadcaster: Broadcaster,
    health: ConnectionHealth,

    snapshot_tx: watch::Sender<MarketSnapshot>,
    active_tx: watch::Sender<bool>,
    settings: RwLock<Settings>,
    chart: Mutex<VecDeque<ChartPoint>>,
    recent_alerts: Mutex<VecDeque<AlertRecord>>,
    alert_gate: Mutex<AlertGate>,

    cycle_task: Mutex<Option<JoinHandle<()>>>,
    // One cycle at a time, whether from the loop or a direct call
    cycle_lock: Mutex<()>,
    // Serializes start/stop
    transition_lock: Mutex<()>,
}

impl MarketMonitor {
    /// Validates the basket and loads settings. Starts INACTIVE.
    pub async fn new(
        basket: Basket,
        provider: SharedQuoteProvider,
        store: SharedMarketStore,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<SharedMonitor, ConfigError> {
        basket.validate()?;

        let settings = match store.get_settings().await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                let defaults = Settings::default();
                if let Err(e) = store.update_settings(&defaults).await {
                    warn!(error = %e, "failed to store default settings");
                }
                defaults
            }
            Err(e) => {
                error!(error = %e, "failed to load settings, using defaults");
                Settings::default()
            }
        };

        let (snapshot_tx, _) = watch::channel(MarketSnapshot::default());
        let (active_tx, _) = watch::channel(false);
        let alert_gate = AlertGate::new(config.alert_cadence);

        Ok(Arc::new(Self {
            basket,
            provider,
            store,
            config,
            clock,
            broadcaster: Broadcaster::default(),
            health: ConnectionHealth::default(),
            snapshot_tx,
            active_tx,
            settings: RwLock::new(settings),
            chart: Mutex::new(VecDeque::new()),
            recent_alerts: Mutex::new(VecDeque::new()),
            alert_gate: Mutex::new(alert_gate),
            cycle_task: Mutex::new(None),
            cycle_lock: Mutex::new(()),
            transition_lock: Mutex::new(()),
        }))
    }

    // -----------------------------------------------
    // STATE MACHINE
    // -----------------------------------------------

    pub fn is_active(&self) -> bool {
        *self.active_tx.borrow()
    }

    /// Goes ACTIVE only inside the monitoring window. Lots are allocated afresh on every start.
    pub async fn start_monitoring(self: &Arc<Self>) -> StartOutcome {
        let _transition = self.transition_lock.lock().await;

        let settings = self.settings().await;
        let window = monitoring_window(self.clock.today(), settings.monitoring_days);

        if self.is_active() {
            return StartOutcome::AlreadyActive { window };
        }

        self.snapshot_tx.send_modify(|s| {
            s.expiry_date = Some(window.expiry.date);
            s.days_to_expiry = window.days_to_expiry;
        });

        if !window.within_window {
            info!(
                days_to_expiry = window.days_to_expiry,
                monitoring_days = window.monitoring_days,
                "outside monitoring window, staying inactive"
            );
            return StartOutcome::OutsideWindow { window };
        }

        let lots = allocate(&self.basket.constituents);
        info!(
            constituents = lots.len(),
            expiry = %window.expiry.date,
            days_to_expiry = window.days_to_expiry,
            "monitoring started"
        );
        self.snapshot_tx.send_modify(|s| {
            s.normalized_lots = lots;
            s.monitoring_active = true;
        });
        self.alert_gate.lock().await.reset();
        self.health.mark_started(self.clock.now()).await;
        self.active_tx.send_replace(true);
        self.ensure_cycle_loop().await;

        StartOutcome::Started { window }
    }

    /// Returns whether monitoring was active. The loop exits at its next iteration boundary.
    pub async fn stop_monitoring(&self) -> bool {
        let _transition = self.transition_lock.lock().await;

        let was_active = self.active_tx.send_replace(false);
        self.snapshot_tx.send_modify(|s| s.monitoring_active = false);
        if was_active {
            info!("monitoring stopped");
        }
        was_active
    }

    /// Stops and waits for the cycle loop to finish.
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        let handle = self.cycle_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "cycle loop ended abnormally");
            }
        }
    }

    pub async fn cycle_loop_running(&self) -> bool {
        self.cycle_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Spawns the cycle loop unless one is already running. Returns true if it spawned.
    async fn ensure_cycle_loop(self: &Arc<Self>) -> bool {
        let mut task = self.cycle_task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move { monitor.cycle_loop().await }));
        true
    }

    async fn cycle_loop(self: Arc<Self>) {
        let mut active_rx = self.active_tx.subscribe();
        debug!(interval_secs = self.config.cycle_interval.as_secs(), "cycle loop running");

        loop {
            let active = *active_rx.borrow_and_update();
            if !active {
                break;
            }

            match self.run_cycle().await {
                Ok(report) => debug!(
                    fresh = report.fresh_instruments,
                    unavailable = report.unavailable.len(),
                    alerts = report.alerts.len(),
                    elapsed_ms = report.elapsed_ms,
                    "cycle complete"
                ),
                Err(MonitorError::NotActive) => break,
                Err(e) => warn!(error = %e, "cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
                changed = active_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("cycle loop stopped");
    }

    // -----------------------------------------------
    // CYCLE
    // -----------------------------------------------

    /// One full update. Quote and store failures never abort the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, MonitorError> {
        let _cycle = self.cycle_lock.lock().await;
        if !self.is_active() {
            return Err(MonitorError::NotActive);
        }

        let timer = Timer::start_with_threshold("dispersion cycle", SLOW_CYCLE_MS);
        let now = self.clock.now();
        let today = now.date_naive();

        // (1) expiry
        let expiry = resolve_expiry(today);
        let days = days_to_expiry(today, expiry.date);

        let mut next = self.snapshot();
        next.expiry_date = Some(expiry.date);
        next.days_to_expiry = days;

        // (2) quotes, all instruments concurrently
        let index_instrument = self.basket.index_instrument();
        let constituent_instruments = self.basket.constituent_instruments();
        let (index_outcome, constituent_outcomes) = tokio::join!(
            self.fetch_quote(&index_instrument, expiry.date),
            join_all(
                constituent_instruments
                    .iter()
                    .map(|i| self.fetch_quote(i, expiry.date))
            )
        );

        let mut fresh = 0usize;
        let mut unavailable = Vec::new();

        let index_fresh = match index_outcome {
            FetchOutcome::Fresh(quote) => {
                next.index = quote;
                fresh += 1;
                true
            }
            FetchOutcome::Unavailable(e) => {
                warn!(symbol = %index_instrument.symbol, error = %e, "quote unavailable, keeping previous values");
                unavailable.push(index_instrument.symbol.clone());
                false
            }
        };

        for (spec, outcome) in self.basket.constituents.iter().zip(constituent_outcomes) {
            match outcome {
                FetchOutcome::Fresh(quote) => {
                    next.constituents.insert(
                        spec.symbol.clone(),
                        ConstituentQuote {
                            quote,
                            weight: spec.weight,
                            lot_size: spec.lot_size,
                        },
                    );
                    fresh += 1;
                }
                FetchOutcome::Unavailable(e) => {
                    warn!(symbol = %spec.symbol, error = %e, "quote unavailable, keeping previous values");
                    unavailable.push(spec.symbol.clone());
                }
            }
        }

        // (3) aggregate; a stale index quote prices nothing
        let aggregation = if index_fresh {
            compute_all_levels(
                self.basket.index.lot_size,
                &next.index,
                &next.constituents,
                &next.normalized_lots,
                &next.net_premium,
            )
        } else {
            debug!("index quote not refreshed, every level keeps its previous value");
            freeze_all_levels(&next.net_premium)
        };
        next.net_premium = aggregation.net_premium;
        next.premium_breakdown = aggregation.computed;

        // (4) persist
        let rows = historical_rows(&next, now, expiry.date, days);
        let persisted = if rows.is_empty() {
            debug!("nothing priced yet, skipping persistence");
            false
        } else {
            match self.store.append_snapshot(&rows).await {
                Ok(()) => {
                    next.last_persisted_at = Some(now);
                    true
                }
                Err(e) => {
                    error!(error = %e, "failed to persist snapshot, continuing");
                    false
                }
            }
        };

        // (5) alerts
        let settings = self.settings().await;
        let candidates = rules::evaluate(&next.net_premium, &settings, now);
        let alerts = self.alert_gate.lock().await.admit(candidates);
        for alert in &alerts {
            warn!(level = %alert.level, net_premium = alert.net_premium, "{}", alert.message);
            if let Err(e) = self.store.append_alert(alert).await {
                error!(error = %e, level = %alert.level, "failed to persist alert");
            }
        }

        // (6) freshness
        if fresh > 0 {
            self.health.record_data(now).await;
        }
        next.connection_status = self.health.status().await;
        next.last_updated = Some(now);
        {
            // Serialized with start/stop so a concurrent stop is never overwritten
            let _transition = self.transition_lock.lock().await;
            next.monitoring_active = self.is_active();
            self.snapshot_tx.send_replace(next.clone());
        }

        // (7) chart
        {
            let mut chart = self.chart.lock().await;
            chart.push_back(ChartPoint::from_snapshot(&next, now));
            while chart.len() > self.config.chart_capacity {
                chart.pop_front();
            }
        }
        {
            let mut recent = self.recent_alerts.lock().await;
            for alert in &alerts {
                recent.push_back(alert.clone());
            }
            while recent.len() > self.config.recent_alerts_capacity {
                recent.pop_front();
            }
        }

        let net_premium = next.net_premium.clone();
        self.broadcaster
            .publish(MonitorEvent::DataUpdate(Box::new(next)));
        for alert in &alerts {
            self.broadcaster.publish(MonitorEvent::Alert(alert.clone()));
        }

        if !unavailable.is_empty() {
            warn!(
                unavailable = ?unavailable,
                "some instruments kept their previous quotes"
            );
        }

        let elapsed = timer.stop();
        Ok(CycleReport {
            timestamp: now,
            expiry_date: expiry.date,
            days_to_expiry: days,
            fresh_instruments: fresh,
            unavailable,
            frozen_levels: aggregation.frozen,
            persisted,
            alerts,
            net_premium,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    async fn fetch_quote(&self, instrument: &Instrument, expiry: NaiveDate) -> FetchOutcome {
        let request = self
            .provider
            .get_quotes(instrument, &MoneynessLevel::ALL, expiry);

        match tokio::time::timeout(self.config.quote_timeout, request).await {
            Ok(Ok(quote)) => FetchOutcome::Fresh(quote),
            Ok(Err(e)) => FetchOutcome::Unavailable(e),
            Err(_) => FetchOutcome::Unavailable(QuoteError::Timeout(self.config.quote_timeout)),
        }
    }

    // -----------------------------------------------
    // CONNECTION
    // -----------------------------------------------

    /// Reconnects the provider when no data arrived within `connection_timeout`.
    pub async fn check_connection(self: &Arc<Self>) -> ConnectionCheck {
        if !self.is_active() {
            return ConnectionCheck::Idle;
        }

        let now = self.clock.now();
        if !self
            .health
            .is_stale(now, self.config.connection_timeout)
            .await
        {
            return ConnectionCheck::Healthy;
        }

        warn!(
            timeout_secs = self.config.connection_timeout.as_secs(),
            provider = self.provider.name(),
            "no market data within timeout, reconnecting"
        );
        self.health.mark_disconnected().await;
        self.set_connection_status(
            ConnectionStatus::Disconnected,
            "No market data received within timeout, reconnecting",
            now,
        );

        match self.provider.reconnect().await {
            Ok(()) => {
                self.health.record_reconnect(now, true).await;
                let restarted_loop = self.ensure_cycle_loop().await;
                if restarted_loop {
                    warn!("cycle loop had exited, restarted");
                }
                info!(provider = self.provider.name(), "reconnected to market data feed");
                self.set_connection_status(
                    ConnectionStatus::Connected,
                    "Reconnected to market data feed",
                    now,
                );
                ConnectionCheck::Reconnected { restarted_loop }
            }
            Err(e) => {
                self.health.record_reconnect(now, false).await;
                error!(error = %e, provider = self.provider.name(), "reconnect failed");
                ConnectionCheck::ReconnectFailed
            }
        }
    }

    fn set_connection_status(&self, status: ConnectionStatus, message: &str, now: DateTime<Local>) {
        self.snapshot_tx.send_modify(|s| s.connection_status = status);
        self.broadcaster
            .publish(MonitorEvent::ConnectionStatus(ConnectionStatusEvent {
                status,
                message: message.to_string(),
                timestamp: now,
            }));
    }

    // -----------------------------------------------
    // ACCESSORS
    // -----------------------------------------------

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver for live events plus the latest snapshot, if a cycle has produced one.
    pub fn subscribe(&self) -> (Option<MarketSnapshot>, broadcast::Receiver<MonitorEvent>) {
        let rx = self.broadcaster.subscribe();
        let snapshot = self.snapshot();
        let latest = snapshot.last_updated.is_some().then_some(snapshot);
        (latest, rx)
    }

    pub async fn chart_history(&self) -> Vec<ChartPoint> {
        self.chart.lock().await.iter().cloned().collect()
    }

    /// Alerts raised since startup, newest first.
    pub async fn recent_alerts(&self) -> Vec<AlertRecord> {
        self.recent_alerts.lock().await.iter().rev().cloned().collect()
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<SettingsUpdateOutcome, MonitorError> {
        let mut current = self.settings.write().await;
        let merged = update.apply_to(&current)?;

        let persisted = match self.store.update_settings(&merged).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to persist settings, keeping them in memory");
                false
            }
        };

        info!(
            alert_threshold = merged.alert_threshold,
            monitoring_days = merged.monitoring_days,
            selected_otm_level = %merged.selected_otm_level,
            auto_alerts_enabled = merged.auto_alerts_enabled,
            "settings updated"
        );
        *current = merged.clone();

        Ok(SettingsUpdateOutcome {
            settings: merged,
            persisted,
        })
    }

    pub async fn history(&self, limit: i64) -> HistoryByLevel {
        self.store.read_history(limit).await.unwrap_or_else(|e| {
            error!(error = %e, "failed to read history");
            HistoryByLevel::new()
        })
    }

    pub async fn alerts(&self, limit: i64) -> Vec<AlertRecord> {
        self.store.read_alerts(limit).await.unwrap_or_else(|e| {
            error!(error = %e, "failed to read alerts");
            Vec::new()
        })
    }

    pub async fn export_level(&self, level: MoneynessLevel) -> Vec<ExportRow> {
        self.store.export_level(level).await.unwrap_or_else(|e| {
            error!(error = %e, %level, "failed to export history");
            Vec::new()
        })
    }

    pub async fn status(&self) -> MonitorStatus {
        let snapshot = self.snapshot();
        MonitorStatus {
            monitoring_active: self.is_active(),
            connection: self.health.report(self.clock.now()).await,
            expiry_date: snapshot.expiry_date,
            days_to_expiry: snapshot.days_to_expiry,
            last_updated: snapshot.last_updated,
            last_persisted_at: snapshot.last_persisted_at,
            net_premium: snapshot.net_premium,
            subscribers: self.broadcaster.subscriber_count(),
            provider: self.provider.name(),
        }
    }
}

/// One row per level priced this cycle.
fn historical_rows(
    snapshot: &MarketSnapshot,
    now: DateTime<Local>,
    expiry_date: NaiveDate,
    days_to_expiry: i64,
) -> Vec<HistoricalRecord> {
    snapshot
        .premium_breakdown
        .iter()
        .map(|(level, breakdown)| HistoricalRecord {
            timestamp: now,
            index_spot: snapshot.index.spot,
            expiry_date,
            days_to_expiry,
            level: *level,
            net_premium: breakdown.net_premium,
            index_straddle_premium: breakdown.index_straddle,
            constituent_premium: breakdown.constituent_premium,
        })
        .collect()
}
