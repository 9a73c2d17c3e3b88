#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use dispersion_monitor::config::{Basket, ConstituentSpec, IndexSpec};
use dispersion_monitor::error::QuoteError;
use dispersion_monitor::models::{
    AlertRecord, ExportRow, HistoricalRecord, HistoryByLevel, HistoryPoint, Instrument,
    InstrumentQuote, MoneynessLevel, OptionQuote, Settings,
};
use dispersion_monitor::monitor::{Clock, MarketMonitor, MonitorConfig, SharedMonitor};
use dispersion_monitor::provider::QuoteProvider;
use dispersion_monitor::store::MarketStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

// -----------------------------------------------
// CLOCK
// -----------------------------------------------

pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn at(date: NaiveDate) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(local_noon(date)),
        })
    }

    pub fn set(&self, date: NaiveDate) {
        *self.now.lock().unwrap() = local_noon(date);
    }

    pub fn advance(&self, by: chrono::TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}

pub fn local_noon(date: NaiveDate) -> DateTime<Local> {
    Local
        .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
        .earliest()
        .unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// 10 days before the 24-Sep-2026 expiry, inside the default window.
pub fn in_window_day() -> NaiveDate {
    date(2026, 9, 14)
}

// -----------------------------------------------
// QUOTES
// -----------------------------------------------

/// Quote with the same straddle at every level.
pub fn flat_quote(spot: f64, straddle: f64) -> InstrumentQuote {
    let levels = MoneynessLevel::ALL
        .iter()
        .map(|level| {
            let strike = spot + 100.0 * level.offset() as f64;
            (*level, OptionQuote::new(strike, straddle / 2.0, straddle / 2.0))
        })
        .collect();
    InstrumentQuote {
        spot,
        atm_strike: spot,
        levels,
    }
}

pub fn two_member_basket() -> Basket {
    Basket {
        index: IndexSpec {
            symbol: "BANKNIFTY".to_string(),
            lot_size: 15,
            feed_id: 260105,
        },
        constituents: vec![
            ConstituentSpec {
                symbol: "A".to_string(),
                weight: 0.6,
                lot_size: 10,
                feed_id: 1,
            },
            ConstituentSpec {
                symbol: "B".to_string(),
                weight: 0.4,
                lot_size: 20,
                feed_id: 2,
            },
        ],
    }
}

// -----------------------------------------------
// PROVIDER
// -----------------------------------------------

#[derive(Default)]
pub struct MockProvider {
    quotes: Mutex<HashMap<String, InstrumentQuote>>,
    failing: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub fail_reconnect: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_quote(&self, symbol: &str, quote: InstrumentQuote) {
        self.quotes.lock().await.insert(symbol.to_string(), quote);
    }

    pub async fn fail(&self, symbol: &str) {
        self.failing.lock().await.push(symbol.to_string());
    }

    pub async fn recover(&self, symbol: &str) {
        self.failing.lock().await.retain(|s| s != symbol);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }
}

#[async_trait]
impl QuoteProvider for MockProvider {
    async fn get_quotes(
        &self,
        instrument: &Instrument,
        _levels: &[MoneynessLevel],
        _expiry: NaiveDate,
    ) -> Result<InstrumentQuote, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().await.contains(&instrument.symbol) {
            return Err(QuoteError::Request(format!("{} unavailable", instrument.symbol)));
        }
        self.quotes
            .lock()
            .await
            .get(&instrument.symbol)
            .cloned()
            .ok_or_else(|| QuoteError::EmptyChain(instrument.symbol.clone()))
    }

    async fn reconnect(&self) -> Result<(), QuoteError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(QuoteError::Request("still down".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// -----------------------------------------------
// STORE
// -----------------------------------------------

#[derive(Default)]
pub struct MockStore {
    pub rows: Mutex<Vec<HistoricalRecord>>,
    pub alerts: Mutex<Vec<AlertRecord>>,
    pub settings: Mutex<Option<Settings>>,
    pub fail_writes: AtomicBool,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_settings(settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(Some(settings)),
            ..Default::default()
        })
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MockStore {
    async fn append_snapshot(&self, rows: &[HistoricalRecord]) -> anyhow::Result<()> {
        self.check_writable()?;
        self.rows.lock().await.extend_from_slice(rows);
        Ok(())
    }

    async fn append_alert(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        self.check_writable()?;
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }

    async fn get_settings(&self) -> anyhow::Result<Option<Settings>> {
        Ok(self.settings.lock().await.clone())
    }

    async fn update_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        self.check_writable()?;
        *self.settings.lock().await = Some(settings.clone());
        Ok(())
    }

    async fn read_history(&self, limit: i64) -> anyhow::Result<HistoryByLevel> {
        let rows = self.rows.lock().await;
        let mut history = HistoryByLevel::new();
        for r in rows.iter().rev().take(limit.max(0) as usize) {
            history.entry(r.level).or_default().push(HistoryPoint {
                timestamp: r.timestamp,
                index_spot: r.index_spot,
                net_premium: r.net_premium,
            });
        }
        Ok(history)
    }

    async fn read_alerts(&self, limit: i64) -> anyhow::Result<Vec<AlertRecord>> {
        let alerts = self.alerts.lock().await;
        Ok(alerts.iter().rev().take(limit.max(0) as usize).cloned().collect())
    }

    async fn export_level(&self, level: MoneynessLevel) -> anyhow::Result<Vec<ExportRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| r.level == level)
            .map(|r| ExportRow {
                timestamp: r.timestamp,
                index_spot: r.index_spot,
                net_premium: r.net_premium,
                index_straddle_premium: r.index_straddle_premium,
            })
            .collect())
    }
}

// -----------------------------------------------
// MONITOR
// -----------------------------------------------

/// Long cycle interval so the background loop runs one cycle and then waits.
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        cycle_interval: Duration::from_secs(3600),
        quote_timeout: Duration::from_millis(500),
        connection_timeout: Duration::from_secs(60),
        stale_check_interval: Duration::from_secs(3600),
        ..MonitorConfig::default()
    }
}

pub async fn build_monitor(
    basket: Basket,
    provider: Arc<MockProvider>,
    store: Arc<MockStore>,
    clock: Arc<FixedClock>,
    config: MonitorConfig,
) -> SharedMonitor {
    MarketMonitor::new(basket, provider, store, config, clock)
        .await
        .unwrap()
}

/// Index straddle 100 (×15 = 1500) and constituents at 35 and 35 (20×35 + 20×35 = 1400): net 100.
pub async fn scenario_provider() -> Arc<MockProvider> {
    let provider = MockProvider::new();
    provider.set_quote("BANKNIFTY", flat_quote(45000.0, 100.0)).await;
    provider.set_quote("A", flat_quote(1000.0, 35.0)).await;
    provider.set_quote("B", flat_quote(500.0, 35.0)).await;
    provider
}
