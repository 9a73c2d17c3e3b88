use crate::error::ConfigError;
use crate::models::Instrument;
use crate::monitor::MonitorConfig;
use crate::rules::AlertCadence;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

// -----------------------------------------------
// BANKNIFTY BASKET
// -----------------------------------------------
pub const INDEX_SYMBOL: &str = "BANKNIFTY";
pub const INDEX_FEED_ID: u64 = 260105;
pub const INDEX_LOT_SIZE: u32 = 15;

/// (symbol, index weight, lot size, feed id)
pub const BANKNIFTY_CONSTITUENTS: &[(&str, f64, u32, u64)] = &[
    ("HDFCBANK", 0.2861, 550, 341249),
    ("ICICIBANK", 0.2605, 1375, 1270529),
    ("SBIN", 0.0911, 1500, 779521),
    ("KOTAKBANK", 0.0810, 400, 492033),
    ("AXISBANK", 0.0782, 1200, 1510401),
    ("INDUSINDBK", 0.0337, 900, 1346049),
    ("FEDERALBNK", 0.0325, 10000, 1023745),
    ("IDFCFIRSTB", 0.0311, 6250, 2863105),
    ("BANKBARODA", 0.0298, 2700, 1195009),
    ("AUBANK", 0.0279, 1800, 108033),
];

// -----------------------------------------------
// RUNTIME DEFAULTS
// -----------------------------------------------
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://dispersion_trade.db?mode=rwc";
pub const DEFAULT_CYCLE_SECS: u64 = 30;
pub const DEFAULT_QUOTE_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STALE_CHECK_SECS: u64 = 30;

pub const CHART_HISTORY_CAPACITY: usize = 100;
pub const RECENT_ALERTS_CAPACITY: usize = 50;
pub const DEFAULT_HISTORY_LIMIT: i64 = 1000;
pub const DEFAULT_ALERTS_LIMIT: i64 = 50;

// -----------------------------------------------
// BASKET REGISTRY
// -----------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub symbol: String,
    pub lot_size: u32,
    pub feed_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentSpec {
    pub symbol: String,
    pub weight: f64,
    pub lot_size: u32,
    pub feed_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub index: IndexSpec,
    pub constituents: Vec<ConstituentSpec>,
}

impl Basket {
    pub fn banknifty() -> Self {
        Self {
            index: IndexSpec {
                symbol: INDEX_SYMBOL.to_string(),
                lot_size: INDEX_LOT_SIZE,
                feed_id: INDEX_FEED_ID,
            },
            constituents: BANKNIFTY_CONSTITUENTS
                .iter()
                .map(|(symbol, weight, lot_size, feed_id)| ConstituentSpec {
                    symbol: symbol.to_string(),
                    weight: *weight,
                    lot_size: *lot_size,
                    feed_id: *feed_id,
                })
                .collect(),
        }
    }

    /// Loads a basket from a JSON file shaped like the serialized `Basket`.
    pub fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::BasketFile {
            path: path.to_string(),
            source,
        })?;
        let basket: Basket = serde_json::from_str(&raw)?;
        basket.validate()?;
        Ok(basket)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.lot_size == 0 {
            return Err(ConfigError::Basket(format!(
                "index {} has a zero lot size",
                self.index.symbol
            )));
        }
        if self.constituents.is_empty() {
            return Err(ConfigError::Basket("basket has no constituents".to_string()));
        }

        let mut symbols = HashSet::new();
        let mut feed_ids = HashSet::from([self.index.feed_id]);

        for c in &self.constituents {
            if !c.weight.is_finite() || c.weight <= 0.0 {
                return Err(ConfigError::Basket(format!(
                    "{} has non-positive weight {}",
                    c.symbol, c.weight
                )));
            }
            if c.lot_size == 0 {
                return Err(ConfigError::Basket(format!("{} has a zero lot size", c.symbol)));
            }
            if !symbols.insert(c.symbol.as_str()) {
                return Err(ConfigError::Basket(format!("duplicate symbol {}", c.symbol)));
            }
            if !feed_ids.insert(c.feed_id) {
                return Err(ConfigError::Basket(format!(
                    "duplicate feed id {} ({})",
                    c.feed_id, c.symbol
                )));
            }
        }

        Ok(())
    }

    pub fn index_instrument(&self) -> Instrument {
        Instrument::index(self.index.symbol.clone(), self.index.feed_id)
    }

    pub fn constituent_instruments(&self) -> Vec<Instrument> {
        self.constituents
            .iter()
            .map(|c| Instrument::equity(c.symbol.clone(), c.feed_id))
            .collect()
    }
}

// -----------------------------------------------
// RUNTIME CONFIGURATION
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// HTTP API plus background monitor
    Server,
    /// One cycle printed to the terminal
    Once,
    /// Print expiry and monitoring window, then exit
    Expiry,
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(RunMode::Server),
            "once" => Ok(RunMode::Once),
            "expiry" => Ok(RunMode::Expiry),
            _ => Err(ConfigError::InvalidEnv {
                key: "DISPERSION_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: RunMode,
    pub port: u16,
    pub database_url: String,
    pub cycle_interval: Duration,
    pub quote_timeout: Duration,
    pub connection_timeout: Duration,
    pub stale_check_interval: Duration,
    pub alert_cadence: AlertCadence,
    pub auto_start: bool,
    pub basket: Basket,
}

impl AppConfig {
    /// Reads `DISPERSION_*` variables. Call `dotenvy::dotenv()` first if a `.env` file should apply.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut basket = match std::env::var("DISPERSION_BASKET_FILE") {
            Ok(path) if !path.trim().is_empty() => Basket::from_json_file(path.trim())?,
            _ => Basket::banknifty(),
        };
        basket.index.lot_size = env_or("DISPERSION_INDEX_LOT_SIZE", basket.index.lot_size)?;
        basket.validate()?;

        let min_interval_secs: u64 = env_or("DISPERSION_ALERT_MIN_INTERVAL_SECS", 0)?;
        let alert_cadence = if min_interval_secs == 0 {
            AlertCadence::EveryCycle
        } else {
            AlertCadence::MinInterval(Duration::from_secs(min_interval_secs))
        };

        let cycle_secs: u64 = env_or("DISPERSION_CYCLE_SECS", DEFAULT_CYCLE_SECS)?;
        if cycle_secs == 0 {
            return Err(ConfigError::InvalidEnv {
                key: "DISPERSION_CYCLE_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            mode: env_or("DISPERSION_MODE", RunMode::Server)?,
            port: env_or("DISPERSION_PORT", DEFAULT_PORT)?,
            database_url: std::env::var("DISPERSION_DB_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            cycle_interval: Duration::from_secs(cycle_secs),
            quote_timeout: Duration::from_secs(env_or(
                "DISPERSION_QUOTE_TIMEOUT_SECS",
                DEFAULT_QUOTE_TIMEOUT_SECS,
            )?),
            connection_timeout: Duration::from_secs(env_or(
                "DISPERSION_CONNECTION_TIMEOUT_SECS",
                DEFAULT_CONNECTION_TIMEOUT_SECS,
            )?),
            stale_check_interval: Duration::from_secs(env_or(
                "DISPERSION_STALE_CHECK_SECS",
                DEFAULT_STALE_CHECK_SECS,
            )?),
            alert_cadence,
            auto_start: env_or("DISPERSION_AUTO_START", false)?,
            basket,
        })
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            cycle_interval: self.cycle_interval,
            quote_timeout: self.quote_timeout,
            connection_timeout: self.connection_timeout,
            stale_check_interval: self.stale_check_interval,
            alert_cadence: self.alert_cadence,
            ..MonitorConfig::default()
        }
    }
}

/// Parses an env var, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}
