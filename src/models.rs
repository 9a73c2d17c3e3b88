use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

// -----------------------------------------------
// INSTRUMENTS
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    Equity,
    Indices,
}

impl SecurityType {
    /// Value of the `type` query parameter on the option chain endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityType::Equity => "Equity",
            SecurityType::Indices => "Indices",
        }
    }
}

/// Something the quote feed can price: the index itself or one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub feed_id: u64,
    pub security_type: SecurityType,
}

impl Instrument {
    pub fn index(symbol: impl Into<String>, feed_id: u64) -> Self {
        Self {
            symbol: symbol.into(),
            feed_id,
            security_type: SecurityType::Indices,
        }
    }

    pub fn equity(symbol: impl Into<String>, feed_id: u64) -> Self {
        Self {
            symbol: symbol.into(),
            feed_id,
            security_type: SecurityType::Equity,
        }
    }
}

// -----------------------------------------------
// MONEYNESS LEVELS
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MoneynessLevel {
    #[serde(rename = "ATM")]
    Atm,
    #[serde(rename = "OTM1")]
    Otm1,
    #[serde(rename = "OTM2")]
    Otm2,
    #[serde(rename = "OTM3")]
    Otm3,
}

impl MoneynessLevel {
    pub const ALL: [MoneynessLevel; 4] = [
        MoneynessLevel::Atm,
        MoneynessLevel::Otm1,
        MoneynessLevel::Otm2,
        MoneynessLevel::Otm3,
    ];

    /// Number of strike intervals above ATM
    pub fn offset(self) -> u32 {
        match self {
            MoneynessLevel::Atm => 0,
            MoneynessLevel::Otm1 => 1,
            MoneynessLevel::Otm2 => 2,
            MoneynessLevel::Otm3 => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MoneynessLevel::Atm => "ATM",
            MoneynessLevel::Otm1 => "OTM1",
            MoneynessLevel::Otm2 => "OTM2",
            MoneynessLevel::Otm3 => "OTM3",
        }
    }
}

impl fmt::Display for MoneynessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoneynessLevel {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ATM" => Ok(MoneynessLevel::Atm),
            "OTM1" => Ok(MoneynessLevel::Otm1),
            "OTM2" => Ok(MoneynessLevel::Otm2),
            "OTM3" => Ok(MoneynessLevel::Otm3),
            _ => Err(MonitorError::UnknownLevel(s.to_string())),
        }
    }
}

// -----------------------------------------------
// QUOTES
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub call_premium: f64,
    pub put_premium: f64,
    pub straddle_premium: f64,
}

impl OptionQuote {
    pub fn new(strike: f64, call_premium: f64, put_premium: f64) -> Self {
        Self {
            strike,
            call_premium,
            put_premium,
            straddle_premium: call_premium + put_premium,
        }
    }
}

/// Spot, ATM strike and per-level straddles of a single instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentQuote {
    pub spot: f64,
    pub atm_strike: f64,
    pub levels: BTreeMap<MoneynessLevel, OptionQuote>,
}

impl InstrumentQuote {
    pub fn straddle(&self, level: MoneynessLevel) -> Option<f64> {
        self.levels.get(&level).map(|q| q.straddle_premium)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentQuote {
    #[serde(flatten)]
    pub quote: InstrumentQuote,
    pub weight: f64,
    pub lot_size: u32,
}

// -----------------------------------------------
// LOT ALLOCATION
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotAllocation {
    pub lot_count: u32,
    pub lot_size: u32,
    pub total_quantity: u64,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedLotTable(BTreeMap<String, LotAllocation>);

impl NormalizedLotTable {
    pub fn insert(&mut self, symbol: impl Into<String>, allocation: LotAllocation) {
        self.0.insert(symbol.into(), allocation);
    }

    pub fn get(&self, symbol: &str) -> Option<&LotAllocation> {
        self.0.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LotAllocation)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, LotAllocation)> for NormalizedLotTable {
    fn from_iter<I: IntoIterator<Item = (String, LotAllocation)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// -----------------------------------------------
// SNAPSHOT
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Index and basket contributions behind one net premium figure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelPremium {
    /// Per-unit index straddle the premium was priced from.
    pub index_straddle: f64,
    pub index_premium: f64,
    pub constituent_premium: f64,
    pub net_premium: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub index: InstrumentQuote,
    pub constituents: BTreeMap<String, ConstituentQuote>,
    pub net_premium: BTreeMap<MoneynessLevel, f64>,
    /// Levels priced by the latest cycle only.
    pub premium_breakdown: BTreeMap<MoneynessLevel, LevelPremium>,
    pub normalized_lots: NormalizedLotTable,
    pub last_updated: Option<DateTime<Local>>,
    pub last_persisted_at: Option<DateTime<Local>>,
    pub expiry_date: Option<NaiveDate>,
    pub days_to_expiry: i64,
    pub monitoring_active: bool,
    pub connection_status: ConnectionStatus,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self {
            index: InstrumentQuote::default(),
            constituents: BTreeMap::new(),
            net_premium: MoneynessLevel::ALL.iter().map(|l| (*l, 0.0)).collect(),
            premium_breakdown: BTreeMap::new(),
            normalized_lots: NormalizedLotTable::default(),
            last_updated: None,
            last_persisted_at: None,
            expiry_date: None,
            days_to_expiry: 0,
            monitoring_active: false,
            connection_status: ConnectionStatus::Disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Local>,
    pub index_spot: f64,
    pub net_premium: BTreeMap<MoneynessLevel, f64>,
}

impl ChartPoint {
    pub fn from_snapshot(snapshot: &MarketSnapshot, timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            index_spot: snapshot.index.spot,
            net_premium: snapshot.net_premium.clone(),
        }
    }
}

// -----------------------------------------------
// PERSISTED RECORDS
// -----------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub timestamp: DateTime<Local>,
    pub index_spot: f64,
    pub expiry_date: NaiveDate,
    pub days_to_expiry: i64,
    pub level: MoneynessLevel,
    pub net_premium: f64,
    pub index_straddle_premium: f64,
    pub constituent_premium: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Local>,
    pub index_spot: f64,
    pub net_premium: f64,
}

pub type HistoryByLevel = BTreeMap<MoneynessLevel, Vec<HistoryPoint>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub timestamp: DateTime<Local>,
    pub index_spot: f64,
    pub net_premium: f64,
    pub index_straddle_premium: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Local>,
    pub level: MoneynessLevel,
    pub net_premium: f64,
    pub threshold: f64,
    pub message: String,
}

// -----------------------------------------------
// SETTINGS
// -----------------------------------------------

pub const DEFAULT_ALERT_THRESHOLD: f64 = 10_000.0;
pub const DEFAULT_MONITORING_DAYS: u32 = 45;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub alert_threshold: f64,
    pub monitoring_days: u32,
    pub selected_otm_level: MoneynessLevel,
    pub auto_alerts_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            monitoring_days: DEFAULT_MONITORING_DAYS,
            selected_otm_level: MoneynessLevel::Atm,
            auto_alerts_enabled: true,
        }
    }
}

/// Partial settings change; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub alert_threshold: Option<f64>,
    pub monitoring_days: Option<u32>,
    pub selected_otm_level: Option<MoneynessLevel>,
    pub auto_alerts_enabled: Option<bool>,
}

impl SettingsUpdate {
    /// Merges onto `base` and rejects values the monitor can't work with.
    pub fn apply_to(&self, base: &Settings) -> Result<Settings, MonitorError> {
        let merged = Settings {
            alert_threshold: self.alert_threshold.unwrap_or(base.alert_threshold),
            monitoring_days: self.monitoring_days.unwrap_or(base.monitoring_days),
            selected_otm_level: self.selected_otm_level.unwrap_or(base.selected_otm_level),
            auto_alerts_enabled: self.auto_alerts_enabled.unwrap_or(base.auto_alerts_enabled),
        };

        if !merged.alert_threshold.is_finite() || merged.alert_threshold <= 0.0 {
            return Err(MonitorError::InvalidSettings(format!(
                "alert_threshold must be a positive number, got {}",
                merged.alert_threshold
            )));
        }
        if merged.monitoring_days == 0 {
            return Err(MonitorError::InvalidSettings(
                "monitoring_days must be at least 1".to_string(),
            ));
        }

        Ok(merged)
    }
}
