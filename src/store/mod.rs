pub mod sqlite_store;

use crate::models::{AlertRecord, ExportRow, HistoricalRecord, HistoryByLevel, MoneynessLevel, Settings};
use std::sync::Arc;

pub use sqlite_store::SqliteMarketStore;

/// Durable time series, alert log and the single settings record.
#[async_trait::async_trait]
pub trait MarketStore: Send + Sync {
    /// One row per level for a cycle, written atomically.
    async fn append_snapshot(&self, rows: &[HistoricalRecord]) -> anyhow::Result<()>;
    async fn append_alert(&self, alert: &AlertRecord) -> anyhow::Result<()>;

    /// `None` until settings have been written once.
    async fn get_settings(&self) -> anyhow::Result<Option<Settings>>;
    async fn update_settings(&self, settings: &Settings) -> anyhow::Result<()>;

    /// Most recent `limit` rows, newest first, grouped by level.
    async fn read_history(&self, limit: i64) -> anyhow::Result<HistoryByLevel>;
    /// Most recent `limit` alerts, newest first.
    async fn read_alerts(&self, limit: i64) -> anyhow::Result<Vec<AlertRecord>>;
    /// Every row of one level in chronological order.
    async fn export_level(&self, level: MoneynessLevel) -> anyhow::Result<Vec<ExportRow>>;
}

pub type SharedMarketStore = Arc<dyn MarketStore>;
