//! SqliteMarketStore
//! --------------------
//! SQLite-backed `MarketStore`. Tables:
//!
//!  - `historical_data`: one row per (cycle, moneyness level)
//!  - `alerts`: every alert that was raised
//!  - `settings`: a single row with id = 1
//!
//! Timestamps are stored as RFC 3339 text, dates as `YYYY-MM-DD`.
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::MarketStore;
use crate::models::{
    AlertRecord, ExportRow, HistoricalRecord, HistoryByLevel, HistoryPoint, MoneynessLevel, Settings,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS historical_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        banknifty_spot REAL NOT NULL,
        expiry_date TEXT NOT NULL,
        days_to_expiry INTEGER NOT NULL,
        otm_level TEXT NOT NULL,
        net_premium REAL NOT NULL,
        banknifty_straddle_premium REAL NOT NULL,
        total_constituent_premium REAL NOT NULL
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_historical_level ON historical_data (otm_level, id);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        otm_level TEXT NOT NULL,
        net_premium REAL NOT NULL,
        threshold REAL NOT NULL,
        message TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        alert_threshold REAL NOT NULL,
        monitoring_days INTEGER NOT NULL,
        selected_otm_level TEXT NOT NULL,
        auto_alerts_enabled INTEGER NOT NULL
    );
    "#,
];

pub struct SqliteMarketStore {
    pool: SqlitePool,
}

impl SqliteMarketStore {
    /// Pool must already have the schema; see [`SqliteMarketStore::init_schema`].
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and ensure the schema exists.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        // An in-memory database lives and dies with its connection, so keep exactly one open.
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(url)
            .await
            .with_context(|| format!("Failed to open database {url}"))?;

        let store = Self::from_pool(pool);
        store.init_schema().await?;
        info!(url, "market store ready");
        Ok(store)
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Local>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{raw}'"))?
        .with_timezone(&Local))
}

fn parse_level(row: &SqliteRow) -> anyhow::Result<MoneynessLevel> {
    let raw: String = row.get("otm_level");
    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid level '{}': {}", raw, e))
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    async fn append_snapshot(&self, rows: &[HistoricalRecord]) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for r in rows {
            sqlx::query(
                r#"
                INSERT INTO historical_data (
                    timestamp, banknifty_spot, expiry_date, days_to_expiry, otm_level,
                    net_premium, banknifty_straddle_premium, total_constituent_premium
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(r.timestamp.to_rfc3339())
            .bind(r.index_spot)
            .bind(r.expiry_date.format("%Y-%m-%d").to_string())
            .bind(r.days_to_expiry)
            .bind(r.level.as_str())
            .bind(r.net_premium)
            .bind(r.index_straddle_premium)
            .bind(r.constituent_premium)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn append_alert(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (timestamp, otm_level, net_premium, threshold, message)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.timestamp.to_rfc3339())
        .bind(alert.level.as_str())
        .bind(alert.net_premium)
        .bind(alert.threshold)
        .bind(&alert.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_settings(&self) -> anyhow::Result<Option<Settings>> {
        let row = sqlx::query(
            r#"
            SELECT alert_threshold, monitoring_days, selected_otm_level, auto_alerts_enabled
            FROM settings WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let level: String = row.get("selected_otm_level");
        Ok(Some(Settings {
            alert_threshold: row.get("alert_threshold"),
            monitoring_days: u32::try_from(row.get::<i64, _>("monitoring_days"))
                .context("Stored monitoring_days out of range")?,
            selected_otm_level: level
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid stored level '{}': {}", level, e))?,
            auto_alerts_enabled: row.get::<i64, _>("auto_alerts_enabled") != 0,
        }))
    }

    async fn update_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (
                id, alert_threshold, monitoring_days, selected_otm_level, auto_alerts_enabled
            ) VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                alert_threshold = excluded.alert_threshold,
                monitoring_days = excluded.monitoring_days,
                selected_otm_level = excluded.selected_otm_level,
                auto_alerts_enabled = excluded.auto_alerts_enabled
            "#,
        )
        .bind(settings.alert_threshold)
        .bind(settings.monitoring_days as i64)
        .bind(settings.selected_otm_level.as_str())
        .bind(settings.auto_alerts_enabled as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_history(&self, limit: i64) -> anyhow::Result<HistoryByLevel> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, banknifty_spot, otm_level, net_premium
            FROM historical_data
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        let mut history = HistoryByLevel::new();
        for row in rows {
            let level = parse_level(&row)?;
            let timestamp: String = row.get("timestamp");
            history.entry(level).or_default().push(HistoryPoint {
                timestamp: parse_timestamp(&timestamp)?,
                index_spot: row.get("banknifty_spot"),
                net_premium: row.get("net_premium"),
            });
        }

        Ok(history)
    }

    async fn read_alerts(&self, limit: i64) -> anyhow::Result<Vec<AlertRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, otm_level, net_premium, threshold, message
            FROM alerts
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                Ok(AlertRecord {
                    timestamp: parse_timestamp(&timestamp)?,
                    level: parse_level(row)?,
                    net_premium: row.get("net_premium"),
                    threshold: row.get("threshold"),
                    message: row.get("message"),
                })
            })
            .collect()
    }

    async fn export_level(&self, level: MoneynessLevel) -> anyhow::Result<Vec<ExportRow>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, banknifty_spot, net_premium, banknifty_straddle_premium
            FROM historical_data
            WHERE otm_level = ?
            ORDER BY id ASC
            "#,
        )
        .bind(level.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                Ok(ExportRow {
                    timestamp: parse_timestamp(&timestamp)?,
                    index_spot: row.get("banknifty_spot"),
                    net_premium: row.get("net_premium"),
                    index_straddle_premium: row.get("banknifty_straddle_premium"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_range_monitoring_days_is_an_error() {
        let store = SqliteMarketStore::new("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO settings (id, alert_threshold, monitoring_days, selected_otm_level, auto_alerts_enabled) \
             VALUES (1, 10000.0, -5, 'ATM', 1)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.get_settings().await.unwrap_err();
        assert!(err.to_string().contains("monitoring_days"));
    }
}
