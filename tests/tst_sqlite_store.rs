mod common;

use chrono::TimeDelta;
use common::{date, in_window_day, local_noon};
use dispersion_monitor::models::{AlertRecord, HistoricalRecord, MoneynessLevel, Settings};
use dispersion_monitor::rules::alert_message;
use dispersion_monitor::store::{MarketStore, SqliteMarketStore};

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteMarketStore {
        SqliteMarketStore::new("sqlite::memory:").await.unwrap()
    }

    fn cycle_rows(minute: i64, spot: f64) -> Vec<HistoricalRecord> {
        let timestamp = local_noon(in_window_day()) + TimeDelta::minutes(minute);
        MoneynessLevel::ALL
            .iter()
            .enumerate()
            .map(|(i, level)| HistoricalRecord {
                timestamp,
                index_spot: spot,
                expiry_date: date(2026, 9, 24),
                days_to_expiry: 10,
                level: *level,
                net_premium: 100.0 * (i as f64 + 1.0) + minute as f64,
                index_straddle_premium: 400.0 - 50.0 * i as f64,
                constituent_premium: 5_000.0,
            })
            .collect()
    }

    fn alert(minute: i64, level: MoneynessLevel, net: f64) -> AlertRecord {
        AlertRecord {
            timestamp: local_noon(in_window_day()) + TimeDelta::minutes(minute),
            level,
            net_premium: net,
            threshold: 10_000.0,
            message: alert_message(level, net, 10_000.0),
        }
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_every_level() {
        let store = memory_store().await;
        let rows = cycle_rows(0, 45_123.5);
        store.append_snapshot(&rows).await.unwrap();

        let history = store.read_history(100).await.unwrap();
        assert_eq!(history.len(), 4);
        for row in &rows {
            let points = &history[&row.level];
            assert_eq!(points.len(), 1);
            assert_eq!(points[0].net_premium, row.net_premium);
            assert_eq!(points[0].index_spot, row.index_spot);
            assert_eq!(points[0].timestamp, row.timestamp);
        }
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let store = memory_store().await;
        for minute in 0..3 {
            store
                .append_snapshot(&cycle_rows(minute, 45_000.0 + minute as f64))
                .await
                .unwrap();
        }

        let history = store.read_history(100).await.unwrap();
        let atm = &history[&MoneynessLevel::Atm];
        assert_eq!(atm.len(), 3);
        assert_eq!(atm[0].index_spot, 45_002.0);
        assert_eq!(atm[2].index_spot, 45_000.0);

        // The limit applies to rows, four per cycle
        let limited = store.read_history(4).await.unwrap();
        assert_eq!(limited.values().map(Vec::len).sum::<usize>(), 4);
        assert!(limited.values().all(|points| points[0].index_spot == 45_002.0));
    }

    #[tokio::test]
    async fn test_settings_absent_until_written() {
        let store = memory_store().await;
        assert_eq!(store.get_settings().await.unwrap(), None);

        let first = Settings::default();
        store.update_settings(&first).await.unwrap();
        assert_eq!(store.get_settings().await.unwrap(), Some(first));

        let second = Settings {
            alert_threshold: 2_500.0,
            monitoring_days: 30,
            selected_otm_level: MoneynessLevel::Otm2,
            auto_alerts_enabled: false,
        };
        store.update_settings(&second).await.unwrap();
        assert_eq!(store.get_settings().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_alerts_newest_first() {
        let store = memory_store().await;
        store
            .append_alert(&alert(0, MoneynessLevel::Atm, 12_000.0))
            .await
            .unwrap();
        store
            .append_alert(&alert(1, MoneynessLevel::Otm3, -15_000.0))
            .await
            .unwrap();

        let alerts = store.read_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].level, MoneynessLevel::Otm3);
        assert_eq!(alerts[0].message, alert_message(MoneynessLevel::Otm3, -15_000.0, 10_000.0));
        assert_eq!(alerts[1].level, MoneynessLevel::Atm);

        assert_eq!(store.read_alerts(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_export_one_level_in_order() {
        let store = memory_store().await;
        for minute in 0..3 {
            store.append_snapshot(&cycle_rows(minute, 45_000.0)).await.unwrap();
        }

        let rows = store.export_level(MoneynessLevel::Otm2).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(rows.iter().all(|r| r.index_straddle_premium == 300.0));
        assert_eq!(rows[0].net_premium, 300.0);
    }
}
