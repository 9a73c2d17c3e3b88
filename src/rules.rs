use crate::models::{AlertRecord, MoneynessLevel, Settings};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// How often a level that stays beyond the threshold may alert again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertCadence {
    /// Alert on every cycle the condition holds.
    #[default]
    EveryCycle,
    /// At most one alert per level within the interval.
    MinInterval(Duration),
}

pub fn alert_message(level: MoneynessLevel, net_premium: f64, threshold: f64) -> String {
    format!(
        "{} Net Premium Alert: ₹{:.2} (Threshold: ₹{:.2})",
        level, net_premium, threshold
    )
}

/// One alert per level whose absolute net premium reaches the threshold.
pub fn evaluate(
    net_premium: &BTreeMap<MoneynessLevel, f64>,
    settings: &Settings,
    now: DateTime<Local>,
) -> Vec<AlertRecord> {
    if !settings.auto_alerts_enabled {
        return Vec::new();
    }

    let threshold = settings.alert_threshold;
    MoneynessLevel::ALL
        .iter()
        .filter_map(|level| {
            let net = *net_premium.get(level)?;
            (net.abs() >= threshold).then(|| AlertRecord {
                timestamp: now,
                level: *level,
                net_premium: net,
                threshold,
                message: alert_message(*level, net, threshold),
            })
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct AlertGate {
    cadence: AlertCadence,
    last_fired: HashMap<MoneynessLevel, DateTime<Local>>,
}

impl AlertGate {
    pub fn new(cadence: AlertCadence) -> Self {
        Self {
            cadence,
            last_fired: HashMap::new(),
        }
    }

    /// Drops alerts suppressed by the cadence and records the ones let through.
    pub fn admit(&mut self, candidates: Vec<AlertRecord>) -> Vec<AlertRecord> {
        let AlertCadence::MinInterval(interval) = self.cadence else {
            return candidates;
        };

        candidates
            .into_iter()
            .filter(|alert| {
                let suppressed = self.last_fired.get(&alert.level).is_some_and(|last| {
                    (alert.timestamp - *last)
                        .to_std()
                        .map(|since| since < interval)
                        .unwrap_or(true)
                });
                if suppressed {
                    debug!(level = %alert.level, "alert suppressed by cadence");
                } else {
                    self.last_fired.insert(alert.level, alert.timestamp);
                }
                !suppressed
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.last_fired.clear();
    }
}
