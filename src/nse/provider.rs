use super::config;
use super::models::OptionChain;
use super::nse_client::NSEClient;
use crate::error::QuoteError;
use crate::models::{Instrument, InstrumentQuote, MoneynessLevel, OptionQuote};
use crate::processor::{find_atm_strike, level_strike, strike_interval};
use crate::provider::QuoteProvider;
use crate::utility::Timer;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

// Strikes within this distance are treated as the same listing
const STRIKE_EPSILON: f64 = 1e-6;

/// `QuoteProvider` backed by the public NSE option chain.
pub struct NseQuoteProvider {
    client: NSEClient,
}

impl NseQuoteProvider {
    pub fn new(timeout: Duration) -> Result<Self, QuoteError> {
        Ok(Self {
            client: NSEClient::new(timeout)?,
        })
    }

    pub fn from_client(client: NSEClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuoteProvider for NseQuoteProvider {
    async fn get_quotes(
        &self,
        instrument: &Instrument,
        levels: &[MoneynessLevel],
        expiry: NaiveDate,
    ) -> Result<InstrumentQuote, QuoteError> {
        let name = format!("option chain {}", instrument.symbol);
        Timer::measure_async(name, config::SLOW_FETCH_MS, || async {
            let listed = self
                .client
                .resolve_listed_expiry(&instrument.symbol, expiry)
                .await?;
            let chain = self.client.fetch_option_chain(instrument, &listed).await?;
            build_instrument_quote(&instrument.symbol, &chain, levels)
        })
        .await
    }

    async fn reconnect(&self) -> Result<(), QuoteError> {
        self.client.reset_session().await
    }

    fn name(&self) -> &'static str {
        "nse"
    }
}

/// Picks the ATM strike nearest to spot and reads straddles at each requested level.
///
/// The ladder spans every listed strike, quoted or not. A level whose strike is
/// unlisted or lacks either leg is omitted.
pub fn build_instrument_quote(
    symbol: &str,
    chain: &OptionChain,
    levels: &[MoneynessLevel],
) -> Result<InstrumentQuote, QuoteError> {
    let spot = chain.records.underlying_value;
    let rows = chain.rows();

    let strikes: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.strike_price)
        .filter(|s| s.is_finite())
        .collect();

    let atm_strike = find_atm_strike(&strikes, spot)
        .ok_or_else(|| QuoteError::EmptyChain(symbol.to_string()))?;
    let interval = strike_interval(&strikes);

    let mut quotes = BTreeMap::new();
    for &level in levels {
        let target = match (level, interval) {
            (MoneynessLevel::Atm, _) => atm_strike,
            (_, Some(interval)) => level_strike(atm_strike, interval, level),
            (_, None) => continue,
        };
        let legs = rows
            .iter()
            .find(|row| row.strike_price.is_some_and(|s| (s - target).abs() < STRIKE_EPSILON))
            .and_then(|row| row.straddle_legs());
        match legs {
            Some((call, put)) => {
                quotes.insert(level, OptionQuote::new(target, call, put));
            }
            None => debug!(symbol, %level, strike = target, "no straddle quoted at strike"),
        }
    }

    Ok(InstrumentQuote {
        spot,
        atm_strike,
        levels: quotes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(json: &str) -> OptionChain {
        serde_json::from_str(json).unwrap()
    }

    const CHAIN: &str = r#"{
        "records": {
            "timestamp": "16-Oct-2026 15:29:59",
            "underlyingValue": 45040.5,
            "data": [
                {"strikePrice": 44900, "CE": {"lastPrice": 300.0}, "PE": {"lastPrice": 150.0}},
                {"strikePrice": 45000, "CE": {"lastPrice": 250.0}, "PE": {"lastPrice": 200.0}},
                {"strikePrice": 45100, "CE": {"lastPrice": 200.0}, "PE": {"lastPrice": 255.0}},
                {"strikePrice": 45200, "CE": {"lastPrice": 160.0}, "PE": {"lastPrice": 310.0}},
                {"strikePrice": 45300, "CE": {"lastPrice": 120.0}}
            ]
        }
    }"#;

    #[test]
    fn builds_levels_from_chain() {
        let quote = build_instrument_quote("BANKNIFTY", &chain(CHAIN), &MoneynessLevel::ALL).unwrap();

        assert_eq!(quote.spot, 45040.5);
        assert_eq!(quote.atm_strike, 45000.0);
        assert_eq!(quote.straddle(MoneynessLevel::Atm), Some(450.0));
        assert_eq!(quote.straddle(MoneynessLevel::Otm1), Some(455.0));
        assert_eq!(quote.straddle(MoneynessLevel::Otm2), Some(470.0));
        // 45300 has no put quote
        assert_eq!(quote.straddle(MoneynessLevel::Otm3), None);
    }

    #[test]
    fn one_legged_strike_keeps_its_rung() {
        let json = r#"{
            "records": {"underlyingValue": 45010.0, "data": [
                {"strikePrice": 45000, "CE": {"lastPrice": 250.0}, "PE": {"lastPrice": 200.0}},
                {"strikePrice": 45100, "CE": {"lastPrice": 200.0}},
                {"strikePrice": 45200, "CE": {"lastPrice": 160.0}, "PE": {"lastPrice": 310.0}},
                {"strikePrice": 45300, "CE": {"lastPrice": 120.0}, "PE": {"lastPrice": 370.0}},
                {"strikePrice": 45400, "CE": {"lastPrice": 90.0}, "PE": {"lastPrice": 440.0}}
            ]}
        }"#;
        let quote = build_instrument_quote("BANKNIFTY", &chain(json), &MoneynessLevel::ALL).unwrap();

        assert_eq!(quote.atm_strike, 45000.0);
        assert_eq!(quote.straddle(MoneynessLevel::Otm1), None);
        assert_eq!(quote.levels[&MoneynessLevel::Otm2].strike, 45200.0);
        assert_eq!(quote.straddle(MoneynessLevel::Otm2), Some(470.0));
        assert_eq!(quote.levels[&MoneynessLevel::Otm3].strike, 45300.0);
        assert_eq!(quote.straddle(MoneynessLevel::Otm3), Some(490.0));
    }

    #[test]
    fn unlisted_strike_leaves_a_gap() {
        let json = r#"{
            "records": {"underlyingValue": 44990.0, "data": [
                {"strikePrice": 44900, "CE": {"lastPrice": 300.0}, "PE": {"lastPrice": 150.0}},
                {"strikePrice": 45000, "CE": {"lastPrice": 250.0}, "PE": {"lastPrice": 200.0}},
                {"strikePrice": 45200, "CE": {"lastPrice": 160.0}, "PE": {"lastPrice": 310.0}},
                {"strikePrice": 45300, "CE": {"lastPrice": 120.0}, "PE": {"lastPrice": 370.0}}
            ]}
        }"#;
        let quote = build_instrument_quote("BANKNIFTY", &chain(json), &MoneynessLevel::ALL).unwrap();

        assert_eq!(quote.atm_strike, 45000.0);
        assert_eq!(quote.straddle(MoneynessLevel::Atm), Some(450.0));
        assert!(!quote.levels.contains_key(&MoneynessLevel::Otm1));
        assert_eq!(quote.levels[&MoneynessLevel::Otm2].strike, 45200.0);
        assert_eq!(quote.levels[&MoneynessLevel::Otm3].strike, 45300.0);
    }

    #[test]
    fn empty_chain_is_an_error() {
        let empty = chain(r#"{"records": {"underlyingValue": 100.0, "data": []}}"#);
        let err = build_instrument_quote("SBIN", &empty, &MoneynessLevel::ALL).unwrap_err();
        assert!(matches!(err, QuoteError::EmptyChain(_)));
    }

    #[test]
    fn filtered_rows_take_precedence() {
        let json = r#"{
            "records": {"underlyingValue": 812.0, "data": [
                {"strikePrice": 700, "CE": {"lastPrice": 1.0}, "PE": {"lastPrice": 1.0}}
            ]},
            "filtered": {"data": [
                {"strikePrice": 810, "CE": {"lastPrice": 12.0}, "PE": {"lastPrice": 9.5}},
                {"strikePrice": 820, "CE": {"lastPrice": 7.0}, "PE": {"lastPrice": 15.0}}
            ]}
        }"#;
        let quote = build_instrument_quote("SBIN", &chain(json), &[MoneynessLevel::Atm]).unwrap();
        assert_eq!(quote.atm_strike, 810.0);
        assert_eq!(quote.straddle(MoneynessLevel::Atm), Some(21.5));
        assert_eq!(quote.levels.len(), 1);
    }
}
