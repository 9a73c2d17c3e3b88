use crate::error::QuoteError;
use crate::models::{Instrument, InstrumentQuote, MoneynessLevel};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

/// Source of option quotes for the index and its constituents.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Spot, ATM strike and straddle quotes at `levels` for the contract expiring in `expiry`'s month.
    /// Levels the source can't price are left out of the result.
    async fn get_quotes(
        &self,
        instrument: &Instrument,
        levels: &[MoneynessLevel],
        expiry: NaiveDate,
    ) -> Result<InstrumentQuote, QuoteError>;

    /// Re-establish the upstream session after the feed went stale.
    async fn reconnect(&self) -> Result<(), QuoteError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

pub type SharedQuoteProvider = Arc<dyn QuoteProvider>;

/// Result of one instrument fetch within a cycle.
#[derive(Debug)]
pub enum FetchOutcome {
    Fresh(InstrumentQuote),
    Unavailable(QuoteError),
}
