pub mod config;
pub mod models;
pub mod nse_client;
pub mod provider;

pub use models::{ContractInfo, OptionChain, OptionData, OptionDetail};
pub use nse_client::{NSEClient, select_monthly_expiry};
pub use provider::{NseQuoteProvider, build_instrument_quote};
