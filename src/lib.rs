pub mod allocator;
pub mod api_server_axum;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod expiry;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod nse;
pub mod processor;
pub mod provider;
pub mod rules;
pub mod store;
pub mod utility;

// Re-exports for convenience
pub use config::{AppConfig, Basket, ConstituentSpec, IndexSpec, RunMode};
pub use error::{ConfigError, MonitorError, QuoteError};
pub use models::{
    AlertRecord, HistoricalRecord, InstrumentQuote, MarketSnapshot, MoneynessLevel, OptionQuote,
    Settings, SettingsUpdate,
};
pub use monitor::{MarketMonitor, MonitorConfig, SharedMonitor, StartOutcome, SystemClock};
pub use provider::QuoteProvider;
pub use store::{MarketStore, SqliteMarketStore};
