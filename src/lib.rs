//! Delta-Neutral Funding-Rate Arbitrage Core
//!
//! Coordinates opposing positions (one long, one short) across independent
//! trading venues to capture a funding-rate differential while staying
//! price-neutral. Three components: an opportunity scanner, a dual-leg
//! executor with compensating rollback, and a strategy supervisor that
//! monitors open position pairs until an exit condition fires.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod executor;
pub mod gateways;
pub mod scanner;
pub mod supervisor;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use executor::{DualLegExecutor, ExecutionError, OpenRequest};
pub use gateways::{GatewayError, GatewaySet, Venue, VenueGateway};
pub use scanner::{Opportunity, ScanError, ScanOutcome, Scanner};
pub use supervisor::{CloseReason, Strategy, StrategyEvent, StrategyState, Supervisor};

/// Result type used at the application edge (binary, config loading)
pub type Result<T> = anyhow::Result<T>;

/// Configuration error raised while loading or validating settings
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed as TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
