//! Configuration management module

pub mod settings;

pub use settings::*;

use crate::gateways::Venue;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the arbitrage core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Opportunity scanner configuration
    pub scanner: ScannerConfig,
    /// Dual-leg executor configuration
    pub executor: ExecutorConfig,
    /// Strategy supervisor configuration
    pub supervisor: SupervisorConfig,
    /// Transient-error retry configuration
    pub retry: RetryConfig,
    /// Venue selection
    pub venues: VenueListConfig,
    /// Per-venue fee and slippage models, keyed by venue name
    pub fees: HashMap<String, FeeModel>,
}

/// Opportunity scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Number of top-ranked opportunities to keep per scan
    pub top_n: usize,
    /// Minimum gross hourly spread in percent to consider
    pub min_gross_spread_pct: f64,
    /// Minimum net hourly spread in percent to keep (applied after fees)
    pub min_net_spread_pct: f64,
    /// Minimum usable leverage across both legs
    pub min_leverage: u32,
    /// Symbol allowlist; empty means every symbol
    pub symbols: Vec<String>,
}

/// Dual-leg executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on a single strategy's stake, if set
    pub max_stake_usd: Option<f64>,
}

/// Strategy supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between monitoring cycles
    pub cycle_interval_secs: u64,
    /// Close attempts per leg before the strategy is parked in ERROR
    pub close_retry_attempts: u32,
    /// Surface a liquidation-risk alert when a leg's liquidation distance
    /// falls below this percentage of mark price
    pub liquidation_safety_margin_pct: f64,
    /// Capacity of the lifecycle event channel
    pub event_buffer: usize,
}

impl SupervisorConfig {
    /// Cycle interval as a [`Duration`]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// Bounded exponential backoff settings for transient gateway errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts (first try included)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling on any single delay in milliseconds
    pub max_delay_ms: u64,
}

/// Venue selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueListConfig {
    /// Enabled venue names
    pub enabled: Vec<String>,
}

impl VenueListConfig {
    /// Parse the enabled venue names
    pub fn enabled_venues(&self) -> Result<Vec<Venue>, ConfigError> {
        self.enabled
            .iter()
            .map(|name| {
                name.parse::<Venue>()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect()
    }
}

/// Per-venue trading cost model. Static configuration, never mutated at
/// runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeModel {
    /// Taker fee paid on entry, in percent of notional
    pub taker_entry_fee_pct: f64,
    /// Taker fee paid on exit, in percent of notional
    pub taker_exit_fee_pct: f64,
    /// Estimated slippage per fill, in percent of notional
    pub estimated_slippage_pct: f64,
}

impl FeeModel {
    /// Round-trip cost of one leg: entry fee + exit fee + slippage
    pub fn round_trip_pct(&self) -> f64 {
        self.taker_entry_fee_pct + self.taker_exit_fee_pct + self.estimated_slippage_pct
    }

    /// Conservative fallback used when a venue has no configured model
    pub fn conservative() -> Self {
        Self {
            taker_entry_fee_pct: 0.05,
            taker_exit_fee_pct: 0.05,
            estimated_slippage_pct: 0.10,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// `${VAR}` references in the file are expanded from the environment
    /// before parsing.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        let content = EnvExpander::expand(&content)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.top_n == 0 {
            return Err(ConfigError::Invalid(
                "scanner.top_n must be greater than 0".to_string(),
            ));
        }

        if self.scanner.min_leverage == 0 {
            return Err(ConfigError::Invalid(
                "scanner.min_leverage must be at least 1".to_string(),
            ));
        }

        if self.supervisor.cycle_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.cycle_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.supervisor.close_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.close_retry_attempts must be at least 1".to_string(),
            ));
        }

        ConfigValidator::validate_positive(
            self.supervisor.liquidation_safety_margin_pct,
            "supervisor.liquidation_safety_margin_pct",
        )?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if let Some(max_stake) = self.executor.max_stake_usd {
            ConfigValidator::validate_positive(max_stake, "executor.max_stake_usd")?;
        }

        let venues = self.venues.enabled_venues()?;
        if venues.len() < 2 {
            return Err(ConfigError::Invalid(
                "at least two venues are required for a spread".to_string(),
            ));
        }

        for (name, model) in &self.fees {
            name.parse::<Venue>()
                .map_err(|e| ConfigError::Invalid(format!("fees table: {e}")))?;
            ConfigValidator::validate_non_negative(
                model.taker_entry_fee_pct,
                &format!("fees.{name}.taker_entry_fee_pct"),
            )?;
            ConfigValidator::validate_non_negative(
                model.taker_exit_fee_pct,
                &format!("fees.{name}.taker_exit_fee_pct"),
            )?;
            ConfigValidator::validate_non_negative(
                model.estimated_slippage_pct,
                &format!("fees.{name}.estimated_slippage_pct"),
            )?;
        }

        Ok(())
    }

    /// Fee model for a venue, falling back to a conservative estimate when
    /// the venue has no configured entry
    pub fn fee_model(&self, venue: Venue) -> FeeModel {
        self.fees
            .get(&venue.to_string())
            .copied()
            .unwrap_or_else(FeeModel::conservative)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut fees = HashMap::new();
        fees.insert(
            Venue::Hyperliquid.to_string(),
            FeeModel {
                taker_entry_fee_pct: 0.03,
                taker_exit_fee_pct: 0.03,
                estimated_slippage_pct: 0.10,
            },
        );
        fees.insert(
            Venue::Paradex.to_string(),
            FeeModel {
                taker_entry_fee_pct: 0.05,
                taker_exit_fee_pct: 0.05,
                estimated_slippage_pct: 0.15,
            },
        );
        fees.insert(
            Venue::Lighter.to_string(),
            FeeModel {
                taker_entry_fee_pct: 0.05,
                taker_exit_fee_pct: 0.05,
                estimated_slippage_pct: 0.15,
            },
        );
        fees.insert(
            Venue::Extended.to_string(),
            FeeModel {
                taker_entry_fee_pct: 0.05,
                taker_exit_fee_pct: 0.05,
                estimated_slippage_pct: 0.20,
            },
        );

        Self {
            scanner: ScannerConfig {
                top_n: ConfigDefaults::TOP_N,
                min_gross_spread_pct: 0.0,
                min_net_spread_pct: 0.0,
                min_leverage: 1,
                symbols: Vec::new(),
            },
            executor: ExecutorConfig { max_stake_usd: None },
            supervisor: SupervisorConfig {
                cycle_interval_secs: ConfigDefaults::CYCLE_INTERVAL_SECS,
                close_retry_attempts: ConfigDefaults::CLOSE_RETRY_ATTEMPTS,
                liquidation_safety_margin_pct: ConfigDefaults::LIQUIDATION_SAFETY_MARGIN_PCT,
                event_buffer: ConfigDefaults::EVENT_BUFFER,
            },
            retry: RetryConfig {
                max_attempts: ConfigDefaults::RETRY_MAX_ATTEMPTS,
                base_delay_ms: ConfigDefaults::RETRY_BASE_DELAY_MS,
                max_delay_ms: ConfigDefaults::RETRY_MAX_DELAY_MS,
            },
            venues: VenueListConfig {
                enabled: vec![
                    Venue::Hyperliquid.to_string(),
                    Venue::Paradex.to_string(),
                    Venue::Lighter.to_string(),
                    Venue::Extended.to_string(),
                ],
            },
            fees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = AppConfig::default();
        config.scanner.top_n = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.venues.enabled = vec!["hyperliquid".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.venues.enabled.push("binance".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(!toml_str.is_empty());

        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.scanner.top_n, parsed.scanner.top_n);
        assert_eq!(
            config.supervisor.cycle_interval_secs,
            parsed.supervisor.cycle_interval_secs
        );
    }

    #[test]
    fn test_config_from_file() {
        let config = AppConfig::default();
        let toml_content = toml::to_string(&config).unwrap();

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let loaded = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.scanner.top_n, loaded.scanner.top_n);
    }

    #[test]
    fn test_fee_model_lookup_and_fallback() {
        let mut config = AppConfig::default();
        let model = config.fee_model(Venue::Hyperliquid);
        assert_eq!(model.taker_entry_fee_pct, 0.03);
        assert!((model.round_trip_pct() - 0.16).abs() < 1e-12);

        config.fees.clear();
        let fallback = config.fee_model(Venue::Hyperliquid);
        assert_eq!(fallback.taker_entry_fee_pct, 0.05);
    }
}
