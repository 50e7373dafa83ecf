//! Settings management utilities

use crate::ConfigError;
use std::env;

/// Environment variable expansion utility
pub struct EnvExpander;

impl EnvExpander {
    /// Expand `${VAR_NAME}` references in a string from the environment
    pub fn expand(input: &str) -> Result<String, ConfigError> {
        let mut result = input.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let var_value = env::var(var_name).map_err(|_| {
                    ConfigError::Invalid(format!("environment variable '{var_name}' not found"))
                })?;

                result.replace_range(start..start + end + 1, &var_value);
            } else {
                return Err(ConfigError::Invalid(
                    "unclosed environment variable reference".to_string(),
                ));
            }
        }

        Ok(result)
    }
}

/// Configuration validation utilities
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a strictly positive value
    pub fn validate_positive(value: f64, name: &str) -> Result<(), ConfigError> {
        if value <= 0.0 {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        Ok(())
    }

    /// Validate a non-negative value
    pub fn validate_non_negative(value: f64, name: &str) -> Result<(), ConfigError> {
        if value < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{name} must not be negative"
            )));
        }
        Ok(())
    }

    /// Validate a symbol name (non-empty, alphanumeric)
    pub fn validate_symbol(symbol: &str) -> Result<(), ConfigError> {
        if symbol.is_empty() {
            return Err(ConfigError::Invalid("symbol cannot be empty".to_string()));
        }

        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(
                "symbol must contain only alphanumeric characters".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration defaults
pub struct ConfigDefaults;

impl ConfigDefaults {
    /// Default number of top-ranked opportunities kept per scan
    pub const TOP_N: usize = 25;

    /// Default seconds between supervisor cycles
    pub const CYCLE_INTERVAL_SECS: u64 = 5;

    /// Default close attempts per leg before parking a strategy in ERROR
    pub const CLOSE_RETRY_ATTEMPTS: u32 = 3;

    /// Default liquidation-distance alert threshold in percent
    pub const LIQUIDATION_SAFETY_MARGIN_PCT: f64 = 20.0;

    /// Default lifecycle event channel capacity
    pub const EVENT_BUFFER: usize = 256;

    /// Default retry attempts for transient gateway errors
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;

    /// Default first retry delay in milliseconds
    pub const RETRY_BASE_DELAY_MS: u64 = 250;

    /// Default ceiling on a single retry delay in milliseconds
    pub const RETRY_MAX_DELAY_MS: u64 = 5_000;
}
