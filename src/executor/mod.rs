//! Dual-leg executor
//!
//! Opens the long and short legs of a delta-neutral strategy as one logical
//! transaction across two non-transactional venues: long first, then short,
//! with a single compensating close of the long leg if the short fails. The
//! one failure mode that cannot self-heal, a surviving leg whose rollback
//! also failed, is a first-class outcome that escalates loudly.

use crate::config::{AppConfig, ConfigValidator};
use crate::gateways::{GatewayError, GatewaySet, Side, Venue};
use crate::scanner::Opportunity;
use crate::supervisor::{Strategy, Supervisor};
use crate::utils::{retry_transient, RetryPolicy};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Parameters for opening one strategy
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Per-leg notional stake in USD
    pub stake_size_usd: f64,
    /// Leverage applied to both legs
    pub leverage: u32,
    /// Close when combined PnL% reaches this target
    pub take_profit_pct: Option<f64>,
    /// Close when combined PnL% falls to minus this limit
    pub stop_loss_pct: Option<f64>,
    /// Close after holding this long, in seconds
    pub max_hold_secs: Option<u64>,
    /// Close when the funding differential flips sign
    pub close_on_reversal: bool,
}

impl OpenRequest {
    /// Request with the given stake and leverage and no optional thresholds
    pub fn new(stake_size_usd: f64, leverage: u32) -> Self {
        Self {
            stake_size_usd,
            leverage,
            take_profit_pct: None,
            stop_loss_pct: None,
            max_hold_secs: None,
            close_on_reversal: true,
        }
    }
}

/// Typed outcome of a failed execution
#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    /// Request rejected before any venue was touched; never retried
    #[error("validation failed: {0}")]
    Validation(String),

    /// A pre-commit gateway query failed
    #[error("preflight {action} on {venue} for {symbol} failed: {source}")]
    Preflight {
        /// Venue that failed the query
        venue: Venue,
        /// Symbol being opened
        symbol: String,
        /// Which query failed
        action: &'static str,
        /// Underlying gateway failure
        #[source]
        source: GatewayError,
    },

    /// A leg placement failed with no position created.
    ///
    /// For the long leg this means nothing happened; no close is ever
    /// issued.
    #[error("{leg} leg placement on {venue} for {symbol} failed: {source}")]
    LegPlacement {
        /// Which leg failed
        leg: Side,
        /// Venue the placement was sent to
        venue: Venue,
        /// Symbol being opened
        symbol: String,
        /// Underlying gateway failure
        #[source]
        source: GatewayError,
    },

    /// The short leg failed and the long leg was closed by the compensating
    /// action; no position remains open
    #[error(
        "{failed_leg} leg on {failed_venue} for {symbol} failed ({reason}); \
         long leg on {rolled_back_venue} rolled back"
    )]
    RolledBack {
        /// Leg whose placement failed
        failed_leg: Side,
        /// Venue the failed placement was sent to
        failed_venue: Venue,
        /// Venue whose leg was opened and then closed again
        rolled_back_venue: Venue,
        /// Symbol being opened
        symbol: String,
        /// Why the failed leg's placement failed
        reason: GatewayError,
    },

    /// The short leg failed and the compensating close of the long leg also
    /// failed: one leg is still open and manual intervention is required
    #[error(
        "partial position: {side} leg of {size_usd} USD {symbol} still open on \
         {surviving_venue} after failed rollback ({close_error}); manual intervention required"
    )]
    PartialPosition {
        /// Venue still holding the surviving leg
        surviving_venue: Venue,
        /// Symbol of the surviving leg
        symbol: String,
        /// Side of the surviving leg
        side: Side,
        /// Notional size of the surviving leg in USD
        size_usd: f64,
        /// Why the short placement failed
        placement_error: GatewayError,
        /// Why the compensating close failed
        close_error: GatewayError,
    },
}

/// Opens both legs of a selected opportunity as a single logical unit.
///
/// Stateless across calls; a successful run hands the created strategy to
/// the supervisor the instant both legs are confirmed.
pub struct DualLegExecutor {
    gateways: GatewaySet,
    supervisor: Arc<Supervisor>,
    retry: RetryPolicy,
    max_stake_usd: Option<f64>,
}

impl DualLegExecutor {
    /// Build an executor over the given gateways, adopting strategies into
    /// the given supervisor
    pub fn new(gateways: GatewaySet, supervisor: Arc<Supervisor>, config: &AppConfig) -> Self {
        Self {
            gateways,
            supervisor,
            retry: RetryPolicy::from(&config.retry),
            max_stake_usd: config.executor.max_stake_usd,
        }
    }

    /// Open both legs of `opportunity`, returning the supervised strategy.
    ///
    /// The two placements are strictly ordered long-then-short so the
    /// rollback direction is unambiguous. Placements for different
    /// strategies may run fully in parallel.
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        request: OpenRequest,
    ) -> Result<Strategy, ExecutionError> {
        self.validate(opportunity, &request)?;

        let symbol = opportunity.symbol.clone();
        let long_venue = opportunity.long_venue;
        let short_venue = opportunity.short_venue;
        let stake_size_usd = request.stake_size_usd;
        let leverage = request.leverage;

        let long_gateway = self.gateways.get(long_venue).map_err(|e| {
            ExecutionError::Preflight {
                venue: long_venue,
                symbol: symbol.clone(),
                action: "gateway lookup",
                source: e,
            }
        })?;
        let short_gateway = self.gateways.get(short_venue).map_err(|e| {
            ExecutionError::Preflight {
                venue: short_venue,
                symbol: symbol.clone(),
                action: "gateway lookup",
                source: e,
            }
        })?;

        // Venue-imposed maximums are re-queried before committing; the
        // opportunity's advertised leverage may be stale.
        let (long_max, short_max) = tokio::join!(
            retry_transient(&self.retry, "max_leverage", || {
                let gateway = long_gateway.clone();
                let symbol = symbol.clone();
                async move { gateway.max_leverage(&symbol).await }
            }),
            retry_transient(&self.retry, "max_leverage", || {
                let gateway = short_gateway.clone();
                let symbol = symbol.clone();
                async move { gateway.max_leverage(&symbol).await }
            }),
        );
        let long_max = long_max.map_err(|e| ExecutionError::Preflight {
            venue: long_venue,
            symbol: symbol.clone(),
            action: "max_leverage",
            source: e,
        })?;
        let short_max = short_max.map_err(|e| ExecutionError::Preflight {
            venue: short_venue,
            symbol: symbol.clone(),
            action: "max_leverage",
            source: e,
        })?;
        for (venue, venue_max) in [(long_venue, long_max), (short_venue, short_max)] {
            if leverage > venue_max {
                return Err(ExecutionError::Validation(format!(
                    "leverage {leverage}x exceeds {venue} maximum {venue_max}x for {symbol}"
                )));
            }
        }

        info!(
            symbol = %symbol,
            venue = %long_venue,
            stake_usd = stake_size_usd,
            leverage = leverage,
            "opening long leg"
        );
        let long_position = retry_transient(&self.retry, "place_market_order", || {
            let gateway = long_gateway.clone();
            let symbol = symbol.clone();
            async move {
                gateway
                    .place_market_order(&symbol, Side::Long, stake_size_usd, leverage)
                    .await
            }
        })
        .await
        .map_err(|e| {
            // Long failed: no state was created, nothing to roll back
            warn!(symbol = %symbol, venue = %long_venue, error = %e, "long leg placement failed");
            metrics::counter!("executor_leg_failures_total", 1);
            ExecutionError::LegPlacement {
                leg: Side::Long,
                venue: long_venue,
                symbol: symbol.clone(),
                source: e,
            }
        })?;
        info!(
            symbol = %symbol,
            venue = %long_venue,
            entry_price = long_position.entry_price,
            "long leg filled"
        );

        info!(
            symbol = %symbol,
            venue = %short_venue,
            stake_usd = stake_size_usd,
            leverage = leverage,
            "opening short leg"
        );
        let short_result = retry_transient(&self.retry, "place_market_order", || {
            let gateway = short_gateway.clone();
            let symbol = symbol.clone();
            async move {
                gateway
                    .place_market_order(&symbol, Side::Short, stake_size_usd, leverage)
                    .await
            }
        })
        .await;

        let short_position = match short_result {
            Ok(position) => position,
            Err(placement_error) => {
                warn!(
                    symbol = %symbol,
                    venue = %short_venue,
                    error = %placement_error,
                    "short leg placement failed; rolling back long leg"
                );
                // Exactly one compensating close, never retried: a failed
                // rollback is escalated, not papered over.
                return Err(match long_gateway.close_position(&symbol).await {
                    Ok(_) | Err(GatewayError::PositionNotFound { .. }) => {
                        info!(symbol = %symbol, venue = %long_venue, "long leg rolled back");
                        metrics::counter!("executor_rollbacks_total", 1);
                        ExecutionError::RolledBack {
                            failed_leg: Side::Short,
                            failed_venue: short_venue,
                            rolled_back_venue: long_venue,
                            symbol,
                            reason: placement_error,
                        }
                    }
                    Err(close_error) => {
                        error!(
                            symbol = %symbol,
                            venue = %long_venue,
                            size_usd = long_position.size_usd,
                            error = %close_error,
                            "rollback failed; long leg survives and requires manual intervention"
                        );
                        metrics::counter!("executor_partial_positions_total", 1);
                        ExecutionError::PartialPosition {
                            surviving_venue: long_venue,
                            symbol,
                            side: Side::Long,
                            size_usd: long_position.size_usd,
                            placement_error,
                            close_error,
                        }
                    }
                });
            }
        };
        info!(
            symbol = %symbol,
            venue = %short_venue,
            entry_price = short_position.entry_price,
            "short leg filled"
        );

        let strategy = Strategy::open(opportunity, &request, long_position, short_position);
        info!(
            strategy = %strategy.id,
            symbol = %strategy.symbol,
            long_venue = %long_venue,
            short_venue = %short_venue,
            "both legs confirmed; strategy active"
        );
        metrics::counter!("executor_strategies_opened_total", 1);
        self.supervisor.adopt(strategy.clone());
        Ok(strategy)
    }

    fn validate(&self, opportunity: &Opportunity, request: &OpenRequest) -> Result<(), ExecutionError> {
        ConfigValidator::validate_symbol(&opportunity.symbol)
            .map_err(|e| ExecutionError::Validation(e.to_string()))?;

        if request.stake_size_usd <= 0.0 {
            return Err(ExecutionError::Validation(format!(
                "stake size must be positive, got {}",
                request.stake_size_usd
            )));
        }

        if let Some(max_stake) = self.max_stake_usd {
            if request.stake_size_usd > max_stake {
                return Err(ExecutionError::Validation(format!(
                    "stake size {} exceeds configured maximum {max_stake}",
                    request.stake_size_usd
                )));
            }
        }

        if request.leverage == 0 {
            return Err(ExecutionError::Validation(
                "leverage must be at least 1x".to_string(),
            ));
        }

        if request.leverage > opportunity.min_required_leverage {
            return Err(ExecutionError::Validation(format!(
                "leverage {}x exceeds the {}x usable on both {} and {} for {}",
                request.leverage,
                opportunity.min_required_leverage,
                opportunity.long_venue,
                opportunity.short_venue,
                opportunity.symbol
            )));
        }

        Ok(())
    }
}
