//! Funding opportunity scanner
//!
//! Pulls funding-rate snapshots from every selected venue, pairs venues per
//! symbol, and ranks fee/slippage-adjusted net spreads. Owns no long-lived
//! state; every scan recomputes from fresh snapshots.

use crate::config::{AppConfig, FeeModel, ScannerConfig};
use crate::gateways::{FundingSnapshot, GatewayError, GatewaySet, Venue};
use crate::utils::{retry_transient, RetryPolicy};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Entry/exit costs are amortized over this hold window when netting a
/// spread
pub const AMORTIZATION_HOURS: f64 = 24.0;

/// Delta-neutral funding arbitrage candidate.
///
/// Derived data, recomputed every scan; never persisted beyond the current
/// ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Standardized symbol (e.g. "BTC")
    pub symbol: String,
    /// Venue for the long leg (lower funding rate)
    pub long_venue: Venue,
    /// Venue for the short leg (higher funding rate)
    pub short_venue: Venue,
    /// Hourly funding rate on the long venue in percent
    pub long_rate_1h_pct: f64,
    /// Hourly funding rate on the short venue in percent
    pub short_rate_1h_pct: f64,
    /// Hourly rate differential in percent, always positive
    pub gross_spread_pct: f64,
    /// Gross spread minus amortized fees and slippage
    pub net_spread_pct: f64,
    /// Total entry + exit fees + slippage across both legs in percent
    pub entry_cost_pct: f64,
    /// Maximum leverage usable on both legs
    pub min_required_leverage: u32,
    /// Ranking score: `net_spread_pct * min_required_leverage * 100`
    pub score: f64,
    /// When the underlying snapshots were taken
    pub observed_at: DateTime<Utc>,
}

/// Result of one scan cycle
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Ranked opportunities, truncated to the configured top N
    pub opportunities: Vec<Opportunity>,
    /// Venues excluded from this cycle and why
    pub failed_venues: Vec<(Venue, GatewayError)>,
}

/// Scan-level failure
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// No venues were selected for the scan
    #[error("at least one venue must be selected")]
    NoVenuesSelected,

    /// Every selected venue failed to report funding data
    #[error("all {} selected venues failed to report funding", .0.len())]
    AllVenuesFailed(Vec<(Venue, GatewayError)>),
}

/// Strip venue-specific suffixes so symbols compare across venues
pub fn standardize_symbol(raw: &str) -> String {
    let mut symbol = raw.to_uppercase();
    for suffix in ["-USD-PERP", "-PERP", "_USDC_PER_9", "_USDC", "USDC", "USD"] {
        symbol = symbol.replace(suffix, "");
    }
    symbol.retain(|c| c != '-' && c != '_');
    symbol.trim().to_string()
}

/// Total round-trip cost across both legs in percent
pub fn entry_cost_pct(long_fee: &FeeModel, short_fee: &FeeModel) -> f64 {
    long_fee.round_trip_pct() + short_fee.round_trip_pct()
}

/// Net hourly spread: gross spread minus both legs' round-trip costs
/// amortized over the 24h hold window
pub fn net_spread_pct(gross_spread_pct: f64, long_fee: &FeeModel, short_fee: &FeeModel) -> f64 {
    gross_spread_pct - entry_cost_pct(long_fee, short_fee) / AMORTIZATION_HOURS
}

/// Opportunity scanner over a set of selected venues
pub struct Scanner {
    gateways: GatewaySet,
    venues: Vec<Venue>,
    config: ScannerConfig,
    fees: HashMap<Venue, FeeModel>,
    retry: RetryPolicy,
}

impl Scanner {
    /// Build a scanner for the selected venues
    pub fn new(gateways: GatewaySet, venues: Vec<Venue>, config: &AppConfig) -> Self {
        let mut selected = Vec::new();
        for venue in venues {
            if !selected.contains(&venue) {
                selected.push(venue);
            }
        }

        let fees = Venue::ALL
            .iter()
            .map(|&v| (v, config.fee_model(v)))
            .collect();

        Self {
            gateways,
            venues: selected,
            config: config.scanner.clone(),
            fees,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    /// Run one scan cycle.
    ///
    /// Per-venue fetch failures exclude the venue from this cycle's symbol
    /// universe; the scan only aborts when every venue fails.
    pub async fn scan(&self) -> Result<ScanOutcome, ScanError> {
        if self.venues.is_empty() {
            return Err(ScanError::NoVenuesSelected);
        }

        let fetches = self.venues.iter().map(|&venue| async move {
            let result = match self.gateways.get(venue) {
                Ok(gateway) => {
                    retry_transient(&self.retry, "funding_snapshots", || {
                        let gateway = gateway.clone();
                        async move { gateway.funding_snapshots().await }
                    })
                    .await
                }
                Err(e) => Err(e),
            };
            (venue, result)
        });

        let mut universe: IndexMap<String, Vec<FundingSnapshot>> = IndexMap::new();
        let mut failed_venues = Vec::new();
        let mut succeeded = 0usize;

        for (venue, result) in join_all(fetches).await {
            match result {
                Ok(snapshots) => {
                    succeeded += 1;
                    debug!(venue = %venue, count = snapshots.len(), "funding snapshots fetched");
                    for mut snapshot in snapshots {
                        snapshot.symbol = standardize_symbol(&snapshot.symbol);
                        if !self.symbol_allowed(&snapshot.symbol) {
                            continue;
                        }
                        universe
                            .entry(snapshot.symbol.clone())
                            .or_insert_with(Vec::new)
                            .push(snapshot);
                    }
                }
                Err(e) => {
                    warn!(venue = %venue, error = %e, "venue excluded from scan cycle");
                    failed_venues.push((venue, e));
                }
            }
        }

        if succeeded == 0 {
            return Err(ScanError::AllVenuesFailed(failed_venues));
        }

        let mut opportunities = Vec::new();
        for snapshots in universe.values() {
            // A spread needs two legs
            if snapshots.len() < 2 {
                continue;
            }
            for i in 0..snapshots.len() {
                for j in (i + 1)..snapshots.len() {
                    if let Some(opp) = self.evaluate_pair(&snapshots[i], &snapshots[j]) {
                        opportunities.push(opp);
                    }
                }
            }
        }

        rank(&mut opportunities, self.config.top_n);
        metrics::counter!("scanner_cycles_total", 1);
        info!(
            opportunities = opportunities.len(),
            excluded_venues = failed_venues.len(),
            "scan cycle complete"
        );

        Ok(ScanOutcome {
            opportunities,
            failed_venues,
        })
    }

    fn symbol_allowed(&self, symbol: &str) -> bool {
        self.config.symbols.is_empty()
            || self
                .config
                .symbols
                .iter()
                .any(|s| standardize_symbol(s) == symbol)
    }

    fn fee_model(&self, venue: Venue) -> FeeModel {
        self.fees
            .get(&venue)
            .copied()
            .unwrap_or_else(FeeModel::conservative)
    }

    /// Evaluate one unordered venue pair for a symbol.
    ///
    /// Of the two leg-direction assignments only the one with positive gross
    /// spread survives: long goes on the lower-rate venue, short on the
    /// higher. Equal rates carry no edge and yield nothing.
    fn evaluate_pair(&self, a: &FundingSnapshot, b: &FundingSnapshot) -> Option<Opportunity> {
        if a.venue == b.venue {
            return None;
        }

        let (long, short) = if a.rate_1h_pct < b.rate_1h_pct {
            (a, b)
        } else if b.rate_1h_pct < a.rate_1h_pct {
            (b, a)
        } else {
            return None;
        };

        let gross_spread_pct = short.rate_1h_pct - long.rate_1h_pct;
        if gross_spread_pct < self.config.min_gross_spread_pct {
            return None;
        }

        let min_required_leverage = long.max_leverage.min(short.max_leverage).max(1);
        if min_required_leverage < self.config.min_leverage {
            return None;
        }

        let long_fee = self.fee_model(long.venue);
        let short_fee = self.fee_model(short.venue);
        let entry_cost = entry_cost_pct(&long_fee, &short_fee);
        let net = net_spread_pct(gross_spread_pct, &long_fee, &short_fee);
        if net < self.config.min_net_spread_pct {
            return None;
        }

        Some(Opportunity {
            symbol: long.symbol.clone(),
            long_venue: long.venue,
            short_venue: short.venue,
            long_rate_1h_pct: long.rate_1h_pct,
            short_rate_1h_pct: short.rate_1h_pct,
            gross_spread_pct,
            net_spread_pct: net,
            entry_cost_pct: entry_cost,
            min_required_leverage,
            score: net * min_required_leverage as f64 * 100.0,
            observed_at: long.observed_at.min(short.observed_at),
        })
    }
}

/// Rank by score descending, ties broken by net spread descending, then
/// truncate to the top N
pub(crate) fn rank(opportunities: &mut Vec<Opportunity>, top_n: usize) {
    opportunities.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.net_spread_pct.total_cmp(&a.net_spread_pct))
    });
    opportunities.truncate(top_n);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_fee_models() -> (FeeModel, FeeModel) {
        // (hyperliquid, paradex)
        (
            FeeModel {
                taker_entry_fee_pct: 0.03,
                taker_exit_fee_pct: 0.03,
                estimated_slippage_pct: 0.10,
            },
            FeeModel {
                taker_entry_fee_pct: 0.05,
                taker_exit_fee_pct: 0.05,
                estimated_slippage_pct: 0.15,
            },
        )
    }

    fn scanner_with_defaults() -> Scanner {
        let config = AppConfig::default();
        Scanner::new(
            GatewaySet::new(),
            vec![Venue::Hyperliquid, Venue::Paradex],
            &config,
        )
    }

    #[test]
    fn test_standardize_symbol() {
        assert_eq!(standardize_symbol("BTC-USD-PERP"), "BTC");
        assert_eq!(standardize_symbol("eth_usdc_per_9"), "ETH");
        assert_eq!(standardize_symbol("SOL-PERP"), "SOL");
        assert_eq!(standardize_symbol("BTC"), "BTC");
    }

    #[test]
    fn test_net_spread_below_gross_with_positive_costs() {
        let (fee_a, fee_b) = spec_fee_models();
        for gross in [0.001, 0.03, 0.5, 2.0] {
            assert!(net_spread_pct(gross, &fee_a, &fee_b) < gross);
        }

        // Zero-cost models leave the spread untouched
        let free = FeeModel {
            taker_entry_fee_pct: 0.0,
            taker_exit_fee_pct: 0.0,
            estimated_slippage_pct: 0.0,
        };
        assert_eq!(net_spread_pct(0.03, &free, &free), 0.03);
    }

    #[test]
    fn test_pair_assignment_and_net_math() {
        // Venue A pays +0.01%/h, venue B -0.02%/h: long the lower (B),
        // short the higher (A), gross 0.03%/h.
        let scanner = scanner_with_defaults();
        let a = FundingSnapshot::from_hourly(Venue::Hyperliquid, "BTC", 0.01, 20);
        let b = FundingSnapshot::from_hourly(Venue::Paradex, "BTC", -0.02, 10);

        let opp = scanner.evaluate_pair(&a, &b).expect("positive spread");
        assert_eq!(opp.long_venue, Venue::Paradex);
        assert_eq!(opp.short_venue, Venue::Hyperliquid);
        assert!((opp.gross_spread_pct - 0.03).abs() < 1e-12);
        assert_eq!(opp.min_required_leverage, 10);

        // Long leg (paradex): 0.05 + 0.05 + 0.15; short leg (hyperliquid):
        // 0.03 + 0.03 + 0.10; amortized over 24h.
        let expected_net = 0.03 - 0.41 / 24.0;
        assert!((opp.net_spread_pct - expected_net).abs() < 1e-12);
        assert!((opp.score - expected_net * 10.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_equal_rates_yield_nothing() {
        let scanner = scanner_with_defaults();
        let a = FundingSnapshot::from_hourly(Venue::Hyperliquid, "BTC", 0.01, 20);
        let b = FundingSnapshot::from_hourly(Venue::Paradex, "BTC", 0.01, 10);
        assert!(scanner.evaluate_pair(&a, &b).is_none());
    }

    #[test]
    fn test_ranking_order_and_tie_break() {
        let template = Opportunity {
            symbol: "BTC".to_string(),
            long_venue: Venue::Paradex,
            short_venue: Venue::Hyperliquid,
            long_rate_1h_pct: -0.02,
            short_rate_1h_pct: 0.01,
            gross_spread_pct: 0.03,
            net_spread_pct: 0.01,
            entry_cost_pct: 0.41,
            min_required_leverage: 1,
            score: 1.0,
            observed_at: Utc::now(),
        };

        let mut opps = vec![
            Opportunity {
                symbol: "A".to_string(),
                score: 1.0,
                net_spread_pct: 0.010,
                ..template.clone()
            },
            Opportunity {
                symbol: "B".to_string(),
                score: 3.0,
                net_spread_pct: 0.005,
                ..template.clone()
            },
            Opportunity {
                symbol: "C".to_string(),
                score: 1.0,
                net_spread_pct: 0.020,
                ..template.clone()
            },
        ];

        rank(&mut opps, 2);
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].symbol, "B");
        // Tie on score resolved by higher net spread
        assert_eq!(opps[1].symbol, "C");
    }
}
