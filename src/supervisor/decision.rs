//! Per-cycle evaluation logic
//!
//! Transitions are pure functions of (current strategy, fresh venue reads,
//! configured thresholds), so the state machine is testable with synthetic
//! position snapshots and no live gateway.

use super::{CloseReason, Strategy};
use crate::gateways::{Position, Side, Venue};
use chrono::{DateTime, Utc};

/// Fresh venue reads backing one evaluation of one strategy
#[derive(Debug, Clone)]
pub struct FreshReads {
    /// Long leg as currently reported by its venue
    pub long: Position,
    /// Short leg as currently reported by its venue
    pub short: Position,
    /// Current hourly funding rate on the long venue, if the read succeeded
    pub long_rate_1h_pct: Option<f64>,
    /// Current hourly funding rate on the short venue, if the read succeeded
    pub short_rate_1h_pct: Option<f64>,
    /// Evaluation instant
    pub now: DateTime<Utc>,
}

/// Liquidation-risk warning for one leg. Informational; never forces a
/// close.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationAlert {
    /// Venue holding the at-risk leg
    pub venue: Venue,
    /// Side of the at-risk leg
    pub side: Side,
    /// Distance to liquidation as percent of mark price
    pub distance_pct: f64,
}

/// Outcome of evaluating one strategy for one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleDecision {
    /// Close trigger, if any exit condition fired
    pub close: Option<CloseReason>,
    /// Liquidation-risk alerts to surface
    pub alerts: Vec<LiquidationAlert>,
}

/// Combined PnL of both legs (unrealized + accumulated funding) as a
/// percentage of the stake
pub fn combined_pnl_pct(stake_size_usd: f64, long: &Position, short: &Position) -> f64 {
    if stake_size_usd <= 0.0 {
        return 0.0;
    }
    (long.total_pnl_usd() + short.total_pnl_usd()) / stake_size_usd * 100.0
}

/// Evaluate an ACTIVE strategy against fresh reads.
///
/// Exit conditions are checked in order: take-profit, stop-loss, funding
/// reversal, max hold. Liquidation distance is only surfaced when no exit
/// condition fired.
pub fn decide(strategy: &Strategy, reads: &FreshReads, liquidation_safety_margin_pct: f64) -> CycleDecision {
    let pnl_pct = combined_pnl_pct(strategy.stake_size_usd, &reads.long, &reads.short);
    let params = &strategy.params;

    if let Some(tp) = params.take_profit_pct {
        if pnl_pct >= tp {
            return CycleDecision {
                close: Some(CloseReason::TakeProfit),
                alerts: Vec::new(),
            };
        }
    }

    if let Some(sl) = params.stop_loss_pct {
        if pnl_pct <= -sl {
            return CycleDecision {
                close: Some(CloseReason::StopLoss),
                alerts: Vec::new(),
            };
        }
    }

    // Reversal needs both current rates; a failed rate read skips the check
    // for this cycle rather than guessing.
    if params.close_on_reversal {
        if let (Some(long_rate), Some(short_rate)) = (reads.long_rate_1h_pct, reads.short_rate_1h_pct) {
            if short_rate - long_rate < 0.0 {
                return CycleDecision {
                    close: Some(CloseReason::Reversal),
                    alerts: Vec::new(),
                };
            }
        }
    }

    if let Some(max_hold_secs) = params.max_hold_secs {
        let held = reads.now.signed_duration_since(strategy.created_at);
        if held.num_seconds() >= max_hold_secs as i64 {
            return CycleDecision {
                close: Some(CloseReason::MaxHold),
                alerts: Vec::new(),
            };
        }
    }

    let mut alerts = Vec::new();
    for leg in [&reads.long, &reads.short] {
        if let Some(distance_pct) = leg.liquidation_distance_pct() {
            if distance_pct < liquidation_safety_margin_pct {
                alerts.push(LiquidationAlert {
                    venue: leg.venue,
                    side: leg.side,
                    distance_pct,
                });
            }
        }
    }

    CycleDecision { close: None, alerts }
}
