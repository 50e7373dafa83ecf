//! Strategy supervisor
//!
//! Owns the registry of live delta-neutral strategies and drives one
//! evaluation cycle per interval. Each registered strategy is evaluated
//! concurrently within a cycle behind its own lock, so a stalled gateway
//! call for one strategy never delays the others.

pub mod decision;

pub use decision::{CycleDecision, FreshReads, LiquidationAlert};

use crate::config::{AppConfig, SupervisorConfig};
use crate::executor::OpenRequest;
use crate::gateways::{GatewayError, GatewaySet, Position, Venue};
use crate::scanner::Opportunity;
use crate::utils::{retry_transient, RetryPolicy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Auto-management thresholds for one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Close when combined PnL% reaches this target
    pub take_profit_pct: Option<f64>,
    /// Close when combined PnL% falls to minus this limit
    pub stop_loss_pct: Option<f64>,
    /// Close after holding this long, in seconds
    pub max_hold_secs: Option<u64>,
    /// Close when the funding differential flips sign
    pub close_on_reversal: bool,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            take_profit_pct: None,
            stop_loss_pct: None,
            max_hold_secs: None,
            close_on_reversal: true,
        }
    }
}

/// Why a strategy moved to CLOSING
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Combined PnL reached the take-profit target
    TakeProfit,
    /// Combined PnL breached the stop-loss limit
    StopLoss,
    /// The funding differential reversed sign
    Reversal,
    /// Maximum hold duration elapsed
    MaxHold,
    /// Operator requested the close
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::Reversal => write!(f, "reversal"),
            CloseReason::MaxHold => write!(f, "max_hold"),
            CloseReason::Manual => write!(f, "manual"),
        }
    }
}

/// Lifecycle state of a strategy, evaluated once per monitoring cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrategyState {
    /// Both legs open, exit conditions monitored
    Active,
    /// An exit condition fired; legs are being closed
    Closing {
        /// What triggered the close
        reason: CloseReason,
    },
    /// Both legs confirmed closed (terminal)
    Closed {
        /// Realized PnL across both legs, funding included
        realized_pnl_usd: f64,
    },
    /// A close attempt exhausted its retries; legs may still be open on the
    /// venues and need operator attention (terminal)
    Error {
        /// Which leg(s) are in an uncertain state and why
        detail: String,
    },
}

impl StrategyState {
    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StrategyState::Closed { .. } | StrategyState::Error { .. }
        )
    }
}

/// A live delta-neutral position pair.
///
/// Exclusively owns its two leg positions; nothing outside the supervisor
/// mutates them once the executor hands the strategy over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique id
    pub id: Uuid,
    /// Standardized symbol
    pub symbol: String,
    /// Long leg
    pub long: Position,
    /// Short leg
    pub short: Position,
    /// Auto-management thresholds
    pub params: StrategyParams,
    /// Per-leg notional stake in USD
    pub stake_size_usd: f64,
    /// Leverage used on both legs
    pub leverage: u32,
    /// Gross hourly spread at entry in percent
    pub entry_spread_pct: f64,
    /// Current lifecycle state
    pub state: StrategyState,
    /// When both legs were confirmed open
    pub created_at: DateTime<Utc>,
    /// When both legs were confirmed closed
    pub closed_at: Option<DateTime<Utc>>,
}

impl Strategy {
    /// Build an ACTIVE strategy from two freshly confirmed legs
    pub fn open(opportunity: &Opportunity, request: &OpenRequest, long: Position, short: Position) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: opportunity.symbol.clone(),
            long,
            short,
            params: StrategyParams {
                take_profit_pct: request.take_profit_pct,
                stop_loss_pct: request.stop_loss_pct,
                max_hold_secs: request.max_hold_secs,
                close_on_reversal: request.close_on_reversal,
            },
            stake_size_usd: request.stake_size_usd,
            leverage: request.leverage,
            entry_spread_pct: opportunity.gross_spread_pct,
            state: StrategyState::Active,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Combined PnL of both legs in USD, funding included
    pub fn combined_pnl_usd(&self) -> f64 {
        self.long.total_pnl_usd() + self.short.total_pnl_usd()
    }

    /// Combined PnL as a percentage of the stake
    pub fn combined_pnl_pct(&self) -> f64 {
        decision::combined_pnl_pct(self.stake_size_usd, &self.long, &self.short)
    }
}

/// Strategy lifecycle event for display and alerting
#[derive(Debug, Clone, Serialize)]
pub enum StrategyEvent {
    /// A strategy was adopted into the registry
    Created {
        /// Strategy id
        id: Uuid,
        /// Symbol
        symbol: String,
        /// Long venue
        long_venue: Venue,
        /// Short venue
        short_venue: Venue,
    },
    /// An exit condition fired
    Closing {
        /// Strategy id
        id: Uuid,
        /// Symbol
        symbol: String,
        /// What triggered the close
        reason: CloseReason,
    },
    /// Both legs confirmed closed
    Closed {
        /// Strategy id
        id: Uuid,
        /// Symbol
        symbol: String,
        /// Realized PnL across both legs
        realized_pnl_usd: f64,
    },
    /// A close attempt failed; operator attention required
    Error {
        /// Strategy id
        id: Uuid,
        /// Symbol
        symbol: String,
        /// Which leg(s) are uncertain and why
        detail: String,
    },
    /// A leg is close to its liquidation price
    LiquidationRisk {
        /// Strategy id
        id: Uuid,
        /// Symbol
        symbol: String,
        /// Venue holding the at-risk leg
        venue: Venue,
        /// Side of the at-risk leg
        side: crate::gateways::Side,
        /// Distance to liquidation as percent of mark price
        distance_pct: f64,
    },
}

/// Supervisor-level failure
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// No strategy registered under the id
    #[error("unknown strategy {0}")]
    UnknownStrategy(Uuid),

    /// The strategy already reached a terminal state
    #[error("strategy {0} is already terminal")]
    AlreadyTerminal(Uuid),
}

/// Owns the live strategy registry and the periodic evaluation cycle
pub struct Supervisor {
    gateways: GatewaySet,
    config: SupervisorConfig,
    retry: RetryPolicy,
    registry: DashMap<Uuid, Arc<Mutex<Strategy>>>,
    events: broadcast::Sender<StrategyEvent>,
    wake: Notify,
}

impl Supervisor {
    /// Build a supervisor over the given gateways
    pub fn new(gateways: GatewaySet, config: &AppConfig) -> Self {
        let (events, _) = broadcast::channel(config.supervisor.event_buffer.max(1));
        Self {
            gateways,
            config: config.supervisor.clone(),
            retry: RetryPolicy::from(&config.retry),
            registry: DashMap::new(),
            events,
            wake: Notify::new(),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<StrategyEvent> {
        self.events.subscribe()
    }

    /// Take ownership of a freshly executed strategy.
    ///
    /// The only insert point into the registry.
    pub fn adopt(&self, strategy: Strategy) -> Uuid {
        let id = strategy.id;
        info!(
            strategy = %id,
            symbol = %strategy.symbol,
            long_venue = %strategy.long.venue,
            short_venue = %strategy.short.venue,
            "strategy adopted"
        );
        self.emit(StrategyEvent::Created {
            id,
            symbol: strategy.symbol.clone(),
            long_venue: strategy.long.venue,
            short_venue: strategy.short.venue,
        });
        metrics::counter!("supervisor_strategies_adopted_total", 1);
        self.registry.insert(id, Arc::new(Mutex::new(strategy)));
        id
    }

    /// Number of registered strategies, terminal ones included
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Clone the current state of one strategy
    pub async fn snapshot(&self, id: Uuid) -> Option<Strategy> {
        let entry = self.registry.get(&id).map(|e| e.value().clone())?;
        let strategy = entry.lock().await;
        Some(strategy.clone())
    }

    /// Clone the current state of every registered strategy
    pub async fn snapshots(&self) -> Vec<Strategy> {
        let entries: Vec<Arc<Mutex<Strategy>>> =
            self.registry.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.lock().await.clone());
        }
        out
    }

    /// Request a manual close.
    ///
    /// Handled identically to an automatic CLOSING transition; the next
    /// cycle is woken immediately. In-flight gateway calls are not aborted.
    pub async fn request_close(&self, id: Uuid) -> Result<(), SupervisorError> {
        let entry = self
            .registry
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(SupervisorError::UnknownStrategy(id))?;

        let mut strategy = entry.lock().await;
        match strategy.state {
            StrategyState::Active => {
                strategy.state = StrategyState::Closing {
                    reason: CloseReason::Manual,
                };
                info!(strategy = %id, symbol = %strategy.symbol, "manual close requested");
                self.emit(StrategyEvent::Closing {
                    id,
                    symbol: strategy.symbol.clone(),
                    reason: CloseReason::Manual,
                });
                drop(strategy);
                self.wake.notify_one();
                Ok(())
            }
            StrategyState::Closing { .. } => {
                drop(strategy);
                self.wake.notify_one();
                Ok(())
            }
            _ => Err(SupervisorError::AlreadyTerminal(id)),
        }
    }

    /// Drop CLOSED strategies from the registry, returning how many were
    /// removed. ERROR strategies stay registered for manual resolution.
    pub fn prune_closed(&self) -> usize {
        let mut removed = 0;
        self.registry.retain(|_, entry| match entry.try_lock() {
            Ok(strategy) => {
                if matches!(strategy.state, StrategyState::Closed { .. }) {
                    removed += 1;
                    false
                } else {
                    true
                }
            }
            // Currently under evaluation; keep for next prune
            Err(_) => true,
        });
        removed
    }

    /// Drive evaluation cycles forever.
    ///
    /// Intended to be spawned; a manual close request wakes the loop ahead
    /// of the next tick.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            self.run_cycle().await;
        }
    }

    /// Evaluate every registered strategy once, concurrently.
    ///
    /// Evaluations run as independent futures behind per-strategy locks; no
    /// two concurrent evaluations of the same strategy can occur, and a
    /// stalled gateway call in one evaluation does not hold up the rest.
    pub async fn run_cycle(&self) {
        let entries: Vec<(Uuid, Arc<Mutex<Strategy>>)> = self
            .registry
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        join_all(
            entries
                .into_iter()
                .map(|(id, entry)| self.evaluate(id, entry)),
        )
        .await;
    }

    async fn evaluate(&self, id: Uuid, entry: Arc<Mutex<Strategy>>) {
        let mut strategy = entry.lock().await;
        match strategy.state.clone() {
            StrategyState::Active => self.evaluate_active(&mut strategy).await,
            StrategyState::Closing { reason } => self.close_legs(&mut strategy, reason).await,
            _ => {
                debug!(strategy = %id, "terminal strategy skipped");
            }
        }
    }

    async fn evaluate_active(&self, strategy: &mut Strategy) {
        let reads = match self.fetch_reads(strategy).await {
            Some(reads) => reads,
            None => return, // hold; next cycle retries
        };

        // Reconcile leg state from the venues before deciding
        strategy.long = reads.long.clone();
        strategy.short = reads.short.clone();

        let decision = decision::decide(strategy, &reads, self.config.liquidation_safety_margin_pct);

        for alert in &decision.alerts {
            warn!(
                strategy = %strategy.id,
                symbol = %strategy.symbol,
                venue = %alert.venue,
                side = %alert.side,
                distance_pct = alert.distance_pct,
                "leg approaching liquidation"
            );
            self.emit(StrategyEvent::LiquidationRisk {
                id: strategy.id,
                symbol: strategy.symbol.clone(),
                venue: alert.venue,
                side: alert.side,
                distance_pct: alert.distance_pct,
            });
        }

        if let Some(reason) = decision.close {
            info!(
                strategy = %strategy.id,
                symbol = %strategy.symbol,
                reason = %reason,
                pnl_pct = strategy.combined_pnl_pct(),
                "exit condition fired"
            );
            strategy.state = StrategyState::Closing { reason };
            self.emit(StrategyEvent::Closing {
                id: strategy.id,
                symbol: strategy.symbol.clone(),
                reason,
            });
            self.close_legs(strategy, reason).await;
        }
    }

    /// Re-query both legs and both venues' funding rates.
    ///
    /// Positions are mandatory; a failed or empty position read holds the
    /// strategy for this cycle. Rate reads are optional inputs to the
    /// reversal check.
    async fn fetch_reads(&self, strategy: &Strategy) -> Option<FreshReads> {
        let long_gateway = match self.gateways.get(strategy.long.venue) {
            Ok(g) => g,
            Err(e) => {
                warn!(strategy = %strategy.id, error = %e, "long gateway unavailable");
                return None;
            }
        };
        let short_gateway = match self.gateways.get(strategy.short.venue) {
            Ok(g) => g,
            Err(e) => {
                warn!(strategy = %strategy.id, error = %e, "short gateway unavailable");
                return None;
            }
        };

        let symbol = strategy.symbol.clone();
        let (long_pos, short_pos, long_snap, short_snap) = tokio::join!(
            retry_transient(&self.retry, "position", || {
                let gateway = long_gateway.clone();
                let symbol = symbol.clone();
                async move { gateway.position(&symbol).await }
            }),
            retry_transient(&self.retry, "position", || {
                let gateway = short_gateway.clone();
                let symbol = symbol.clone();
                async move { gateway.position(&symbol).await }
            }),
            retry_transient(&self.retry, "funding_snapshot", || {
                let gateway = long_gateway.clone();
                let symbol = symbol.clone();
                async move { gateway.funding_snapshot(&symbol).await }
            }),
            retry_transient(&self.retry, "funding_snapshot", || {
                let gateway = short_gateway.clone();
                let symbol = symbol.clone();
                async move { gateway.funding_snapshot(&symbol).await }
            }),
        );

        let long = match long_pos {
            Ok(Some(position)) => position,
            Ok(None) => {
                warn!(
                    strategy = %strategy.id,
                    venue = %strategy.long.venue,
                    symbol = %strategy.symbol,
                    "long leg not found on venue; holding"
                );
                return None;
            }
            Err(e) => {
                warn!(strategy = %strategy.id, error = %e, "long leg read failed; holding");
                return None;
            }
        };
        let short = match short_pos {
            Ok(Some(position)) => position,
            Ok(None) => {
                warn!(
                    strategy = %strategy.id,
                    venue = %strategy.short.venue,
                    symbol = %strategy.symbol,
                    "short leg not found on venue; holding"
                );
                return None;
            }
            Err(e) => {
                warn!(strategy = %strategy.id, error = %e, "short leg read failed; holding");
                return None;
            }
        };

        Some(FreshReads {
            long,
            short,
            long_rate_1h_pct: long_snap.ok().map(|s| s.rate_1h_pct),
            short_rate_1h_pct: short_snap.ok().map(|s| s.rate_1h_pct),
            now: Utc::now(),
        })
    }

    /// Close both legs. Both are always attempted regardless of the other's
    /// outcome; an already-externally-closed leg counts as success.
    async fn close_legs(&self, strategy: &mut Strategy, reason: CloseReason) {
        let (long_result, short_result) = tokio::join!(
            self.close_leg(&strategy.long),
            self.close_leg(&strategy.short)
        );

        match (long_result, short_result) {
            (Ok(long_pnl), Ok(short_pnl)) => {
                let realized_pnl_usd = long_pnl + short_pnl;
                strategy.state = StrategyState::Closed { realized_pnl_usd };
                strategy.closed_at = Some(Utc::now());
                info!(
                    strategy = %strategy.id,
                    symbol = %strategy.symbol,
                    reason = %reason,
                    realized_pnl_usd,
                    "strategy closed"
                );
                self.emit(StrategyEvent::Closed {
                    id: strategy.id,
                    symbol: strategy.symbol.clone(),
                    realized_pnl_usd,
                });
                metrics::counter!("supervisor_strategies_closed_total", 1);
            }
            (long_result, short_result) => {
                let mut failures = Vec::new();
                if let Err(detail) = long_result {
                    failures.push(detail);
                }
                if let Err(detail) = short_result {
                    failures.push(detail);
                }
                let detail = failures.join("; ");
                error!(
                    strategy = %strategy.id,
                    symbol = %strategy.symbol,
                    detail = %detail,
                    "close failed; strategy parked for manual resolution"
                );
                strategy.state = StrategyState::Error {
                    detail: detail.clone(),
                };
                self.emit(StrategyEvent::Error {
                    id: strategy.id,
                    symbol: strategy.symbol.clone(),
                    detail,
                });
                metrics::counter!("supervisor_strategies_errored_total", 1);
            }
        }
    }

    /// Close one leg with bounded retries for transient errors.
    ///
    /// Returns the realized PnL, or a description of the failure naming
    /// venue, symbol, leg and action.
    async fn close_leg(&self, leg: &Position) -> Result<f64, String> {
        let gateway = self.gateways.get(leg.venue).map_err(|e| {
            format!(
                "close {} leg on {} for {}: {}",
                leg.side, leg.venue, leg.symbol, e
            )
        })?;

        let policy = RetryPolicy::new(
            self.config.close_retry_attempts,
            self.retry.base_delay,
            self.retry.max_delay,
        );
        let result = retry_transient(&policy, "close_position", || {
            let gateway = gateway.clone();
            let symbol = leg.symbol.clone();
            async move { gateway.close_position(&symbol).await }
        })
        .await;

        match result {
            Ok(closed) => Ok(closed.realized_pnl_usd),
            Err(GatewayError::PositionNotFound { .. }) => {
                debug!(
                    venue = %leg.venue,
                    symbol = %leg.symbol,
                    side = %leg.side,
                    "leg already closed externally"
                );
                Ok(leg.total_pnl_usd())
            }
            Err(e) => Err(format!(
                "close {} leg on {} for {} failed: {}",
                leg.side, leg.venue, leg.symbol, e
            )),
        }
    }

    fn emit(&self, event: StrategyEvent) {
        // No subscribers is fine; events are best-effort surfacing
        let _ = self.events.send(event);
    }
}
