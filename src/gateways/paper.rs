//! Simulated venue gateway
//!
//! In-process venue used by the CLI demo loop and by tests that want a
//! whole gateway rather than a scripted mock. Fills are synthetic, funding
//! accrues from the configured hourly rate, and failures can be injected
//! through a rejection probability.

use super::{Balance, ClosedPosition, FundingSnapshot, GatewayError, Position, Side, Venue, VenueGateway};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Tunables for a simulated venue
#[derive(Debug, Clone)]
pub struct PaperGatewayConfig {
    /// Starting account balance in USD
    pub initial_balance_usd: f64,
    /// Maximum leverage offered on every symbol
    pub max_leverage: u32,
    /// Fraction of orders rejected at random (0.0 to 1.0)
    pub rejection_probability: f64,
    /// Artificial latency added to every call
    pub latency_ms: u64,
    /// Half-width of the synthetic fill jitter around mark, in percent
    pub slippage_pct: f64,
}

impl Default for PaperGatewayConfig {
    fn default() -> Self {
        Self {
            initial_balance_usd: 10_000.0,
            max_leverage: 20,
            rejection_probability: 0.0,
            latency_ms: 0,
            slippage_pct: 0.05,
        }
    }
}

struct Inner {
    rates_1h_pct: HashMap<String, f64>,
    marks: HashMap<String, f64>,
    positions: HashMap<String, Position>,
    balance_usd: f64,
}

/// Simulated venue gateway
pub struct PaperGateway {
    venue: Venue,
    config: PaperGatewayConfig,
    inner: RwLock<Inner>,
}

impl PaperGateway {
    /// Build a simulated venue with no listed symbols
    pub fn new(venue: Venue, config: PaperGatewayConfig) -> Self {
        let balance_usd = config.initial_balance_usd;
        Self {
            venue,
            config,
            inner: RwLock::new(Inner {
                rates_1h_pct: HashMap::new(),
                marks: HashMap::new(),
                positions: HashMap::new(),
                balance_usd,
            }),
        }
    }

    /// List a symbol with an hourly funding rate and a mark price
    pub async fn list_symbol(&self, symbol: &str, rate_1h_pct: f64, mark_price: f64) {
        let mut inner = self.inner.write().await;
        inner.rates_1h_pct.insert(symbol.to_string(), rate_1h_pct);
        inner.marks.insert(symbol.to_string(), mark_price);
    }

    /// Update the funding rate of a listed symbol
    pub async fn set_funding_rate(&self, symbol: &str, rate_1h_pct: f64) {
        let mut inner = self.inner.write().await;
        inner.rates_1h_pct.insert(symbol.to_string(), rate_1h_pct);
    }

    /// Update the mark price of a listed symbol
    pub async fn set_mark_price(&self, symbol: &str, mark_price: f64) {
        let mut inner = self.inner.write().await;
        inner.marks.insert(symbol.to_string(), mark_price);
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn maybe_reject(&self, symbol: &str) -> Result<(), GatewayError> {
        if self.config.rejection_probability > 0.0 {
            let roll: f64 = rand::thread_rng().gen();
            if roll < self.config.rejection_probability {
                return Err(GatewayError::Rejected {
                    venue: self.venue,
                    symbol: symbol.to_string(),
                    detail: "simulated rejection".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Refresh a stored position against the current mark and funding rate
    fn refreshed(position: &Position, mark: f64, rate_1h_pct: f64) -> Position {
        let mut position = position.clone();
        let price_diff = match position.side {
            Side::Long => mark - position.entry_price,
            Side::Short => position.entry_price - mark,
        };
        position.unrealized_pnl_usd =
            price_diff / position.entry_price * position.size_usd * position.leverage as f64;

        // Longs accrue the negated rate, shorts the rate itself
        let hours_open = (Utc::now() - position.opened_at).num_milliseconds() as f64 / 3_600_000.0;
        let hourly_accrual = rate_1h_pct / 100.0 * position.size_usd;
        position.funding_accumulated_usd = match position.side {
            Side::Long => -hourly_accrual * hours_open,
            Side::Short => hourly_accrual * hours_open,
        };
        position.mark_price = Some(mark);
        position
    }
}

#[async_trait]
impl VenueGateway for PaperGateway {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn funding_snapshots(&self) -> Result<Vec<FundingSnapshot>, GatewayError> {
        self.simulate_latency().await;
        let inner = self.inner.read().await;
        Ok(inner
            .rates_1h_pct
            .iter()
            .map(|(symbol, &rate)| {
                FundingSnapshot::from_hourly(self.venue, symbol.clone(), rate, self.config.max_leverage)
            })
            .collect())
    }

    async fn funding_snapshot(&self, symbol: &str) -> Result<FundingSnapshot, GatewayError> {
        self.simulate_latency().await;
        let inner = self.inner.read().await;
        let rate = inner
            .rates_1h_pct
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::Rejected {
                venue: self.venue,
                symbol: symbol.to_string(),
                detail: "symbol not listed".to_string(),
            })?;
        Ok(FundingSnapshot::from_hourly(
            self.venue,
            symbol,
            rate,
            self.config.max_leverage,
        ))
    }

    async fn balance(&self) -> Result<Balance, GatewayError> {
        self.simulate_latency().await;
        let inner = self.inner.read().await;
        let open_pnl: f64 = inner
            .positions
            .values()
            .map(|p| {
                let mark = inner.marks.get(&p.symbol).copied().unwrap_or(p.entry_price);
                let rate = inner.rates_1h_pct.get(&p.symbol).copied().unwrap_or(0.0);
                Self::refreshed(p, mark, rate).total_pnl_usd()
            })
            .sum();
        Ok(Balance {
            venue: self.venue,
            total_equity_usd: inner.balance_usd + open_pnl,
            available_usd: inner.balance_usd,
        })
    }

    async fn max_leverage(&self, _symbol: &str) -> Result<u32, GatewayError> {
        self.simulate_latency().await;
        Ok(self.config.max_leverage)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        size_usd: f64,
        leverage: u32,
    ) -> Result<Position, GatewayError> {
        self.simulate_latency().await;
        self.maybe_reject(symbol)?;

        let mut inner = self.inner.write().await;
        let mark = inner
            .marks
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::Rejected {
                venue: self.venue,
                symbol: symbol.to_string(),
                detail: "symbol not listed".to_string(),
            })?;

        // Taker fill drifts against the order within the slippage band
        let drift = rand::thread_rng().gen_range(0.0..=self.config.slippage_pct) / 100.0;
        let entry_price = match side {
            Side::Long => mark * (1.0 + drift),
            Side::Short => mark * (1.0 - drift),
        };

        let liquidation_price = match side {
            Side::Long => entry_price * (1.0 - 1.0 / leverage as f64),
            Side::Short => entry_price * (1.0 + 1.0 / leverage as f64),
        };

        let position = Position {
            venue: self.venue,
            symbol: symbol.to_string(),
            side,
            size_usd,
            entry_price,
            leverage,
            unrealized_pnl_usd: 0.0,
            funding_accumulated_usd: 0.0,
            mark_price: Some(mark),
            liquidation_price: Some(liquidation_price),
            opened_at: Utc::now(),
        };
        inner.positions.insert(symbol.to_string(), position.clone());
        debug!(
            venue = %self.venue,
            symbol,
            side = %side,
            entry_price,
            "paper order filled"
        );
        Ok(position)
    }

    async fn close_position(&self, symbol: &str) -> Result<ClosedPosition, GatewayError> {
        self.simulate_latency().await;

        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .remove(symbol)
            .ok_or_else(|| GatewayError::PositionNotFound {
                venue: self.venue,
                symbol: symbol.to_string(),
            })?;

        let mark = inner
            .marks
            .get(symbol)
            .copied()
            .unwrap_or(position.entry_price);
        let rate = inner.rates_1h_pct.get(symbol).copied().unwrap_or(0.0);
        let realized_pnl_usd = Self::refreshed(&position, mark, rate).total_pnl_usd();
        inner.balance_usd += realized_pnl_usd;

        debug!(
            venue = %self.venue,
            symbol,
            realized_pnl_usd,
            "paper position closed"
        );
        Ok(ClosedPosition {
            venue: self.venue,
            symbol: symbol.to_string(),
            side: position.side,
            realized_pnl_usd,
            closed_at: Utc::now(),
        })
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        self.simulate_latency().await;
        let inner = self.inner.read().await;
        Ok(inner.positions.get(symbol).map(|p| {
            let mark = inner.marks.get(symbol).copied().unwrap_or(p.entry_price);
            let rate = inner.rates_1h_pct.get(symbol).copied().unwrap_or(0.0);
            Self::refreshed(p, mark, rate)
        }))
    }
}
