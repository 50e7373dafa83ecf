//! Venue gateway trait and common types

use super::{GatewayError, Venue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability set every venue integration must expose.
///
/// The core never depends on a specific venue's call conventions; adding a
/// venue means implementing this trait and registering it in a
/// [`GatewaySet`](super::GatewaySet).
#[async_trait]
pub trait VenueGateway: Send + Sync {
    /// Venue this gateway talks to
    fn venue(&self) -> Venue;

    /// Fetch current funding snapshots for every tradable symbol
    async fn funding_snapshots(&self) -> Result<Vec<FundingSnapshot>, GatewayError>;

    /// Fetch the current funding snapshot for a single symbol
    async fn funding_snapshot(&self, symbol: &str) -> Result<FundingSnapshot, GatewayError>;

    /// Fetch account balance and equity
    async fn balance(&self) -> Result<Balance, GatewayError>;

    /// Current maximum leverage the venue allows for a symbol
    async fn max_leverage(&self, symbol: &str) -> Result<u32, GatewayError>;

    /// Place a market order and return the venue-confirmed position.
    ///
    /// `entry_price` on the returned [`Position`] is whatever the venue
    /// reports for the fill; callers never recompute it.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        size_usd: f64,
        leverage: u32,
    ) -> Result<Position, GatewayError>;

    /// Close the open position for a symbol.
    ///
    /// Venues with no such position return
    /// [`GatewayError::PositionNotFound`]; callers treat that as
    /// already-closed success.
    async fn close_position(&self, symbol: &str) -> Result<ClosedPosition, GatewayError>;

    /// Fetch the current state of the position for a symbol, if any
    async fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError>;
}

/// Position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Long position (profits when price rises, accrues negative funding)
    Long,
    /// Short position (profits when price falls, accrues positive funding)
    Short,
}

impl Side {
    /// The opposing side
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Funding rate observation for one symbol on one venue.
///
/// Immutable once recorded; superseded by the next scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSnapshot {
    /// Venue that reported the rate
    pub venue: Venue,
    /// Standardized symbol (e.g. "BTC")
    pub symbol: String,
    /// Hourly funding rate in percent (0.01 = 0.01%/h)
    pub rate_1h_pct: f64,
    /// 8-hour funding rate in percent
    pub rate_8h_pct: f64,
    /// Maximum leverage the venue currently allows for this symbol
    pub max_leverage: u32,
    /// When the rate was observed
    pub observed_at: DateTime<Utc>,
}

impl FundingSnapshot {
    /// Build a snapshot from an hourly rate, deriving the 8h rate
    pub fn from_hourly(venue: Venue, symbol: impl Into<String>, rate_1h_pct: f64, max_leverage: u32) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            rate_1h_pct,
            rate_8h_pct: rate_1h_pct * 8.0,
            max_leverage: max_leverage.max(1),
            observed_at: Utc::now(),
        }
    }
}

/// Account balance information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Venue the balance belongs to
    pub venue: Venue,
    /// Total account equity in USD
    pub total_equity_usd: f64,
    /// Balance available for new positions in USD
    pub available_usd: f64,
}

/// Open position as reported by a venue.
///
/// Created by the executor, owned thereafter by the strategy that references
/// it; refreshed only by re-querying the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Venue holding the position
    pub venue: Venue,
    /// Standardized symbol
    pub symbol: String,
    /// Long or short
    pub side: Side,
    /// Notional size in USD
    pub size_usd: f64,
    /// Venue-confirmed fill price
    pub entry_price: f64,
    /// Leverage in use
    pub leverage: u32,
    /// Unrealized PnL in USD as reported by the venue
    pub unrealized_pnl_usd: f64,
    /// Funding accumulated since entry in USD
    pub funding_accumulated_usd: f64,
    /// Current mark price, if the venue reports one
    pub mark_price: Option<f64>,
    /// Estimated liquidation price, if the venue reports one
    pub liquidation_price: Option<f64>,
    /// When the position was opened
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Unrealized PnL plus accumulated funding
    pub fn total_pnl_usd(&self) -> f64 {
        self.unrealized_pnl_usd + self.funding_accumulated_usd
    }

    /// Distance to liquidation as a percentage of the mark price.
    ///
    /// `None` when the venue reports neither a mark nor a liquidation price.
    pub fn liquidation_distance_pct(&self) -> Option<f64> {
        let mark = self.mark_price?;
        let liq = self.liquidation_price?;
        if mark <= 0.0 {
            return None;
        }
        Some(((mark - liq) / mark).abs() * 100.0)
    }
}

/// Result of closing a position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Venue the position was closed on
    pub venue: Venue,
    /// Standardized symbol
    pub symbol: String,
    /// Side that was closed
    pub side: Side,
    /// Realized PnL in USD, funding included
    pub realized_pnl_usd: f64,
    /// When the close was confirmed
    pub closed_at: DateTime<Utc>,
}
