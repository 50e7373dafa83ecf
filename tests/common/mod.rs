//! Shared test utilities: a scripted venue gateway

// Each integration test binary compiles this module; not every binary uses
// every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use funding_arbitrage::gateways::{
    Balance, ClosedPosition, FundingSnapshot, GatewayError, Position, Side, Venue, VenueGateway,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted gateway implementing the full venue capability set.
///
/// Result queues are consumed call by call; an empty queue falls back to a
/// synthesized success so tests only script what they assert on.
pub struct MockGateway {
    venue: Venue,
    pub snapshots: Mutex<Result<Vec<FundingSnapshot>, GatewayError>>,
    pub rates_1h_pct: Mutex<HashMap<String, f64>>,
    pub max_leverage: Mutex<u32>,
    pub positions: Mutex<HashMap<String, Position>>,
    pub place_results: Mutex<VecDeque<Result<Position, GatewayError>>>,
    pub close_results: Mutex<VecDeque<Result<ClosedPosition, GatewayError>>>,
    pub place_calls: Mutex<Vec<(String, Side, f64, u32)>>,
    pub close_calls: Mutex<Vec<String>>,
    pub call_delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            snapshots: Mutex::new(Ok(Vec::new())),
            rates_1h_pct: Mutex::new(HashMap::new()),
            max_leverage: Mutex::new(50),
            positions: Mutex::new(HashMap::new()),
            place_results: Mutex::new(VecDeque::new()),
            close_results: Mutex::new(VecDeque::new()),
            place_calls: Mutex::new(Vec::new()),
            close_calls: Mutex::new(Vec::new()),
            call_delay: Mutex::new(None),
        }
    }

    pub fn with_snapshots(venue: Venue, snapshots: Vec<(&str, f64, u32)>) -> Self {
        let gateway = Self::new(venue);
        *gateway.snapshots.lock().unwrap() = Ok(snapshots
            .into_iter()
            .map(|(symbol, rate, lev)| FundingSnapshot::from_hourly(venue, symbol, rate, lev))
            .collect());
        gateway
    }

    pub fn fail_snapshots(&self, error: GatewayError) {
        *self.snapshots.lock().unwrap() = Err(error);
    }

    pub fn set_rate(&self, symbol: &str, rate_1h_pct: f64) {
        self.rates_1h_pct
            .lock()
            .unwrap()
            .insert(symbol.to_string(), rate_1h_pct);
    }

    pub fn set_position(&self, position: Position) {
        self.positions
            .lock()
            .unwrap()
            .insert(position.symbol.clone(), position);
    }

    pub fn clear_position(&self, symbol: &str) {
        self.positions.lock().unwrap().remove(symbol);
    }

    pub fn queue_place(&self, result: Result<Position, GatewayError>) {
        self.place_results.lock().unwrap().push_back(result);
    }

    pub fn queue_close(&self, result: Result<ClosedPosition, GatewayError>) {
        self.close_results.lock().unwrap().push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = Some(delay);
    }

    pub fn place_call_count(&self) -> usize {
        self.place_calls.lock().unwrap().len()
    }

    pub fn close_call_count(&self) -> usize {
        self.close_calls.lock().unwrap().len()
    }

    pub fn filled_position(&self, symbol: &str, side: Side, size_usd: f64, leverage: u32) -> Position {
        Position {
            venue: self.venue,
            symbol: symbol.to_string(),
            side,
            size_usd,
            entry_price: 100.0,
            leverage,
            unrealized_pnl_usd: 0.0,
            funding_accumulated_usd: 0.0,
            mark_price: Some(100.0),
            liquidation_price: None,
            opened_at: Utc::now(),
        }
    }

    async fn delay(&self) {
        let delay = *self.call_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl VenueGateway for MockGateway {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn funding_snapshots(&self) -> Result<Vec<FundingSnapshot>, GatewayError> {
        self.delay().await;
        self.snapshots.lock().unwrap().clone()
    }

    async fn funding_snapshot(&self, symbol: &str) -> Result<FundingSnapshot, GatewayError> {
        self.delay().await;
        let rate = self
            .rates_1h_pct
            .lock()
            .unwrap()
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
            *self.max_leverage.lock().unwrap(),
        ))
    }

    async fn balance(&self) -> Result<Balance, GatewayError> {
        self.delay().await;
        Ok(Balance {
            venue: self.venue,
            total_equity_usd: 10_000.0,
            available_usd: 10_000.0,
        })
    }

    async fn max_leverage(&self, _symbol: &str) -> Result<u32, GatewayError> {
        self.delay().await;
        Ok(*self.max_leverage.lock().unwrap())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        size_usd: f64,
        leverage: u32,
    ) -> Result<Position, GatewayError> {
        self.delay().await;
        self.place_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, size_usd, leverage));

        let scripted = self.place_results.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.filled_position(symbol, side, size_usd, leverage)),
        }
    }

    async fn close_position(&self, symbol: &str) -> Result<ClosedPosition, GatewayError> {
        self.delay().await;
        self.close_calls.lock().unwrap().push(symbol.to_string());

        let scripted = self.close_results.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(ClosedPosition {
                venue: self.venue,
                symbol: symbol.to_string(),
                side: Side::Long,
                realized_pnl_usd: 0.0,
                closed_at: Utc::now(),
            }),
        }
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        self.delay().await;
        Ok(self.positions.lock().unwrap().get(symbol).cloned())
    }
}

/// Transient error for a venue
pub fn transient(venue: Venue) -> GatewayError {
    GatewayError::Transient {
        venue,
        detail: "connection reset".to_string(),
    }
}

/// Rejection error for a venue/symbol
pub fn rejected(venue: Venue, symbol: &str) -> GatewayError {
    GatewayError::Rejected {
        venue,
        symbol: symbol.to_string(),
        detail: "insufficient margin".to_string(),
    }
}
