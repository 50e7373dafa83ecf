//! Venue gateway abstractions
//!
//! Per-venue integrations are heterogeneous (auth, signing, latency, error
//! semantics); everything behind [`VenueGateway`] is an adapter concern. The
//! core only ever sees this module's types.

pub mod paper;
pub mod traits;

pub use paper::{PaperGateway, PaperGatewayConfig};
pub use traits::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Supported venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Hyperliquid perpetuals
    Hyperliquid,
    /// Paradex perpetuals
    Paradex,
    /// Lighter perpetuals
    Lighter,
    /// Extended perpetuals
    Extended,
}

impl Venue {
    /// All known venues, in configuration order
    pub const ALL: [Venue; 4] = [
        Venue::Hyperliquid,
        Venue::Paradex,
        Venue::Lighter,
        Venue::Extended,
    ];
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Hyperliquid => write!(f, "hyperliquid"),
            Venue::Paradex => write!(f, "paradex"),
            Venue::Lighter => write!(f, "lighter"),
            Venue::Extended => write!(f, "extended"),
        }
    }
}

impl std::str::FromStr for Venue {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hyperliquid" => Ok(Venue::Hyperliquid),
            "paradex" => Ok(Venue::Paradex),
            "lighter" => Ok(Venue::Lighter),
            "extended" => Ok(Venue::Extended),
            _ => Err(GatewayError::UnknownVenue(s.to_string())),
        }
    }
}

/// Typed failure returned by gateway calls
#[derive(thiserror::Error, Debug, Clone)]
pub enum GatewayError {
    /// Network or rate-limit failure; safe to retry with backoff
    #[error("{venue}: transient gateway error: {detail}")]
    Transient {
        /// Venue that failed
        venue: Venue,
        /// Underlying failure description
        detail: String,
    },

    /// Credentials rejected; never retried
    #[error("{venue}: authorization failed: {detail}")]
    Authorization {
        /// Venue that rejected the credentials
        venue: Venue,
        /// Underlying failure description
        detail: String,
    },

    /// Venue rejected the request itself (bad size, unknown symbol, limit
    /// breach); never retried
    #[error("{venue}: order rejected for {symbol}: {detail}")]
    Rejected {
        /// Venue that rejected the request
        venue: Venue,
        /// Symbol the request was for
        symbol: String,
        /// Venue-reported reason
        detail: String,
    },

    /// No open position for the symbol; close callers treat this as
    /// already-closed success
    #[error("{venue}: no open position for {symbol}")]
    PositionNotFound {
        /// Venue queried
        venue: Venue,
        /// Symbol queried
        symbol: String,
    },

    /// Venue name not recognized
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// No gateway registered for the venue
    #[error("no gateway registered for {0}")]
    NotRegistered(Venue),
}

impl GatewayError {
    /// Whether a bounded-backoff retry is appropriate
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }
}

/// Registry mapping venues to their gateway implementations.
///
/// Cheap to clone; gateways are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct GatewaySet {
    gateways: HashMap<Venue, Arc<dyn VenueGateway>>,
}

impl GatewaySet {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its own venue id
    pub fn register(&mut self, gateway: Arc<dyn VenueGateway>) {
        self.gateways.insert(gateway.venue(), gateway);
    }

    /// Look up the gateway for a venue
    pub fn get(&self, venue: Venue) -> Result<Arc<dyn VenueGateway>, GatewayError> {
        self.gateways
            .get(&venue)
            .cloned()
            .ok_or(GatewayError::NotRegistered(venue))
    }

    /// Venues with a registered gateway
    pub fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.gateways.keys().copied().collect();
        venues.sort_by_key(|v| v.to_string());
        venues
    }

    /// Number of registered gateways
    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    /// Fetch balances from every registered venue.
    ///
    /// Per-venue failures are returned alongside the successes rather than
    /// aborting the whole sweep.
    pub async fn balances(&self) -> (Vec<Balance>, Vec<(Venue, GatewayError)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for venue in self.venues() {
            let gateway = match self.get(venue) {
                Ok(g) => g,
                Err(e) => {
                    failed.push((venue, e));
                    continue;
                }
            };
            match gateway.balance().await {
                Ok(balance) => ok.push(balance),
                Err(e) => failed.push((venue, e)),
            }
        }
        (ok, failed)
    }
}

impl fmt::Debug for GatewaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySet")
            .field("venues", &self.venues())
            .finish()
    }
}
