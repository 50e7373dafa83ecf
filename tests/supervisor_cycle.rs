//! Integration tests for the strategy supervisor state machine

mod common;

use chrono::Utc;
use common::{transient, MockGateway};
use funding_arbitrage::{
    config::AppConfig,
    executor::OpenRequest,
    gateways::{GatewayError, GatewaySet, Position, Side, Venue, VenueGateway},
    scanner::Opportunity,
    supervisor::{CloseReason, Strategy, StrategyEvent, StrategyState, Supervisor},
};
use std::sync::Arc;
use std::time::Duration;

fn leg(venue: Venue, side: Side, pnl_usd: f64) -> Position {
    Position {
        venue,
        symbol: "BTC".to_string(),
        side,
        size_usd: 1_000.0,
        entry_price: 100.0,
        leverage: 5,
        unrealized_pnl_usd: pnl_usd,
        funding_accumulated_usd: 0.0,
        mark_price: Some(100.0),
        liquidation_price: None,
        opened_at: Utc::now(),
    }
}

fn make_strategy(long_venue: Venue, short_venue: Venue, request: OpenRequest) -> Strategy {
    let opportunity = Opportunity {
        symbol: "BTC".to_string(),
        long_venue,
        short_venue,
        long_rate_1h_pct: -0.02,
        short_rate_1h_pct: 0.01,
        gross_spread_pct: 0.03,
        net_spread_pct: 0.0129,
        entry_cost_pct: 0.41,
        min_required_leverage: 10,
        score: 12.9,
        observed_at: Utc::now(),
    };
    Strategy::open(
        &opportunity,
        &request,
        leg(long_venue, Side::Long, 0.0),
        leg(short_venue, Side::Short, 0.0),
    )
}

struct Harness {
    long: Arc<MockGateway>,
    short: Arc<MockGateway>,
    supervisor: Arc<Supervisor>,
}

/// Mocks for paradex (long) and hyperliquid (short) wired into a
/// supervisor, with legs present and a healthy positive differential
fn harness() -> Harness {
    let config = AppConfig::default();
    let long = Arc::new(MockGateway::new(Venue::Paradex));
    let short = Arc::new(MockGateway::new(Venue::Hyperliquid));

    long.set_rate("BTC", -0.02);
    short.set_rate("BTC", 0.01);
    long.set_position(leg(Venue::Paradex, Side::Long, 0.0));
    short.set_position(leg(Venue::Hyperliquid, Side::Short, 0.0));

    let mut gateways = GatewaySet::new();
    gateways.register(long.clone());
    gateways.register(short.clone());

    Harness {
        long,
        short,
        supervisor: Arc::new(Supervisor::new(gateways, &config)),
    }
}

#[tokio::test]
async fn test_take_profit_fires_on_the_crossing_cycle_only() {
    let h = harness();
    let mut events = h.supervisor.subscribe();

    let mut request = OpenRequest::new(1_000.0, 5);
    request.take_profit_pct = Some(5.0);
    let id = h
        .supervisor
        .adopt(make_strategy(Venue::Paradex, Venue::Hyperliquid, request));
    assert!(matches!(
        events.recv().await.unwrap(),
        StrategyEvent::Created { .. }
    ));

    // 4.9% combined: below target, no transition
    h.long.set_position(leg(Venue::Paradex, Side::Long, 30.0));
    h.short.set_position(leg(Venue::Hyperliquid, Side::Short, 19.0));
    h.supervisor.run_cycle().await;

    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert_eq!(snapshot.state, StrategyState::Active);
    assert!(events.try_recv().is_err());

    // 5.1% combined: CLOSING on this cycle, then CLOSED once both legs
    // confirm
    h.short.set_position(leg(Venue::Hyperliquid, Side::Short, 21.0));
    h.supervisor.run_cycle().await;

    match events.recv().await.unwrap() {
        StrategyEvent::Closing { reason, .. } => assert_eq!(reason, CloseReason::TakeProfit),
        other => panic!("expected closing event, got {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        StrategyEvent::Closed { .. }
    ));

    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert!(matches!(snapshot.state, StrategyState::Closed { .. }));
    assert!(snapshot.closed_at.is_some());
    assert_eq!(h.long.close_call_count(), 1);
    assert_eq!(h.short.close_call_count(), 1);
}

#[tokio::test]
async fn test_funding_reversal_closes_the_strategy() {
    let h = harness();
    let mut events = h.supervisor.subscribe();

    let id = h.supervisor.adopt(make_strategy(
        Venue::Paradex,
        Venue::Hyperliquid,
        OpenRequest::new(1_000.0, 5),
    ));
    let _ = events.recv().await;

    // The differential that justified the trade flips sign
    h.long.set_rate("BTC", 0.02);
    h.short.set_rate("BTC", 0.01);
    h.supervisor.run_cycle().await;

    match events.recv().await.unwrap() {
        StrategyEvent::Closing { reason, .. } => assert_eq!(reason, CloseReason::Reversal),
        other => panic!("expected reversal close, got {other:?}"),
    }
    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert!(matches!(snapshot.state, StrategyState::Closed { .. }));
}

#[tokio::test]
async fn test_max_hold_elapsed_closes_the_strategy() {
    let h = harness();
    let mut request = OpenRequest::new(1_000.0, 5);
    request.max_hold_secs = Some(0);
    let id = h
        .supervisor
        .adopt(make_strategy(Venue::Paradex, Venue::Hyperliquid, request));

    h.supervisor.run_cycle().await;

    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert!(matches!(snapshot.state, StrategyState::Closed { .. }));
}

#[tokio::test]
async fn test_externally_closed_leg_counts_as_success() {
    let h = harness();
    let mut request = OpenRequest::new(1_000.0, 5);
    request.take_profit_pct = Some(1.0);
    let id = h
        .supervisor
        .adopt(make_strategy(Venue::Paradex, Venue::Hyperliquid, request));

    h.long.set_position(leg(Venue::Paradex, Side::Long, 20.0));
    h.long.queue_close(Err(GatewayError::PositionNotFound {
        venue: Venue::Paradex,
        symbol: "BTC".to_string(),
    }));

    h.supervisor.run_cycle().await;

    // Not an error, not a retry loop: the leg was already gone
    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert!(matches!(snapshot.state, StrategyState::Closed { .. }));
    assert_eq!(h.long.close_call_count(), 1);
}

#[tokio::test]
async fn test_exhausted_close_retries_park_the_strategy_in_error() {
    let h = harness();
    let mut events = h.supervisor.subscribe();

    let mut request = OpenRequest::new(1_000.0, 5);
    request.take_profit_pct = Some(1.0);
    let id = h
        .supervisor
        .adopt(make_strategy(Venue::Paradex, Venue::Hyperliquid, request));
    let _ = events.recv().await;

    h.long.set_position(leg(Venue::Paradex, Side::Long, 20.0));
    // Every attempt fails transiently; retries are bounded at the
    // configured three attempts
    h.short.queue_close(Err(transient(Venue::Hyperliquid)));
    h.short.queue_close(Err(transient(Venue::Hyperliquid)));
    h.short.queue_close(Err(transient(Venue::Hyperliquid)));

    h.supervisor.run_cycle().await;

    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    match &snapshot.state {
        StrategyState::Error { detail } => {
            assert!(detail.contains("hyperliquid"));
            assert!(detail.contains("BTC"));
            assert!(detail.contains("SHORT"));
        }
        other => panic!("expected error state, got {other:?}"),
    }
    assert_eq!(h.short.close_call_count(), 3);
    // Long leg was still attempted and succeeded
    assert_eq!(h.long.close_call_count(), 1);

    let _ = events.recv().await; // Closing
    assert!(matches!(
        events.recv().await.unwrap(),
        StrategyEvent::Error { .. }
    ));

    // Parked for manual resolution, never pruned
    assert_eq!(h.supervisor.prune_closed(), 0);
    assert_eq!(h.supervisor.len(), 1);
}

#[tokio::test]
async fn test_manual_close_behaves_like_automatic() {
    let h = harness();
    let id = h.supervisor.adopt(make_strategy(
        Venue::Paradex,
        Venue::Hyperliquid,
        OpenRequest::new(1_000.0, 5),
    ));

    h.supervisor.request_close(id).await.unwrap();
    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert_eq!(
        snapshot.state,
        StrategyState::Closing {
            reason: CloseReason::Manual
        }
    );

    h.supervisor.run_cycle().await;

    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert!(matches!(snapshot.state, StrategyState::Closed { .. }));
    assert_eq!(h.long.close_call_count(), 1);
    assert_eq!(h.short.close_call_count(), 1);
}

#[tokio::test]
async fn test_liquidation_risk_is_surfaced_without_closing() {
    let h = harness();
    let mut events = h.supervisor.subscribe();
    let id = h.supervisor.adopt(make_strategy(
        Venue::Paradex,
        Venue::Hyperliquid,
        OpenRequest::new(1_000.0, 5),
    ));
    let _ = events.recv().await;

    // Long leg 10% from liquidation, inside the default 20% margin
    let mut at_risk = leg(Venue::Paradex, Side::Long, 0.0);
    at_risk.liquidation_price = Some(90.0);
    h.long.set_position(at_risk);

    h.supervisor.run_cycle().await;

    match events.recv().await.unwrap() {
        StrategyEvent::LiquidationRisk {
            venue,
            side,
            distance_pct,
            ..
        } => {
            assert_eq!(venue, Venue::Paradex);
            assert_eq!(side, Side::Long);
            assert!((distance_pct - 10.0).abs() < 1e-9);
        }
        other => panic!("expected liquidation risk alert, got {other:?}"),
    }

    // Informational only: the strategy stays open
    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert_eq!(snapshot.state, StrategyState::Active);
    assert_eq!(h.long.close_call_count(), 0);
}

#[tokio::test]
async fn test_missing_leg_read_holds_the_strategy() {
    let h = harness();
    let id = h.supervisor.adopt(make_strategy(
        Venue::Paradex,
        Venue::Hyperliquid,
        OpenRequest::new(1_000.0, 5),
    ));

    h.long.clear_position("BTC");
    h.supervisor.run_cycle().await;

    // No blind transition on an incomplete read
    let snapshot = h.supervisor.snapshot(id).await.unwrap();
    assert_eq!(snapshot.state, StrategyState::Active);
    assert_eq!(h.long.close_call_count(), 0);
}

#[tokio::test]
async fn test_slow_gateway_does_not_delay_other_strategies() {
    let config = AppConfig::default();

    let fast_long = Arc::new(MockGateway::new(Venue::Paradex));
    let fast_short = Arc::new(MockGateway::new(Venue::Hyperliquid));
    let slow_long = Arc::new(MockGateway::new(Venue::Lighter));
    let slow_short = Arc::new(MockGateway::new(Venue::Extended));

    for (gateway, side) in [
        (&fast_long, Side::Long),
        (&fast_short, Side::Short),
        (&slow_long, Side::Long),
        (&slow_short, Side::Short),
    ] {
        gateway.set_position(leg(gateway.venue(), side, 100.0));
    }
    fast_long.set_rate("BTC", -0.02);
    fast_short.set_rate("BTC", 0.01);
    slow_long.set_rate("BTC", -0.02);
    slow_short.set_rate("BTC", 0.01);

    // Every call to the slow strategy's long venue stalls
    slow_long.set_delay(Duration::from_millis(600));

    let mut gateways = GatewaySet::new();
    for gateway in [&fast_long, &fast_short, &slow_long, &slow_short] {
        gateways.register(gateway.clone());
    }
    let supervisor = Arc::new(Supervisor::new(gateways, &config));

    let mut fast_request = OpenRequest::new(1_000.0, 5);
    fast_request.take_profit_pct = Some(5.0);
    let fast_id = supervisor.adopt(make_strategy(
        Venue::Paradex,
        Venue::Hyperliquid,
        fast_request,
    ));
    let slow_id = supervisor.adopt(make_strategy(
        Venue::Lighter,
        Venue::Extended,
        OpenRequest::new(1_000.0, 5),
    ));

    let runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run_cycle().await })
    };

    // Well before the slow gateway responds, the fast strategy has already
    // transitioned within the same cycle
    tokio::time::sleep(Duration::from_millis(300)).await;
    let fast = supervisor.snapshot(fast_id).await.unwrap();
    assert!(matches!(fast.state, StrategyState::Closed { .. }));

    runner.await.unwrap();
    let slow = supervisor.snapshot(slow_id).await.unwrap();
    assert_eq!(slow.state, StrategyState::Active);
}
