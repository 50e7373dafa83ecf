use clap::{Parser, Subcommand};
use funding_arbitrage::{
    config::AppConfig,
    executor::{DualLegExecutor, OpenRequest},
    gateways::{GatewaySet, PaperGateway, PaperGatewayConfig},
    scanner::Scanner,
    supervisor::{StrategyEvent, Supervisor},
    utils::logger,
    Result,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "funding-arb")]
#[command(about = "Delta-neutral funding-rate arbitrage system")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/funding-arb.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/funding-arb.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan cycle against simulated venues and print the ranking
    Scan,
    /// Open the top-ranked opportunity on simulated venues and supervise it
    Run {
        /// Per-leg stake in USD
        #[arg(long, default_value_t = 1_000.0)]
        stake: f64,

        /// Leverage for both legs
        #[arg(long, default_value_t = 2)]
        leverage: u32,

        /// Close at this combined PnL percentage
        #[arg(long)]
        take_profit_pct: Option<f64>,

        /// Close at minus this combined PnL percentage
        #[arg(long)]
        stop_loss_pct: Option<f64>,

        /// Close after holding this many seconds
        #[arg(long, default_value_t = 60)]
        max_hold_secs: u64,

        /// Skip the initial balance check
        #[arg(long)]
        skip_balance_check: bool,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    logger::init(&cli.log_level, &cli.log_file)?;

    info!("starting {} v{}", funding_arbitrage::APP_NAME, funding_arbitrage::VERSION);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Scan => run_scan(config).await,
        Commands::Run {
            stake,
            leverage,
            take_profit_pct,
            stop_loss_pct,
            max_hold_secs,
            skip_balance_check,
        } => {
            let request = OpenRequest {
                stake_size_usd: stake,
                leverage,
                take_profit_pct,
                stop_loss_pct,
                max_hold_secs: Some(max_hold_secs),
                close_on_reversal: true,
            };
            run_supervised(config, request, skip_balance_check).await
        }
        Commands::Validate => validate_config(config).await,
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = AppConfig::from_file(path)?;
        info!("configuration loaded from {}", path.display());
        Ok(config)
    } else {
        warn!(
            "config file {} not found, using defaults",
            path.display()
        );
        Ok(AppConfig::default())
    }
}

/// Simulated venues with a small symbol universe, rates spread apart so a
/// scan always has something to rank
async fn demo_gateways(config: &AppConfig) -> Result<GatewaySet> {
    let symbols = [("BTC", 0.002, 50_000.0), ("ETH", 0.000, 3_000.0), ("SOL", -0.001, 150.0)];

    let mut gateways = GatewaySet::new();
    for venue in config.venues.enabled_venues()? {
        let offset = match venue.to_string().as_str() {
            "hyperliquid" => 0.010,
            "paradex" => -0.012,
            "lighter" => 0.004,
            _ => -0.003,
        };
        let gateway = PaperGateway::new(venue, PaperGatewayConfig::default());
        for (symbol, base_rate, mark) in symbols {
            gateway.list_symbol(symbol, base_rate + offset, mark).await;
        }
        gateways.register(Arc::new(gateway));
    }
    Ok(gateways)
}

async fn run_scan(config: AppConfig) -> Result<()> {
    let gateways = demo_gateways(&config).await?;
    let venues = config.venues.enabled_venues()?;
    let scanner = Scanner::new(gateways, venues, &config);

    let outcome = scanner.scan().await?;
    for (venue, err) in &outcome.failed_venues {
        warn!(venue = %venue, error = %err, "venue excluded from scan");
    }

    println!(
        "{:<4} {:<6} {:<12} {:<12} {:>10} {:>10} {:>5} {:>8}",
        "#", "symbol", "long", "short", "gross%/h", "net%/h", "lev", "score"
    );
    for (rank, opp) in outcome.opportunities.iter().enumerate() {
        println!(
            "{:<4} {:<6} {:<12} {:<12} {:>10.5} {:>10.5} {:>4}x {:>8.3}",
            rank + 1,
            opp.symbol,
            opp.long_venue.to_string(),
            opp.short_venue.to_string(),
            opp.gross_spread_pct,
            opp.net_spread_pct,
            opp.min_required_leverage,
            opp.score
        );
    }
    println!("{} opportunities", outcome.opportunities.len());

    Ok(())
}

async fn run_supervised(config: AppConfig, request: OpenRequest, skip_balance_check: bool) -> Result<()> {
    let gateways = demo_gateways(&config).await?;
    let venues = config.venues.enabled_venues()?;

    if !skip_balance_check {
        let (balances, failed) = gateways.balances().await;
        for balance in &balances {
            info!(
                venue = %balance.venue,
                equity_usd = balance.total_equity_usd,
                "balance check"
            );
        }
        if !failed.is_empty() {
            for (venue, err) in failed {
                error!(venue = %venue, error = %err, "balance check failed");
            }
            anyhow::bail!("balance check failed");
        }
    }

    let supervisor = Arc::new(Supervisor::new(gateways.clone(), &config));
    let mut events = supervisor.subscribe();
    let monitor = tokio::spawn(Arc::clone(&supervisor).run());

    let scanner = Scanner::new(gateways.clone(), venues, &config);
    let outcome = scanner.scan().await?;
    let opportunity = outcome
        .opportunities
        .first()
        .ok_or_else(|| anyhow::anyhow!("no opportunities found"))?;

    info!(
        symbol = %opportunity.symbol,
        long_venue = %opportunity.long_venue,
        short_venue = %opportunity.short_venue,
        net_spread_pct = opportunity.net_spread_pct,
        "executing top opportunity"
    );

    let executor = DualLegExecutor::new(gateways, supervisor.clone(), &config);
    let strategy = executor.execute(opportunity, request).await?;
    println!(
        "opened {} long {} / short {} (strategy {})",
        strategy.symbol, strategy.long.venue, strategy.short.venue, strategy.id
    );

    // Follow lifecycle events until our strategy reaches a terminal state
    while let Ok(event) = events.recv().await {
        if let Ok(payload) = serde_json::to_string(&event) {
            tracing::debug!(payload = %payload, "strategy event");
        }
        match event {
            StrategyEvent::Closing { id, reason, .. } if id == strategy.id => {
                println!("closing: {reason}");
            }
            StrategyEvent::Closed {
                id,
                realized_pnl_usd,
                ..
            } if id == strategy.id => {
                println!("closed: realized PnL {realized_pnl_usd:.2} USD");
                break;
            }
            StrategyEvent::Error { id, detail, .. } if id == strategy.id => {
                error!(detail = %detail, "strategy requires manual resolution");
                println!("ERROR: {detail}");
                break;
            }
            StrategyEvent::LiquidationRisk {
                id,
                venue,
                side,
                distance_pct,
                ..
            } if id == strategy.id => {
                println!("liquidation risk: {side} leg on {venue} is {distance_pct:.1}% from liquidation");
            }
            _ => {}
        }
    }

    monitor.abort();
    Ok(())
}

async fn validate_config(config: AppConfig) -> Result<()> {
    info!("validating configuration...");

    match config.validate() {
        Ok(_) => {
            info!("configuration is valid");
            println!("Configuration validation passed!");
        }
        Err(e) => {
            error!("configuration validation failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
