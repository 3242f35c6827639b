//! Demo binary: runs the engine against the in-memory adapters, logging every
//! broadcast event, with a couple of scripted players betting and cashing out.

use clap::Parser;
use crash_engine::adapters::{ChannelBroadcaster, MemoryStore, MemoryWallet, StaticPrices};
use crash_engine::{CrashEngine, Currency, EngineConfig, GameEvent, RoundScheduler};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crash-engine")]
#[command(about = "Crash game round engine demo", long_about = None)]
struct Args {
    /// Tick interval in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Maximum round duration in milliseconds
    #[arg(long, default_value = "10000")]
    round_ms: u64,

    /// Cooldown between rounds in milliseconds
    #[arg(long, default_value = "3000")]
    cooldown_ms: u64,

    /// Number of scripted demo players
    #[arg(long, default_value = "4")]
    players: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::default();
    config.round.tick_interval_ms = args.tick_ms;
    config.round.max_duration_ms = args.round_ms;
    config.round.cooldown_ms = args.cooldown_ms;

    let wallet = Arc::new(MemoryWallet::new());
    let prices = Arc::new(StaticPrices::demo());
    let store = Arc::new(MemoryStore::new());
    let broadcaster = Arc::new(ChannelBroadcaster::default());

    let player_ids: Vec<String> = (1..=args.players).map(|i| format!("player-{i}")).collect();
    for player in &player_ids {
        wallet.fund(player, Currency::Btc, 1.0);
        wallet.fund(player, Currency::Eth, 10.0);
    }

    let engine = Arc::new(CrashEngine::new(
        config,
        wallet.clone(),
        prices,
        store,
        broadcaster.clone(),
    )?);

    // Event log: what a websocket fan-out would push to clients.
    let mut events = broadcaster.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                GameEvent::MultiplierTick { multiplier, .. } => {
                    tracing::debug!(multiplier, "tick");
                }
                other => info!(event = ?other, "broadcast"),
            }
        }
    });

    // Scripted load: everyone bets at round start, half cash out early.
    let bettor_engine = engine.clone();
    tokio::spawn(async move {
        let mut rounds = broadcaster.subscribe();
        while let Ok(event) = rounds.recv().await {
            if !matches!(event, GameEvent::RoundStarted { .. }) {
                continue;
            }
            for (i, player) in player_ids.iter().enumerate() {
                match bettor_engine.place_bet(player, 10.0, "BTC").await {
                    Ok(bet) => info!(player, stake = bet.amount_crypto, "bet placed"),
                    Err(e) => warn!(player, "bet rejected: {e}"),
                }
                if i % 2 == 0 {
                    let engine = bettor_engine.clone();
                    let player = player.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(
                            500 + 300 * (i as u64),
                        ))
                        .await;
                        match engine.cash_out(&player).await {
                            Ok(bet) => info!(
                                player,
                                multiplier = bet.cashout_multiplier.unwrap_or_default(),
                                payout = bet.payout_crypto,
                                "cashed out"
                            ),
                            Err(e) => warn!(player, "cash out rejected: {e}"),
                        }
                    });
                }
            }
        }
    });

    let (scheduler, shutdown) = RoundScheduler::new(engine);
    let scheduler_task = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    shutdown.shutdown();
    scheduler_task.await?;
    Ok(())
}
