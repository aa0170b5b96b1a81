//! Bingohall server binary

use bingohall::{
    api::{ApiServer, ConnectionBroadcaster},
    config::{ConfigLoader, HallConfig},
    game_store,
    hall::{BingoHall, HallServices},
    ledger::{DenyListCompliance, InMemoryLedger},
    metrics::HallMetrics,
    storage::open_store,
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bingohall CLI
#[derive(Parser)]
#[command(name = "bingohall")]
#[command(about = "Multi-player 90-ball bingo hall with provably fair draws")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the production preset when no file is given
    #[arg(long)]
    production: bool,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory for RocksDB storage
    #[arg(short, long)]
    db_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hall and its API (default)
    Serve,

    /// Print stored games and treasury balances
    InspectDb,

    /// Write the effective configuration as TOML
    InitConfig {
        #[arg(short, long, default_value = "bingohall.toml")]
        output: String,
    },
}

fn load_config(cli: &Cli) -> Result<HallConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::new().with_path(path).load()?,
        None if cli.production => {
            let mut config = HallConfig::production();
            ConfigLoader::apply_overrides(&mut config, |key| std::env::var(key).ok())?;
            config
        }
        None => ConfigLoader::new().load()?,
    };

    if let Some(host) = &cli.host {
        config.api.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(path) = &cli.db_path {
        config.storage.data_directory = path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &HallConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::InspectDb => inspect_db(config),
        Commands::InitConfig { output } => {
            ConfigLoader::new().save(&config, &output)?;
            info!("📝 Configuration written to {}", output);
            Ok(())
        }
    }
}

async fn serve(config: HallConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("🚀 Starting bingo hall");
    info!("   Storage: {:?} at {}", config.storage.backend, config.storage.data_directory);
    info!(
        "   Draw interval: {}ms, claim window: {}ms, jackpot threshold: {} calls",
        config.rules.draw_interval_ms, config.rules.claim_window_ms, config.rules.jackpot_threshold
    );

    let store = open_store(&config.storage)?;
    let metrics = if config.monitoring.enable_metrics {
        Some(Arc::new(HallMetrics::new()?))
    } else {
        None
    };

    // No external account service is wired in this binary
    warn!("⚠️  Using in-memory ledger and compliance gate");
    let ledger = Arc::new(InMemoryLedger::new());
    let compliance = Arc::new(DenyListCompliance::new());

    let broadcaster = Arc::new(ConnectionBroadcaster::new(metrics.clone()));
    let hall = BingoHall::start(
        config.clone(),
        HallServices {
            store,
            ledger,
            compliance,
            events: broadcaster.clone(),
            metrics: metrics.clone(),
        },
    )?;

    ApiServer::new(config.api.clone(), hall, broadcaster, metrics).run().await
}

fn inspect_db(mut config: HallConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.storage.clear_on_start = false;
    let store = open_store(&config.storage)?;

    let treasury = game_store::load_treasury(store.as_ref())?;
    println!("🏦 Treasury");
    println!("   Jackpot:          {}", treasury.jackpot);
    println!("   Organizer wallet: {}", treasury.organizer_wallet);
    println!("   Carry:            {}", treasury.carry);
    println!("   Games settled:    {}", treasury.games_settled);

    let games = game_store::load_games(store.as_ref())?;
    println!("🎱 Games ({})", games.len());
    for game in &games {
        println!(
            "   #{:<6} {:<10} draws={:<3} cards={:<4} pool={:<10} quine={} bingo={} settlement={:?}",
            game.id.0,
            game.status.to_string(),
            game.draws.len(),
            game.cards_sold,
            game.total_pool,
            game.quine_winners.len(),
            game.bingo_winners.len(),
            game.settlement,
        );
    }

    let queue = game_store::load_reconciliation_queue(store.as_ref())?;
    if !queue.is_empty() {
        println!("⚠️  Needs reconciliation");
        for (game_id, reason) in queue {
            println!("   #{}: {}", game_id, reason);
        }
    }
    Ok(())
}
