use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use server::repository::Repositories;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "32")]
    max_clients: usize,
    /// Milliseconds between simulation ticks
    #[clap(short, long, default_value = "100")]
    tick_ms: u64,
    /// Minimum seconds a race accepts bets after leaving the queue
    #[clap(short = 'w', long, default_value = "10")]
    betting_window: u64,
    /// Default seconds between race creation and start
    #[clap(long, default_value = "30")]
    start_delay: u64,
    /// Longest start delay a client may request, in seconds
    #[clap(long, default_value = "3600")]
    max_start_delay: u64,
    /// Winning bets pay stake times this multiplier
    #[clap(long, default_value = "2")]
    payout_multiplier: u64,
    /// Balance granted to new users
    #[clap(long, default_value = "1000")]
    starting_balance: u64,
    /// Abort a race still running after this many ticks
    #[clap(long, default_value = "10000")]
    max_ticks: u32,
    /// Fixed RNG seed for reproducible races
    #[clap(short, long)]
    seed: Option<u64>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: format!("{}:{}", args.host, args.port),
            max_clients: args.max_clients,
            tick_interval: Duration::from_millis(args.tick_ms),
            min_betting_window: Duration::from_secs(args.betting_window),
            default_start_delay: Duration::from_secs(args.start_delay),
            max_start_delay: Duration::from_secs(args.max_start_delay),
            payout_multiplier: args.payout_multiplier,
            starting_balance: args.starting_balance,
            max_ticks: args.max_ticks,
            seed: args.seed,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::from(args);
    info!(
        "Starting race server on {} (tick {:?}, betting window {:?})",
        config.bind_addr, config.tick_interval, config.min_betting_window
    );

    let (server, worker) = Server::new(config, Repositories::in_memory()).await?;
    let worker_handle = tokio::spawn(worker.run());

    tokio::select! {
        _ = server.run() => {}
        result = worker_handle => {
            if let Err(e) = result {
                error!("Race scheduler panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
