//! Runtime settings shared by the scheduler, betting coordinator and network layer

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_addr: String,
    /// Maximum number of simultaneously connected clients
    pub max_clients: usize,
    /// Pause between two simulation ticks
    pub tick_interval: Duration,
    /// Minimum time a race accepts bets after it leaves the queue
    pub min_betting_window: Duration,
    /// Delay between race creation and its scheduled start
    pub default_start_delay: Duration,
    /// Longest start delay a client may request for a new race
    pub max_start_delay: Duration,
    /// Default roster size for new races
    pub default_capacity: usize,
    /// Winning bets pay `amount * payout_multiplier`
    pub payout_multiplier: u64,
    /// Balance granted to newly registered users
    pub starting_balance: u64,
    /// A race still running after this many ticks is aborted
    pub max_ticks: u32,
    /// Fixed RNG seed; `None` draws from OS entropy
    pub seed: Option<u64>,
    /// Per-connection outbound queue length
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: 32,
            tick_interval: Duration::from_millis(100),
            min_betting_window: Duration::from_secs(10),
            default_start_delay: Duration::from_secs(30),
            max_start_delay: Duration::from_secs(3600),
            default_capacity: 3,
            payout_multiplier: 2,
            starting_balance: 1000,
            max_ticks: 10_000,
            seed: None,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Settings for tests: no waiting and a fixed seed.
    pub fn instant() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            tick_interval: Duration::from_millis(1),
            min_betting_window: Duration::ZERO,
            default_start_delay: Duration::ZERO,
            seed: Some(7),
            ..Self::default()
        }
    }
}
