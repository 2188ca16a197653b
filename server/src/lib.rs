//! # Race Betting Server Library
//!
//! This library implements a horse-racing betting server. Clients connect over
//! TCP, exchange line-delimited JSON requests and responses, and receive race
//! notifications as races run.
//!
//! ## Core Responsibilities
//!
//! ### Race Scheduling
//! Races are created on request and appended to a single FIFO queue. One
//! worker drains the queue, so at most one race is in progress at any time
//! and races start in the order they were created.
//!
//! ### Simulation
//! A running race advances every racer by a random stride per tick until all
//! have crossed the finish line. The finishing order is fixed the moment a
//! racer crosses.
//!
//! ### Betting
//! Bets are only accepted while the current race's betting window is open,
//! from the moment the race leaves the queue until it starts. Winning bets
//! pay twice the stake when the race finishes; if a race fails, every open
//! bet is refunded.
//!
//! ### Broadcasting
//! Race start, each finisher and the final result are pushed to every
//! connected client.
//!
//! ## Module Organization
//!
//! ### Domain (`racer`, `race`, `betting`)
//! Racers, tracks and rosters; the race state machine and its events; the
//! betting coordinator with window gating and settlement.
//!
//! ### Execution (`runner`, `scheduler`)
//! [`runner::RaceRunner`] drives one race from dequeue to finish;
//! [`scheduler::SchedulerWorker`] runs them one after another and isolates
//! failures.
//!
//! ### Protocol (`dispatch`, `handlers`, `network`, `client_manager`)
//! Request routing, the per-handler operations, the TCP server and the
//! registry of connected clients.
//!
//! ### Storage (`repository`)
//! Repository traits and the in-memory store used by the server binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::repository::Repositories;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (server, worker) = Server::new(ServerConfig::default(), Repositories::in_memory()).await?;
//!
//!     // The worker runs queued races; the server handles connections.
//!     tokio::spawn(worker.run());
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod betting;
pub mod client_manager;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod network;
pub mod race;
pub mod racer;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod utils;
