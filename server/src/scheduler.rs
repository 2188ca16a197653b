//! FIFO race queue and its single worker
//!
//! [`RaceScheduler`] is the cheap, cloneable enqueue side; [`SchedulerWorker`]
//! is the consumer and must be spawned exactly once. The worker awaits each
//! race to completion before taking the next one, so at most one race is ever
//! in progress and every race event for race N is published before any event
//! for race N+1.
//!
//! Each run executes in its own task. An error or panic inside a run is logged,
//! reported to listeners as [`RaceEvent::Aborted`], and the worker moves on.

use crate::config::ServerConfig;
use crate::error::RaceError;
use crate::race::{EventBus, Race, RaceEvent};
use crate::runner::{RaceRunner, RunnerSettings};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::RaceDto;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct RaceScheduler {
    queue: mpsc::UnboundedSender<Race>,
    pending: Arc<Mutex<VecDeque<RaceDto>>>,
    next_race_id: Arc<AtomicU64>,
}

pub struct SchedulerWorker {
    queue: mpsc::UnboundedReceiver<Race>,
    pending: Arc<Mutex<VecDeque<RaceDto>>>,
    events: EventBus,
    settings: RunnerSettings,
    seed: Option<u64>,
}

/// Creates the enqueue handle and the worker that drains it
pub fn channel(events: EventBus, config: &ServerConfig) -> (RaceScheduler, SchedulerWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(Mutex::new(VecDeque::new()));

    let scheduler = RaceScheduler {
        queue: tx,
        pending: Arc::clone(&pending),
        next_race_id: Arc::new(AtomicU64::new(1)),
    };
    let worker = SchedulerWorker {
        queue: rx,
        pending,
        events,
        settings: RunnerSettings::from(config),
        seed: config.seed,
    };

    (scheduler, worker)
}

impl RaceScheduler {
    pub fn next_race_id(&self) -> u64 {
        self.next_race_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Appends a race to the queue. Never blocks on the worker.
    ///
    /// The race also shows up in [`pending`](Self::pending) until the worker
    /// picks it up. Fails with [`RaceError::QueueClosed`] once the worker has
    /// stopped.
    pub fn enqueue(&self, race: Race) -> Result<(), RaceError> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let summary = race.to_dto();
        let name = race.name.clone();
        self.queue.send(race).map_err(|_| RaceError::QueueClosed)?;
        pending.push_back(summary);

        info!("Race {} queued ({} pending)", name, pending.len());
        Ok(())
    }

    /// Races queued but not yet picked up by the worker, oldest first
    ///
    /// The race currently running is not included.
    pub fn pending(&self) -> Vec<RaceDto> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl SchedulerWorker {
    fn take_pending(&self, race_id: u64) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(index) = pending.iter().position(|r| r.id == race_id) {
            pending.remove(index);
        }
    }

    fn rng_for(&self, race_id: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(race_id)),
            None => StdRng::from_entropy(),
        }
    }

    /// Drains the queue until every [`RaceScheduler`] handle is dropped.
    pub async fn run(mut self) {
        info!("Race scheduler started");

        while let Some(race) = self.queue.recv().await {
            self.take_pending(race.id);

            let race_id = race.id;
            let race_name = race.name.clone();
            let runner = RaceRunner::new(
                race,
                self.events.clone(),
                self.settings.clone(),
                self.rng_for(race_id),
            );

            let reason = match tokio::spawn(runner.run()).await {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("race task panicked: {}", e),
            };

            error!("Race {} failed: {}", race_name, reason);
            self.events.publish(&RaceEvent::Aborted {
                race_id,
                race_name,
                reason,
            });
        }

        info!("Race scheduler stopped");
    }
}
