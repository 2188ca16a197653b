//! Executes a single race from dequeue to finish
//!
//! The runner owns the race for the duration of one run and is the only code
//! that publishes events for it:
//!
//! 1. `Scheduled` as soon as it leaves the queue (betting opens)
//! 2. waits for the betting window to elapse
//! 3. `Started` before the first tick (betting closes)
//! 4. `RacerFinished` for every racer crossing the line, in crossing order
//! 5. `Finished` with the full finishing order (settlement)

use crate::config::ServerConfig;
use crate::error::RaceError;
use crate::race::{Race, RaceEvent, EventBus};
use crate::utils::duration_until;
use log::info;
use rand::rngs::StdRng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub tick_interval: Duration,
    pub min_betting_window: Duration,
    pub max_ticks: u32,
}

impl From<&ServerConfig> for RunnerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            min_betting_window: config.min_betting_window,
            max_ticks: config.max_ticks,
        }
    }
}

pub struct RaceRunner {
    race: Race,
    events: EventBus,
    settings: RunnerSettings,
    rng: StdRng,
}

impl RaceRunner {
    /// Wraps a queued race for execution.
    ///
    /// Every lifecycle event of the race is published on `events`. The betting
    /// window lasts until the scheduled start, and at least
    /// `settings.min_betting_window`. `rng` drives every move, so a seeded
    /// generator replays the same race.
    pub fn new(race: Race, events: EventBus, settings: RunnerSettings, rng: StdRng) -> Self {
        Self {
            race,
            events,
            settings,
            rng,
        }
    }

    /// Runs the race to completion and returns it in its finished state.
    pub async fn run(mut self) -> Result<Race, RaceError> {
        self.events.publish(&RaceEvent::Scheduled(self.race.to_ref()));

        let wait = duration_until(self.race.scheduled_start).max(self.settings.min_betting_window);
        if !wait.is_zero() {
            info!(
                "Race {} accepting bets for {:.1}s",
                self.race.name,
                wait.as_secs_f32()
            );
            sleep(wait).await;
        }

        self.race.start()?;
        info!(
            "Race {} started on {} ({} racers)",
            self.race.name,
            self.race.track().name,
            self.race.roster().len()
        );
        self.events.publish(&RaceEvent::Started {
            race_id: self.race.id,
            race_name: self.race.name.clone(),
        });

        while !self.race.all_finished() {
            if self.race.ticks() >= self.settings.max_ticks {
                return Err(RaceError::Stalled {
                    name: self.race.name.clone(),
                    ticks: self.race.ticks(),
                });
            }

            sleep(self.settings.tick_interval).await;

            let already_finished = self.race.final_order().len();
            let crossed = self.race.advance(&mut self.rng)?;
            for (offset, racer) in crossed.into_iter().enumerate() {
                self.events.publish(&RaceEvent::RacerFinished {
                    race_id: self.race.id,
                    racer,
                    position: already_finished + offset + 1,
                });
            }
        }

        self.race.finish()?;
        info!(
            "Race {} finished after {} ticks, winner {:?}",
            self.race.name,
            self.race.ticks(),
            self.race.winner().map(|r| r.name.as_str())
        );
        self.events.publish(&RaceEvent::Finished {
            race_id: self.race.id,
            race_name: self.race.name.clone(),
            final_order: self.race.final_order().as_slice().to_vec(),
        });

        Ok(self.race)
    }
}
