//! Race entity, race events and the listener bus
//!
//! A [`Race`] only holds state and exposes its forward-only transitions
//! (`NotStarted -> InProgress -> Finished`). Driving those transitions over
//! time and publishing events is the job of [`crate::runner::RaceRunner`].

use crate::error::RaceError;
use crate::racer::{Racer, Roster, Track};
use log::debug;
use rand::Rng;
use shared::{RaceDto, RaceStatus};
use std::sync::Arc;

/// Lightweight identity of a race, handed to the betting coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceRef {
    pub id: u64,
    pub name: String,
    pub racer_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Race {
    pub id: u64,
    pub name: String,
    /// Scheduled start in milliseconds since the Unix epoch
    pub scheduled_start: u64,
    status: RaceStatus,
    roster: Roster<Racer>,
    final_order: Roster<Racer>,
    track: Track,
    ticks: u32,
}

impl Race {
    pub fn new(id: u64, name: &str, track: Track, capacity: usize, scheduled_start: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            scheduled_start,
            status: RaceStatus::NotStarted,
            roster: Roster::with_capacity(capacity),
            final_order: Roster::with_capacity(capacity),
            track,
            ticks: 0,
        }
    }

    /// Adds a racer to the starting lineup, reset to the starting line.
    ///
    /// Returns false when the lineup is full or the race has already started.
    pub fn add_racer(&mut self, mut racer: Racer) -> bool {
        if self.status != RaceStatus::NotStarted {
            return false;
        }
        racer.reset();
        self.roster.add(racer)
    }

    /// Moves a full lineup onto the track.
    ///
    /// Fails when the race has already started or the lineup is not full.
    pub fn start(&mut self) -> Result<(), RaceError> {
        if self.status != RaceStatus::NotStarted {
            return Err(RaceError::AlreadyStarted(self.name.clone()));
        }
        if !self.roster.is_full() {
            return Err(RaceError::RosterUnderfilled {
                name: self.name.clone(),
                registered: self.roster.len(),
                capacity: self.roster.capacity(),
            });
        }

        for racer in self.roster.iter_mut() {
            racer.racing = true;
        }
        self.status = RaceStatus::InProgress;
        Ok(())
    }

    /// Runs one simulation tick.
    ///
    /// Every racer still running moves once, in lineup order. Racers that reach
    /// the finish line during this tick are appended to the finishing order in
    /// that same order and returned.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<Racer>, RaceError> {
        if self.status != RaceStatus::InProgress {
            return Err(RaceError::NotInProgress(self.name.clone()));
        }

        self.ticks += 1;
        let finish_line = self.track.length;
        let mut crossed = Vec::new();

        for racer in self.roster.iter_mut() {
            if !racer.racing {
                continue;
            }
            racer.advance(rng, finish_line);
            if racer.has_finished(finish_line) {
                racer.racing = false;
                crossed.push(racer.clone());
            }
        }

        for racer in &crossed {
            self.final_order.add(racer.clone());
        }

        if !crossed.is_empty() {
            debug!(
                "Race {} tick {}: {} racer(s) crossed the line",
                self.name,
                self.ticks,
                crossed.len()
            );
        }

        Ok(crossed)
    }

    pub fn all_finished(&self) -> bool {
        self.final_order.len() == self.roster.len()
    }

    /// Marks a running race as finished once every racer has crossed the line.
    pub fn finish(&mut self) -> Result<(), RaceError> {
        if self.status != RaceStatus::InProgress {
            return Err(RaceError::NotInProgress(self.name.clone()));
        }
        if !self.all_finished() {
            return Err(RaceError::Unfinished {
                name: self.name.clone(),
            });
        }
        self.status = RaceStatus::Finished;
        Ok(())
    }

    pub fn status(&self) -> RaceStatus {
        self.status
    }

    pub fn roster(&self) -> &Roster<Racer> {
        &self.roster
    }

    pub fn final_order(&self) -> &Roster<Racer> {
        &self.final_order
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn winner(&self) -> Option<&Racer> {
        match self.status {
            RaceStatus::Finished => self.final_order.first(),
            _ => None,
        }
    }

    pub fn to_ref(&self) -> RaceRef {
        RaceRef {
            id: self.id,
            name: self.name.clone(),
            racer_ids: self.roster.iter().map(|r| r.id).collect(),
        }
    }

    pub fn to_dto(&self) -> RaceDto {
        RaceDto {
            id: self.id,
            name: self.name.clone(),
            track: self.track.to_dto(),
            scheduled_start: self.scheduled_start,
            status: self.status,
            racers: self.roster.iter().map(Racer::to_dto).collect(),
        }
    }
}

/// Lifecycle notifications emitted by the race runner
#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    /// The race left the queue and accepts bets until it starts
    Scheduled(RaceRef),
    Started {
        race_id: u64,
        race_name: String,
    },
    RacerFinished {
        race_id: u64,
        racer: Racer,
        position: usize,
    },
    Finished {
        race_id: u64,
        race_name: String,
        final_order: Vec<Racer>,
    },
    /// The race failed before finishing; nothing will follow for this race
    Aborted {
        race_id: u64,
        race_name: String,
        reason: String,
    },
}

/// Receives race events on the scheduler worker. Implementations must not block.
pub trait RaceListener: Send + Sync {
    fn on_race_event(&self, event: &RaceEvent);
}

/// Ordered list of listeners. Events are delivered synchronously in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn RaceListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn RaceListener>) {
        self.listeners.push(listener);
    }

    pub fn publish(&self, event: &RaceEvent) {
        for listener in &self.listeners {
            listener.on_race_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    fn track(length: u32) -> Track {
        Track::new("Test Oval", length, "Nowhere")
    }

    fn full_race(capacity: usize, length: u32) -> Race {
        let mut race = Race::new(1, "Cup", track(length), capacity, 0);
        for id in 1..=capacity as u32 {
            assert!(race.add_racer(Racer::horse(id, &format!("H{}", id), 1, 4).unwrap()));
        }
        race
    }

    fn run_to_end(race: &mut Race, seed: u64) -> Vec<u32> {
        let mut rng = StdRng::seed_from_u64(seed);
        race.start().unwrap();
        while !race.all_finished() {
            race.advance(&mut rng).unwrap();
        }
        race.finish().unwrap();
        race.final_order().iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_add_racer_respects_capacity() {
        let mut race = full_race(3, 50);
        let extra = Racer::horse(4, "H4", 1, 4).unwrap();
        assert!(!race.add_racer(extra));
        assert_eq!(race.roster().len(), 3);
    }

    #[test]
    fn test_add_racer_resets_position() {
        let mut race = Race::new(1, "Cup", track(50), 2, 0);
        let mut racer = Racer::horse(1, "Tired", 1, 2).unwrap();
        racer.position = 30;
        race.add_racer(racer);
        assert_eq!(race.roster().first().unwrap().position, 0);
    }

    #[test]
    fn test_start_only_once() {
        let mut race = full_race(2, 50);
        assert_eq!(race.status(), RaceStatus::NotStarted);
        assert!(race.start().is_ok());
        assert_eq!(race.status(), RaceStatus::InProgress);
        assert_eq!(
            race.start(),
            Err(RaceError::AlreadyStarted("Cup".to_string()))
        );
        assert_eq!(race.status(), RaceStatus::InProgress);
    }

    #[test]
    fn test_underfilled_race_cannot_start() {
        let mut race = Race::new(1, "Cup", track(50), 3, 0);
        race.add_racer(Racer::horse(1, "H1", 1, 2).unwrap());

        match race.start() {
            Err(RaceError::RosterUnderfilled {
                registered,
                capacity,
                ..
            }) => {
                assert_eq!(registered, 1);
                assert_eq!(capacity, 3);
            }
            other => panic!("Expected underfilled error, got {:?}", other),
        }
        assert_eq!(race.status(), RaceStatus::NotStarted);
    }

    #[test]
    fn test_advance_requires_in_progress() {
        let mut race = full_race(2, 50);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(race.advance(&mut rng).is_err());
    }

    #[test]
    fn test_no_racers_join_after_start() {
        let mut race = Race::new(1, "Cup", track(50), 1, 0);
        race.add_racer(Racer::horse(1, "H1", 1, 2).unwrap());
        race.start().unwrap();
        assert!(!race.add_racer(Racer::horse(2, "H2", 1, 2).unwrap()));
    }

    #[test]
    fn test_every_racer_finishes_exactly_once() {
        let mut race = full_race(5, 40);
        let order = run_to_end(&mut race, 99);

        assert_eq!(order.len(), 5);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
        assert_eq!(race.status(), RaceStatus::Finished);
        assert_eq!(race.winner().map(|r| r.id), Some(order[0]));
        assert!(race.roster().iter().all(|r| r.position == 40 && !r.racing));
    }

    #[test]
    fn test_simulation_is_deterministic_for_seed() {
        let mut first = full_race(4, 60);
        let mut second = full_race(4, 60);
        assert_eq!(run_to_end(&mut first, 1234), run_to_end(&mut second, 1234));
        assert_eq!(first.ticks(), second.ticks());
    }

    #[test]
    fn test_ties_follow_lineup_order() {
        let mut race = Race::new(1, "Photo Finish", track(10), 3, 0);
        for id in [3, 1, 2] {
            race.add_racer(Racer::horse(id, "Even", 10, 10).unwrap());
        }
        let order = run_to_end(&mut race, 5);
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(race.ticks(), 1);
    }

    #[test]
    fn test_finish_requires_all_racers() {
        let mut race = full_race(2, 1_000);
        race.start().unwrap();
        assert!(matches!(race.finish(), Err(RaceError::Unfinished { .. })));
        assert!(race.winner().is_none());
    }

    #[test]
    fn test_to_ref_lists_lineup() {
        let race = full_race(3, 50);
        let race_ref = race.to_ref();
        assert_eq!(race_ref.id, 1);
        assert_eq!(race_ref.racer_ids, vec![1, 2, 3]);
        assert_eq!(race.to_dto().racers.len(), 3);
    }

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RaceListener for Recorder {
        fn on_race_event(&self, event: &RaceEvent) {
            let kind = match event {
                RaceEvent::Scheduled(_) => "scheduled",
                RaceEvent::Started { .. } => "started",
                RaceEvent::RacerFinished { .. } => "racer",
                RaceEvent::Finished { .. } => "finished",
                RaceEvent::Aborted { .. } => "aborted",
            };
            self.log.lock().unwrap().push(format!("{}:{}", self.tag, kind));
        }
    }

    #[test]
    fn test_event_bus_delivers_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        assert!(bus.is_empty());
        bus.subscribe(Arc::new(Recorder {
            tag: "a",
            log: Arc::clone(&log),
        }));
        bus.subscribe(Arc::new(Recorder {
            tag: "b",
            log: Arc::clone(&log),
        }));
        assert_eq!(bus.len(), 2);

        bus.publish(&RaceEvent::Started {
            race_id: 1,
            race_name: "Cup".to_string(),
        });

        assert_eq!(*log.lock().unwrap(), vec!["a:started", "b:started"]);
    }
}
