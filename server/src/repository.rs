//! Storage contracts consumed by the core, plus an in-memory implementation
//!
//! The race, betting and dispatch code only ever talks to the narrow traits in
//! this module. [`MemoryStore`] backs all of them with plain maps so the
//! server runs standalone and tests can exercise the full flow.

use crate::betting::Bet;
use crate::error::PersistenceError;
use crate::racer::{Racer, Track};
use shared::RacerKind;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
    pub balance: u64,
}

impl User {
    pub fn new(username: &str, password: &str, balance: u64) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            balance,
        }
    }
}

pub trait RacerRepository: Send + Sync {
    fn read_racer_by_id(&self, id: u32) -> Result<Option<Racer>, PersistenceError>;
    fn read_all_racers(&self, kind: RacerKind) -> Result<Vec<Racer>, PersistenceError>;
    /// Stores the racer under a freshly assigned id and returns the stored copy.
    fn create_racer(&self, racer: Racer) -> Result<Racer, PersistenceError>;
    fn delete_racer(&self, id: u32) -> Result<bool, PersistenceError>;
}

pub trait UserRepository: Send + Sync {
    fn read_user_by_username(&self, username: &str) -> Result<Option<User>, PersistenceError>;
    fn create_user(&self, user: User) -> Result<(), PersistenceError>;
    fn update_user_balance(&self, username: &str, balance: u64) -> Result<(), PersistenceError>;
}

pub trait BetRepository: Send + Sync {
    fn create_bet(&self, bet: &Bet) -> Result<(), PersistenceError>;
    fn update_bet(&self, bet: &Bet) -> Result<(), PersistenceError>;
    fn read_bets_by_user(&self, username: &str) -> Result<Vec<Bet>, PersistenceError>;
}

pub trait TrackRepository: Send + Sync {
    fn read_race_track(&self, name: &str) -> Result<Option<Track>, PersistenceError>;
    fn read_all_tracks(&self) -> Result<Vec<Track>, PersistenceError>;
}

/// Handles to every storage collaborator
#[derive(Clone)]
pub struct Repositories {
    pub racers: Arc<dyn RacerRepository>,
    pub users: Arc<dyn UserRepository>,
    pub bets: Arc<dyn BetRepository>,
    pub tracks: Arc<dyn TrackRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RacerRepository + UserRepository + BetRepository + TrackRepository + 'static,
    {
        Self {
            racers: store.clone(),
            users: store.clone(),
            bets: store.clone(),
            tracks: store,
        }
    }

    /// In-memory storage preloaded with the default tracks and stable.
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::with_defaults()))
    }
}

#[derive(Default)]
struct StoreInner {
    racers: BTreeMap<u32, Racer>,
    next_racer_id: u32,
    users: HashMap<String, User>,
    bets: BTreeMap<u64, Bet>,
    tracks: BTreeMap<String, Track>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

const DEFAULT_TRACKS: [(&str, u32, &str); 3] = [
    ("Ascot", 100, "Berkshire"),
    ("Churchill Downs", 160, "Louisville"),
    ("Flemington", 120, "Melbourne"),
];

const DEFAULT_STABLE: [(&str, u32, u32); 6] = [
    ("Thunderhoof", 3, 7),
    ("Silver Comet", 4, 6),
    ("Night Mare", 2, 8),
    ("Buttercup", 3, 6),
    ("Lucky Clover", 1, 9),
    ("Iron Mane", 4, 5),
];

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let store = Self::new();
        {
            let mut inner = store
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (name, length, location) in DEFAULT_TRACKS {
                inner
                    .tracks
                    .insert(name.to_string(), Track::new(name, length, location));
            }
            for (name, speed_min, speed_max) in DEFAULT_STABLE {
                inner.next_racer_id += 1;
                let id = inner.next_racer_id;
                if let Some(racer) = Racer::horse(id, name, speed_min, speed_max) {
                    inner.racers.insert(id, racer);
                }
            }
        }
        store
    }

    pub fn add_track(&self, track: Track) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        inner.tracks.insert(track.name.clone(), track);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, PersistenceError> {
        self.inner.lock().map_err(|_| PersistenceError::Poisoned)
    }
}

impl RacerRepository for MemoryStore {
    fn read_racer_by_id(&self, id: u32) -> Result<Option<Racer>, PersistenceError> {
        Ok(self.lock()?.racers.get(&id).cloned())
    }

    fn read_all_racers(&self, kind: RacerKind) -> Result<Vec<Racer>, PersistenceError> {
        Ok(self
            .lock()?
            .racers
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    fn create_racer(&self, mut racer: Racer) -> Result<Racer, PersistenceError> {
        let mut inner = self.lock()?;
        inner.next_racer_id += 1;
        racer.id = inner.next_racer_id;
        racer.reset();
        inner.racers.insert(racer.id, racer.clone());
        Ok(racer)
    }

    fn delete_racer(&self, id: u32) -> Result<bool, PersistenceError> {
        Ok(self.lock()?.racers.remove(&id).is_some())
    }
}

impl UserRepository for MemoryStore {
    fn read_user_by_username(&self, username: &str) -> Result<Option<User>, PersistenceError> {
        Ok(self.lock()?.users.get(username).cloned())
    }

    fn create_user(&self, user: User) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        if inner.users.contains_key(&user.username) {
            return Err(PersistenceError::Duplicate(user.username));
        }
        inner.users.insert(user.username.clone(), user);
        Ok(())
    }

    fn update_user_balance(&self, username: &str, balance: u64) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        match inner.users.get_mut(username) {
            Some(user) => {
                user.balance = balance;
                Ok(())
            }
            None => Err(PersistenceError::NotFound(username.to_string())),
        }
    }
}

impl BetRepository for MemoryStore {
    fn create_bet(&self, bet: &Bet) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        if inner.bets.contains_key(&bet.id) {
            return Err(PersistenceError::Duplicate(format!("bet {}", bet.id)));
        }
        inner.bets.insert(bet.id, bet.clone());
        Ok(())
    }

    fn update_bet(&self, bet: &Bet) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        match inner.bets.get_mut(&bet.id) {
            Some(stored) => {
                *stored = bet.clone();
                Ok(())
            }
            None => Err(PersistenceError::NotFound(format!("bet {}", bet.id))),
        }
    }

    fn read_bets_by_user(&self, username: &str) -> Result<Vec<Bet>, PersistenceError> {
        Ok(self
            .lock()?
            .bets
            .values()
            .filter(|b| b.username == username)
            .cloned()
            .collect())
    }
}

impl TrackRepository for MemoryStore {
    fn read_race_track(&self, name: &str) -> Result<Option<Track>, PersistenceError> {
        Ok(self.lock()?.tracks.get(name).cloned())
    }

    fn read_all_tracks(&self) -> Result<Vec<Track>, PersistenceError> {
        Ok(self.lock()?.tracks.values().cloned().collect())
    }
}
