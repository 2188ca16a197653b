//! Racer, track and roster value types
//!
//! These types carry no synchronization of their own. A race takes a snapshot
//! of each persisted racer when it is created and mutates only that copy.

use rand::Rng;
use shared::{RacerDto, RacerKind, TrackDto};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Racer {
    pub id: u32,
    pub name: String,
    pub kind: RacerKind,
    pub speed_min: u32,
    pub speed_max: u32,
    /// Distance covered in the current race
    pub position: u32,
    pub racing: bool,
}

impl Racer {
    /// Creates a horse. Returns `None` unless `1 <= speed_max` and `speed_min <= speed_max`.
    pub fn horse(id: u32, name: &str, speed_min: u32, speed_max: u32) -> Option<Self> {
        if speed_max == 0 || speed_min > speed_max {
            return None;
        }

        Some(Self {
            id,
            name: name.to_string(),
            kind: RacerKind::Horse,
            speed_min,
            speed_max,
            position: 0,
            racing: false,
        })
    }

    /// Moves forward by a uniform draw from `[speed_min, speed_max]`, stopping at `finish_line`.
    ///
    /// Returns the step actually applied.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R, finish_line: u32) -> u32 {
        let step = rng.gen_range(self.speed_min..=self.speed_max);
        let next = self.position.saturating_add(step).min(finish_line);
        let applied = next - self.position;
        self.position = next;
        applied
    }

    pub fn has_finished(&self, finish_line: u32) -> bool {
        self.position >= finish_line
    }

    /// Puts the racer back on the starting line
    pub fn reset(&mut self) {
        self.position = 0;
        self.racing = false;
    }

    pub fn to_dto(&self) -> RacerDto {
        RacerDto {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            speed_min: self.speed_min,
            speed_max: self.speed_max,
            position: self.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Track {
    pub name: String,
    pub length: u32,
    pub location: String,
}

impl Track {
    pub fn new(name: &str, length: u32, location: &str) -> Self {
        Self {
            name: name.to_string(),
            length,
            location: location.to_string(),
        }
    }

    pub fn to_dto(&self) -> TrackDto {
        TrackDto {
            name: self.name.clone(),
            length: self.length,
            location: self.location.clone(),
        }
    }
}

/// Ordered collection with a fixed capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Roster<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item` unless the roster is full. A full roster is left untouched.
    pub fn add(&mut self, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<'a, T> IntoIterator for &'a Roster<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
