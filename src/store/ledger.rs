use ulid::Ulid;

use crate::dates::DateRange;
use crate::model::Reservation;

/// All reservations of one unit, sorted by start date.
#[derive(Debug, Clone)]
pub struct UnitLedger {
    pub unit_id: Ulid,
    reservations: Vec<Reservation>,
}

impl UnitLedger {
    pub fn new(unit_id: Ulid) -> Self {
        Self {
            unit_id,
            reservations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Insert maintaining sort order by start date.
    pub fn insert(&mut self, reservation: Reservation) {
        let start = reservation.range.start();
        let pos = self
            .reservations
            .partition_point(|r| r.range.start() <= start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == *id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations sharing at least one day with `range`, any status.
    /// Entries starting after `range.end()` are skipped by binary search.
    pub fn overlapping(&self, range: DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start() <= range.end());
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end() >= range.start())
    }

    /// First occupying reservation overlapping `range`, ignoring `exclude`.
    pub fn first_conflict(&self, range: &DateRange, exclude: Option<Ulid>) -> Option<&Reservation> {
        self.overlapping(*range)
            .find(|r| r.status.is_occupying() && Some(r.id) != exclude)
    }
}
