//! Unit catalogue and party lookup.
//!
//! The booking core only reads units and contacts; listing management lives
//! elsewhere. `InMemoryDirectory` is the implementation the server ships with,
//! optionally seeded from a JSON file.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::{MAX_EXTRAS_PER_UNIT, MAX_NAME_LEN};
use crate::model::{Contact, Extra, PartyId, Unit, UnitStatus};
use crate::pricing::Money;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("unknown unit {0}")]
    UnknownUnit(Ulid),
    #[error("invalid unit: {0}")]
    Invalid(String),
    #[error("seed file: {0}")]
    Seed(String),
}

#[async_trait]
pub trait UnitDirectory: Send + Sync {
    async fn unit(&self, id: Ulid) -> Result<Option<Unit>, DirectoryError>;
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn contact(&self, party_id: &str) -> Result<Option<Contact>, DirectoryError>;

    /// Login password for `party_id`, if the party has its own.
    async fn password(&self, party_id: &str) -> Result<Option<String>, DirectoryError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Party {
    contact: Contact,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    units: Vec<Unit>,
    #[serde(default)]
    parties: Vec<Party>,
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    units: DashMap<Ulid, Unit>,
    parties: DashMap<PartyId, Party>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "units": [...], "parties": [{ "contact": {...}, "password": ... }] }`.
    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Seed(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let seed: Seed =
            serde_json::from_str(raw).map_err(|e| DirectoryError::Seed(e.to_string()))?;
        let dir = Self::new();
        for unit in seed.units {
            dir.upsert_unit(unit)?;
        }
        for party in seed.parties {
            dir.register_contact(party.contact, party.password);
        }
        Ok(dir)
    }

    pub fn upsert_unit(&self, unit: Unit) -> Result<(), DirectoryError> {
        validate_unit(&unit)?;
        self.units.insert(unit.id, unit);
        Ok(())
    }

    pub fn get_unit(&self, id: &Ulid) -> Option<Unit> {
        self.units.get(id).map(|u| u.clone())
    }

    pub fn set_unit_status(&self, id: Ulid, status: UnitStatus) -> Result<(), DirectoryError> {
        let mut unit = self.units.get_mut(&id).ok_or(DirectoryError::UnknownUnit(id))?;
        unit.status = status;
        Ok(())
    }

    /// Later reservations are priced at the new rate; existing totals are fixed.
    pub fn set_daily_rate(&self, id: Ulid, rate: Money) -> Result<(), DirectoryError> {
        if rate.cents() < 0 {
            return Err(DirectoryError::Invalid("daily rate must not be negative".into()));
        }
        let mut unit = self.units.get_mut(&id).ok_or(DirectoryError::UnknownUnit(id))?;
        unit.daily_rate = rate;
        Ok(())
    }

    /// Add or reprice a named extra.
    pub fn add_extra(&self, id: Ulid, extra: Extra) -> Result<(), DirectoryError> {
        validate_extra(&extra)?;
        let mut unit = self.units.get_mut(&id).ok_or(DirectoryError::UnknownUnit(id))?;
        if let Some(existing) = unit.extras.iter_mut().find(|e| e.name == extra.name) {
            existing.fee = extra.fee;
            return Ok(());
        }
        if unit.extras.len() >= MAX_EXTRAS_PER_UNIT {
            return Err(DirectoryError::Invalid("too many extras on unit".into()));
        }
        unit.extras.push(extra);
        Ok(())
    }

    pub fn register_contact(&self, contact: Contact, password: Option<String>) {
        self.parties
            .insert(contact.party_id.clone(), Party { contact, password });
    }

    /// Snapshot of every unit, ordered by id.
    pub fn units(&self) -> Vec<Unit> {
        let mut all: Vec<Unit> = self.units.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|u| u.id);
        all
    }
}

fn validate_unit(unit: &Unit) -> Result<(), DirectoryError> {
    if unit.name.is_empty() || unit.name.len() > MAX_NAME_LEN {
        return Err(DirectoryError::Invalid("unit name length".into()));
    }
    if unit.owner_id.is_empty() || unit.owner_id.len() > MAX_NAME_LEN {
        return Err(DirectoryError::Invalid("owner id length".into()));
    }
    if unit.daily_rate.cents() < 0 || unit.cancellation_fee.cents() < 0 {
        return Err(DirectoryError::Invalid("amounts must not be negative".into()));
    }
    if unit.extras.len() > MAX_EXTRAS_PER_UNIT {
        return Err(DirectoryError::Invalid("too many extras on unit".into()));
    }
    for extra in &unit.extras {
        validate_extra(extra)?;
    }
    Ok(())
}

fn validate_extra(extra: &Extra) -> Result<(), DirectoryError> {
    if extra.name.is_empty() || extra.name.len() > MAX_NAME_LEN {
        return Err(DirectoryError::Invalid("extra name length".into()));
    }
    if extra.name.contains(',') {
        return Err(DirectoryError::Invalid("extra names may not contain commas".into()));
    }
    if extra.fee.cents() < 0 {
        return Err(DirectoryError::Invalid("extra fee must not be negative".into()));
    }
    Ok(())
}

#[async_trait]
impl UnitDirectory for InMemoryDirectory {
    async fn unit(&self, id: Ulid) -> Result<Option<Unit>, DirectoryError> {
        Ok(self.get_unit(&id))
    }
}

#[async_trait]
impl Identity for InMemoryDirectory {
    async fn contact(&self, party_id: &str) -> Result<Option<Contact>, DirectoryError> {
        Ok(self.parties.get(party_id).map(|p| p.contact.clone()))
    }

    async fn password(&self, party_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.parties.get(party_id).and_then(|p| p.password.clone()))
    }
}
