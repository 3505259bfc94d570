use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::dates::DateRange;
use crate::pricing::Money;

/// Opaque identity of a provider, customer, or administrator.
pub type PartyId = String;

// ── Units ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Draft,
    PendingReview,
    Published,
    Rejected,
    Archived,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Draft => "draft",
            UnitStatus::PendingReview => "pending_review",
            UnitStatus::Published => "published",
            UnitStatus::Rejected => "rejected",
            UnitStatus::Archived => "archived",
        }
    }

    pub fn is_bookable(&self) -> bool {
        matches!(self, UnitStatus::Published)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(UnitStatus::Draft),
            "pending_review" | "pending-review" => Ok(UnitStatus::PendingReview),
            "published" => Ok(UnitStatus::Published),
            "rejected" => Ok(UnitStatus::Rejected),
            "archived" => Ok(UnitStatus::Archived),
            other => Err(format!("unknown unit status: {other}")),
        }
    }
}

/// Optional flat-fee add-on a unit offers (cleaning, bedding, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    pub name: String,
    pub fee: Money,
}

/// A rentable camper listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Ulid,
    pub owner_id: PartyId,
    pub name: String,
    pub daily_rate: Money,
    pub cancellation_fee: Money,
    pub status: UnitStatus,
    #[serde(default)]
    pub extras: Vec<Extra>,
}

/// How to reach a party. Either field may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub party_id: PartyId,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Contact {
    pub fn anonymous(party_id: &str) -> Self {
        Self {
            party_id: party_id.to_string(),
            name: None,
            email: None,
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl ReservationStatus {
    pub const OCCUPYING: [ReservationStatus; 2] =
        [ReservationStatus::Pending, ReservationStatus::Confirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Rejected => "rejected",
        }
    }

    /// Pending and confirmed reservations block their dates.
    pub fn is_occupying(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    /// Status edges. Removal (cancellation) is not a status change.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Confirmed)
                | (ReservationStatus::Pending, ReservationStatus::Rejected)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "rejected" => Ok(ReservationStatus::Rejected),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub requester_id: PartyId,
    pub range: DateRange,
    /// Extra names charged into `total_price`.
    pub extras: Vec<String>,
    /// Fixed at creation from the rate in effect then.
    pub total_price: Money,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

/// What a customer asks for. The id defaults to a fresh ULID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub requester_id: PartyId,
    pub range: DateRange,
    pub extras: Vec<String>,
}

impl ReservationRequest {
    pub fn new(unit_id: Ulid, requester_id: impl Into<PartyId>, range: DateRange) -> Self {
        Self {
            id: Ulid::new(),
            unit_id,
            requester_id: requester_id.into(),
            range,
            extras: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: Ulid) -> Self {
        self.id = id;
        self
    }

    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extras = extras.into_iter().map(Into::into).collect();
        self
    }
}

/// Who removed a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Customer,
    Provider,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Customer => "customer",
            CancelledBy::Provider => "provider",
        }
    }
}

/// Result of a successful cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub reservation: Reservation,
    pub fee: Money,
    pub cancelled_by: CancelledBy,
}

/// WAL record format. One variant per reservation mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        unit_id: Ulid,
        status: ReservationStatus,
    },
    ReservationDeleted {
        id: Ulid,
        unit_id: Ulid,
    },
}

impl Event {
    pub fn unit_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.unit_id,
            Event::ReservationStatusChanged { unit_id, .. }
            | Event::ReservationDeleted { unit_id, .. } => *unit_id,
        }
    }
}
