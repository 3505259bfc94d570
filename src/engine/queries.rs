use ulid::Ulid;

use crate::dates::DateRange;
use crate::error::EngineError;
use crate::model::{Reservation, ReservationStatus};
use crate::pricing::{self, Quote};

use super::Engine;

impl Engine {
    /// Price preview at the unit's current rate. Does not check availability.
    pub async fn quote(
        &self,
        unit_id: Ulid,
        range: DateRange,
        extras: &[String],
    ) -> Result<Quote, EngineError> {
        let unit = self.load_unit(unit_id).await?;
        Ok(pricing::quote(&unit, &range, extras)?)
    }

    /// Visible to the requester, the unit owner, and admins.
    pub async fn get_reservation(&self, id: Ulid, actor: &str) -> Result<Reservation, EngineError> {
        let reservation = self.store.get(&id).await?;
        if reservation.requester_id == actor || self.is_admin(actor) {
            return Ok(reservation);
        }
        let unit = self.load_unit(reservation.unit_id).await?;
        if unit.owner_id == actor {
            Ok(reservation)
        } else {
            Err(EngineError::PermissionDenied(format!(
                "{actor} may not view reservation {id}"
            )))
        }
    }

    /// A unit's reservations in start order, for its owner. `status` narrows
    /// the listing.
    pub async fn list_unit_reservations(
        &self,
        unit_id: Ulid,
        actor: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let unit = self.load_unit(unit_id).await?;
        self.require_manager(&unit, actor)?;
        Ok(match status {
            Some(s) => self.store.list_by_unit_with_status(&unit_id, &[s]).await,
            None => self.store.list_by_unit(&unit_id).await,
        })
    }
}
