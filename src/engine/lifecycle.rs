use chrono::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability;
use crate::pricing::{self, cancellation_fee, Money};

use super::Engine;

impl Engine {
    /// Book `request.range` on a published unit. The reservation starts out
    /// pending with its price fixed at the unit's current rate.
    pub async fn create_reservation(
        &self,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let ReservationRequest {
            id,
            unit_id,
            requester_id,
            range,
            extras,
        } = request;

        if requester_id.is_empty() || requester_id.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("requester id length"));
        }
        if extras.len() > MAX_EXTRAS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many extras"));
        }
        let today = self.clock.today();
        if range.start() < today {
            return Err(EngineError::InvalidDateRange(format!(
                "start {} is before today ({today})",
                range.start()
            )));
        }
        if range.days() > MAX_RESERVATION_DAYS {
            return Err(EngineError::LimitExceeded("reservation too long"));
        }

        let unit = self.load_unit(unit_id).await?;
        if !unit.status.is_bookable() {
            return Err(EngineError::UnitUnavailable(unit_id));
        }

        // Fast fail; the store enforces the same rule atomically on insert.
        if let Some(existing) = self.store.find_conflict(&unit_id, &range, None).await {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::DateRangeConflict(existing));
        }

        let quote = pricing::quote(&unit, &range, &extras)?;
        let reservation = Reservation {
            id,
            unit_id,
            requester_id,
            range,
            extras: quote.extras.into_iter().map(|(name, _)| name).collect(),
            total_price: quote.total,
            status: ReservationStatus::Pending,
            created_at: self.clock.now(),
        };

        if let Err(e) = self.store.insert(reservation.clone()).await {
            if matches!(e, EngineError::DateRangeConflict(_)) {
                metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }
        info!(
            "reservation {} created on unit {unit_id} for {} ({})",
            reservation.id, reservation.range, reservation.total_price
        );
        Ok(reservation)
    }

    pub async fn approve(&self, reservation_id: Ulid, actor: &str) -> Result<Reservation, EngineError> {
        self.decide(
            reservation_id,
            actor,
            ReservationStatus::Confirmed,
            NotificationKind::BookingConfirmed,
        )
        .await
    }

    pub async fn reject(&self, reservation_id: Ulid, actor: &str) -> Result<Reservation, EngineError> {
        self.decide(
            reservation_id,
            actor,
            ReservationStatus::Rejected,
            NotificationKind::BookingRejected,
        )
        .await
    }

    /// Provider decision on a pending reservation.
    async fn decide(
        &self,
        reservation_id: Ulid,
        actor: &str,
        status: ReservationStatus,
        kind: NotificationKind,
    ) -> Result<Reservation, EngineError> {
        let current = self.store.get(&reservation_id).await?;
        let unit = self.load_unit(current.unit_id).await?;
        self.require_manager(&unit, actor)?;

        let updated = self.store.update_status(reservation_id, status).await?;
        info!("reservation {reservation_id} {status} by {actor}");

        self.dispatch(kind, &updated, &unit, &updated.requester_id, None, None)
            .await;
        Ok(updated)
    }

    /// Customer withdraws a pending or confirmed reservation that has not
    /// started yet. The record is deleted and the owner told the fee.
    pub async fn cancel(
        &self,
        reservation_id: Ulid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Cancellation, EngineError> {
        check_reason(&reason)?;
        let snapshot = self.store.get(&reservation_id).await?;
        let unit = self.load_unit(snapshot.unit_id).await?;

        let mut txn = self.store.transaction_for(reservation_id).await?;
        let current = txn.get(&reservation_id)?;
        if current.requester_id != actor {
            return Err(EngineError::PermissionDenied(format!(
                "{actor} did not request reservation {reservation_id}"
            )));
        }
        let days_until_start = self.days_until_cancellable_start(current)?;
        let fee = cancellation_fee(unit.cancellation_fee, days_until_start);
        let removed = txn.remove(reservation_id).await?;
        drop(txn);

        info!("reservation {reservation_id} cancelled by customer {actor}, fee {fee}");
        self.dispatch(
            NotificationKind::BookingCancelledByCustomer,
            &removed,
            &unit,
            &unit.owner_id,
            reason,
            Some(fee),
        )
        .await;
        Ok(Cancellation {
            reservation: removed,
            fee,
            cancelled_by: CancelledBy::Customer,
        })
    }

    /// Owner withdraws a reservation on their unit. The customer is never
    /// charged for this.
    pub async fn cancel_by_provider(
        &self,
        reservation_id: Ulid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Cancellation, EngineError> {
        check_reason(&reason)?;
        let snapshot = self.store.get(&reservation_id).await?;
        let unit = self.load_unit(snapshot.unit_id).await?;
        self.require_manager(&unit, actor)?;

        let mut txn = self.store.transaction_for(reservation_id).await?;
        self.days_until_cancellable_start(txn.get(&reservation_id)?)?;
        let removed = txn.remove(reservation_id).await?;
        drop(txn);

        info!("reservation {reservation_id} cancelled by provider {actor}");
        self.dispatch(
            NotificationKind::BookingCancelledByProvider,
            &removed,
            &unit,
            &removed.requester_id,
            reason,
            Some(Money::ZERO),
        )
        .await;
        Ok(Cancellation {
            reservation: removed,
            fee: Money::ZERO,
            cancelled_by: CancelledBy::Provider,
        })
    }

    /// Whole days from today to the start of an occupying reservation that
    /// has not begun.
    fn days_until_cancellable_start(&self, r: &Reservation) -> Result<i64, EngineError> {
        if !r.status.is_occupying() {
            return Err(EngineError::InvalidStateTransition(format!(
                "reservation {} is {}, cannot cancel",
                r.id, r.status
            )));
        }
        let today = self.clock.today();
        if r.range.start() <= today {
            return Err(EngineError::InvalidStateTransition(format!(
                "reservation {} started on {}, cannot cancel",
                r.id,
                r.range.start()
            )));
        }
        Ok((r.range.start() - today).num_days())
    }

    /// Reject pending reservations created more than `ttl` ago. Losing a
    /// race with a concurrent decision is not an error. Returns the rejected
    /// reservations.
    pub async fn expire_stale_pending(&self, ttl: Duration) -> Result<Vec<Reservation>, EngineError> {
        let cutoff = self.clock.now() - ttl;
        let mut expired = Vec::new();

        for unit_id in self.store.unit_ids() {
            let stale: Vec<Reservation> = self
                .store
                .list_by_unit_with_status(&unit_id, &[ReservationStatus::Pending])
                .await
                .into_iter()
                .filter(|r| r.created_at <= cutoff)
                .collect();
            if stale.is_empty() {
                continue;
            }
            let unit = match self.load_unit(unit_id).await {
                Ok(u) => Some(u),
                Err(EngineError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };

            for r in stale {
                let updated = match self
                    .store
                    .update_status(r.id, ReservationStatus::Rejected)
                    .await
                {
                    Ok(updated) => updated,
                    Err(EngineError::InvalidStateTransition(_) | EngineError::NotFound(_)) => {
                        debug!("reservation {} decided before expiry", r.id);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                metrics::counter!(observability::PENDING_EXPIRED_TOTAL).increment(1);
                match &unit {
                    Some(unit) => {
                        self.dispatch(
                            NotificationKind::BookingRejected,
                            &updated,
                            unit,
                            &updated.requester_id,
                            Some("request expired".into()),
                            None,
                        )
                        .await
                    }
                    None => warn!("unit {unit_id} missing, expiry of {} not notified", r.id),
                }
                expired.push(updated);
            }
        }
        if !expired.is_empty() {
            info!("expired {} stale pending reservations", expired.len());
        }
        Ok(expired)
    }
}

fn check_reason(reason: &Option<String>) -> Result<(), EngineError> {
    match reason {
        Some(r) if r.len() > MAX_REASON_LEN => Err(EngineError::LimitExceeded("reason too long")),
        _ => Ok(()),
    }
}
