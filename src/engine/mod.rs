mod availability;
mod lifecycle;
mod queries;
#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::directory::{Identity, UnitDirectory};
use crate::error::EngineError;
use crate::model::{Contact, PartyId, Reservation, Unit};
use crate::notify::{Notification, NotificationKind, NotificationSender};
use crate::observability;
use crate::pricing::Money;
use crate::store::ReservationStore;

/// External services the engine consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub units: Arc<dyn UnitDirectory>,
    pub identity: Arc<dyn Identity>,
    pub notifier: Arc<dyn NotificationSender>,
    pub clock: Arc<dyn Clock>,
}

/// Availability checks and the reservation lifecycle on top of the store.
pub struct Engine {
    store: Arc<ReservationStore>,
    units: Arc<dyn UnitDirectory>,
    identity: Arc<dyn Identity>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    /// Parties allowed to act as the owner of any unit.
    admins: HashSet<PartyId>,
}

impl Engine {
    pub fn new(store: Arc<ReservationStore>, collaborators: Collaborators) -> Self {
        Self {
            store,
            units: collaborators.units,
            identity: collaborators.identity,
            notifier: collaborators.notifier,
            clock: collaborators.clock,
            admins: HashSet::new(),
        }
    }

    pub fn with_admins<I, S>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PartyId>,
    {
        self.admins = admins.into_iter().map(Into::into).collect();
        self
    }

    pub fn store(&self) -> &Arc<ReservationStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn Identity> {
        &self.identity
    }

    pub fn is_admin(&self, party: &str) -> bool {
        self.admins.contains(party)
    }

    fn can_manage(&self, unit: &Unit, actor: &str) -> bool {
        unit.owner_id == actor || self.is_admin(actor)
    }

    /// Resolve a unit or fail with `NotFound`.
    pub(crate) async fn load_unit(&self, unit_id: Ulid) -> Result<Unit, EngineError> {
        self.units
            .unit(unit_id)
            .await?
            .ok_or(EngineError::NotFound(unit_id))
    }

    fn require_manager(&self, unit: &Unit, actor: &str) -> Result<(), EngineError> {
        if self.can_manage(unit, actor) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(format!(
                "{actor} does not own unit {}",
                unit.id
            )))
        }
    }

    /// Contact details for a recipient. Lookup failures degrade to the bare
    /// party id; they must not fail an already-committed change.
    async fn contact_for(&self, party: &str) -> Contact {
        match self.identity.contact(party).await {
            Ok(Some(contact)) => contact,
            Ok(None) => Contact::anonymous(party),
            Err(e) => {
                warn!("contact lookup for {party} failed: {e}");
                Contact::anonymous(party)
            }
        }
    }

    /// Fire a notification after commit. Failures are logged and counted.
    async fn dispatch(
        &self,
        kind: NotificationKind,
        reservation: &Reservation,
        unit: &Unit,
        recipient: &str,
        reason: Option<String>,
        fee: Option<Money>,
    ) {
        let notification = Notification {
            kind,
            reservation_id: reservation.id,
            unit_id: unit.id,
            unit_name: unit.name.clone(),
            recipient: self.contact_for(recipient).await,
            range: reservation.range,
            reason,
            fee,
        };
        match self.notifier.notify(&notification).await {
            Ok(()) => {
                metrics::counter!(observability::NOTIFICATIONS_TOTAL, "kind" => kind.as_str(), "status" => "ok")
                    .increment(1);
                debug!("{} sent for reservation {}", kind.as_str(), reservation.id);
            }
            Err(e) => {
                metrics::counter!(observability::NOTIFICATIONS_TOTAL, "kind" => kind.as_str(), "status" => "failed")
                    .increment(1);
                warn!(
                    "{} for reservation {} not delivered: {e}",
                    kind.as_str(),
                    reservation.id
                );
            }
        }
    }
}
