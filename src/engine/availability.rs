use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::dates::{expand_to_days, DateRange};
use crate::error::EngineError;
use crate::limits::MAX_BLOCKED_DAYS;
use crate::model::ReservationStatus;

use super::Engine;

impl Engine {
    /// True when no occupying reservation other than `exclude` shares a day
    /// with `range`. Advisory only; the store re-checks on insert.
    pub async fn is_available(
        &self,
        unit_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        self.load_unit(unit_id).await?;
        Ok(self
            .store
            .find_conflict(&unit_id, &range, exclude)
            .await
            .is_none())
    }

    /// Every day covered by a pending or confirmed reservation, ascending.
    /// For calendar display; may be stale by the time a booking is written.
    pub async fn blocked_dates(&self, unit_id: Ulid) -> Result<BTreeSet<NaiveDate>, EngineError> {
        self.load_unit(unit_id).await?;
        let occupying = self
            .store
            .list_by_unit_with_status(&unit_id, &ReservationStatus::OCCUPYING)
            .await;

        let mut days = BTreeSet::new();
        for r in &occupying {
            days.extend(expand_to_days(r.range.start(), r.range.end()));
            if days.len() > MAX_BLOCKED_DAYS {
                return Err(EngineError::LimitExceeded("too many blocked days"));
            }
        }
        Ok(days)
    }
}
