//! Durable reservation store.
//!
//! Reservations live in per-unit ledgers behind a `tokio::sync::RwLock`.
//! Every mutation is appended to the WAL (group commit, one fsync per batch)
//! while the unit's write lock is held, then applied in memory. Holding the
//! lock across check + append + apply is what makes the overlap check and the
//! insert a single atomic step.

mod ledger;
mod wal;

pub use ledger::UnitLedger;
pub use wal::Wal;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::EngineError;
use crate::limits::MAX_RESERVATIONS_PER_UNIT;
use crate::model::*;
use crate::observability;

pub type SharedLedger = Arc<RwLock<UnitLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for one append, drains whatever else is already
/// queued, then flushes the whole batch with a single fsync.
async fn group_commit_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    debug!("wal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the
    // next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// Apply an event to a ledger. Idempotent, so a retried append that reached
/// disk twice replays cleanly.
fn apply_to_ledger(ledger: &mut UnitLedger, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCreated { reservation } => {
            if ledger.get(&reservation.id).is_none() {
                ledger.insert(reservation.clone());
            }
            index.insert(reservation.id, reservation.unit_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = ledger.get_mut(id) {
                r.status = *status;
            }
        }
        Event::ReservationDeleted { id, .. } => {
            ledger.remove(id);
            index.remove(id);
        }
    }
}

pub struct ReservationStore {
    ledgers: DashMap<Ulid, SharedLedger>,
    /// Reverse lookup: reservation id → unit id.
    index: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot and the log swap see no concurrent appends.
    gate: RwLock<()>,
}

impl ReservationStore {
    /// Replay `wal_path` and start the group-commit writer. Must be called
    /// inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(group_commit_loop(wal, wal_rx));

        let index = DashMap::new();
        let mut ledgers: HashMap<Ulid, UnitLedger> = HashMap::new();
        for event in &events {
            let unit_id = event.unit_id();
            let ledger = ledgers
                .entry(unit_id)
                .or_insert_with(|| UnitLedger::new(unit_id));
            apply_to_ledger(ledger, event, &index);
        }
        debug!(
            "replayed {} events into {} unit ledgers from {}",
            events.len(),
            ledgers.len(),
            wal_path.display()
        );

        Ok(Self {
            ledgers: ledgers
                .into_iter()
                .map(|(id, l)| (id, Arc::new(RwLock::new(l))))
                .collect(),
            index,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    async fn send_append(&self, event: &Event) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| "WAL writer shut down".to_string())?;
        rx.await
            .map_err(|_| "WAL writer dropped response".to_string())?
            .map_err(|e| e.to_string())
    }

    /// Durably append, retrying once. This is the only retry in the system.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        match self.send_append(event).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("wal append failed, retrying once: {first}");
                metrics::counter!(observability::WAL_RETRIES_TOTAL).increment(1);
                self.send_append(event)
                    .await
                    .map_err(EngineError::StorageError)
            }
        }
    }

    fn ledger(&self, unit_id: Ulid) -> SharedLedger {
        self.ledgers
            .entry(unit_id)
            .or_insert_with(|| Arc::new(RwLock::new(UnitLedger::new(unit_id))))
            .value()
            .clone()
    }

    fn existing_ledger(&self, unit_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(unit_id).map(|e| e.value().clone())
    }

    pub fn unit_for(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.index.get(reservation_id).map(|e| *e.value())
    }

    pub fn unit_ids(&self) -> Vec<Ulid> {
        self.ledgers.iter().map(|e| *e.key()).collect()
    }

    pub fn reservation_count(&self) -> usize {
        self.index.len()
    }

    // ── Transactions ─────────────────────────────────────────

    /// Exclusive access to one unit's ledger until the txn is dropped.
    pub async fn transaction(&self, unit_id: Ulid) -> UnitTxn<'_> {
        let gate = self.gate.read().await;
        let ledger = self.ledger(unit_id).write_owned().await;
        UnitTxn {
            store: self,
            ledger,
            _gate: gate,
        }
    }

    /// Lock the unit that owns `reservation_id`.
    pub async fn transaction_for(&self, reservation_id: Ulid) -> Result<UnitTxn<'_>, EngineError> {
        let unit_id = self
            .unit_for(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let txn = self.transaction(unit_id).await;
        // Deleted between lookup and lock.
        txn.get(&reservation_id)?;
        Ok(txn)
    }

    // ── Single-step operations ───────────────────────────────

    /// Insert under the unit's exclusion constraint: an occupying reservation
    /// may not overlap another occupying reservation of the same unit.
    pub async fn insert(&self, reservation: Reservation) -> Result<(), EngineError> {
        let mut txn = self.transaction(reservation.unit_id).await;
        txn.insert(reservation).await
    }

    pub async fn get(&self, id: &Ulid) -> Result<Reservation, EngineError> {
        let unit_id = self.unit_for(id).ok_or(EngineError::NotFound(*id))?;
        let ledger = self
            .existing_ledger(&unit_id)
            .ok_or(EngineError::NotFound(*id))?;
        let guard = ledger.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(*id))
    }

    /// Every reservation of `unit_id` in start order. Unknown units are empty.
    pub async fn list_by_unit(&self, unit_id: &Ulid) -> Vec<Reservation> {
        let Some(ledger) = self.existing_ledger(unit_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard.iter().cloned().collect()
    }

    pub async fn list_by_unit_with_status(
        &self,
        unit_id: &Ulid,
        statuses: &[ReservationStatus],
    ) -> Vec<Reservation> {
        let Some(ledger) = self.existing_ledger(unit_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard
            .iter()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect()
    }

    /// Occupying reservation overlapping `range`, if any.
    pub async fn find_conflict(
        &self,
        unit_id: &Ulid,
        range: &crate::dates::DateRange,
        exclude: Option<Ulid>,
    ) -> Option<Ulid> {
        let ledger = self.existing_ledger(unit_id)?;
        let guard = ledger.read().await;
        guard.first_conflict(range, exclude).map(|r| r.id)
    }

    pub async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let mut txn = self.transaction_for(id).await?;
        txn.set_status(id, status).await
    }

    pub async fn delete(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut txn = self.transaction_for(id).await?;
        txn.remove(id).await
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with one create record per live reservation.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let mut events = Vec::with_capacity(self.index.len());
        for unit_id in self.unit_ids() {
            let Some(ledger) = self.existing_ledger(&unit_id) else {
                continue;
            };
            let guard = ledger.read().await;
            events.extend(guard.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Rewrite { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageError(e.to_string()))?;
        debug!("compacted wal to {count} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Write access to one unit's ledger. Every mutation is WAL-appended before
/// it is applied; on append failure the ledger is untouched.
pub struct UnitTxn<'a> {
    store: &'a ReservationStore,
    ledger: OwnedRwLockWriteGuard<UnitLedger>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl UnitTxn<'_> {
    pub fn unit_id(&self) -> Ulid {
        self.ledger.unit_id
    }

    pub fn get(&self, id: &Ulid) -> Result<&Reservation, EngineError> {
        self.ledger.get(id).ok_or(EngineError::NotFound(*id))
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.ledger.iter()
    }

    pub fn first_conflict(
        &self,
        range: &crate::dates::DateRange,
        exclude: Option<Ulid>,
    ) -> Option<&Reservation> {
        self.ledger.first_conflict(range, exclude)
    }

    async fn persist_and_apply(&mut self, event: &Event) -> Result<(), EngineError> {
        self.store.wal_append(event).await?;
        apply_to_ledger(&mut self.ledger, event, &self.store.index);
        Ok(())
    }

    pub async fn insert(&mut self, reservation: Reservation) -> Result<(), EngineError> {
        if reservation.unit_id != self.ledger.unit_id {
            return Err(EngineError::StorageError(format!(
                "reservation {} belongs to unit {}, not {}",
                reservation.id, reservation.unit_id, self.ledger.unit_id
            )));
        }
        // Ids are claimed store-wide; the unit lock alone does not cover
        // an insert of the same id on another unit.
        match self.store.index.entry(reservation.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(reservation.id)),
            Entry::Vacant(slot) => {
                slot.insert(reservation.unit_id);
            }
        }
        let id = reservation.id;
        let result = self.insert_claimed(reservation).await;
        if result.is_err() {
            self.store.index.remove(&id);
        }
        result
    }

    async fn insert_claimed(&mut self, reservation: Reservation) -> Result<(), EngineError> {
        if self.ledger.len() >= MAX_RESERVATIONS_PER_UNIT {
            return Err(EngineError::LimitExceeded("too many reservations on unit"));
        }
        if reservation.status.is_occupying()
            && let Some(existing) = self.ledger.first_conflict(&reservation.range, None)
        {
            return Err(EngineError::DateRangeConflict(existing.id));
        }
        self.persist_and_apply(&Event::ReservationCreated { reservation })
            .await
    }

    pub async fn set_status(
        &mut self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let current = self.get(&id)?.status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidStateTransition(format!(
                "reservation {id} is {current}, cannot become {status}"
            )));
        }
        let event = Event::ReservationStatusChanged {
            id,
            unit_id: self.ledger.unit_id,
            status,
        };
        self.persist_and_apply(&event).await?;
        self.get(&id).cloned()
    }

    pub async fn remove(&mut self, id: Ulid) -> Result<Reservation, EngineError> {
        let removed = self.get(&id)?.clone();
        let event = Event::ReservationDeleted {
            id,
            unit_id: self.ledger.unit_id,
        };
        self.persist_and_apply(&event).await?;
        Ok(removed)
    }
}
