use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::clock::ManualClock;
use crate::dates::{expand_to_days, DateRange};
use crate::directory::{DirectoryError, InMemoryDirectory};
use crate::model::*;
use crate::notify::{NotifyError, NotifyHub};

const OWNER: &str = "prov-1";
const CUSTOMER: &str = "cust-1";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roadstay_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn range(a: &str, b: &str) -> DateRange {
    DateRange::new(day(a), day(b)).unwrap()
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSender {
    fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }

    fn last(&self) -> Notification {
        self.sent.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct FailingSender;

#[async_trait]
impl NotificationSender for FailingSender {
    async fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp down".into()))
    }
}

struct BrokenDirectory;

#[async_trait]
impl UnitDirectory for BrokenDirectory {
    async fn unit(&self, _: Ulid) -> Result<Option<Unit>, DirectoryError> {
        Err(DirectoryError::Unavailable("connection refused".into()))
    }
}

struct Harness {
    engine: Engine,
    directory: Arc<InMemoryDirectory>,
    clock: Arc<ManualClock>,
    sent: Arc<RecordingSender>,
    unit: Unit,
}

impl Harness {
    fn request(&self, a: &str, b: &str) -> ReservationRequest {
        ReservationRequest::new(self.unit.id, CUSTOMER, range(a, b))
    }

    async fn book(&self, a: &str, b: &str) -> Reservation {
        self.engine.create_reservation(self.request(a, b)).await.unwrap()
    }
}

fn published_unit(rate: i64, fee: i64) -> Unit {
    Unit {
        id: Ulid::new(),
        owner_id: OWNER.into(),
        name: "Westfalia California".into(),
        daily_rate: Money::from_major(rate),
        cancellation_fee: Money::from_major(fee),
        status: UnitStatus::Published,
        extras: vec![Extra {
            name: "cleaning".into(),
            fee: Money::from_major(75),
        }],
    }
}

fn harness_at(path: PathBuf, rate: i64, fee: i64) -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let unit = published_unit(rate, fee);
    directory.upsert_unit(unit.clone()).unwrap();
    directory.register_contact(
        Contact {
            party_id: CUSTOMER.into(),
            name: Some("Kim".into()),
            email: Some("kim@example.com".into()),
        },
        None,
    );
    directory.register_contact(
        Contact {
            party_id: OWNER.into(),
            name: Some("Alex".into()),
            email: Some("alex@example.com".into()),
        },
        None,
    );
    let clock = Arc::new(ManualClock::at(day("2024-05-12")));
    let sent = Arc::new(RecordingSender::default());
    let store = Arc::new(ReservationStore::open(path).unwrap());
    let engine = Engine::new(
        store,
        Collaborators {
            units: directory.clone(),
            identity: directory.clone(),
            notifier: sent.clone(),
            clock: clock.clone(),
        },
    )
    .with_admins(["admin"]);
    Harness {
        engine,
        directory,
        clock,
        sent,
        unit,
    }
}

fn harness(name: &str, rate: i64, fee: i64) -> Harness {
    harness_at(test_wal_path(name), rate, fee)
}

// ── Scenario ─────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_booking_flow() {
    let h = harness("end_to_end.wal", 50, 100);

    let r1 = h.book("2024-06-01", "2024-06-05").await;
    assert_eq!(r1.total_price, Money::from_major(250));
    assert_eq!(r1.status, ReservationStatus::Pending);

    let err = h
        .engine
        .create_reservation(h.request("2024-06-03", "2024-06-04"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DateRangeConflict(id) if id == r1.id));

    let confirmed = h.engine.approve(r1.id, OWNER).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    let n = h.sent.last();
    assert_eq!(n.kind, NotificationKind::BookingConfirmed);
    assert_eq!(n.recipient.email.as_deref(), Some("kim@example.com"));
    assert_eq!(n.unit_name, "Westfalia California");
    assert_eq!(n.range, r1.range);

    // 2024-05-12 → 2024-06-01 is 20 days out.
    let c = h
        .engine
        .cancel(r1.id, CUSTOMER, Some("plans changed".into()))
        .await
        .unwrap();
    assert_eq!(c.fee, Money::ZERO);
    assert_eq!(c.cancelled_by, CancelledBy::Customer);
    assert!(matches!(
        h.engine.store().get(&r1.id).await,
        Err(EngineError::NotFound(_))
    ));
    let n = h.sent.last();
    assert_eq!(n.kind, NotificationKind::BookingCancelledByCustomer);
    assert_eq!(n.recipient.party_id, OWNER);
    assert_eq!(n.reason.as_deref(), Some("plans changed"));
    assert_eq!(n.fee, Some(Money::ZERO));

    let r2 = h.book("2024-06-03", "2024-06-04").await;
    assert_eq!(r2.total_price, Money::from_major(100));
}

// ── Pricing ──────────────────────────────────────────────

#[tokio::test]
async fn price_fixed_at_creation() {
    let h = harness("price_fixed.wal", 80, 50);
    let r = h
        .engine
        .create_reservation(h.request("2024-06-01", "2024-06-05").with_extras(["cleaning"]))
        .await
        .unwrap();
    assert_eq!(r.total_price, Money::from_major(475));
    assert_eq!(r.extras, vec!["cleaning".to_string()]);

    h.directory
        .set_daily_rate(h.unit.id, Money::from_major(120))
        .unwrap();
    let stored = h.engine.store().get(&r.id).await.unwrap();
    assert_eq!(stored.total_price, Money::from_major(475));

    let q = h
        .engine
        .quote(h.unit.id, range("2024-06-01", "2024-06-05"), &["cleaning".into()])
        .await
        .unwrap();
    assert_eq!(q.total, Money::from_major(675));
}

#[tokio::test]
async fn unknown_extra_rejected() {
    let h = harness("unknown_extra.wal", 80, 50);
    let err = h
        .engine
        .create_reservation(h.request("2024-06-01", "2024-06-05").with_extras(["hot tub"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownExtra(name) if name == "hot tub"));
    assert!(h.engine.store().list_by_unit(&h.unit.id).await.is_empty());
}

#[tokio::test]
async fn price_overflow_is_refused() {
    let h = harness("price_overflow.wal", 80, 50);
    h.directory
        .set_daily_rate(h.unit.id, Money::parse_major("92233720368547758").unwrap())
        .unwrap();

    let err = h
        .engine
        .create_reservation(h.request("2024-06-01", "2024-06-02"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert!(h.engine.store().list_by_unit(&h.unit.id).await.is_empty());

    let err = h
        .engine
        .quote(h.unit.id, range("2024-06-01", "2024-06-02"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn cancellation_fee_tiers() {
    let h = harness("fee_tiers.wal", 80, 120);

    // 10 days out: free.
    let r = h.book("2024-05-22", "2024-05-24").await;
    let c = h.engine.cancel(r.id, CUSTOMER, None).await.unwrap();
    assert_eq!(c.fee, Money::ZERO);

    // Exactly 7 days out: still free.
    let r = h.book("2024-05-22", "2024-05-24").await;
    h.clock.set_today(day("2024-05-15"));
    assert_eq!(h.engine.cancel(r.id, CUSTOMER, None).await.unwrap().fee, Money::ZERO);

    // 5 days out: full fee.
    let r = h.book("2024-05-22", "2024-05-24").await;
    h.clock.set_today(day("2024-05-17"));
    let c = h.engine.cancel(r.id, CUSTOMER, None).await.unwrap();
    assert_eq!(c.fee, Money::from_major(120));
    assert_eq!(h.sent.last().fee, Some(Money::from_major(120)));
}

// ── State machine ────────────────────────────────────────

#[tokio::test]
async fn rejection_is_terminal() {
    let h = harness("terminal.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;
    let rejected = h.engine.reject(r.id, OWNER).await.unwrap();
    assert_eq!(rejected.status, ReservationStatus::Rejected);
    assert_eq!(h.sent.kinds(), vec![NotificationKind::BookingRejected]);

    assert!(matches!(
        h.engine.approve(r.id, OWNER).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
    assert!(matches!(
        h.engine.reject(r.id, OWNER).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
    assert!(matches!(
        h.engine.cancel(r.id, CUSTOMER, None).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
    // Rejected dates are free again.
    h.book("2024-06-02", "2024-06-03").await;
}

#[tokio::test]
async fn each_decision_sends_its_own_kind() {
    let h = harness("decision_kinds.wal", 80, 50);
    let first = h.book("2024-06-01", "2024-06-02").await;
    let second = h.book("2024-06-10", "2024-06-11").await;

    h.engine.reject(first.id, OWNER).await.unwrap();
    h.engine.approve(second.id, OWNER).await.unwrap();
    assert_eq!(
        h.sent.kinds(),
        vec![NotificationKind::BookingRejected, NotificationKind::BookingConfirmed]
    );
    let last = h.sent.last();
    assert_eq!(last.reservation_id, second.id);
    assert_eq!(last.recipient.party_id, CUSTOMER);
}

#[tokio::test]
async fn confirmed_cannot_be_rejected() {
    let h = harness("confirmed_reject.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;
    assert_ok!(h.engine.approve(r.id, OWNER).await);
    assert!(matches!(
        h.engine.reject(r.id, OWNER).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
    assert_eq!(h.sent.kinds(), vec![NotificationKind::BookingConfirmed]);
}

#[tokio::test]
async fn unknown_reservation_not_found() {
    let h = harness("unknown_reservation.wal", 80, 50);
    let id = Ulid::new();
    assert!(matches!(h.engine.approve(id, OWNER).await, Err(EngineError::NotFound(x)) if x == id));
    assert!(matches!(h.engine.reject(id, OWNER).await, Err(EngineError::NotFound(_))));
    assert!(matches!(
        h.engine.cancel(id, CUSTOMER, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Permissions ──────────────────────────────────────────

#[tokio::test]
async fn only_owner_or_admin_decides() {
    let h = harness("owner_decides.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;

    assert!(matches!(
        h.engine.approve(r.id, CUSTOMER).await,
        Err(EngineError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.engine.reject(r.id, "prov-2").await,
        Err(EngineError::PermissionDenied(_))
    ));
    assert!(h.sent.kinds().is_empty());

    let confirmed = h.engine.approve(r.id, "admin").await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
}

#[tokio::test]
async fn only_requester_cancels() {
    let h = harness("requester_cancels.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;
    assert!(matches!(
        h.engine.cancel(r.id, OWNER, None).await,
        Err(EngineError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.engine.cancel(r.id, "cust-2", None).await,
        Err(EngineError::PermissionDenied(_))
    ));
    assert_ok!(h.engine.store().get(&r.id).await);
}

#[tokio::test]
async fn reservation_visibility() {
    let h = harness("visibility.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;
    assert_ok!(h.engine.get_reservation(r.id, CUSTOMER).await);
    assert_ok!(h.engine.get_reservation(r.id, OWNER).await);
    assert_ok!(h.engine.get_reservation(r.id, "admin").await);
    assert!(matches!(
        h.engine.get_reservation(r.id, "cust-2").await,
        Err(EngineError::PermissionDenied(_))
    ));

    let all = h.engine.list_unit_reservations(h.unit.id, OWNER, None).await.unwrap();
    assert_eq!(all.len(), 1);
    let confirmed = h
        .engine
        .list_unit_reservations(h.unit.id, OWNER, Some(ReservationStatus::Confirmed))
        .await
        .unwrap();
    assert!(confirmed.is_empty());
    assert_err!(h.engine.list_unit_reservations(h.unit.id, CUSTOMER, None).await);
}

// ── Date validation ──────────────────────────────────────

#[tokio::test]
async fn start_must_not_be_past() {
    let h = harness("past_start.wal", 80, 50);
    let err = h
        .engine
        .create_reservation(h.request("2024-05-11", "2024-05-13"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidDateRange(_)));

    // Today is bookable.
    let r = h.book("2024-05-12", "2024-05-12").await;
    assert_eq!(r.total_price, Money::from_major(80));
}

#[tokio::test]
async fn overlong_stay_rejected() {
    let h = harness("overlong.wal", 80, 50);
    let err = h
        .engine
        .create_reservation(h.request("2024-06-01", "2025-06-05"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn cannot_cancel_once_started() {
    let h = harness("started.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;
    h.engine.approve(r.id, OWNER).await.unwrap();
    h.clock.set_today(day("2024-06-01"));
    assert!(matches!(
        h.engine.cancel(r.id, CUSTOMER, None).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
    assert!(matches!(
        h.engine.cancel_by_provider(r.id, OWNER, None).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
}

// ── Unit gating ──────────────────────────────────────────

#[tokio::test]
async fn unpublished_unit_unavailable() {
    let h = harness("unpublished.wal", 80, 50);
    for status in [UnitStatus::Draft, UnitStatus::PendingReview, UnitStatus::Archived] {
        h.directory.set_unit_status(h.unit.id, status).unwrap();
        let err = h
            .engine
            .create_reservation(h.request("2024-06-01", "2024-06-05"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnitUnavailable(id) if id == h.unit.id));
    }
}

#[tokio::test]
async fn unknown_unit_not_found() {
    let h = harness("unknown_unit.wal", 80, 50);
    let ghost = Ulid::new();
    let req = ReservationRequest::new(ghost, CUSTOMER, range("2024-06-01", "2024-06-05"));
    assert!(matches!(
        h.engine.create_reservation(req).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
    assert!(matches!(
        h.engine.is_available(ghost, range("2024-06-01", "2024-06-05"), None).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(h.engine.blocked_dates(ghost).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn directory_failure_is_storage_error() {
    let store = Arc::new(ReservationStore::open(test_wal_path("broken_dir.wal")).unwrap());
    let identity = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(
        store,
        Collaborators {
            units: Arc::new(BrokenDirectory),
            identity,
            notifier: Arc::new(RecordingSender::default()),
            clock: Arc::new(ManualClock::at(day("2024-05-12"))),
        },
    );
    let err = engine
        .is_available(Ulid::new(), range("2024-06-01", "2024-06-05"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StorageError(_)));
    assert!(matches!(
        engine.blocked_dates(Ulid::new()).await,
        Err(EngineError::StorageError(_))
    ));
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn availability_with_exclusion() {
    let h = harness("availability.wal", 80, 50);
    let r = h.book("2024-06-01", "2024-06-05").await;

    let window = range("2024-06-05", "2024-06-08");
    assert!(!h.engine.is_available(h.unit.id, window, None).await.unwrap());
    assert!(h.engine.is_available(h.unit.id, window, Some(r.id)).await.unwrap());
    assert!(h
        .engine
        .is_available(h.unit.id, range("2024-06-06", "2024-06-08"), None)
        .await
        .unwrap());
}

#[tokio::test]
async fn blocked_dates_match_occupying_reservations() {
    let h = harness("blocked.wal", 80, 50);
    let pending = h.book("2024-06-01", "2024-06-03").await;
    let confirmed = h.book("2024-06-10", "2024-06-11").await;
    h.engine.approve(confirmed.id, OWNER).await.unwrap();
    let rejected = h.book("2024-06-20", "2024-06-22").await;
    h.engine.reject(rejected.id, OWNER).await.unwrap();

    let blocked = h.engine.blocked_dates(h.unit.id).await.unwrap();
    let expected: std::collections::BTreeSet<NaiveDate> = [pending.range, confirmed.range]
        .iter()
        .flat_map(|r| expand_to_days(r.start(), r.end()))
        .collect();
    assert_eq!(blocked, expected);
    assert_eq!(blocked.len(), 5);
    assert!(!blocked.contains(&day("2024-06-21")));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_never_double_book() {
    let h = harness("no_double_booking.wal", 80, 50);
    let engine = Arc::new(h.engine);
    let unit_id = h.unit.id;

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        let start = day("2024-06-01") + Duration::days(i % 4);
        let req = ReservationRequest::new(
            unit_id,
            format!("cust-{i}"),
            DateRange::new(start, day("2024-06-08")).unwrap(),
        );
        handles.push(tokio::spawn(async move { engine.create_reservation(req).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::DateRangeConflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(engine.store().list_by_unit(&unit_id).await.len(), 1);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn failed_notification_keeps_transition() {
    let directory = Arc::new(InMemoryDirectory::new());
    let unit = published_unit(80, 50);
    directory.upsert_unit(unit.clone()).unwrap();
    let store = Arc::new(ReservationStore::open(test_wal_path("failing_notify.wal")).unwrap());
    let engine = Engine::new(
        store,
        Collaborators {
            units: directory.clone(),
            identity: directory,
            notifier: Arc::new(FailingSender),
            clock: Arc::new(ManualClock::at(day("2024-05-12"))),
        },
    );

    let r = engine
        .create_reservation(ReservationRequest::new(
            unit.id,
            CUSTOMER,
            range("2024-06-01", "2024-06-05"),
        ))
        .await
        .unwrap();
    let confirmed = engine.approve(r.id, OWNER).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert_eq!(
        engine.store().get(&r.id).await.unwrap().status,
        ReservationStatus::Confirmed
    );
    assert_ok!(engine.cancel(r.id, CUSTOMER, None).await);
}

#[tokio::test]
async fn hub_without_listeners_does_not_fail_operations() {
    let directory = Arc::new(InMemoryDirectory::new());
    let unit = published_unit(80, 50);
    directory.upsert_unit(unit.clone()).unwrap();
    let store = Arc::new(ReservationStore::open(test_wal_path("hub_no_listeners.wal")).unwrap());
    let engine = Engine::new(
        store,
        Collaborators {
            units: directory.clone(),
            identity: directory,
            notifier: Arc::new(NotifyHub::new()),
            clock: Arc::new(ManualClock::at(day("2024-05-12"))),
        },
    );
    let r = engine
        .create_reservation(ReservationRequest::new(
            unit.id,
            CUSTOMER,
            range("2024-06-01", "2024-06-05"),
        ))
        .await
        .unwrap();
    assert_ok!(engine.reject(r.id, OWNER).await);
}

#[tokio::test]
async fn unknown_contact_falls_back_to_party_id() {
    let h = harness("anonymous_contact.wal", 80, 50);
    let r = h
        .engine
        .create_reservation(ReservationRequest::new(
            h.unit.id,
            "walk-in",
            range("2024-06-01", "2024-06-05"),
        ))
        .await
        .unwrap();
    h.engine.approve(r.id, OWNER).await.unwrap();
    assert_eq!(h.sent.last().recipient, Contact::anonymous("walk-in"));
}

// ── Provider cancellation ────────────────────────────────

#[tokio::test]
async fn provider_cancellation_is_free() {
    let h = harness("provider_cancel.wal", 80, 120);
    let r = h.book("2024-05-14", "2024-05-16").await;
    h.engine.approve(r.id, OWNER).await.unwrap();

    assert!(matches!(
        h.engine.cancel_by_provider(r.id, CUSTOMER, None).await,
        Err(EngineError::PermissionDenied(_))
    ));

    let c = h
        .engine
        .cancel_by_provider(r.id, OWNER, Some("engine trouble".into()))
        .await
        .unwrap();
    assert_eq!(c.fee, Money::ZERO);
    assert_eq!(c.cancelled_by, CancelledBy::Provider);
    let n = h.sent.last();
    assert_eq!(n.kind, NotificationKind::BookingCancelledByProvider);
    assert_eq!(n.recipient.party_id, CUSTOMER);
    assert_eq!(n.reason.as_deref(), Some("engine trouble"));
    assert!(h.engine.store().list_by_unit(&h.unit.id).await.is_empty());
}

// ── Pending expiry ───────────────────────────────────────

#[tokio::test]
async fn stale_pending_expires() {
    let h = harness("expiry.wal", 80, 50);
    let stale = h.book("2024-06-01", "2024-06-05").await;
    let decided = h.book("2024-07-01", "2024-07-05").await;
    h.engine.approve(decided.id, OWNER).await.unwrap();

    h.clock.advance(Duration::hours(30));
    let fresh = h.book("2024-08-01", "2024-08-05").await;
    h.clock.advance(Duration::hours(20));

    let expired = h.engine.expire_stale_pending(Duration::hours(48)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, stale.id);
    assert_eq!(expired[0].status, ReservationStatus::Rejected);
    assert_eq!(h.sent.last().kind, NotificationKind::BookingRejected);

    let store = h.engine.store();
    assert_eq!(store.get(&fresh.id).await.unwrap().status, ReservationStatus::Pending);
    assert_eq!(store.get(&decided.id).await.unwrap().status, ReservationStatus::Confirmed);

    assert!(h.engine.expire_stale_pending(Duration::hours(48)).await.unwrap().is_empty());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn reservations_survive_restart() {
    let path = test_wal_path("restart.wal");
    let (unit, kept, cancelled) = {
        let h = harness_at(path.clone(), 80, 50);
        let kept = h.book("2024-06-01", "2024-06-05").await;
        h.engine.approve(kept.id, OWNER).await.unwrap();
        let cancelled = h.book("2024-07-01", "2024-07-02").await;
        h.engine.cancel(cancelled.id, CUSTOMER, None).await.unwrap();
        (h.unit, kept, cancelled)
    };

    let store = ReservationStore::open(path).unwrap();
    let all = store.list_by_unit(&unit.id).await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, kept.id);
    assert_eq!(all[0].status, ReservationStatus::Confirmed);
    assert_eq!(all[0].total_price, Money::from_major(400));
    assert!(store.get(&cancelled.id).await.is_err());
}
