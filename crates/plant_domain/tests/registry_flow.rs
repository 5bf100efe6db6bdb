use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use plant_core::{NotificationHandle, NotificationPayload, PlantId, PlantRecord, WateringInterval};
use plant_domain::clock::FixedClock;
use plant_domain::error::StorageError;
use plant_domain::notifications::{
    LocalScheduler, NotificationRequest, NotificationScheduler, NotificationSink,
};
use plant_domain::service::NewPlant;
use plant_domain::store::{LoadOutcome, MemoryStore, PlantStore};
use plant_domain::{
    PlantRegistry, RegistryConfig, RegistryError, SchedulingError, StorageReadError,
    StorageWriteError,
};

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<NotificationRequest>>,
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, notification: &NotificationRequest) -> anyhow::Result<()> {
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

/// Local scheduler whose schedule and cancel can be made to fail.
struct FlakyScheduler {
    inner: LocalScheduler,
    fail_schedule: AtomicBool,
    fail_cancel: AtomicBool,
    cancelled: Mutex<Vec<NotificationHandle>>,
}

#[async_trait]
impl NotificationScheduler for FlakyScheduler {
    async fn schedule(
        &self,
        id: &PlantId,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<NotificationHandle, SchedulingError> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(SchedulingError::Unavailable);
        }
        self.inner.schedule(id, at, payload).await
    }

    async fn restore(
        &self,
        id: &PlantId,
        handle: &NotificationHandle,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), SchedulingError> {
        self.inner.restore(id, handle, at, payload).await
    }

    async fn cancel(&self, handle: &NotificationHandle) -> Result<(), SchedulingError> {
        self.cancelled.lock().push(handle.clone());
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(SchedulingError::Rejected("cancel refused".into()));
        }
        self.inner.cancel(handle).await
    }

    fn is_live(&self, handle: &NotificationHandle) -> bool {
        self.inner.is_live(handle)
    }

    fn has_fired(&self, handle: &NotificationHandle) -> bool {
        self.inner.has_fired(handle)
    }
}

/// Memory store with switchable failures.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_upsert: AtomicBool,
    fail_delete: AtomicBool,
    hang_reads: AtomicBool,
}

#[async_trait]
impl PlantStore for FlakyStore {
    async fn load_all(&self) -> Result<LoadOutcome, StorageReadError> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.load_all().await
    }

    async fn get(&self, id: &PlantId) -> Result<Option<PlantRecord>, StorageReadError> {
        self.inner.get(id).await
    }

    async fn upsert(&self, record: &PlantRecord) -> Result<(), StorageWriteError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(StorageWriteError::Io {
                path: "plants".into(),
                source: std::io::Error::other("read-only file system"),
            });
        }
        self.inner.upsert(record).await
    }

    async fn delete(&self, id: &PlantId) -> Result<(), StorageWriteError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageWriteError::Io {
                path: "plants".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.delete(id).await
    }
}

struct Harness {
    registry: PlantRegistry,
    store: Arc<FlakyStore>,
    scheduler: Arc<FlakyScheduler>,
    sink: Arc<RecordingSink>,
    clock: Arc<FixedClock>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 7, 9, 0, 0).unwrap()
}

fn harness() -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(FixedClock::new(t0()));
    let scheduler = Arc::new(FlakyScheduler {
        inner: LocalScheduler::with_clock(sink.clone(), clock.clone()),
        fail_schedule: AtomicBool::new(false),
        fail_cancel: AtomicBool::new(false),
        cancelled: Mutex::new(Vec::new()),
    });
    let store = Arc::new(FlakyStore::default());
    let registry = PlantRegistry::builder()
        .with_store(store.clone())
        .with_scheduler(scheduler.clone())
        .with_clock(clock.clone())
        .with_config(RegistryConfig {
            io_timeout_ms: 50,
            ..RegistryConfig::default()
        })
        .build()
        .expect("build registry");
    Harness {
        registry,
        store,
        scheduler,
        sink,
        clock,
    }
}

async fn add(h: &Harness, name: &str, hours: u32) -> PlantRecord {
    h.registry
        .add_plant(NewPlant {
            name: name.to_string(),
            interval: WateringInterval::hours(hours).unwrap(),
        })
        .await
        .expect("add plant")
        .record
}

#[tokio::test(start_paused = true)]
async fn next_due_is_the_soonest_plant() {
    let h = harness();
    assert_eq!(h.registry.next_due().await.unwrap(), None);

    let p2 = add(&h, "P2", 5).await;
    let p1 = add(&h, "P1", 2).await;

    let listed = h.registry.list().await.unwrap();
    assert_eq!(listed, vec![p1.clone(), p2]);
    assert_eq!(h.registry.next_due().await.unwrap(), Some(p1));
}

#[tokio::test(start_paused = true)]
async fn remove_cancels_reminder_and_drops_record() {
    let h = harness();
    let p1 = add(&h, "P1", 2).await;
    let p2 = add(&h, "P2", 5).await;
    let p1_handle = p1.notification_handle.clone().unwrap();

    let removal = h.registry.remove(&p1.id).await.unwrap();
    assert!(removal.cancel_error.is_none());
    assert_eq!(h.registry.list().await.unwrap(), vec![p2]);
    assert!(!h.scheduler.is_live(&p1_handle));
    assert_eq!(h.scheduler.cancelled.lock().clone(), vec![p1_handle]);

    tokio::time::sleep(std::time::Duration::from_secs(3 * 3600)).await;
    assert!(h
        .sink
        .delivered
        .lock()
        .iter()
        .all(|request| request.plant_id != p1.id));
}

#[tokio::test(start_paused = true)]
async fn acknowledge_moves_reminder_one_interval_ahead() {
    let h = harness();
    let p2 = add(&h, "P2", 24).await;
    let old = p2.notification_handle.clone().unwrap();

    h.clock.advance(Duration::hours(3));
    let ack = h.registry.acknowledge_watering(&p2.id).await.unwrap();

    assert!(!ack.is_degraded());
    assert_eq!(
        ack.record.date_time_notification,
        t0() + Duration::hours(3) + Duration::hours(24)
    );
    let fresh = ack.record.notification_handle.clone().unwrap();
    assert_ne!(fresh, old);
    assert!(h.scheduler.is_live(&fresh));
    assert!(!h.scheduler.is_live(&old));
    assert_eq!(h.scheduler.inner.pending_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn corrupt_entry_is_skipped_and_reported() {
    let h = harness();
    add(&h, "Rose", 3).await;
    add(&h, "Tulip", 4).await;
    h.store.inner.insert_raw("broken", b"{\"id\": 42".to_vec());

    let snapshot = h.registry.snapshot().await.unwrap();
    assert_eq!(snapshot.plants.len(), 2);
    assert_eq!(snapshot.skipped.len(), 1);
    assert_eq!(snapshot.skipped[0].id, "broken");
    assert_eq!(h.registry.list().await.unwrap(), snapshot.plants);
}

#[tokio::test(start_paused = true)]
async fn removing_unknown_plant_changes_nothing() {
    let h = harness();
    let p1 = add(&h, "P1", 2).await;
    let before = h.registry.list().await.unwrap();

    let missing = PlantId::new("missing").unwrap();
    let err = h.registry.remove(&missing).await.unwrap_err();
    assert!(matches!(err, RegistryError::PlantNotFound { ref id } if id == &missing));

    assert_eq!(h.registry.list().await.unwrap(), before);
    assert!(h.scheduler.cancelled.lock().is_empty());
    assert!(h.scheduler.is_live(p1.notification_handle.as_ref().unwrap()));

    let err = h.registry.acknowledge_watering(&missing).await.unwrap_err();
    assert!(matches!(err, RegistryError::PlantNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_cancel_still_removes_plant() {
    let h = harness();
    let p1 = add(&h, "P1", 2).await;
    h.scheduler.fail_cancel.store(true, Ordering::SeqCst);

    let removal = h.registry.remove(&p1.id).await.unwrap();
    assert!(matches!(
        removal.cancel_error,
        Some(SchedulingError::Rejected(_))
    ));
    assert!(h.registry.list().await.unwrap().is_empty());
    assert!(matches!(
        h.registry.get(&p1.id).await,
        Err(RegistryError::PlantNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_delete_is_fatal() {
    let h = harness();
    let p1 = add(&h, "P1", 2).await;
    h.store.fail_delete.store(true, Ordering::SeqCst);

    let err = h.registry.remove(&p1.id).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::RegistryUnavailable(StorageError::Write(StorageWriteError::Io { .. }))
    ));
    assert_eq!(h.registry.list().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_store_times_out_as_unavailable() {
    let h = harness();
    h.store.hang_reads.store(true, Ordering::SeqCst);

    let err = h.registry.list().await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::RegistryUnavailable(StorageError::Read(StorageReadError::Timeout))
    ));
}

#[tokio::test(start_paused = true)]
async fn list_order_holds_for_ties_and_many_plants() {
    let h = harness();
    for (name, hours) in [("a", 9), ("b", 1), ("c", 9), ("d", 4), ("e", 1), ("f", 12)] {
        add(&h, name, hours).await;
    }

    let listed = h.registry.list().await.unwrap();
    assert_eq!(listed.len(), 6);
    for pair in listed.windows(2) {
        let (lhs, rhs) = (&pair[0], &pair[1]);
        assert!(
            lhs.date_time_notification < rhs.date_time_notification
                || (lhs.date_time_notification == rhs.date_time_notification && lhs.id < rhs.id),
            "{} before {}",
            lhs.id,
            rhs.id
        );
    }
    assert_eq!(h.registry.next_due().await.unwrap().as_ref(), listed.first());
}

#[tokio::test(start_paused = true)]
async fn fired_reminder_is_delivered_once_and_removal_still_works() {
    let h = harness();
    let p1 = add(&h, "P1", 1).await;

    tokio::time::sleep(std::time::Duration::from_secs(2 * 3600)).await;
    let delivered = h.sink.delivered.lock().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].plant_id, p1.id);
    assert_eq!(delivered[0].title, "Heeey, 🌱");

    let removal = h.registry.remove(&p1.id).await.unwrap();
    assert!(removal.cancel_error.is_none());
    assert!(h.registry.list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_write_on_add_leaves_no_reminder() {
    let h = harness();
    h.store.fail_upsert.store(true, Ordering::SeqCst);

    let err = h
        .registry
        .add_plant(NewPlant {
            name: "Fern".into(),
            interval: WateringInterval::hours(24).unwrap(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::RegistryUnavailable(StorageError::Write(StorageWriteError::Io { .. }))
    ));
    assert_eq!(h.scheduler.inner.pending_count(), 0);

    h.store.fail_upsert.store(false, Ordering::SeqCst);
    assert!(h.registry.list().await.unwrap().is_empty());
    tokio::time::sleep(std::time::Duration::from_secs(25 * 3600)).await;
    assert!(h.sink.delivered.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_write_on_acknowledge_keeps_stored_reminder_live() {
    let h = harness();
    let fern = add(&h, "Fern", 24).await;
    let handle = fern.notification_handle.clone().unwrap();

    h.clock.advance(Duration::hours(3));
    h.store.fail_upsert.store(true, Ordering::SeqCst);
    let err = h.registry.acknowledge_watering(&fern.id).await.unwrap_err();
    assert!(matches!(err, RegistryError::RegistryUnavailable(_)));

    let stored = h.registry.get(&fern.id).await.unwrap();
    assert_eq!(stored, fern);
    assert!(h.scheduler.is_live(&handle));
    assert_eq!(h.scheduler.inner.pending_handle(&fern.id), Some(handle.clone()));

    tokio::time::sleep(std::time::Duration::from_secs(25 * 3600)).await;
    let delivered = h.sink.delivered.lock().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].handle, handle);
    assert_eq!(delivered[0].scheduled_for, fern.date_time_notification);

    h.store.fail_upsert.store(false, Ordering::SeqCst);
    h.registry.remove(&fern.id).await.unwrap();
    assert_eq!(h.scheduler.inner.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn resume_does_not_repeat_a_delivered_reminder() {
    let h = harness();
    let basil = add(&h, "Basil", 1).await;

    tokio::time::sleep(std::time::Duration::from_secs(2 * 3600)).await;
    assert_eq!(h.sink.delivered.lock().len(), 1);

    for _ in 0..3 {
        let report = h.registry.resume_reminders().await.unwrap();
        assert_eq!(report.already_fired, 1);
        assert_eq!(report.resumed, 0);
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(h.sink.delivered.lock().len(), 1);
    assert_eq!(h.registry.get(&basil.id).await.unwrap(), basil);
}

#[tokio::test(start_paused = true)]
async fn resume_counts_each_failed_plant_once() {
    let h = harness();
    let mut foreign = PlantRecord::new(
        PlantId::new("orchid").unwrap(),
        "Orchid",
        WateringInterval::hours(12).unwrap(),
        t0(),
    )
    .unwrap();
    foreign.notification_handle = Some(NotificationHandle::generate());
    h.store.inner.upsert(&foreign).await.unwrap();

    h.scheduler.fail_schedule.store(true, Ordering::SeqCst);
    h.store.fail_upsert.store(true, Ordering::SeqCst);
    let report = h.registry.resume_reminders().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.resumed, 0);

    h.store.fail_upsert.store(false, Ordering::SeqCst);
    let report = h.registry.resume_reminders().await.unwrap();
    assert_eq!(report.failed, 1);
    let stored = h.registry.get(&foreign.id).await.unwrap();
    assert!(stored.notification_handle.is_none());
}
