use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use plant_core::{
    banner_message, reminder_payload, Locale, NotificationHandle, PlantId, PlantRecord,
    WateringInterval,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::RegistryConfig,
    error::{RegistryError, SchedulingError, StorageReadError, StorageWriteError},
    notifications::NotificationScheduler,
    store::{PlantStore, SkippedEntry},
};

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub plants: Vec<PlantRecord>,
    pub skipped: Vec<SkippedEntry>,
}

impl RegistrySnapshot {
    pub fn next_due(&self) -> Option<&PlantRecord> {
        self.plants.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPlant {
    pub name: String,
    pub interval: WateringInterval,
}

/// A stored record plus the scheduling failure, if any, that left it without
/// an active reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub record: PlantRecord,
    pub warning: Option<SchedulingError>,
}

impl Acknowledgement {
    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub id: PlantId,
    /// Set when the pending reminder could not be cancelled. The record is
    /// deleted regardless.
    pub cancel_error: Option<SchedulingError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    pub already_live: usize,
    /// Reminders this process already delivered. They are not installed again.
    pub already_fired: usize,
    pub failed: usize,
}

async fn bounded<T, E>(
    limit: Duration,
    fut: impl Future<Output = std::result::Result<T, E>>,
    on_timeout: impl FnOnce() -> E,
) -> std::result::Result<T, E> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

type LockMap = Mutex<HashMap<PlantId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a plant's mutation lock. Dropping the last holder prunes the map
/// entry.
struct PlantGuard<'a> {
    locks: &'a LockMap,
    id: PlantId,
    held: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for PlantGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        let ours = tokio::sync::OwnedMutexGuard::mutex(&self.held);
        // Map entry plus our guard. Waiters hold further clones.
        let idle = locks
            .get(&self.id)
            .is_some_and(|lock| Arc::ptr_eq(lock, ours) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&self.id);
        }
    }
}

/// Orchestrates the plant store and the notification scheduler. All record
/// mutations go through here.
pub struct PlantRegistry {
    store: Arc<dyn PlantStore>,
    scheduler: Arc<dyn NotificationScheduler>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    locks: LockMap,
}

pub struct PlantRegistryBuilder {
    store: Option<Arc<dyn PlantStore>>,
    scheduler: Option<Arc<dyn NotificationScheduler>>,
    clock: Option<Arc<dyn Clock>>,
    config: RegistryConfig,
}

impl PlantRegistryBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            scheduler: None,
            clock: None,
            config: RegistryConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn PlantStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn NotificationScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<PlantRegistry> {
        let store = self
            .store
            .ok_or_else(|| anyhow!("plant registry needs a store"))?;
        let scheduler = self
            .scheduler
            .ok_or_else(|| anyhow!("plant registry needs a notification scheduler"))?;
        Ok(PlantRegistry {
            store,
            scheduler,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            locks: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for PlantRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlantRegistry {
    pub fn builder() -> PlantRegistryBuilder {
        PlantRegistryBuilder::new()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[instrument(name = "plants.registry.snapshot", skip(self))]
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RegistryError> {
        let outcome = self.read(self.store.load_all()).await?;
        for entry in &outcome.skipped {
            warn!(id = %entry.id, reason = %entry.reason, "skipping unreadable plant record");
        }
        Ok(RegistrySnapshot {
            plants: outcome.records,
            skipped: outcome.skipped,
        })
    }

    /// Plants ordered by next reminder, soonest first.
    pub async fn list(&self) -> Result<Vec<PlantRecord>, RegistryError> {
        Ok(self.snapshot().await?.plants)
    }

    pub async fn next_due(&self) -> Result<Option<PlantRecord>, RegistryError> {
        Ok(self.list().await?.into_iter().next())
    }

    pub async fn banner_message(&self, locale: Locale) -> Result<Option<String>, RegistryError> {
        let now = self.clock.now();
        Ok(self
            .next_due()
            .await?
            .map(|record| banner_message(&record, now, locale)))
    }

    pub async fn get(&self, id: &PlantId) -> Result<PlantRecord, RegistryError> {
        self.read(self.store.get(id))
            .await?
            .ok_or_else(|| RegistryError::not_found(id))
    }

    #[instrument(name = "plants.registry.add_plant", skip(self), fields(name = %new_plant.name))]
    pub async fn add_plant(&self, new_plant: NewPlant) -> Result<Acknowledgement, RegistryError> {
        let now = self.clock.now();
        let mut record =
            PlantRecord::new(PlantId::generate(), new_plant.name, new_plant.interval, now)?;
        let warning = self.install_reminder(&mut record, None).await;
        self.persist(&record).await?;
        info!(id = %record.id, due = %record.date_time_notification, "plant added");
        Ok(Acknowledgement { record, warning })
    }

    /// Cancels the plant's reminder, then deletes its record. A failed cancel
    /// never keeps the record alive.
    #[instrument(name = "plants.registry.remove", skip(self), fields(plant_id = %id))]
    pub async fn remove(&self, id: &PlantId) -> Result<Removal, RegistryError> {
        let _guard = self.lock_plant(id).await;

        let record = self.get(id).await?;
        let mut cancel_error = None;
        if let Some(handle) = &record.notification_handle {
            if let Err(err) = self.cancel(handle).await {
                warn!(%handle, %err, "unable to cancel reminder, removing plant anyway");
                cancel_error = Some(err);
            }
        }
        self.write(self.store.delete(id)).await?;
        info!("plant removed");
        Ok(Removal {
            id: id.clone(),
            cancel_error,
        })
    }

    #[instrument(name = "plants.registry.acknowledge_watering", skip(self), fields(plant_id = %id))]
    pub async fn acknowledge_watering(&self, id: &PlantId) -> Result<Acknowledgement, RegistryError> {
        let _guard = self.lock_plant(id).await;

        let stored = self.get(id).await?;
        let previous = stored.notification_handle.clone();
        let previous_live = previous
            .as_ref()
            .is_some_and(|handle| self.scheduler.is_live(handle));
        let mut record = stored.clone();
        record.acknowledge(self.clock.now());
        let warning = self.install_reminder(&mut record, previous.as_ref()).await;
        if let Err(err) = self.persist(&record).await {
            if previous_live {
                self.restore_reminder(&stored).await;
            }
            return Err(err);
        }
        info!(due = %record.date_time_notification, degraded = warning.is_some(), "watering acknowledged");
        Ok(Acknowledgement { record, warning })
    }

    /// Re-installs reminders whose handles are missing or belong to an earlier
    /// process. Overdue plants fire right away. Reminders this process already
    /// delivered are left alone.
    #[instrument(name = "plants.registry.resume_reminders", skip(self))]
    pub async fn resume_reminders(&self) -> Result<ResumeReport, RegistryError> {
        let mut report = ResumeReport::default();
        for listed in self.list().await? {
            let _guard = self.lock_plant(&listed.id).await;

            let mut record = match self.read(self.store.get(&listed.id)).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    warn!(id = %listed.id, %err, "unable to reload plant for resume");
                    report.failed += 1;
                    continue;
                }
            };
            if let Some(handle) = &record.notification_handle {
                if self.scheduler.is_live(handle) {
                    report.already_live += 1;
                    continue;
                }
                if self.scheduler.has_fired(handle) {
                    report.already_fired += 1;
                    continue;
                }
            }

            let stale = record.notification_handle.take();
            let scheduled = self.install_reminder(&mut record, None).await.is_none();
            if !scheduled && stale.is_none() {
                report.failed += 1;
                continue;
            }
            match self.persist(&record).await {
                Ok(()) if scheduled => report.resumed += 1,
                Ok(()) => report.failed += 1,
                Err(err) => {
                    warn!(id = %record.id, %err, "unable to store resumed reminder");
                    report.failed += 1;
                }
            }
        }
        info!(
            resumed = report.resumed,
            already_live = report.already_live,
            already_fired = report.already_fired,
            failed = report.failed,
            "reminders resumed"
        );
        Ok(report)
    }
}

impl PlantRegistry {
    async fn lock_plant(&self, id: &PlantId) -> PlantGuard<'_> {
        let lock = self.locks.lock().entry(id.clone()).or_default().clone();
        PlantGuard {
            locks: &self.locks,
            id: id.clone(),
            held: lock.lock_owned().await,
        }
    }

    async fn read<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, StorageReadError>>,
    ) -> std::result::Result<T, StorageReadError> {
        bounded(self.config.io_timeout(), fut, || StorageReadError::Timeout).await
    }

    async fn write(
        &self,
        fut: impl Future<Output = std::result::Result<(), StorageWriteError>>,
    ) -> std::result::Result<(), StorageWriteError> {
        bounded(self.config.io_timeout(), fut, || StorageWriteError::Timeout).await
    }

    async fn cancel(&self, handle: &NotificationHandle) -> Result<(), SchedulingError> {
        bounded(
            self.config.io_timeout(),
            self.scheduler.cancel(handle),
            || SchedulingError::Timeout,
        )
        .await
    }

    /// Schedules the record's reminder and stores the handle on it. On failure
    /// the record is left without a handle and any `previous` reminder is
    /// cancelled so nothing stale keeps firing.
    async fn install_reminder(
        &self,
        record: &mut PlantRecord,
        previous: Option<&NotificationHandle>,
    ) -> Option<SchedulingError> {
        let payload = reminder_payload(record, self.config.locale);
        let scheduled = bounded(
            self.config.io_timeout(),
            self.scheduler
                .schedule(&record.id, record.date_time_notification, payload),
            || SchedulingError::Timeout,
        )
        .await;
        match scheduled {
            Ok(handle) => {
                debug!(id = %record.id, %handle, "reminder installed");
                record.notification_handle = Some(handle);
                None
            }
            Err(err) => {
                warn!(id = %record.id, %err, "reminder not scheduled, keeping plant without one");
                record.notification_handle = None;
                if let Some(previous) = previous {
                    if let Err(cancel_err) = self.cancel(previous).await {
                        warn!(handle = %previous, %cancel_err, "unable to cancel previous reminder");
                    }
                }
                Some(err)
            }
        }
    }

    /// Puts back the reminder `stored` points at, under its original handle,
    /// after a change to it could not be written.
    async fn restore_reminder(&self, stored: &PlantRecord) {
        let Some(handle) = &stored.notification_handle else {
            return;
        };
        let payload = reminder_payload(stored, self.config.locale);
        let restored = bounded(
            self.config.io_timeout(),
            self.scheduler
                .restore(&stored.id, handle, stored.date_time_notification, payload),
            || SchedulingError::Timeout,
        )
        .await;
        match restored {
            Ok(()) => debug!(id = %stored.id, %handle, "previous reminder restored"),
            Err(err) => warn!(id = %stored.id, %handle, %err, "unable to restore previous reminder"),
        }
    }

    /// Upserts the record. When the write fails the reminder just installed
    /// for it is withdrawn again.
    async fn persist(&self, record: &PlantRecord) -> Result<(), RegistryError> {
        if let Err(err) = self.write(self.store.upsert(record)).await {
            if let Some(handle) = &record.notification_handle {
                if let Err(cancel_err) = self.cancel(handle).await {
                    warn!(%handle, %cancel_err, "unable to withdraw reminder after failed write");
                }
            }
            return Err(err.into());
        }
        Ok(())
    }
}
