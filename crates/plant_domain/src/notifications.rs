use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plant_core::{NotificationHandle, NotificationPayload, PlantId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::error::SchedulingError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub plant_id: PlantId,
    pub handle: NotificationHandle,
    pub title: String,
    pub body: String,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Platform-specific notification adapters will implement this trait.
pub trait NotificationSink: Send + Sync {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn deliver(&self, notification: &NotificationRequest) -> anyhow::Result<()>;
}

/// Sink that only writes fired reminders to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &NotificationRequest) -> anyhow::Result<()> {
        tracing::info!(
            plant = %notification.plant_id,
            title = %notification.title,
            body = %notification.body,
            "watering reminder"
        );
        Ok(())
    }
}

/// One-shot reminders, at most one pending per plant.
#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    /// Installs a reminder for `id` at `at`, replacing any pending one for the
    /// same plant. Instants in the past fire immediately.
    async fn schedule(
        &self,
        id: &PlantId,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<NotificationHandle, SchedulingError>;

    /// Reinstates a reminder under a handle this scheduler issued earlier,
    /// replacing any pending one for the same plant.
    async fn restore(
        &self,
        id: &PlantId,
        handle: &NotificationHandle,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), SchedulingError>;

    /// Cancels a pending reminder. Unknown, fired or cancelled handles are a
    /// no-op.
    async fn cancel(&self, handle: &NotificationHandle) -> Result<(), SchedulingError>;

    fn is_live(&self, handle: &NotificationHandle) -> bool;

    /// True when `handle` is the latest reminder this scheduler delivered for
    /// its plant. Handles from another process are never reported as fired.
    fn has_fired(&self, _handle: &NotificationHandle) -> bool {
        false
    }
}

struct Pending {
    handle: NotificationHandle,
    task: JoinHandle<()>,
}

struct Shared {
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<PlantId, Pending>>,
    fired: Mutex<HashMap<PlantId, NotificationHandle>>,
    closed: AtomicBool,
}

impl Shared {
    fn fire(&self, request: NotificationRequest) {
        {
            let mut pending = self.pending.lock();
            match pending.get(&request.plant_id) {
                Some(entry) if entry.handle == request.handle => {
                    pending.remove(&request.plant_id);
                    self.fired
                        .lock()
                        .insert(request.plant_id.clone(), request.handle.clone());
                }
                _ => return,
            }
        }
        if let Err(err) = self.sink.deliver(&request) {
            tracing::warn!(plant = %request.plant_id, %err, "failed to deliver reminder");
        }
    }
}

/// In-process scheduler backed by tokio timers. Fired reminders are handed to
/// a [`NotificationSink`].
#[derive(Clone)]
pub struct LocalScheduler {
    shared: Arc<Shared>,
}

impl LocalScheduler {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_clock(sink, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Arc<dyn NotificationSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                clock,
                pending: Mutex::new(HashMap::new()),
                fired: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn pending_handle(&self, id: &PlantId) -> Option<NotificationHandle> {
        self.shared
            .pending
            .lock()
            .get(id)
            .map(|entry| entry.handle.clone())
    }

    /// Aborts every pending timer; later `schedule` calls fail.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Pending> = self
            .shared
            .pending
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            entry.task.abort();
        }
        tracing::debug!(cancelled = drained.len(), "notification scheduler shut down");
    }

    fn install(
        &self,
        id: &PlantId,
        handle: NotificationHandle,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), SchedulingError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SchedulingError::Unavailable);
        }
        if self.shared.sink.permission() == Permission::Denied {
            return Err(SchedulingError::PermissionDenied);
        }

        let delay = (at - self.shared.clock.now())
            .to_std()
            .unwrap_or_default();
        let request = NotificationRequest {
            plant_id: id.clone(),
            handle: handle.clone(),
            title: payload.title,
            body: payload.body,
            scheduled_for: at,
        };

        let previous = {
            let mut pending = self.shared.pending.lock();
            let shared = Arc::clone(&self.shared);
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.fire(request);
            });
            self.shared.fired.lock().remove(id);
            pending.insert(
                id.clone(),
                Pending {
                    handle: handle.clone(),
                    task,
                },
            )
        };
        if let Some(previous) = previous {
            previous.task.abort();
            tracing::debug!(plant = %id, replaced = %previous.handle, "replaced pending reminder");
        }
        tracing::debug!(plant = %id, %handle, %at, "reminder scheduled");
        Ok(())
    }
}

#[async_trait]
impl NotificationScheduler for LocalScheduler {
    async fn schedule(
        &self,
        id: &PlantId,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<NotificationHandle, SchedulingError> {
        let handle = NotificationHandle::generate();
        self.install(id, handle.clone(), at, payload)?;
        Ok(handle)
    }

    async fn restore(
        &self,
        id: &PlantId,
        handle: &NotificationHandle,
        at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), SchedulingError> {
        self.install(id, handle.clone(), at, payload)
    }

    async fn cancel(&self, handle: &NotificationHandle) -> Result<(), SchedulingError> {
        let removed = {
            let mut pending = self.shared.pending.lock();
            let plant = pending
                .iter()
                .find(|(_, entry)| &entry.handle == handle)
                .map(|(id, _)| id.clone());
            plant.and_then(|id| pending.remove(&id))
        };
        if let Some(entry) = removed {
            entry.task.abort();
            tracing::debug!(%handle, "reminder cancelled");
        }
        self.shared.fired.lock().retain(|_, fired| fired != handle);
        Ok(())
    }

    fn is_live(&self, handle: &NotificationHandle) -> bool {
        self.shared
            .pending
            .lock()
            .values()
            .any(|entry| &entry.handle == handle)
    }

    fn has_fired(&self, handle: &NotificationHandle) -> bool {
        self.shared
            .fired
            .lock()
            .values()
            .any(|fired| fired == handle)
    }
}
