use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cadence::WateringInterval;

const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid plant id `{0}`")]
    InvalidId(String),
    #[error("plant name must not be empty")]
    EmptyName,
    #[error("watering interval must be a positive number of hours (got {0})")]
    InvalidInterval(u32),
}

/// Identifier of a plant. Restricted to a filename-safe alphabet so it can be
/// used directly as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlantId(String);

impl PlantId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ModelError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw))
        } else {
            Err(ModelError::InvalidId(raw))
        }
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlantId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PlantId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PlantId> for String {
    fn from(id: PlantId) -> Self {
        id.0
    }
}

/// Opaque token for a scheduled device reminder. Kept as a plain string so it
/// survives persistence across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationHandle(String);

impl NotificationHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantRecord {
    pub id: PlantId,
    pub name: String,
    pub watering_interval_hours: WateringInterval,
    pub date_time_notification: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_handle: Option<NotificationHandle>,
}

impl PlantRecord {
    /// Builds a fresh record whose first reminder is one interval after `now`.
    pub fn new(
        id: PlantId,
        name: impl Into<String>,
        interval: WateringInterval,
        now: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ModelError::EmptyName);
        }
        Ok(Self {
            id,
            name: trimmed.to_string(),
            watering_interval_hours: interval,
            date_time_notification: interval.next_after(now),
            created_at: now,
            notification_handle: None,
        })
    }

    /// Moves the next reminder one interval past `now`. The previous handle is
    /// dropped; the caller is responsible for the replacement.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        let now = now.max(self.created_at);
        self.date_time_notification = self.watering_interval_hours.next_after(now);
        self.notification_handle = None;
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.date_time_notification <= now
    }
}

impl PartialOrd for PlantRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Urgency order: soonest reminder first, id breaks ties.
impl Ord for PlantRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date_time_notification
            .cmp(&other.date_time_notification)
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| {
                self.watering_interval_hours
                    .as_hours()
                    .cmp(&other.watering_interval_hours.as_hours())
            })
            .then_with(|| {
                let lhs = self.notification_handle.as_ref().map(|h| h.token());
                let rhs = other.notification_handle.as_ref().map(|h| h.token());
                lhs.cmp(&rhs)
            })
    }
}
