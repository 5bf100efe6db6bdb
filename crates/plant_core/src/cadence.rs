use std::num::NonZeroU32;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelError;

/// Period a watering frequency is expressed against, e.g. "2 times per week".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Day,
    Week,
}

/// Hours between two waterings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct WateringInterval(NonZeroU32);

impl WateringInterval {
    pub fn hours(hours: u32) -> Result<Self, ModelError> {
        NonZeroU32::new(hours)
            .map(Self)
            .ok_or(ModelError::InvalidInterval(hours))
    }

    /// Converts a "`times` per `repeat`" frequency into an hour interval.
    /// Daily frequencies split the day evenly; weekly ones truncate to whole
    /// days. Both bottom out at the smallest non-zero step.
    pub fn from_frequency(times: u32, repeat: Repeat) -> Result<Self, ModelError> {
        if times == 0 {
            return Err(ModelError::InvalidInterval(0));
        }
        let hours = match repeat {
            Repeat::Day => (24 / times).max(1),
            Repeat::Week => (7 / times).max(1) * 24,
        };
        Self::hours(hours)
    }

    pub fn as_hours(&self) -> u32 {
        self.0.get()
    }

    pub fn as_duration(&self) -> Duration {
        Duration::hours(i64::from(self.0.get()))
    }

    pub fn next_after(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        instant + self.as_duration()
    }
}

impl TryFrom<u32> for WateringInterval {
    type Error = ModelError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::hours(value)
    }
}

impl From<WateringInterval> for u32 {
    fn from(interval: WateringInterval) -> Self {
        interval.as_hours()
    }
}
