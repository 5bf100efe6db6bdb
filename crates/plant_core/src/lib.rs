pub mod cadence;
pub mod model;
pub mod reminder;

pub use crate::cadence::{Repeat, WateringInterval};
pub use crate::model::{ModelError, NotificationHandle, PlantId, PlantRecord};
pub use crate::reminder::{banner_message, humanize_distance, reminder_payload, Locale, NotificationPayload};
