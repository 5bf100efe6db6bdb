pub mod clock;
pub mod config;
pub mod error;
pub mod notifications;
pub mod service;
pub mod store;

pub use crate::config::RegistryConfig;
pub use crate::error::{RegistryError, SchedulingError, StorageReadError, StorageWriteError};
pub use crate::service::{PlantRegistry, PlantRegistryBuilder};
