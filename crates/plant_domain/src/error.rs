use std::path::PathBuf;

use plant_core::{ModelError, PlantId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageReadError {
    #[error("plant storage at `{path}` is unreadable")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored plant `{id}` is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("plant storage did not answer in time")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum StorageWriteError {
    #[error("failed to write plant storage at `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode plant `{id}`")]
    Encode {
        id: PlantId,
        #[source]
        source: serde_json::Error,
    },
    #[error("plant storage did not acknowledge the write in time")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("notification scheduler is shut down")]
    Unavailable,
    #[error("notification request rejected: {0}")]
    Rejected(String),
    #[error("notification scheduler did not answer in time")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Read(#[from] StorageReadError),
    #[error(transparent)]
    Write(#[from] StorageWriteError),
}

/// Errors surfaced by [`crate::PlantRegistry`] to its callers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plant `{id}` not found")]
    PlantNotFound { id: PlantId },
    #[error("plant registry unavailable")]
    RegistryUnavailable(#[source] StorageError),
    #[error("invalid plant: {0}")]
    InvalidPlant(#[from] ModelError),
}

impl RegistryError {
    pub fn not_found(id: &PlantId) -> Self {
        Self::PlantNotFound { id: id.clone() }
    }
}

impl From<StorageReadError> for RegistryError {
    fn from(err: StorageReadError) -> Self {
        Self::RegistryUnavailable(err.into())
    }
}

impl From<StorageWriteError> for RegistryError {
    fn from(err: StorageWriteError) -> Self {
        Self::RegistryUnavailable(err.into())
    }
}
