use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use plant_core::{humanize_distance, Locale};
use plant_domain::notifications::{LocalScheduler, LogSink};
use plant_domain::store::DirectoryStore;
use plant_domain::{PlantRegistry, RegistryConfig};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub(crate) registry: RegistryConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Starts from `PLANTS_CONFIG` (a JSON file) when set, then applies the
    /// individual `PLANTS_*` overrides. Unparsable overrides are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup("PLANTS_CONFIG") {
            config.registry = RegistryConfig::from_file(&path)?;
        }
        if let Some(dir) = lookup("PLANTS_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.registry.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(timeout) = lookup("PLANTS_IO_TIMEOUT_MS") {
            if let Ok(value) = timeout.trim().parse::<u64>() {
                if value > 0 {
                    config.registry.io_timeout_ms = value;
                }
            }
        }
        if let Some(locale) = lookup("PLANTS_LOCALE") {
            match locale.parse::<Locale>() {
                Ok(locale) => config.registry.locale = locale,
                Err(err) => warn!(%err, "ignoring PLANTS_LOCALE"),
            }
        }
        Ok(config)
    }

    pub fn registry(&self) -> &RegistryConfig {
        &self.registry
    }
}

pub async fn run(config: AppConfig) -> Result<()> {
    let registry_config = config.registry;
    info!(data_dir = %registry_config.data_dir.display(), "starting plant registry");

    let locale = registry_config.locale;
    let scheduler = LocalScheduler::new(Arc::new(LogSink));
    let registry = PlantRegistry::builder()
        .with_store(Arc::new(DirectoryStore::new(&registry_config.data_dir)))
        .with_scheduler(Arc::new(scheduler.clone()))
        .with_config(registry_config)
        .build()?;

    registry
        .resume_reminders()
        .await
        .context("unable to resume watering reminders")?;

    let snapshot = registry.snapshot().await?;
    if !snapshot.skipped.is_empty() {
        warn!(skipped = snapshot.skipped.len(), "some plant records could not be read");
    }
    match registry.banner_message(locale).await? {
        Some(banner) => info!("{banner}"),
        None => info!("no plants saved yet"),
    }
    let now = Utc::now();
    for plant in &snapshot.plants {
        info!(
            id = %plant.id,
            name = %plant.name,
            due_in = %humanize_distance(plant.date_time_notification, now, locale),
            overdue = plant.is_overdue(now),
            "plant"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    scheduler.shutdown();
    info!("plant registry stopped");
    Ok(())
}
