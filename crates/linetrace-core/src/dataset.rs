//! Dataset registry
//!
//! Keeps track of processed dataset directories and exposes exactly one of them as
//! the active [`World`]. Switching builds the new world first and then replaces the
//! shared snapshot in one step; readers holding the previous `Arc<World>` keep using
//! it until they drop it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{PipelineError, Result};
use crate::output::{format_duration, Metadata};
use crate::world::World;

/// A registered dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    /// Registry id
    pub id: String,
    /// Directory name
    pub name: String,
    /// Dataset directory
    pub data_dir: PathBuf,
    /// Vehicles in the dataset
    pub car_count: usize,
    /// Session length
    pub total_duration_ms: u64,
    /// Display name
    pub display_name: String,
}

impl DatasetInfo {
    fn from_metadata(data_dir: &Path, metadata: &Metadata) -> Self {
        let name = data_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| data_dir.display().to_string());
        let display_name = match &metadata.session_name {
            Some(session) => session.clone(),
            None if name.contains("Session") => name.clone(),
            None => format!("Session - {name}"),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            data_dir: data_dir.to_path_buf(),
            car_count: metadata.car_ids.len(),
            total_duration_ms: metadata.total_duration_ms,
            display_name,
        }
    }

    /// Duration as `m:ss`
    pub fn duration_string(&self) -> String {
        format_duration(self.total_duration_ms)
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} | {} cars | {}",
            self.display_name,
            self.car_count,
            self.duration_string()
        )
    }
}

#[derive(Default)]
struct Registry {
    datasets: Vec<DatasetInfo>,
    active: Option<(String, Arc<World>)>,
}

/// Registry of processed datasets with one active snapshot
pub struct DatasetManager {
    registry: RwLock<Registry>,
    config: RuntimeConfig,
}

impl DatasetManager {
    /// Create an empty registry; worlds are loaded with `config`
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            config,
        }
    }

    /// Register a dataset directory. The first dataset registered becomes active.
    pub fn add(&self, data_dir: &Path) -> Result<DatasetInfo> {
        let metadata = Metadata::load(data_dir)?;
        let info = DatasetInfo::from_metadata(data_dir, &metadata);

        let world = if self.registry.read().active.is_none() {
            Some(Arc::new(World::load(data_dir, self.config.clone())?))
        } else {
            None
        };

        let mut registry = self.registry.write();
        registry.datasets.push(info.clone());
        if let Some(world) = world {
            if registry.active.is_none() {
                registry.active = Some((info.id.clone(), world));
            }
        }
        info!("Added dataset: {}", info.summary());
        Ok(info)
    }

    fn find(&self, id: &str) -> Result<DatasetInfo> {
        self.registry
            .read()
            .datasets
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownDataset(id.to_string()))
    }

    /// Load a registered dataset and make it the active snapshot
    pub fn set_active(&self, id: &str) -> Result<()> {
        let info = self.find(id)?;
        let world = Arc::new(World::load(&info.data_dir, self.config.clone())?);
        self.registry.write().active = Some((info.id.clone(), world));
        info!("Switched to: {}", info.summary());
        Ok(())
    }

    /// Remove a dataset. Returns `false` when it is the only dataset and active.
    /// Removing the active dataset activates the first remaining one.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let info = self.find(id)?;
        let (is_active, next) = {
            let registry = self.registry.read();
            let is_active = registry.active.as_ref().is_some_and(|(a, _)| a == id);
            if is_active && registry.datasets.len() == 1 {
                return Ok(false);
            }
            let next = registry.datasets.iter().find(|d| d.id != id).cloned();
            (is_active, next)
        };

        let replacement = match (is_active, next) {
            (true, Some(next)) => Some((
                next.id.clone(),
                Arc::new(World::load(&next.data_dir, self.config.clone())?),
            )),
            _ => None,
        };

        let mut registry = self.registry.write();
        registry.datasets.retain(|d| d.id != id);
        if let Some(replacement) = replacement {
            registry.active = Some(replacement);
        }
        info!("Removed dataset: {}", info.summary());
        Ok(true)
    }

    /// Snapshot of the active world
    pub fn active(&self) -> Option<Arc<World>> {
        self.registry.read().active.as_ref().map(|(_, w)| Arc::clone(w))
    }

    /// Id of the active dataset
    pub fn active_id(&self) -> Option<String> {
        self.registry.read().active.as_ref().map(|(id, _)| id.clone())
    }

    /// Registered datasets in insertion order
    pub fn list(&self) -> Vec<DatasetInfo> {
        self.registry.read().datasets.clone()
    }

    /// True when more than one dataset is registered
    pub fn has_multiple(&self) -> bool {
        self.registry.read().datasets.len() > 1
    }
}
