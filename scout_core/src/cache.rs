//! Dataset persistence between process runs, with file locking.
//!
//! The engine keeps no state of its own; hosts that run one update cycle per
//! invocation park the aggregate here.

use crate::engine::Dataset;
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Cache file location under a data directory.
pub fn cache_path(data_dir: &Path) -> PathBuf {
    data_dir.join("cache").join("dataset.json")
}

impl Dataset {
    /// Load a cached dataset with shared locking
    ///
    /// A missing, unreadable or corrupted cache yields an empty dataset; the
    /// next full snapshot rebuilds it.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No dataset cache at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open dataset cache {:?}: {}. Starting empty.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock dataset cache {:?}: {}. Starting empty.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read dataset cache {:?}: {}. Starting empty.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<Dataset>(&contents) {
            Ok(dataset) => {
                tracing::debug!("Loaded dataset cache from {:?}", path);
                Ok(dataset)
            }
            Err(e) => {
                tracing::warn!("Failed to parse dataset cache {:?}: {}. Starting empty.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save the dataset atomically: temp file in the same directory, fsync,
    /// rename over the old cache.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("cache path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved dataset cache to {:?}", path);
        Ok(())
    }

    /// Load, transform and save back in one step.
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(Dataset) -> Result<Dataset>,
    {
        let dataset = f(Self::load(path)?)?;
        dataset.save(path)?;
        Ok(dataset)
    }
}
