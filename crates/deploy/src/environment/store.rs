use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::Environment;
use crate::error::{DeployError, Result};

/// Durable storage for the [`Environment`] of one network.
///
/// The environment lives in `<dir>/<network>.json`. Opening a store takes an
/// exclusive lock on `<dir>/<network>.lock` that is held until the store is
/// dropped, so two orchestrators can never write the same network.
#[derive(Debug)]
pub struct EnvironmentStore {
    network: String,
    path: PathBuf,
    _lock: File,
}

impl EnvironmentStore {
    /// Open the store for `network` under `dir`, creating the directory if needed.
    pub fn open(dir: &Path, network: &str) -> Result<Self> {
        validate_network_id(network)?;

        std::fs::create_dir_all(dir)?;

        let lock_path = dir.join(format!("{network}.lock"));
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| {
            DeployError::config(format!(
                "environment for network {network} is locked by another process ({})",
                lock_path.display()
            ))
        })?;

        Ok(Self {
            network: network.to_string(),
            path: dir.join(format!("{network}.json")),
            _lock: lock,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last persisted environment, or an empty one on the first run.
    pub fn load_or_default(&self) -> Result<Environment> {
        if !self.path.exists() {
            tracing::info!(
                network = %self.network,
                path = %self.path.display(),
                "No persisted environment, starting from an empty one"
            );
            return Ok(Environment::new(&self.network));
        }

        let content = std::fs::read_to_string(&self.path)?;
        let environment: Environment = serde_json::from_str(&content)?;

        if environment.network != self.network {
            return Err(DeployError::config(format!(
                "{} belongs to network {}, not {}",
                self.path.display(),
                environment.network,
                self.network
            )));
        }

        tracing::info!(
            network = %self.network,
            records = environment.records.len(),
            pending = environment.pending.len(),
            "Environment loaded"
        );
        Ok(environment)
    }

    /// Persist the environment.
    ///
    /// The file is written next to the target, synced and renamed over it, so a
    /// crash or power loss leaves either the previous or the new content on disk.
    pub fn save(&self, environment: &Environment) -> Result<()> {
        let json = serde_json::to_string_pretty(environment)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        tracing::trace!(path = %self.path.display(), "Environment saved");
        Ok(())
    }
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Network ids become file names, so they must not contain path components.
fn validate_network_id(network: &str) -> Result<()> {
    let valid = !network.is_empty()
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DeployError::config(format!(
            "invalid network id {network:?}: use letters, digits, '-' or '_'"
        )))
    }
}
