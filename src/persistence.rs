//! Run artifacts: per-run history and per-model oracle snapshots.
//!
//! Layout under the storage root:
//!
//! ```text
//! history/<model>/<run_id>.json
//! models/<model>.json
//! models/<model>.<timestamp>.json   previous snapshot, kept when not resetting
//! ```
//!
//! Artifacts are only handed over after a successful run, so nothing here
//! ever sees a partial run. [`Persistence::save_run`] commits the history and
//! the model snapshot together: when the snapshot cannot be saved, the
//! history written just before it is discarded again.

use crate::config::StorageConfig;
use crate::episode::{Episode, EpisodeMode};
use crate::error::PersistenceError;
use crate::types::{ProtocolMap, RunId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything recorded about one train-then-test cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunHistory {
    pub run_id: RunId,
    pub model: String,
    /// Action index to protocol name mapping used for the run.
    pub protocols: ProtocolMap,
    pub created_at: DateTime<Utc>,
    pub episodes: Vec<Episode>,
}

impl RunHistory {
    /// Starts an empty history for `model`.
    #[must_use]
    pub fn new(model: impl Into<String>, protocols: ProtocolMap) -> Self {
        Self {
            run_id: RunId::new(),
            model: model.into(),
            protocols,
            created_at: Utc::now(),
            episodes: Vec::new(),
        }
    }

    /// Appends a sealed episode.
    pub fn push(&mut self, episode: Episode) {
        self.episodes.push(episode);
    }

    /// Mean per-step reward over the episodes of `mode`, if any transitions exist.
    #[must_use]
    pub fn mean_reward(&self, mode: EpisodeMode) -> Option<f64> {
        let (sum, count) = self
            .episodes
            .iter()
            .filter(|e| e.mode == mode)
            .fold((0.0, 0usize), |(sum, count), e| {
                (sum + e.cumulative_reward, count + e.transitions.len())
            });
        (count > 0).then(|| sum / count as f64)
    }

    /// Number of episodes that did not complete.
    #[must_use]
    pub fn failed_episodes(&self) -> usize {
        self.episodes.iter().filter(|e| !e.is_completed()).count()
    }
}

/// Storage for run artifacts.
#[async_trait]
pub trait Persistence: Send + Sync + fmt::Debug {
    /// Stores the history of a completed run.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be written.
    async fn save_history(&self, history: &RunHistory) -> Result<(), PersistenceError>;

    /// Stores the oracle snapshot for `model`.
    ///
    /// With `reset` false the previously saved snapshot is kept alongside.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    async fn save_model(
        &self,
        model: &str,
        snapshot: &serde_json::Value,
        reset: bool,
    ) -> Result<(), PersistenceError>;

    /// Loads the latest snapshot for `model`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::not_found` if no snapshot was saved.
    async fn load_model(&self, model: &str) -> Result<serde_json::Value, PersistenceError>;

    /// Removes a history stored by `save_history`.
    ///
    /// # Errors
    ///
    /// Returns an error if the history exists but cannot be removed.
    async fn discard_history(&self, history: &RunHistory) -> Result<(), PersistenceError>;

    /// Stores a finished run: its history, then the model snapshot.
    ///
    /// Either both are stored or neither is.
    ///
    /// # Errors
    ///
    /// Returns the first save error. A history already written is discarded
    /// before returning.
    async fn save_run(
        &self,
        history: &RunHistory,
        snapshot: &serde_json::Value,
        reset: bool,
    ) -> Result<(), PersistenceError> {
        self.save_history(history).await?;
        if let Err(e) = self.save_model(&history.model, snapshot, reset).await {
            if let Err(discard) = self.discard_history(history).await {
                warn!(
                    model = %history.model,
                    run_id = %history.run_id,
                    error = %discard,
                    "could not discard history of unsaved run"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

/// JSON files under a storage root.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Creates a store from configuration, defaulting to
    /// `~/.local/share/mimic-trainer`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base directory is configured and the platform
    /// data directory cannot be determined.
    pub fn from_config(config: &StorageConfig) -> Result<Self, PersistenceError> {
        match &config.base_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => dirs::data_local_dir()
                .map(|dir| Self::new(dir.join("mimic-trainer")))
                .ok_or_else(|| {
                    PersistenceError::io(
                        "~/.local/share",
                        "could not determine the data directory; set storage.base_dir",
                    )
                }),
        }
    }

    /// Storage root.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Location of a run's history file.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is not usable as a file name.
    pub fn history_path(&self, model: &str, run_id: &RunId) -> Result<PathBuf, PersistenceError> {
        let model = checked_name(model)?;
        Ok(self
            .base_dir
            .join("history")
            .join(model)
            .join(format!("{run_id}.json")))
    }

    /// Location of a model's current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is not usable as a file name.
    pub fn model_path(&self, model: &str) -> Result<PathBuf, PersistenceError> {
        let model = checked_name(model)?;
        Ok(self.base_dir.join("models").join(format!("{model}.json")))
    }
}

/// Whether `name` can be used as a single path component.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !(name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\'))
}

fn checked_name(model: &str) -> Result<&str, PersistenceError> {
    if !is_plain_file_name(model) {
        return Err(PersistenceError::io(
            model,
            "model name must be a plain file name",
        ));
    }
    Ok(model)
}

async fn write_json(path: &Path, bytes: Vec<u8>) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::io(parent, e.to_string()))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| PersistenceError::io(&tmp, e.to_string()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PersistenceError::io(path, e.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Persistence for FileStore {
    async fn save_history(&self, history: &RunHistory) -> Result<(), PersistenceError> {
        let path = self.history_path(&history.model, &history.run_id)?;
        let bytes = serde_json::to_vec_pretty(history)
            .map_err(|e| PersistenceError::serialize(e.to_string()))?;
        write_json(&path, bytes).await?;
        info!(
            model = %history.model,
            run_id = %history.run_id,
            episodes = history.episodes.len(),
            path = %path.display(),
            "history saved"
        );
        Ok(())
    }

    async fn save_model(
        &self,
        model: &str,
        snapshot: &serde_json::Value,
        reset: bool,
    ) -> Result<(), PersistenceError> {
        let path = self.model_path(model)?;
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| PersistenceError::serialize(e.to_string()))?;

        let mut backup = None;
        if !reset && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
            let kept = path.with_file_name(format!("{model}.{stamp}.json"));
            tokio::fs::rename(&path, &kept)
                .await
                .map_err(|e| PersistenceError::io(&kept, e.to_string()))?;
            debug!(model, backup = %kept.display(), "previous model kept");
            backup = Some(kept);
        }

        if let Err(e) = write_json(&path, bytes).await {
            if let Some(kept) = backup {
                if let Err(restore) = tokio::fs::rename(&kept, &path).await {
                    warn!(model, error = %restore, "could not put previous model back");
                }
            }
            return Err(e);
        }
        info!(model, reset, path = %path.display(), "model saved");
        Ok(())
    }

    async fn load_model(&self, model: &str) -> Result<serde_json::Value, PersistenceError> {
        let path = self.model_path(model)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::not_found(model));
            }
            Err(e) => return Err(PersistenceError::io(&path, e.to_string())),
        };
        serde_json::from_slice(&bytes).map_err(|e| PersistenceError::serialize(e.to_string()))
    }

    async fn discard_history(&self, history: &RunHistory) -> Result<(), PersistenceError> {
        let path = self.history_path(&history.model, &history.run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(model = %history.model, run_id = %history.run_id, "history discarded");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&path, e.to_string())),
        }
    }
}
