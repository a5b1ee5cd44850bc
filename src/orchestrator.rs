//! Sequencing of runs, episodes and their external resources.
//!
//! A run trains one model for `train_episodes` (or `retrain_episodes` when
//! warm-starting) and then evaluates it for `test_episodes` with updates
//! frozen. Each episode is bracketed by a communication session tagged
//! `<trace>.<model>`. A run that fails saves nothing, and a batch keeps
//! going past failed models: each one yields a [`ModelOutcome`].
//!
//! Dropping a batch future mid-episode leaves the session running; call
//! [`TrainingOrchestrator::shutdown`] afterwards.

use crate::channel::KernelChannel;
use crate::communication::Communication;
use crate::config::TrainerConfig;
use crate::episode::{Episode, EpisodeMode, EpisodeRunner};
use crate::error::{ConfigError, RunError};
use crate::oracle::{DecisionOracle, OracleFactory};
use crate::persistence::{Persistence, RunHistory};
use crate::types::RunId;
use std::error::Error;
use tracing::{error, info, instrument, warn};

/// Which configured models a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    /// Every model in the configuration, in name order.
    All,
    /// The named models, in the given order.
    Only(Vec<String>),
}

impl ModelSelection {
    /// Resolves the selection against the configured models.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if nothing is selected or a name is not
    /// configured.
    pub fn resolve(&self, config: &TrainerConfig) -> Result<Vec<String>, ConfigError> {
        let models: Vec<String> = match self {
            Self::All => config.model_names().map(String::from).collect(),
            Self::Only(names) => {
                for name in names {
                    if !config.models.contains_key(name) {
                        return Err(ConfigError::configuration(
                            "models",
                            format!("'{name}' is not configured"),
                        ));
                    }
                }
                names.clone()
            }
        };
        if models.is_empty() {
            return Err(ConfigError::configuration(
                "models",
                "no models selected; pass --all or --models",
            ));
        }
        Ok(models)
    }
}

/// Figures reported for a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    /// Episodes run in each mode.
    pub train_episodes: usize,
    pub test_episodes: usize,
    /// Episodes cut short by an unavailable kernel channel.
    pub failed_episodes: usize,
    pub mean_train_reward: Option<f64>,
    pub mean_test_reward: Option<f64>,
}

/// Result of one model within one repetition of a batch.
#[derive(Debug)]
pub struct ModelOutcome {
    pub model: String,
    /// Zero-based repetition index.
    pub run: usize,
    pub result: Result<RunSummary, RunError>,
}

impl ModelOutcome {
    /// Returns true if the run completed and its artifacts were saved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Owns the kernel channel and the session collaborators for a batch.
#[derive(Debug)]
pub struct TrainingOrchestrator {
    config: TrainerConfig,
    runner: EpisodeRunner,
    channel: Box<dyn KernelChannel>,
    communication: Box<dyn Communication>,
    persistence: Box<dyn Persistence>,
    oracles: Box<dyn OracleFactory>,
    trace: String,
}

impl TrainingOrchestrator {
    /// Creates an orchestrator over validated configuration.
    #[must_use]
    pub fn new(
        config: TrainerConfig,
        channel: Box<dyn KernelChannel>,
        communication: Box<dyn Communication>,
        persistence: Box<dyn Persistence>,
        oracles: Box<dyn OracleFactory>,
    ) -> Self {
        let runner = EpisodeRunner::new(&config.training);
        Self {
            config,
            runner,
            channel,
            communication,
            persistence,
            oracles,
            trace: "mimic".to_string(),
        }
    }

    /// Sets the prefix of communication tags.
    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// Communication tag for `model`.
    #[must_use]
    pub fn tag(&self, model: &str) -> String {
        format!("{}.{}", self.trace, model)
    }

    /// Runs the selection `runs` times and returns every outcome.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, before anything runs, if the selection
    /// is empty or names an unconfigured model.
    pub async fn run_all(
        &mut self,
        selection: &ModelSelection,
        retrain: bool,
        runs: usize,
    ) -> Result<Vec<ModelOutcome>, ConfigError> {
        let models = selection.resolve(&self.config)?;
        let mut outcomes = Vec::with_capacity(models.len() * runs);
        for run in 0..runs {
            info!(run, total = runs, models = models.len(), "starting batch");
            outcomes.extend(self.run_batch(&models, retrain, run).await);
        }
        Ok(outcomes)
    }

    /// Runs each model once. A failing model is logged and recorded, and the
    /// batch moves on to the next one.
    pub async fn run_batch(
        &mut self,
        models: &[String],
        retrain: bool,
        run: usize,
    ) -> Vec<ModelOutcome> {
        let mut outcomes = Vec::with_capacity(models.len());
        for model in models {
            let result = self.run_model(model, retrain).await;
            if let Err(e) = &result {
                report(run, e);
            }
            outcomes.push(ModelOutcome {
                model: model.clone(),
                run,
                result,
            });
        }

        for outcome in &outcomes {
            match &outcome.result {
                Ok(summary) => info!(
                    model = %outcome.model,
                    run,
                    outcome = "ok",
                    failed_episodes = summary.failed_episodes,
                    mean_train_reward = summary.mean_train_reward.unwrap_or(f64::NAN),
                    mean_test_reward = summary.mean_test_reward.unwrap_or(f64::NAN),
                    "batch summary"
                ),
                Err(e) => info!(
                    model = %outcome.model,
                    run,
                    outcome = "failed",
                    reason = %e,
                    "batch summary"
                ),
            }
        }
        outcomes
    }

    /// Trains and evaluates one model, then saves its history and snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `RunError` if the model is unknown, the oracle fails, a
    /// communication session cannot be managed, or artifacts cannot be
    /// loaded or saved. Nothing is saved in that case.
    #[instrument(skip(self), fields(trace = %self.trace))]
    pub async fn run_model(&mut self, model: &str, retrain: bool) -> Result<RunSummary, RunError> {
        let model_config = self
            .config
            .models
            .get(model)
            .cloned()
            .ok_or_else(|| RunError::unknown_model(model))?;

        let mut oracle = self
            .oracles
            .create(model, &model_config)
            .map_err(|e| RunError::oracle(model, e))?;

        if retrain {
            let snapshot = self
                .persistence
                .load_model(model)
                .await
                .map_err(|e| RunError::persistence(model, e))?;
            oracle
                .restore(snapshot)
                .map_err(|e| RunError::oracle(model, e))?;
            info!(model, "restored saved model");
        }

        let train_episodes = self.config.training.train_episodes_for(retrain);
        let test_episodes = self.config.training.test_episodes;
        let schedule = std::iter::repeat(EpisodeMode::Train)
            .take(train_episodes)
            .chain(std::iter::repeat(EpisodeMode::Test).take(test_episodes));

        let mut history = RunHistory::new(model, self.config.protocols.clone());
        info!(
            model,
            run_id = %history.run_id,
            policy = %model_config.policy,
            train_episodes,
            test_episodes,
            "run started"
        );

        for (index, mode) in schedule.enumerate() {
            let episode = self.episode(model, index, mode, oracle.as_mut()).await?;
            history.push(episode);
        }

        let snapshot = oracle.export().map_err(|e| RunError::oracle(model, e))?;
        self.persistence
            .save_run(&history, &snapshot, !retrain)
            .await
            .map_err(|e| RunError::persistence(model, e))?;

        let summary = RunSummary {
            run_id: history.run_id.clone(),
            train_episodes,
            test_episodes,
            failed_episodes: history.failed_episodes(),
            mean_train_reward: history.mean_reward(EpisodeMode::Train),
            mean_test_reward: history.mean_reward(EpisodeMode::Test),
        };
        info!(model, run_id = %summary.run_id, "run finished");
        Ok(summary)
    }

    /// One episode inside its own communication session.
    async fn episode(
        &mut self,
        model: &str,
        index: usize,
        mode: EpisodeMode,
        oracle: &mut dyn DecisionOracle,
    ) -> Result<Episode, RunError> {
        let tag = self.tag(model);
        self.communication
            .start(&tag)
            .await
            .map_err(|e| RunError::communication(model, e))?;

        let result = self
            .runner
            .run_episode(index, mode, self.channel.as_mut(), oracle)
            .await;
        let stopped = self.communication.stop().await;

        let episode = match (result, stopped) {
            (Ok(episode), Ok(())) => episode,
            (Ok(_), Err(e)) => return Err(RunError::communication(model, e)),
            (Err(e), stopped) => {
                if let Err(stop_error) = stopped {
                    warn!(model, error = %stop_error, "communication stop failed after oracle error");
                }
                return Err(RunError::oracle(model, e));
            }
        };

        if !episode.is_completed() {
            warn!(
                model,
                index,
                mode = %mode,
                sealed = episode.transitions.len(),
                "episode failed, continuing with the next one"
            );
        }
        Ok(episode)
    }

    /// Releases the kernel channel.
    pub fn close(&mut self) {
        self.channel.close();
    }

    /// Tears everything down after a batch was cancelled mid-episode: stops
    /// the communication session if one is still running, then closes the
    /// channel. Safe to call when nothing is running.
    pub async fn shutdown(&mut self) {
        match self.communication.stop().await {
            Ok(()) => info!("communication stopped on shutdown"),
            Err(e) if e.is_not_started() => {}
            Err(e) => warn!(error = %e, "communication stop failed on shutdown"),
        }
        self.close();
    }
}

fn report(run: usize, e: &RunError) {
    error!(model = %e.model, run, error = %e, "model run failed");
    let mut source = e.source();
    while let Some(cause) = source {
        error!(cause = %cause, "caused by");
        source = cause.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, TrainingConfig};
    use crate::oracle::PolicyKind;

    fn config() -> TrainerConfig {
        TrainerConfig::new(TrainingConfig::default())
            .with_model("b", ModelConfig::new(PolicyKind::EpsilonGreedy))
            .with_model("a", ModelConfig::new(PolicyKind::BootstrappedUcb))
    }

    #[test]
    fn all_selects_models_in_name_order() {
        let models = ModelSelection::All.resolve(&config()).unwrap();
        assert_eq!(models, vec!["a", "b"]);
    }

    #[test]
    fn explicit_selection_keeps_order() {
        let selection = ModelSelection::Only(vec!["b".into(), "a".into()]);
        assert_eq!(selection.resolve(&config()).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn unknown_or_empty_selection_is_a_config_error() {
        let unknown = ModelSelection::Only(vec!["zzz".into()]);
        assert_eq!(unknown.resolve(&config()).unwrap_err().field(), Some("models"));

        let empty = TrainerConfig::new(TrainingConfig::default());
        assert!(ModelSelection::All.resolve(&empty).is_err());
        assert!(ModelSelection::Only(Vec::new()).resolve(&config()).is_err());
    }
}
