//! One fixed-length episode of the control loop.
//!
//! Each step snapshots the window, asks the oracle for an action, applies it
//! through the channel, lets the window accumulate records until the step
//! deadline, snapshots again and scores the transition. Steps start on a
//! fixed cadence. A step that overruns its budget makes the next one start
//! immediately: with the remainder of its slot if it is still inside it,
//! otherwise with a full budget from now.

use crate::channel::KernelChannel;
use crate::config::TrainingConfig;
use crate::error::{ChannelError, ChannelErrorKind, OracleError};
use crate::oracle::DecisionOracle;
use crate::reward::reward;
use crate::types::Action;
use crate::window::{FeatureVector, StateWindow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

/// Whether the oracle learns during an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeMode {
    /// `choose` then `update` every step.
    Train,
    /// `choose` only; the oracle is frozen.
    Test,
}

impl fmt::Display for EpisodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// One scored decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Step index within the episode.
    pub step: usize,
    /// State the action was chosen in.
    pub state: FeatureVector,
    /// Chosen action.
    pub action: Action,
    /// Reward observed over the step.
    pub reward: f64,
}

/// How an episode ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EpisodeStatus {
    /// Every step ran.
    Completed,
    /// The kernel channel became unavailable mid-episode.
    Failed { reason: String },
}

/// A sealed episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Position of the episode within its run.
    pub index: usize,
    pub mode: EpisodeMode,
    pub status: EpisodeStatus,
    pub transitions: Vec<Transition>,
    /// Sum of the transition rewards.
    pub cumulative_reward: f64,
    /// Wall-clock time from the first step to sealing.
    pub duration: Duration,
}

impl Episode {
    /// Returns true if every step ran.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == EpisodeStatus::Completed
    }

    /// Mean reward per transition, or 0 for an empty episode.
    #[must_use]
    pub fn mean_reward(&self) -> f64 {
        if self.transitions.is_empty() {
            0.0
        } else {
            self.cumulative_reward / self.transitions.len() as f64
        }
    }
}

/// Ways a step can fail.
enum StepError {
    Channel(ChannelError),
    Oracle(OracleError),
}

impl From<OracleError> for StepError {
    fn from(error: OracleError) -> Self {
        Self::Oracle(error)
    }
}

/// Drives episodes with a fixed step shape.
#[derive(Debug, Clone)]
pub struct EpisodeRunner {
    steps_per_episode: usize,
    step_wait: Duration,
    watchdog: Duration,
    delta: f64,
    window: Duration,
    jiffies_per_state: usize,
    num_fields: usize,
    num_features: usize,
}

impl EpisodeRunner {
    /// Creates a runner from validated training settings.
    #[must_use]
    pub fn new(training: &TrainingConfig) -> Self {
        Self {
            steps_per_episode: training.steps_per_episode,
            step_wait: training.step_wait(),
            watchdog: training.watchdog(),
            delta: training.delta,
            window: training.window(),
            jiffies_per_state: training.jiffies_per_state,
            num_fields: training.num_fields_kernel,
            num_features: training.num_features,
        }
    }

    /// Number of steps in a completed episode.
    #[must_use]
    pub fn steps_per_episode(&self) -> usize {
        self.steps_per_episode
    }

    /// Runs one episode.
    ///
    /// A channel that becomes unavailable seals the episode as
    /// [`EpisodeStatus::Failed`] with the transitions completed so far.
    ///
    /// # Errors
    ///
    /// Returns the oracle's error if `choose` or `update` fails. This aborts
    /// the episode and is meant to abort the run as well.
    #[instrument(skip(self, channel, oracle), fields(oracle = oracle.name()))]
    pub async fn run_episode(
        &self,
        index: usize,
        mode: EpisodeMode,
        channel: &mut dyn KernelChannel,
        oracle: &mut dyn DecisionOracle,
    ) -> Result<Episode, OracleError> {
        let started = Instant::now();
        let mut window = StateWindow::new(
            self.window,
            self.jiffies_per_state,
            self.num_fields,
            self.num_features,
        );
        let mut last_seen = started;
        let mut transitions = Vec::with_capacity(self.steps_per_episode);
        let mut status = EpisodeStatus::Completed;

        let mut scheduled = started;

        for step in 0..self.steps_per_episode {
            sleep_until(scheduled).await;
            let now = Instant::now();
            let mut deadline = scheduled + self.step_wait;
            if deadline <= now {
                debug!(step, late_ms = (now - scheduled).as_millis() as u64, "step slot missed");
                deadline = now + self.step_wait;
            }
            scheduled = deadline;

            match self
                .step(step, mode, deadline, &mut window, &mut last_seen, channel, oracle)
                .await
            {
                Ok(transition) => transitions.push(transition),
                Err(StepError::Oracle(error)) => return Err(error),
                Err(StepError::Channel(error)) => {
                    warn!(
                        step,
                        sealed = transitions.len(),
                        error = %error,
                        "kernel channel unavailable, aborting episode"
                    );
                    status = EpisodeStatus::Failed {
                        reason: error.to_string(),
                    };
                    break;
                }
            }
        }

        let cumulative_reward = transitions.iter().map(|t| t.reward).sum();
        let episode = Episode {
            index,
            mode,
            status,
            transitions,
            cumulative_reward,
            duration: started.elapsed(),
        };

        info!(
            mode = %episode.mode,
            steps = episode.transitions.len(),
            completed = episode.is_completed(),
            cumulative_reward = episode.cumulative_reward,
            duration_ms = episode.duration.as_millis() as u64,
            "episode sealed"
        );
        Ok(episode)
    }

    #[allow(clippy::too_many_arguments)]
    async fn step(
        &self,
        step: usize,
        mode: EpisodeMode,
        deadline: Instant,
        window: &mut StateWindow,
        last_seen: &mut Instant,
        channel: &mut dyn KernelChannel,
        oracle: &mut dyn DecisionOracle,
    ) -> Result<Transition, StepError> {
        let state = window.snapshot();
        let action = oracle.choose(&state)?;

        if let Err(error) = channel.send(action).await {
            return Err(match error.kind {
                ChannelErrorKind::InvalidAction { action, nchoices } => StepError::Oracle(
                    OracleError::invalid_action(oracle.name(), action, nchoices),
                ),
                _ => StepError::Channel(error),
            });
        }

        self.accumulate(deadline, window, last_seen, channel)
            .await
            .map_err(StepError::Channel)?;

        let next = window.snapshot();
        let reward = reward(&state, &next, self.delta);

        if mode == EpisodeMode::Train {
            oracle.update(&state, action, reward)?;
        }

        debug!(
            step,
            action = action.index(),
            reward,
            records = window.len(),
            "step done"
        );

        Ok(Transition {
            step,
            state,
            action,
            reward,
        })
    }

    /// Feeds records into the window until `deadline`.
    async fn accumulate(
        &self,
        deadline: Instant,
        window: &mut StateWindow,
        last_seen: &mut Instant,
        channel: &mut dyn KernelChannel,
    ) -> Result<(), ChannelError> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            match channel.receive(deadline - now).await {
                Ok(Some(record)) => {
                    window.push(record);
                    *last_seen = Instant::now();
                }
                Ok(None) => {}
                Err(error) if error.is_decode() => {
                    warn!(error = %error, "dropping malformed statistics record");
                    *last_seen = Instant::now();
                }
                Err(error) => return Err(error),
            }

            let silent_for = last_seen.elapsed();
            if silent_for >= self.watchdog {
                return Err(ChannelError::stalled(silent_for));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{StatField, StatRecord};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    #[derive(Debug)]
    enum Reply {
        Record,
        Silence,
        Malformed,
        Gone,
        /// A record that arrives this long after the timeout.
        Slow(Duration),
    }

    /// Answers each receive after sleeping through the whole timeout.
    #[derive(Debug, Default)]
    struct Scripted {
        replies: VecDeque<Reply>,
        receives: usize,
        sent: Vec<Action>,
        sent_at: Vec<Instant>,
        nchoices: usize,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                nchoices: 3,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl KernelChannel for Scripted {
        async fn receive(
            &mut self,
            timeout: Duration,
        ) -> Result<Option<StatRecord>, ChannelError> {
            let reply = self.replies.pop_front().unwrap_or(Reply::Record);
            let late = match reply {
                Reply::Slow(late) => late,
                _ => Duration::ZERO,
            };
            tokio::time::sleep(timeout + late).await;
            self.receives += 1;
            match reply {
                Reply::Record | Reply::Slow(_) => {
                    let mut values = vec![0.0; StatField::COUNT];
                    values[StatField::Delivered.index()] = self.receives as f64;
                    Ok(Some(StatRecord::new(
                        Duration::from_millis(self.receives as u64 * 100),
                        values,
                    )))
                }
                Reply::Silence => Ok(None),
                Reply::Malformed => Err(ChannelError::decode("short payload")),
                Reply::Gone => Err(ChannelError::unavailable("module unloaded")),
            }
        }

        async fn send(&mut self, action: Action) -> Result<(), ChannelError> {
            if action.index() >= self.nchoices {
                return Err(ChannelError::invalid_action(action.index(), self.nchoices));
            }
            self.sent.push(action);
            self.sent_at.push(Instant::now());
            Ok(())
        }

        fn close(&mut self) {}
    }

    /// Always picks action 1 and counts updates.
    #[derive(Debug, Default)]
    struct Fixed {
        action: usize,
        updates: usize,
        fail_choose_at: Option<usize>,
        chosen: usize,
    }

    impl DecisionOracle for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn choose(&mut self, _state: &FeatureVector) -> Result<Action, OracleError> {
            self.chosen += 1;
            if self.fail_choose_at == Some(self.chosen) {
                return Err(OracleError::failed("fixed", "boom"));
            }
            Ok(Action::new(self.action))
        }

        fn update(
            &mut self,
            _state: &FeatureVector,
            _action: Action,
            _reward: f64,
        ) -> Result<(), OracleError> {
            self.updates += 1;
            Ok(())
        }

        fn export(&self) -> Result<serde_json::Value, OracleError> {
            Ok(serde_json::Value::Null)
        }

        fn restore(&mut self, _snapshot: serde_json::Value) -> Result<(), OracleError> {
            Ok(())
        }
    }

    fn runner(steps: usize) -> EpisodeRunner {
        let training = TrainingConfig {
            steps_per_episode: steps,
            step_wait_seconds: 0.2,
            ..TrainingConfig::default()
        };
        EpisodeRunner::new(&training)
    }

    fn oracle() -> Fixed {
        Fixed {
            action: 1,
            ..Fixed::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_all_steps() {
        let mut channel = Scripted::new([]);
        let mut oracle = oracle();
        let episode = runner(5)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();

        assert!(episode.is_completed());
        assert_eq!(episode.transitions.len(), 5);
        assert_eq!(oracle.updates, 5);
        assert_eq!(channel.sent, vec![Action::new(1); 5]);
        let steps: Vec<usize> = episode.transitions.iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_fixed_cadence() {
        let mut channel = Scripted::new([]);
        let mut oracle = oracle();
        let started = Instant::now();
        runner(5)
            .run_episode(0, EpisodeMode::Test, &mut channel, &mut oracle)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(channel.receives, 5);
    }

    fn offsets_ms(started: Instant, at: &[Instant]) -> Vec<u64> {
        at.iter().map(|t| (*t - started).as_millis() as u64).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_step_starts_next_immediately() {
        // second receive returns 300ms after its deadline, past the next slot
        let mut channel = Scripted::new([Reply::Record, Reply::Slow(Duration::from_millis(300))]);
        let mut oracle = oracle();
        let started = Instant::now();
        let episode = runner(5)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();

        assert!(episode.is_completed());
        assert_eq!(
            offsets_ms(started, &channel.sent_at),
            vec![0, 200, 700, 900, 1100]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(1300));
        assert_eq!(episode.duration, Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn short_overrun_keeps_the_schedule() {
        let mut channel = Scripted::new([Reply::Record, Reply::Slow(Duration::from_millis(100))]);
        let mut oracle = oracle();
        let started = Instant::now();
        runner(5)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();

        assert_eq!(
            offsets_ms(started, &channel.sent_at),
            vec![0, 200, 500, 600, 800]
        );
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_channel_seals_partial_episode() {
        let mut channel = Scripted::new([Reply::Record, Reply::Record, Reply::Gone]);
        let mut oracle = oracle();
        let episode = runner(5)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();

        assert_eq!(episode.transitions.len(), 2);
        assert!(matches!(episode.status, EpisodeStatus::Failed { .. }));
        assert_eq!(oracle.updates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_never_updates() {
        let mut channel = Scripted::new([]);
        let mut oracle = oracle();
        let episode = runner(4)
            .run_episode(0, EpisodeMode::Test, &mut channel, &mut oracle)
            .await
            .unwrap();
        assert_eq!(episode.transitions.len(), 4);
        assert_eq!(oracle.updates, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_records_are_dropped() {
        let mut channel = Scripted::new([Reply::Malformed, Reply::Record, Reply::Malformed]);
        let mut oracle = oracle();
        let episode = runner(3)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();
        assert!(episode.is_completed());
        assert_eq!(episode.transitions.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_channel_trips_watchdog() {
        let mut channel = Scripted::new(std::iter::repeat_with(|| Reply::Silence).take(100));
        let mut oracle = oracle();
        let episode = runner(20)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();

        // watchdog defaults to five step budgets
        assert_eq!(episode.transitions.len(), 4);
        match episode.status {
            EpisodeStatus::Failed { reason } => assert!(reason.contains("no statistics")),
            EpisodeStatus::Completed => panic!("expected a stalled episode"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_error_aborts_episode() {
        let mut channel = Scripted::new([]);
        let mut oracle = Fixed {
            action: 0,
            fail_choose_at: Some(3),
            ..Fixed::default()
        };
        let error = runner(5)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("boom"));
        assert_eq!(channel.sent.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_action_is_an_oracle_error() {
        let mut channel = Scripted::new([]);
        let mut oracle = Fixed {
            action: 7,
            ..Fixed::default()
        };
        let result = runner(2)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rewards_follow_window_contents() {
        let mut channel = Scripted::new([]);
        let mut oracle = oracle();
        let episode = runner(3)
            .run_episode(0, EpisodeMode::Train, &mut channel, &mut oracle)
            .await
            .unwrap();
        let total: f64 = episode.transitions.iter().map(|t| t.reward).sum();
        assert!((episode.cumulative_reward - total).abs() < 1e-12);
        assert!((episode.mean_reward() - total / 3.0).abs() < 1e-12);
        assert_eq!(episode.transitions[0].state, FeatureVector::zeros(30));
    }
}
