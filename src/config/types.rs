//! Configuration types for the trainer.
//!
//! The root `TrainerConfig` maps directly onto the TOML file. Loading is in
//! `file.rs`; every loaded configuration goes through [`TrainerConfig::validate`]
//! before any run starts.

use crate::channel::StatField;
use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::oracle::PolicyKind;
use crate::persistence::is_plain_file_name;
use crate::types::ProtocolMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Default netlink protocol number of the mimic kernel module.
pub const NETLINK_USER: i32 = 25;

/// Root configuration structure.
///
/// ```toml
/// protocols = ["cubic", "bbr", "hybla"]
///
/// [training]
/// num_features = 30
/// window_len = 1.0
/// jiffies_per_state = 10
/// num_fields_kernel = 10
/// steps_per_episode = 100
/// delta = 0.5
/// lr = 0.01
/// step_wait_seconds = 0.5
/// train_episodes = 20
/// test_episodes = 5
/// retrain_episodes = 5
///
/// [models.epsilon_greedy]
/// policy = "epsilon_greedy"
/// epsilon = 0.1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Loop hyperparameters.
    pub training: TrainingConfig,

    /// Ordered action→protocol map. Index = action.
    #[serde(default)]
    pub protocols: ProtocolMap,

    /// Optional explicit action space size; must equal `protocols.len()`.
    #[serde(default)]
    pub nchoices: Option<usize>,

    /// Named models, each backed by one policy strategy.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,

    /// Kernel channel settings.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Emulated network session settings.
    #[serde(default)]
    pub communication: CommunicationConfig,

    /// Artifact storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Console and file logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TrainerConfig {
    /// Creates a configuration with the given loop hyperparameters and
    /// defaults for everything else.
    #[must_use]
    pub fn new(training: TrainingConfig) -> Self {
        Self {
            training,
            protocols: ProtocolMap::default(),
            nchoices: None,
            models: BTreeMap::new(),
            channel: ChannelConfig::default(),
            communication: CommunicationConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Adds a named model.
    #[must_use]
    pub fn with_model(mut self, name: impl Into<String>, model: ModelConfig) -> Self {
        self.models.insert(name.into(), model);
        self
    }

    /// Replaces the protocol map.
    #[must_use]
    pub fn with_protocols(mut self, protocols: ProtocolMap) -> Self {
        self.protocols = protocols;
        self
    }

    /// Size of the action space.
    #[must_use]
    pub fn nchoices(&self) -> usize {
        self.protocols.len()
    }

    /// Configured model names, in sorted order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Checks every hyperparameter the loop consumes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::configuration` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.training.validate()?;

        if self.protocols.is_empty() {
            return Err(ConfigError::configuration(
                "protocols",
                "at least one protocol is required",
            ));
        }
        let mut seen = HashSet::new();
        for name in self.protocols.names() {
            if !seen.insert(name) {
                return Err(ConfigError::configuration(
                    "protocols",
                    format!("protocol '{name}' is listed twice"),
                ));
            }
        }
        if let Some(n) = self.nchoices {
            if n != self.protocols.len() {
                return Err(ConfigError::configuration(
                    "nchoices",
                    format!(
                        "is {} but {} protocols are configured",
                        n,
                        self.protocols.len()
                    ),
                ));
            }
        }

        for (name, model) in &self.models {
            if !is_plain_file_name(name) {
                return Err(ConfigError::configuration(
                    format!("models.{name}"),
                    "model names are used as file names; no '/', '\\' or leading '.'",
                ));
            }
            model
                .validate()
                .map_err(|reason| ConfigError::configuration(format!("models.{name}"), reason))?;
        }

        if self.communication.stop_timeout_secs == 0 {
            return Err(ConfigError::configuration(
                "communication.stop_timeout_secs",
                "must be greater than 0",
            ));
        }
        self.logging
            .validate()
            .map_err(|e| ConfigError::configuration("logging.filter", e.to_string()))?;

        if self.channel.recv_buffer < 64 {
            return Err(ConfigError::configuration(
                "channel.recv_buffer",
                "must be at least 64 bytes",
            ));
        }

        Ok(())
    }
}

/// Hyperparameters of the control-and-training loop.
///
/// Every field except `watchdog_seconds` and `seed` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Length of the feature vector handed to the oracle.
    pub num_features: usize,
    /// Time span of the statistics window, in seconds.
    pub window_len: f64,
    /// Number of most recent samples kept as raw slots per state.
    pub jiffies_per_state: usize,
    /// Number of numeric fields in each kernel statistics record.
    pub num_fields_kernel: usize,
    /// Decision steps per episode.
    pub steps_per_episode: usize,
    /// Trade-off between throughput gain and latency in the reward.
    pub delta: f64,
    /// Learning rate of the oracle's online update.
    pub lr: f64,
    /// Fixed step cadence, in seconds.
    pub step_wait_seconds: f64,
    /// Training episodes for a fresh model.
    pub train_episodes: usize,
    /// Evaluation episodes after training.
    pub test_episodes: usize,
    /// Training episodes when warm-starting a saved model.
    pub retrain_episodes: usize,
    /// Silence after which the channel counts as stalled.
    /// Defaults to five step budgets.
    #[serde(default)]
    pub watchdog_seconds: Option<f64>,
    /// Seed for exploration randomness.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    123
}

impl TrainingConfig {
    /// Step budget as a duration.
    #[must_use]
    pub fn step_wait(&self) -> Duration {
        Duration::from_secs_f64(self.step_wait_seconds)
    }

    /// Window span as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_len)
    }

    /// Stall threshold as a duration.
    #[must_use]
    pub fn watchdog(&self) -> Duration {
        let secs = self
            .watchdog_seconds
            .unwrap_or(self.step_wait_seconds * 5.0);
        Duration::from_secs_f64(secs)
    }

    /// Number of training episodes for the given mode.
    #[must_use]
    pub fn train_episodes_for(&self, retrain: bool) -> usize {
        if retrain {
            self.retrain_episodes
        } else {
            self.train_episodes
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive_count("training.num_features", self.num_features)?;
        positive_count("training.jiffies_per_state", self.jiffies_per_state)?;
        positive_count("training.num_fields_kernel", self.num_fields_kernel)?;
        positive_count("training.steps_per_episode", self.steps_per_episode)?;
        positive_count("training.train_episodes", self.train_episodes)?;

        positive_secs("training.window_len", self.window_len)?;
        positive_secs("training.step_wait_seconds", self.step_wait_seconds)?;
        if let Some(w) = self.watchdog_seconds {
            positive_secs("training.watchdog_seconds", w)?;
        }

        if !(0.0..=1.0).contains(&self.delta) {
            return Err(ConfigError::configuration(
                "training.delta",
                format!("must be within [0, 1], got {}", self.delta),
            ));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ConfigError::configuration(
                "training.lr",
                format!("must be a positive number, got {}", self.lr),
            ));
        }

        if self.num_fields_kernel < StatField::COUNT {
            return Err(ConfigError::configuration(
                "training.num_fields_kernel",
                format!(
                    "must be at least {} to carry the named kernel fields",
                    StatField::COUNT
                ),
            ));
        }
        let blocks = self.num_features / self.num_fields_kernel;
        if self.num_features % self.num_fields_kernel != 0 || !(1..=3).contains(&blocks) {
            return Err(ConfigError::configuration(
                "training.num_features",
                format!(
                    "must be 1, 2 or 3 times num_fields_kernel ({}), got {}",
                    self.num_fields_kernel, self.num_features
                ),
            ));
        }

        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_features: 3 * StatField::COUNT,
            window_len: 1.0,
            jiffies_per_state: 10,
            num_fields_kernel: StatField::COUNT,
            steps_per_episode: 100,
            delta: 0.5,
            lr: 0.01,
            step_wait_seconds: 0.5,
            train_episodes: 20,
            test_episodes: 5,
            retrain_episodes: 5,
            watchdog_seconds: None,
            seed: default_seed(),
        }
    }
}

fn positive_count(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::configuration(field, "must be greater than 0"));
    }
    Ok(())
}

fn positive_secs(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::configuration(
            field,
            format!("must be a positive number of seconds, got {value}"),
        ));
    }
    Ok(())
}

/// One named model: a strategy plus its optional hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The exploration strategy.
    pub policy: PolicyKind,
    /// Exploration probability (epsilon strategies, `active_explorer`).
    #[serde(default)]
    pub epsilon: Option<f64>,
    /// Per-update decay factor (`epsilon_greedy_decay`, `active_explorer`).
    #[serde(default)]
    pub decay: Option<f64>,
    /// Uniform exploration rounds (`explore_first`).
    #[serde(default)]
    pub explore_rounds: Option<usize>,
    /// Softmax temperature (`softmax_explorer`, `adaptive_greedy_weighted`).
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Score threshold (`adaptive_greedy_threshold`, `adaptive_greedy_weighted`).
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Percentile of recent best scores used as threshold
    /// (`adaptive_greedy_percentile`), 0 to 100.
    #[serde(default)]
    pub percentile: Option<f64>,
    /// Number of recent best scores the percentile is taken over.
    #[serde(default)]
    pub history: Option<usize>,
}

impl ModelConfig {
    /// Creates a model using `policy` with default hyperparameters.
    #[must_use]
    pub fn new(policy: PolicyKind) -> Self {
        Self {
            policy,
            epsilon: None,
            decay: None,
            explore_rounds: None,
            temperature: None,
            threshold: None,
            percentile: None,
            history: None,
        }
    }

    /// Sets the exploration probability.
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(e) = self.epsilon {
            if !(0.0..=1.0).contains(&e) {
                return Err(format!("epsilon must be within [0, 1], got {e}"));
            }
        }
        if let Some(d) = self.decay {
            if !(d > 0.0 && d <= 1.0) {
                return Err(format!("decay must be within (0, 1], got {d}"));
            }
        }
        if let Some(t) = self.temperature {
            if !(t.is_finite() && t > 0.0) {
                return Err(format!("temperature must be positive, got {t}"));
            }
        }
        if let Some(t) = self.threshold {
            if !t.is_finite() {
                return Err("threshold must be finite".to_string());
            }
        }
        if let Some(p) = self.percentile {
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile must be within [0, 100], got {p}"));
            }
        }
        if self.history == Some(0) {
            return Err("history must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Kernel channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Netlink protocol family number.
    #[serde(default = "default_netlink_protocol")]
    pub protocol: i32,
    /// Receive buffer size in bytes.
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,
}

fn default_netlink_protocol() -> i32 {
    NETLINK_USER
}

fn default_recv_buffer() -> usize {
    4096
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            protocol: default_netlink_protocol(),
            recv_buffer: default_recv_buffer(),
        }
    }
}

/// Emulated network session settings.
///
/// Commands are run through `sh -c`; `{tag}` is replaced with the session tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationConfig {
    /// Command starting the receiving side (e.g. an iperf3 server).
    #[serde(default)]
    pub server_command: Option<String>,
    /// Command starting the sending side inside the emulated link.
    #[serde(default)]
    pub client_command: Option<String>,
    /// Pause between starting the server and the client.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
    /// Grace period for processes to exit after SIGTERM.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_settle_millis() -> u64 {
    500
}

fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            server_command: None,
            client_command: None,
            settle_millis: default_settle_millis(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// Artifact storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for histories and models. If None, uses the XDG data
    /// dir + "mimic-trainer".
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TrainerConfig {
        TrainerConfig::new(TrainingConfig::default())
            .with_model("eg", ModelConfig::new(PolicyKind::EpsilonGreedy))
    }

    #[test]
    fn default_config_is_valid() {
        assert!(valid().validate().is_ok());
        assert_eq!(valid().nchoices(), 3);
    }

    #[test]
    fn rejects_delta_out_of_range() {
        let mut config = valid();
        config.training.delta = 1.5;
        let error = config.validate().unwrap_err();
        assert_eq!(error.field(), Some("training.delta"));
    }

    #[test]
    fn rejects_zero_steps() {
        let mut config = valid();
        config.training.steps_per_episode = 0;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("training.steps_per_episode")
        );
    }

    #[test]
    fn rejects_non_positive_step_wait() {
        let mut config = valid();
        config.training.step_wait_seconds = 0.0;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("training.step_wait_seconds")
        );
    }

    #[test]
    fn rejects_feature_count_not_multiple_of_fields() {
        let mut config = valid();
        config.training.num_features = 25;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("training.num_features")
        );

        config.training.num_features = 4 * config.training.num_fields_kernel;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_few_kernel_fields() {
        let mut config = valid();
        config.training.num_fields_kernel = StatField::COUNT - 1;
        config.training.num_features = StatField::COUNT - 1;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("training.num_fields_kernel")
        );
    }

    #[test]
    fn rejects_nchoices_mismatch() {
        let mut config = valid();
        config.nchoices = Some(4);
        assert_eq!(config.validate().unwrap_err().field(), Some("nchoices"));
        config.nchoices = Some(3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_protocols() {
        let config = valid().with_protocols(ProtocolMap::new(["cubic", "cubic"]));
        assert_eq!(config.validate().unwrap_err().field(), Some("protocols"));
    }

    #[test]
    fn rejects_bad_model_epsilon() {
        let config = valid().with_model(
            "bad",
            ModelConfig::new(PolicyKind::EpsilonGreedy).with_epsilon(2.0),
        );
        assert_eq!(config.validate().unwrap_err().field(), Some("models.bad"));
    }

    #[test]
    fn rejects_path_like_model_names() {
        for name in ["a/b", ".x", "..", "a\\b"] {
            let config = valid().with_model(name, ModelConfig::new(PolicyKind::EpsilonGreedy));
            let error = config.validate().unwrap_err();
            assert_eq!(error.field(), Some(format!("models.{name}").as_str()));
        }
        let config = valid().with_model("ucb.v2", ModelConfig::new(PolicyKind::BootstrappedUcb));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_percentile_settings() {
        let mut model = ModelConfig::new(PolicyKind::AdaptiveGreedyPercentile);
        model.percentile = Some(120.0);
        let config = valid().with_model("pct", model.clone());
        assert_eq!(config.validate().unwrap_err().field(), Some("models.pct"));

        model.percentile = Some(30.0);
        model.history = Some(0);
        let config = valid().with_model("pct", model);
        assert_eq!(config.validate().unwrap_err().field(), Some("models.pct"));
    }

    #[test]
    fn watchdog_defaults_to_five_steps() {
        let training = TrainingConfig {
            step_wait_seconds: 0.2,
            ..TrainingConfig::default()
        };
        assert_eq!(training.watchdog(), Duration::from_secs(1));
    }

    #[test]
    fn retrain_uses_retrain_episodes() {
        let training = TrainingConfig::default();
        assert_eq!(training.train_episodes_for(false), training.train_episodes);
        assert_eq!(training.train_episodes_for(true), training.retrain_episodes);
    }

    #[test]
    fn serialization_roundtrip() {
        let config = valid();
        let text = toml::to_string(&config).unwrap();
        let back: TrainerConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
