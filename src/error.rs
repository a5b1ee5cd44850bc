//! Error types for the training loop.
//!
//! Each error type is a struct carrying a `kind` enum, with constructor helpers,
//! predicates, a `Display` message that tells the operator what to check, and an
//! implementation of `std::error::Error`.
//!
//! No external error crates (anyhow, thiserror, eyre) are used.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by a kernel statistics channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
    /// The specific error that occurred
    pub kind: ChannelErrorKind,
}

/// Specific channel error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// The kernel endpoint could not be reached (module not loaded, socket refused)
    Unavailable {
        /// Why the endpoint is unreachable
        reason: String,
    },
    /// No statistics arrived within the watchdog window
    Stalled {
        /// How long the channel was silent
        silent_for: Duration,
    },
    /// A socket operation failed
    Io {
        /// The operation that failed
        operation: &'static str,
        /// The OS error message
        reason: String,
    },
    /// A statistics payload could not be decoded
    Decode {
        /// Why decoding failed
        reason: String,
    },
    /// An action outside the protocol map was sent
    InvalidAction {
        /// The offending action index
        action: usize,
        /// Size of the action space
        nchoices: usize,
    },
    /// The channel was used after `close()`
    Closed,
}

impl ChannelError {
    /// Creates a new ChannelError with the given kind.
    #[must_use]
    pub fn new(kind: ChannelErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(ChannelErrorKind::Unavailable {
            reason: reason.into(),
        })
    }

    /// Creates a stalled-channel error.
    #[must_use]
    pub fn stalled(silent_for: Duration) -> Self {
        Self::new(ChannelErrorKind::Stalled { silent_for })
    }

    /// Creates an I/O error for the named socket operation.
    #[must_use]
    pub fn io(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::new(ChannelErrorKind::Io {
            operation,
            reason: reason.into(),
        })
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::new(ChannelErrorKind::Decode {
            reason: reason.into(),
        })
    }

    /// Creates an invalid action error.
    #[must_use]
    pub fn invalid_action(action: usize, nchoices: usize) -> Self {
        Self::new(ChannelErrorKind::InvalidAction { action, nchoices })
    }

    /// Creates a closed-channel error.
    #[must_use]
    pub fn closed() -> Self {
        Self::new(ChannelErrorKind::Closed)
    }

    /// Returns true if the kernel endpoint should be treated as unreachable.
    ///
    /// This covers unreachable, stalled, closed, and broken sockets. Decode
    /// failures and invalid actions are per-message problems and do not count.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        !matches!(
            self.kind,
            ChannelErrorKind::Decode { .. } | ChannelErrorKind::InvalidAction { .. }
        )
    }

    /// Returns true if this error is a per-sample decode failure.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self.kind, ChannelErrorKind::Decode { .. })
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ChannelErrorKind::Unavailable { reason } => {
                write!(
                    f,
                    "kernel channel unavailable: {}; check that the mimic module is loaded",
                    reason
                )
            }
            ChannelErrorKind::Stalled { silent_for } => {
                write!(
                    f,
                    "kernel channel stalled: no statistics for {:.3}s; is traffic flowing?",
                    silent_for.as_secs_f64()
                )
            }
            ChannelErrorKind::Io { operation, reason } => {
                write!(f, "netlink {} failed: {}", operation, reason)
            }
            ChannelErrorKind::Decode { reason } => {
                write!(f, "malformed statistics record: {}", reason)
            }
            ChannelErrorKind::InvalidAction { action, nchoices } => {
                write!(
                    f,
                    "action {} is outside the protocol map (0..{})",
                    action, nchoices
                )
            }
            ChannelErrorKind::Closed => write!(f, "kernel channel already closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Errors raised by a decision oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleError {
    /// The policy that failed, if known
    pub policy: Option<String>,
    /// The specific error that occurred
    pub kind: OracleErrorKind,
}

/// Specific oracle error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleErrorKind {
    /// No strategy is registered under this name
    UnknownPolicy {
        /// The requested strategy name
        name: String,
    },
    /// The oracle produced or received an action outside the action space
    InvalidAction {
        /// The offending action index
        action: usize,
        /// Size of the action space
        nchoices: usize,
    },
    /// A state vector had the wrong length
    DimensionMismatch {
        /// Expected feature count
        expected: usize,
        /// Actual feature count
        actual: usize,
    },
    /// A model snapshot could not be exported or restored
    Snapshot {
        /// Why the snapshot failed
        reason: String,
    },
    /// Any other failure inside the decision library
    Failed {
        /// Description of the failure
        reason: String,
    },
}

impl OracleError {
    /// Creates a new OracleError with the given kind.
    #[must_use]
    pub fn new(policy: Option<String>, kind: OracleErrorKind) -> Self {
        Self { policy, kind }
    }

    /// Creates an unknown policy error.
    #[must_use]
    pub fn unknown_policy(name: impl Into<String>) -> Self {
        Self::new(None, OracleErrorKind::UnknownPolicy { name: name.into() })
    }

    /// Creates an invalid action error.
    #[must_use]
    pub fn invalid_action(policy: impl Into<String>, action: usize, nchoices: usize) -> Self {
        Self::new(
            Some(policy.into()),
            OracleErrorKind::InvalidAction { action, nchoices },
        )
    }

    /// Creates a dimension mismatch error.
    #[must_use]
    pub fn dimension_mismatch(policy: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::new(
            Some(policy.into()),
            OracleErrorKind::DimensionMismatch { expected, actual },
        )
    }

    /// Creates a snapshot error.
    #[must_use]
    pub fn snapshot(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            Some(policy.into()),
            OracleErrorKind::Snapshot {
                reason: reason.into(),
            },
        )
    }

    /// Creates a generic failure.
    #[must_use]
    pub fn failed(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            Some(policy.into()),
            OracleErrorKind::Failed {
                reason: reason.into(),
            },
        )
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref policy) = self.policy {
            write!(f, "policy '{}': ", policy)?;
        }
        match &self.kind {
            OracleErrorKind::UnknownPolicy { name } => {
                write!(
                    f,
                    "unknown policy strategy '{}'; see the registry for available names",
                    name
                )
            }
            OracleErrorKind::InvalidAction { action, nchoices } => {
                write!(f, "action {} outside action space 0..{}", action, nchoices)
            }
            OracleErrorKind::DimensionMismatch { expected, actual } => {
                write!(
                    f,
                    "state vector has {} features, expected {}",
                    actual, expected
                )
            }
            OracleErrorKind::Snapshot { reason } => {
                write!(f, "model snapshot failed: {}", reason)
            }
            OracleErrorKind::Failed { reason } => write!(f, "decision oracle failed: {}", reason),
        }
    }
}

impl std::error::Error for OracleError {}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The specific error that occurred
    pub kind: ConfigErrorKind,
}

/// Specific configuration error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A hyperparameter is missing or invalid
    Configuration {
        /// The offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
    /// The configuration file could not be read
    Read {
        /// The file that could not be read
        path: PathBuf,
        /// The OS error message
        reason: String,
    },
    /// The configuration file is not valid TOML for this schema
    Parse {
        /// The parser message
        reason: String,
    },
}

impl ConfigError {
    /// Creates a new ConfigError with the given kind.
    #[must_use]
    pub fn new(kind: ConfigErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an invalid hyperparameter error.
    #[must_use]
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Configuration {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates a read error.
    #[must_use]
    pub fn read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Read {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Parse {
            reason: reason.into(),
        })
    }

    /// Returns the offending field for hyperparameter errors.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            ConfigErrorKind::Configuration { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConfigErrorKind::Configuration { field, reason } => {
                write!(f, "invalid configuration for '{}': {}", field, reason)
            }
            ConfigErrorKind::Read { path, reason } => {
                write!(
                    f,
                    "failed to read config '{}': {}; check the path and permissions",
                    path.display(),
                    reason
                )
            }
            ConfigErrorKind::Parse { reason } => write!(f, "invalid TOML: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by the emulated network session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationError {
    /// The specific error that occurred
    pub kind: CommunicationErrorKind,
}

/// Specific communication error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicationErrorKind {
    /// `start` was called while a session is running
    AlreadyStarted {
        /// Tag of the running session
        tag: String,
    },
    /// `stop` was called without a running session
    NotStarted,
    /// A session process could not be spawned
    SpawnFailed {
        /// The role of the process (server or client)
        role: &'static str,
        /// The OS error message
        reason: String,
    },
    /// A session process did not terminate cleanly
    StopFailed {
        /// The role of the process (server or client)
        role: &'static str,
        /// Why stopping failed
        reason: String,
    },
}

impl CommunicationError {
    /// Creates a new CommunicationError with the given kind.
    #[must_use]
    pub fn new(kind: CommunicationErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an already-started error.
    #[must_use]
    pub fn already_started(tag: impl Into<String>) -> Self {
        Self::new(CommunicationErrorKind::AlreadyStarted { tag: tag.into() })
    }

    /// Creates a not-started error.
    #[must_use]
    pub fn not_started() -> Self {
        Self::new(CommunicationErrorKind::NotStarted)
    }

    /// Creates a spawn failure.
    #[must_use]
    pub fn spawn_failed(role: &'static str, reason: impl Into<String>) -> Self {
        Self::new(CommunicationErrorKind::SpawnFailed {
            role,
            reason: reason.into(),
        })
    }

    /// Creates a stop failure.
    #[must_use]
    pub fn stop_failed(role: &'static str, reason: impl Into<String>) -> Self {
        Self::new(CommunicationErrorKind::StopFailed {
            role,
            reason: reason.into(),
        })
    }

    /// Returns true if no session was running.
    #[must_use]
    pub fn is_not_started(&self) -> bool {
        matches!(self.kind, CommunicationErrorKind::NotStarted)
    }
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommunicationErrorKind::AlreadyStarted { tag } => {
                write!(
                    f,
                    "communication session '{}' is still running; stop it before starting another",
                    tag
                )
            }
            CommunicationErrorKind::NotStarted => {
                write!(f, "no communication session is running")
            }
            CommunicationErrorKind::SpawnFailed { role, reason } => {
                write!(f, "failed to spawn {} process: {}", role, reason)
            }
            CommunicationErrorKind::StopFailed { role, reason } => {
                write!(f, "failed to stop {} process: {}", role, reason)
            }
        }
    }
}

impl std::error::Error for CommunicationError {}

/// Errors raised while saving or loading run artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceError {
    /// The specific error that occurred
    pub kind: PersistenceErrorKind,
}

/// Specific persistence error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    /// A filesystem operation failed
    Io {
        /// The path involved
        path: PathBuf,
        /// The OS error message
        reason: String,
    },
    /// An artifact could not be (de)serialized
    Serialize {
        /// Why serialization failed
        reason: String,
    },
    /// No saved model exists for a warm start
    NotFound {
        /// The model whose snapshot is missing
        model: String,
    },
}

impl PersistenceError {
    /// Creates a new PersistenceError with the given kind.
    #[must_use]
    pub fn new(kind: PersistenceErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(PersistenceErrorKind::Io {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialize(reason: impl Into<String>) -> Self {
        Self::new(PersistenceErrorKind::Serialize {
            reason: reason.into(),
        })
    }

    /// Creates a missing-model error.
    #[must_use]
    pub fn not_found(model: impl Into<String>) -> Self {
        Self::new(PersistenceErrorKind::NotFound {
            model: model.into(),
        })
    }

    /// Returns true if the requested model snapshot does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, PersistenceErrorKind::NotFound { .. })
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PersistenceErrorKind::Io { path, reason } => {
                write!(f, "storage error at '{}': {}", path.display(), reason)
            }
            PersistenceErrorKind::Serialize { reason } => {
                write!(f, "failed to serialize artifact: {}", reason)
            }
            PersistenceErrorKind::NotFound { model } => {
                write!(
                    f,
                    "no saved model for '{}'; train it once without --retrain first",
                    model
                )
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Run-level failure for one model.
///
/// The orchestrator converts this into a `ModelOutcome` so that one failing
/// model never aborts the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    /// The model whose run failed
    pub model: String,
    /// The specific error that occurred
    pub kind: RunErrorKind,
}

/// Specific run error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunErrorKind {
    /// The decision oracle failed
    Oracle(OracleError),
    /// The kernel channel failed outside an episode
    Channel(ChannelError),
    /// The emulated network could not be started or stopped
    Communication(CommunicationError),
    /// Artifacts could not be saved or loaded
    Persistence(PersistenceError),
    /// The model is not present in the configuration
    UnknownModel,
}

impl RunError {
    /// Creates a new RunError for the given model.
    #[must_use]
    pub fn new(model: impl Into<String>, kind: RunErrorKind) -> Self {
        Self {
            model: model.into(),
            kind,
        }
    }

    /// Creates an unknown model error.
    #[must_use]
    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::new(model, RunErrorKind::UnknownModel)
    }

    /// Wraps an oracle error.
    #[must_use]
    pub fn oracle(model: impl Into<String>, error: OracleError) -> Self {
        Self::new(model, RunErrorKind::Oracle(error))
    }

    /// Wraps a channel error.
    #[must_use]
    pub fn channel(model: impl Into<String>, error: ChannelError) -> Self {
        Self::new(model, RunErrorKind::Channel(error))
    }

    /// Wraps a communication error.
    #[must_use]
    pub fn communication(model: impl Into<String>, error: CommunicationError) -> Self {
        Self::new(model, RunErrorKind::Communication(error))
    }

    /// Wraps a persistence error.
    #[must_use]
    pub fn persistence(model: impl Into<String>, error: PersistenceError) -> Self {
        Self::new(model, RunErrorKind::Persistence(error))
    }

    /// Returns true if the decision oracle caused this failure.
    #[must_use]
    pub fn is_oracle(&self) -> bool {
        matches!(self.kind, RunErrorKind::Oracle(_))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RunErrorKind::Oracle(e) => write!(f, "run for '{}' failed: {}", self.model, e),
            RunErrorKind::Channel(e) => write!(f, "run for '{}' failed: {}", self.model, e),
            RunErrorKind::Communication(e) => {
                write!(f, "run for '{}' failed: {}", self.model, e)
            }
            RunErrorKind::Persistence(e) => {
                write!(f, "run for '{}' failed: {}", self.model, e)
            }
            RunErrorKind::UnknownModel => {
                write!(
                    f,
                    "model '{}' is not configured; add a [models.{}] section",
                    self.model, self.model
                )
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            RunErrorKind::Oracle(e) => Some(e),
            RunErrorKind::Channel(e) => Some(e),
            RunErrorKind::Communication(e) => Some(e),
            RunErrorKind::Persistence(e) => Some(e),
            RunErrorKind::UnknownModel => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn channel_unavailable_display() {
        let error = ChannelError::unavailable("connection refused");
        let message = error.to_string();
        assert!(message.contains("connection refused"));
        assert!(message.contains("module"));
    }

    #[test]
    fn channel_stalled_counts_as_unavailable() {
        let error = ChannelError::stalled(Duration::from_secs(2));
        assert!(error.is_unavailable());
        assert!(error.to_string().contains("2.000s"));
    }

    #[test]
    fn channel_decode_is_not_unavailable() {
        let error = ChannelError::decode("short payload");
        assert!(!error.is_unavailable());
        assert!(error.is_decode());
    }

    #[test]
    fn channel_closed_and_io_are_unavailable() {
        assert!(ChannelError::closed().is_unavailable());
        assert!(ChannelError::io("recv", "bad fd").is_unavailable());
        assert!(!ChannelError::invalid_action(7, 3).is_unavailable());
    }

    #[test]
    fn oracle_error_display_includes_policy() {
        let error = OracleError::dimension_mismatch("epsilon_greedy", 30, 20);
        let message = error.to_string();
        assert!(message.contains("epsilon_greedy"));
        assert!(message.contains("30"));
        assert!(message.contains("20"));
    }

    #[test]
    fn oracle_unknown_policy_has_no_policy_prefix() {
        let error = OracleError::unknown_policy("bogus");
        assert!(error.policy.is_none());
        assert!(error.to_string().starts_with("unknown policy"));
    }

    #[test]
    fn config_error_exposes_field() {
        let error = ConfigError::configuration("delta", "must be within [0, 1]");
        assert_eq!(error.field(), Some("delta"));
        assert!(error.to_string().contains("delta"));
        assert_eq!(ConfigError::parse("eof").field(), None);
    }

    #[test]
    fn communication_error_display() {
        let error = CommunicationError::already_started("trace.model");
        assert!(error.to_string().contains("trace.model"));
        let error = CommunicationError::spawn_failed("server", "not found");
        assert!(error.to_string().contains("server"));
    }

    #[test]
    fn persistence_not_found_predicate() {
        let error = PersistenceError::not_found("softmax_explorer");
        assert!(error.is_not_found());
        assert!(error.to_string().contains("--retrain"));
    }

    #[test]
    fn run_error_exposes_source() {
        let error = RunError::oracle("m", OracleError::failed("m", "boom"));
        assert!(error.is_oracle());
        assert!(error.source().is_some());
        assert!(error.to_string().contains("boom"));

        let error = RunError::unknown_model("ghost");
        assert!(error.source().is_none());
        assert!(error.to_string().contains("[models.ghost]"));
    }

    #[test]
    fn errors_are_clone_and_eq() {
        let error1 = ChannelError::closed();
        let error2 = error1.clone();
        assert_eq!(error1, error2);
        assert_ne!(error1, ChannelError::decode("x"));
    }
}
