//! Decision oracles.
//!
//! The training loop depends only on [`DecisionOracle`]: `choose` an action
//! for a state and `update` with the observed reward. Concrete strategies are
//! built by name through an [`OracleFactory`]; [`PolicyRegistry`] is the
//! built-in one.

mod linear;
mod registry;

pub use linear::{Exploration, LinearBandit};
pub use registry::{OracleFactory, PolicyRegistry};

use crate::error::OracleError;
use crate::types::Action;
use crate::window::FeatureVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stateful online policy.
///
/// Implementations may batch internally, but must accept one sample per
/// `update` call.
pub trait DecisionOracle: Send + fmt::Debug {
    /// Name of the strategy, used in logs and artifact names.
    fn name(&self) -> &str;

    /// Picks an action for `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state has the wrong dimension or the
    /// underlying model fails.
    fn choose(&mut self, state: &FeatureVector) -> Result<Action, OracleError>;

    /// Feeds back the reward observed after taking `action` in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the action or state is invalid or the update fails.
    fn update(
        &mut self,
        state: &FeatureVector,
        action: Action,
        reward: f64,
    ) -> Result<(), OracleError>;

    /// Serializes the learned model.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be represented.
    fn export(&self) -> Result<serde_json::Value, OracleError>;

    /// Replaces the learned model with a previously exported one.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot does not match this oracle.
    fn restore(&mut self, snapshot: serde_json::Value) -> Result<(), OracleError>;
}

/// Built-in exploration strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Occasionally picks the arm whose estimate is least certain.
    ActiveExplorer,
    /// Greedy only when the best score clears a threshold.
    AdaptiveGreedyThreshold,
    /// Like the threshold variant, but explores by score-weighted sampling.
    AdaptiveGreedyWeighted,
    /// Threshold tracks a percentile of recent best scores.
    AdaptiveGreedyPercentile,
    /// Thompson-style draws around each arm's estimate.
    BootstrappedTs,
    /// Upper confidence bound over per-arm pull counts.
    BootstrappedUcb,
    /// Greedy with an exploration probability that decays per update.
    EpsilonGreedyDecay,
    /// Greedy with a fixed exploration probability.
    EpsilonGreedy,
    /// Uniform exploration for a fixed number of rounds, then greedy.
    ExploreFirst,
    /// Greedy, with random prior draws for arms with too few observations.
    SeparateClassifiers,
    /// Samples actions with probability proportional to `exp(score / T)`.
    SoftmaxExplorer,
}

impl PolicyKind {
    /// All built-in strategies.
    pub const ALL: [PolicyKind; 11] = [
        Self::ActiveExplorer,
        Self::AdaptiveGreedyThreshold,
        Self::AdaptiveGreedyWeighted,
        Self::AdaptiveGreedyPercentile,
        Self::BootstrappedTs,
        Self::BootstrappedUcb,
        Self::EpsilonGreedyDecay,
        Self::EpsilonGreedy,
        Self::ExploreFirst,
        Self::SeparateClassifiers,
        Self::SoftmaxExplorer,
    ];

    /// Configuration name of the strategy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActiveExplorer => "active_explorer",
            Self::AdaptiveGreedyThreshold => "adaptive_greedy_threshold",
            Self::AdaptiveGreedyWeighted => "adaptive_greedy_weighted",
            Self::AdaptiveGreedyPercentile => "adaptive_greedy_percentile",
            Self::BootstrappedTs => "bootstrapped_ts",
            Self::BootstrappedUcb => "bootstrapped_ucb",
            Self::EpsilonGreedyDecay => "epsilon_greedy_decay",
            Self::EpsilonGreedy => "epsilon_greedy",
            Self::ExploreFirst => "explore_first",
            Self::SeparateClassifiers => "separate_classifiers",
            Self::SoftmaxExplorer => "softmax_explorer",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_listed_once() {
        let names: std::collections::HashSet<&str> =
            PolicyKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), 11);
        let parsed: PolicyKind = serde_json::from_str("\"bootstrapped_ts\"").unwrap();
        assert_eq!(parsed, PolicyKind::BootstrappedTs);
    }

    #[test]
    fn kind_names_match_serde() {
        for kind in PolicyKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
