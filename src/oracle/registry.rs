//! Construction of oracles from model configuration.

use super::{DecisionOracle, Exploration, LinearBandit};
use crate::config::{ModelConfig, TrainingConfig};
use crate::error::OracleError;
use std::fmt;

/// Builds a fresh oracle for a named model.
pub trait OracleFactory: Send + Sync + fmt::Debug {
    /// Creates an untrained oracle for `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model's strategy cannot be instantiated.
    fn create(
        &self,
        model: &str,
        config: &ModelConfig,
    ) -> Result<Box<dyn DecisionOracle>, OracleError>;
}

/// Factory for the built-in strategies.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    nchoices: usize,
    num_features: usize,
    lr: f64,
    seed: u64,
}

impl PolicyRegistry {
    /// Creates a registry for `nchoices` actions and the training shape.
    #[must_use]
    pub fn new(nchoices: usize, training: &TrainingConfig) -> Self {
        Self {
            nchoices,
            num_features: training.num_features,
            lr: training.lr,
            seed: training.seed,
        }
    }
}

impl OracleFactory for PolicyRegistry {
    fn create(
        &self,
        model: &str,
        config: &ModelConfig,
    ) -> Result<Box<dyn DecisionOracle>, OracleError> {
        if self.nchoices == 0 {
            return Err(OracleError::failed(
                config.policy.as_str(),
                format!("model '{model}' has no actions to choose from"),
            ));
        }
        tracing::debug!(
            model,
            policy = %config.policy,
            nchoices = self.nchoices,
            num_features = self.num_features,
            "building oracle"
        );
        Ok(Box::new(LinearBandit::new(
            config.policy,
            Exploration::from_config(config),
            self.nchoices,
            self.num_features,
            self.lr,
            self.seed,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::PolicyKind;
    use crate::window::FeatureVector;

    #[test]
    fn builds_every_policy() {
        let training = TrainingConfig::default();
        let registry = PolicyRegistry::new(3, &training);
        let state = FeatureVector::zeros(training.num_features);
        for kind in PolicyKind::ALL {
            let mut oracle = registry.create(kind.as_str(), &ModelConfig::new(kind)).unwrap();
            assert_eq!(oracle.name(), kind.as_str());
            assert!(oracle.choose(&state).unwrap().index() < 3);
        }
    }

    #[test]
    fn zero_choices_is_an_error() {
        let registry = PolicyRegistry::new(0, &TrainingConfig::default());
        let config = ModelConfig::new(PolicyKind::EpsilonGreedy);
        assert!(registry.create("m", &config).is_err());
    }
}
