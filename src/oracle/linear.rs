//! Per-arm online linear models with pluggable exploration.
//!
//! Every action owns a linear reward estimator trained by normalized
//! least-mean-squares. Features are compressed with a signed `ln(1 + |x|)`
//! first, because raw kernel counters span several orders of magnitude.

use super::{DecisionOracle, PolicyKind};
use crate::config::ModelConfig;
use crate::error::OracleError;
use crate::types::Action;
use crate::window::FeatureVector;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const DEFAULT_EPSILON: f64 = 0.1;
const DEFAULT_DECAY: f64 = 0.999;
const DEFAULT_EXPLORE_ROUNDS: u64 = 100;
const DEFAULT_TEMPERATURE: f64 = 0.2;
const DEFAULT_THRESHOLD: f64 = 0.0;
const DEFAULT_PERCENTILE: f64 = 30.0;
const DEFAULT_HISTORY: usize = 100;
const DEFAULT_ACTIVE_PROB: f64 = 0.15;
const DEFAULT_ACTIVE_DECAY: f64 = 0.9997;

/// Observations an arm needs before its own estimate replaces prior draws.
const PRIOR_PULLS: u64 = 2;

/// Squared prediction error assumed for an arm that was never pulled.
const PRIOR_VARIANCE: f64 = 1.0;

/// How a [`LinearBandit`] trades exploitation against exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Exploration {
    /// Uniform action with probability `epsilon`, greedy otherwise.
    EpsilonGreedy { epsilon: f64 },
    /// Like `EpsilonGreedy`, with `epsilon *= decay` after every update.
    EpsilonGreedyDecay { epsilon: f64, decay: f64 },
    /// Uniform for the first `rounds` decisions, greedy afterwards.
    ExploreFirst { rounds: u64 },
    /// Boltzmann sampling over predicted rewards.
    Softmax { temperature: f64 },
    /// Greedy when the best prediction reaches `threshold`, uniform otherwise.
    AdaptiveThreshold { threshold: f64 },
    /// Greedy when the best prediction reaches `threshold`, Boltzmann
    /// sampling otherwise.
    AdaptiveWeighted { threshold: f64, temperature: f64 },
    /// Greedy when the best prediction reaches the given percentile of the
    /// last `history` best predictions, uniform otherwise.
    AdaptivePercentile { percentile: f64, history: usize },
    /// Greedy over predictions perturbed by normal draws scaled to each
    /// arm's residual spread.
    Thompson,
    /// With probability `explore_prob` the arm with the widest spread,
    /// greedy otherwise. `explore_prob *= decay` after every update.
    Active { explore_prob: f64, decay: f64 },
    /// Prediction plus a confidence bonus shrinking with the arm's pulls.
    Ucb,
    /// Greedy over arms, with random prior scores for rarely pulled arms.
    SeparatePriors,
}

impl Exploration {
    /// Exploration for `config.policy`, filling unset hyperparameters with
    /// defaults.
    #[must_use]
    pub fn from_config(config: &ModelConfig) -> Self {
        let epsilon = config.epsilon.unwrap_or(DEFAULT_EPSILON);
        match config.policy {
            PolicyKind::EpsilonGreedy => Self::EpsilonGreedy { epsilon },
            PolicyKind::EpsilonGreedyDecay => Self::EpsilonGreedyDecay {
                epsilon,
                decay: config.decay.unwrap_or(DEFAULT_DECAY),
            },
            PolicyKind::ExploreFirst => Self::ExploreFirst {
                rounds: config
                    .explore_rounds
                    .map_or(DEFAULT_EXPLORE_ROUNDS, |r| r as u64),
            },
            PolicyKind::SoftmaxExplorer => Self::Softmax {
                temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            },
            PolicyKind::AdaptiveGreedyThreshold => Self::AdaptiveThreshold {
                threshold: config.threshold.unwrap_or(DEFAULT_THRESHOLD),
            },
            PolicyKind::AdaptiveGreedyWeighted => Self::AdaptiveWeighted {
                threshold: config.threshold.unwrap_or(DEFAULT_THRESHOLD),
                temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            },
            PolicyKind::AdaptiveGreedyPercentile => Self::AdaptivePercentile {
                percentile: config.percentile.unwrap_or(DEFAULT_PERCENTILE),
                history: config.history.unwrap_or(DEFAULT_HISTORY),
            },
            PolicyKind::ActiveExplorer => Self::Active {
                explore_prob: config.epsilon.unwrap_or(DEFAULT_ACTIVE_PROB),
                decay: config.decay.unwrap_or(DEFAULT_ACTIVE_DECAY),
            },
            PolicyKind::BootstrappedTs => Self::Thompson,
            PolicyKind::BootstrappedUcb => Self::Ucb,
            PolicyKind::SeparateClassifiers => Self::SeparatePriors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArmModel {
    weights: Vec<f64>,
    bias: f64,
    pulls: u64,
    /// Running mean of squared prediction errors, prior included.
    #[serde(default = "prior_variance")]
    residual: f64,
}

fn prior_variance() -> f64 {
    PRIOR_VARIANCE
}

impl ArmModel {
    fn new(num_features: usize) -> Self {
        Self {
            weights: vec![0.0; num_features],
            bias: 0.0,
            pulls: 0,
            residual: PRIOR_VARIANCE,
        }
    }

    /// Standard error of the estimate.
    fn spread(&self) -> f64 {
        (self.residual / (self.pulls + 1) as f64).sqrt()
    }

    fn predict(&self, x: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }

    fn fit(&mut self, x: &[f64], reward: f64, lr: f64) {
        let error = reward - self.predict(x);
        self.residual += (error * error - self.residual) / (self.pulls + 2) as f64;
        let norm = 1.0 + x.iter().map(|v| v * v).sum::<f64>();
        let step = lr * error / norm;
        self.bias += step;
        for (w, v) in self.weights.iter_mut().zip(x) {
            *w += step * v;
        }
        self.pulls += 1;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    policy: PolicyKind,
    num_features: usize,
    exploration: Exploration,
    decisions: u64,
    arms: Vec<ArmModel>,
    #[serde(default)]
    recent_best: VecDeque<f64>,
}

fn compress(state: &FeatureVector) -> Vec<f64> {
    state
        .as_slice()
        .iter()
        .map(|v| v.signum() * v.abs().ln_1p())
        .collect()
}

fn argmax(scores: &[f64]) -> usize {
    let mut best = 0;
    for (i, score) in scores.iter().enumerate().skip(1) {
        if score.total_cmp(&scores[best]).is_gt() {
            best = i;
        }
    }
    best
}

/// Nearest-rank percentile, `p` in `[0, 100]`.
fn percentile(values: &VecDeque<f64>, p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let rank = ((sorted.len() - 1) as f64 * p / 100.0).round() as usize;
    Some(sorted[rank.min(sorted.len() - 1)])
}

/// Contextual bandit over `nchoices` actions.
#[derive(Debug, Clone)]
pub struct LinearBandit {
    policy: PolicyKind,
    exploration: Exploration,
    arms: Vec<ArmModel>,
    num_features: usize,
    lr: f64,
    decisions: u64,
    /// Best predictions of recent decisions (percentile thresholding).
    recent_best: VecDeque<f64>,
    seed: u64,
    rng: ChaCha8Rng,
}

impl LinearBandit {
    /// Creates an untrained bandit.
    #[must_use]
    pub fn new(
        policy: PolicyKind,
        exploration: Exploration,
        nchoices: usize,
        num_features: usize,
        lr: f64,
        seed: u64,
    ) -> Self {
        Self {
            policy,
            exploration,
            arms: vec![ArmModel::new(num_features); nchoices],
            num_features,
            lr,
            decisions: 0,
            recent_best: VecDeque::new(),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Current exploration settings, including any decayed epsilon.
    #[must_use]
    pub fn exploration(&self) -> &Exploration {
        &self.exploration
    }

    /// Number of `choose` calls so far.
    #[must_use]
    pub fn decisions(&self) -> u64 {
        self.decisions
    }

    /// Predicted reward of every action for `state`.
    ///
    /// # Errors
    ///
    /// Returns a dimension mismatch if `state` has the wrong length.
    pub fn predict(&self, state: &FeatureVector) -> Result<Vec<f64>, OracleError> {
        self.check_dimension(state)?;
        let x = compress(state);
        Ok(self.arms.iter().map(|arm| arm.predict(&x)).collect())
    }

    fn check_dimension(&self, state: &FeatureVector) -> Result<(), OracleError> {
        if state.len() == self.num_features {
            Ok(())
        } else {
            Err(OracleError::dimension_mismatch(
                self.policy.as_str(),
                self.num_features,
                state.len(),
            ))
        }
    }

    fn uniform(&mut self) -> usize {
        self.rng.gen_range(0..self.arms.len())
    }

    fn softmax(&mut self, scores: &[f64], temperature: f64) -> Result<usize, OracleError> {
        let top = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = scores
            .iter()
            .map(|s| ((s - top) / temperature).exp())
            .collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| OracleError::failed(self.policy.as_str(), e.to_string()))?;
        Ok(dist.sample(&mut self.rng))
    }

    fn ucb(&self, scores: &[f64]) -> usize {
        if let Some(untried) = self.arms.iter().position(|arm| arm.pulls == 0) {
            return untried;
        }
        let total = self.arms.iter().map(|arm| arm.pulls).sum::<u64>() as f64;
        let bounded: Vec<f64> = scores
            .iter()
            .zip(&self.arms)
            .map(|(s, arm)| s + (2.0 * total.ln() / arm.pulls as f64).sqrt())
            .collect();
        argmax(&bounded)
    }
}

impl DecisionOracle for LinearBandit {
    fn name(&self) -> &str {
        self.policy.as_str()
    }

    fn choose(&mut self, state: &FeatureVector) -> Result<Action, OracleError> {
        if self.arms.is_empty() {
            return Err(OracleError::failed(self.policy.as_str(), "no actions"));
        }
        let scores = self.predict(state)?;
        self.decisions += 1;

        let index = match self.exploration.clone() {
            Exploration::EpsilonGreedy { epsilon }
            | Exploration::EpsilonGreedyDecay { epsilon, .. } => {
                if self.rng.gen::<f64>() < epsilon {
                    self.uniform()
                } else {
                    argmax(&scores)
                }
            }
            Exploration::ExploreFirst { rounds } => {
                if self.decisions <= rounds {
                    self.uniform()
                } else {
                    argmax(&scores)
                }
            }
            Exploration::Softmax { temperature } => self.softmax(&scores, temperature)?,
            Exploration::AdaptiveThreshold { threshold } => {
                let best = argmax(&scores);
                if scores[best] >= threshold {
                    best
                } else {
                    self.uniform()
                }
            }
            Exploration::AdaptiveWeighted {
                threshold,
                temperature,
            } => {
                let best = argmax(&scores);
                if scores[best] >= threshold {
                    best
                } else {
                    self.softmax(&scores, temperature)?
                }
            }
            Exploration::AdaptivePercentile {
                percentile: p,
                history,
            } => {
                let best = argmax(&scores);
                let threshold = percentile(&self.recent_best, p);
                while self.recent_best.len() >= history.max(1) {
                    self.recent_best.pop_front();
                }
                self.recent_best.push_back(scores[best]);
                match threshold {
                    Some(t) if scores[best] >= t => best,
                    _ => self.uniform(),
                }
            }
            Exploration::Thompson => {
                let mut drawn = scores;
                for (score, arm) in drawn.iter_mut().zip(&self.arms) {
                    let z: f64 = self.rng.sample(StandardNormal);
                    *score += arm.spread() * z;
                }
                argmax(&drawn)
            }
            Exploration::Active { explore_prob, .. } => {
                if self.rng.gen::<f64>() < explore_prob {
                    let spreads: Vec<f64> = self.arms.iter().map(ArmModel::spread).collect();
                    argmax(&spreads)
                } else {
                    argmax(&scores)
                }
            }
            Exploration::Ucb => self.ucb(&scores),
            Exploration::SeparatePriors => {
                let mut drawn = scores;
                for (score, arm) in drawn.iter_mut().zip(&self.arms) {
                    if arm.pulls < PRIOR_PULLS {
                        *score = self.rng.gen::<f64>();
                    }
                }
                argmax(&drawn)
            }
        };

        Ok(Action::new(index))
    }

    fn update(
        &mut self,
        state: &FeatureVector,
        action: Action,
        reward: f64,
    ) -> Result<(), OracleError> {
        let nchoices = self.arms.len();
        if action.index() >= nchoices {
            return Err(OracleError::invalid_action(
                self.policy.as_str(),
                action.index(),
                nchoices,
            ));
        }
        self.check_dimension(state)?;
        if !reward.is_finite() {
            return Err(OracleError::failed(
                self.policy.as_str(),
                format!("reward {reward} is not finite"),
            ));
        }

        let x = compress(state);
        self.arms[action.index()].fit(&x, reward, self.lr);

        match &mut self.exploration {
            Exploration::EpsilonGreedyDecay { epsilon, decay } => *epsilon *= *decay,
            Exploration::Active {
                explore_prob,
                decay,
            } => *explore_prob *= *decay,
            _ => {}
        }
        Ok(())
    }

    fn export(&self) -> Result<serde_json::Value, OracleError> {
        let snapshot = Snapshot {
            policy: self.policy,
            num_features: self.num_features,
            exploration: self.exploration.clone(),
            decisions: self.decisions,
            arms: self.arms.clone(),
            recent_best: self.recent_best.clone(),
        };
        serde_json::to_value(snapshot)
            .map_err(|e| OracleError::snapshot(self.policy.as_str(), e.to_string()))
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<(), OracleError> {
        let name = self.policy.as_str();
        let snapshot: Snapshot = serde_json::from_value(snapshot)
            .map_err(|e| OracleError::snapshot(name, e.to_string()))?;

        if snapshot.policy != self.policy {
            return Err(OracleError::snapshot(
                name,
                format!("snapshot was taken from {}", snapshot.policy),
            ));
        }
        if snapshot.num_features != self.num_features || snapshot.arms.len() != self.arms.len() {
            return Err(OracleError::snapshot(
                name,
                format!(
                    "snapshot has {} actions over {} features, expected {} over {}",
                    snapshot.arms.len(),
                    snapshot.num_features,
                    self.arms.len(),
                    self.num_features
                ),
            ));
        }
        if snapshot
            .arms
            .iter()
            .any(|arm| arm.weights.len() != self.num_features)
        {
            return Err(OracleError::snapshot(name, "arm weights have the wrong length"));
        }

        self.exploration = snapshot.exploration;
        self.decisions = snapshot.decisions;
        self.arms = snapshot.arms;
        self.recent_best = snapshot.recent_best;
        self.rng = ChaCha8Rng::seed_from_u64(self.seed ^ self.decisions);
        Ok(())
    }
}
