//! # mimic-trainer: online congestion-control selection
//!
//! Trains contextual-bandit policies that switch the kernel's TCP congestion
//! control algorithm at runtime. A kernel module reports per-connection
//! statistics over netlink; the trainer reduces them to a state vector, lets
//! a policy pick a protocol, applies it, and rewards the policy with the
//! change in throughput, delay and loss it observes.
//!
//! ## Architecture
//!
//! - **Channel**: netlink link to the kernel module ([`channel::KernelChannel`])
//! - **Window**: bounded statistics history reduced to features ([`window::StateWindow`])
//! - **Reward**: pure scoring of state transitions ([`reward::reward`])
//! - **Oracle**: the learning policy ([`oracle::DecisionOracle`])
//! - **Episode**: fixed-cadence step loop ([`episode::EpisodeRunner`])
//! - **Orchestrator**: runs, sessions and artifacts ([`orchestrator::TrainingOrchestrator`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mimic_trainer::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = mimic_trainer::config::load(None)?;
//!     let channel = NetlinkChannel::open(
//!         &config.channel,
//!         config.training.num_fields_kernel,
//!         config.nchoices(),
//!     )?;
//!     let oracles = PolicyRegistry::new(config.nchoices(), &config.training);
//!     let mut orchestrator = TrainingOrchestrator::new(
//!         config.clone(),
//!         Box::new(channel),
//!         Box::new(ProcessCommunication::new(&config.communication)),
//!         Box::new(FileStore::from_config(&config.storage)?),
//!         Box::new(oracles),
//!     );
//!     orchestrator.run_all(&ModelSelection::All, false, 1).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod communication;
pub mod config;
pub mod episode;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod orchestrator;
pub mod persistence;
pub mod reward;
pub mod types;
pub mod window;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(target_os = "linux")]
    pub use crate::channel::NetlinkChannel;
    pub use crate::channel::{KernelChannel, StatField, StatRecord};
    pub use crate::communication::{Communication, ProcessCommunication};
    pub use crate::config::{ModelConfig, TrainerConfig, TrainingConfig};
    pub use crate::episode::{Episode, EpisodeMode, EpisodeRunner, EpisodeStatus, Transition};
    pub use crate::error::{
        ChannelError, CommunicationError, ConfigError, OracleError, PersistenceError, RunError,
    };
    pub use crate::logging::{init_logging, LoggingConfig, LoggingGuard};
    pub use crate::oracle::{DecisionOracle, OracleFactory, PolicyKind, PolicyRegistry};
    pub use crate::orchestrator::{ModelOutcome, ModelSelection, RunSummary, TrainingOrchestrator};
    pub use crate::persistence::{FileStore, Persistence, RunHistory};
    pub use crate::reward::reward;
    pub use crate::types::{Action, ProtocolMap, RunId};
    pub use crate::window::{FeatureVector, StateWindow};
}
