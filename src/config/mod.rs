//! Configuration management for the trainer.
//!
//! Configuration is stored in TOML format. The search order is:
//! 1. an explicit `--config` path
//! 2. `./mimic-trainer.toml` (project-local)
//! 3. `~/.config/mimic-trainer/config.toml` (XDG config)
//!
//! # Usage
//!
//! ```rust,ignore
//! use mimic_trainer::config;
//!
//! let config = config::load(None)?;
//! let config = config::from_str(toml_content)?;
//! ```

mod file;
mod types;

pub use file::{from_path, from_str, load, search_paths};

pub use types::{
    ChannelConfig, CommunicationConfig, ModelConfig, StorageConfig, TrainerConfig,
    TrainingConfig, NETLINK_USER,
};
