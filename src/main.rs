//! mimic-trainer CLI.
//!
//! Loads the configuration, opens the netlink channel and trains the
//! selected models, `--runs` times over.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use mimic_trainer::prelude::*;

#[derive(Parser)]
#[command(name = "mimic-trainer")]
#[command(version)]
#[command(about = "Train bandit policies that switch TCP congestion control at runtime")]
struct Cli {
    /// Configuration file (default: ./mimic-trainer.toml, then ~/.config/mimic-trainer/config.toml)
    #[arg(long, env = "MIMIC_TRAINER_CONFIG")]
    config: Option<PathBuf>,

    /// Train every configured model
    #[arg(long, conflicts_with = "models")]
    all: bool,

    /// Models to train, space or comma separated
    #[arg(long, num_args = 1.., value_delimiter = ' ')]
    models: Vec<String>,

    /// Warm-start from saved models and run retrain_episodes instead of train_episodes
    #[arg(long)]
    retrain: bool,

    /// Number of times the whole batch is repeated
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    runs: u32,

    /// Prefix of the communication session tag
    #[arg(long, default_value = "mimic")]
    trace: String,
}

impl Cli {
    fn selection(&self) -> ModelSelection {
        if self.all {
            ModelSelection::All
        } else {
            ModelSelection::Only(
                self.models
                    .iter()
                    .flat_map(|m| m.split(','))
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect(),
            )
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match mimic_trainer::config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let _guard = match init_logging(&config.logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    match run(&cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "trainer aborted");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every model run succeeded.
async fn run(cli: &Cli, config: TrainerConfig) -> Result<bool, Box<dyn std::error::Error>> {
    let selection = cli.selection();
    selection.resolve(&config)?;

    let channel = open_channel(&config)?;
    let communication = ProcessCommunication::new(&config.communication);
    let store = FileStore::from_config(&config.storage)?;
    let oracles = PolicyRegistry::new(config.nchoices(), &config.training);

    info!(
        storage = %store.base_dir().display(),
        protocols = ?config.protocols.names().collect::<Vec<_>>(),
        retrain = cli.retrain,
        runs = cli.runs,
        "trainer starting"
    );

    let mut orchestrator = TrainingOrchestrator::new(
        config,
        channel,
        Box::new(communication),
        Box::new(store),
        Box::new(oracles),
    )
    .with_trace(cli.trace.clone());

    let outcomes = tokio::select! {
        outcomes = orchestrator.run_all(&selection, cli.retrain, cli.runs as usize) => outcomes,
        signal = shutdown_signal() => {
            warn!(signal, "interrupted, tearing down the running session");
            orchestrator.shutdown().await;
            return Ok(false);
        }
    };
    orchestrator.close();
    let outcomes = outcomes?;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    info!(total = outcomes.len(), failed, "trainer finished");
    Ok(failed == 0)
}

/// Resolves on SIGINT or SIGTERM with the signal's name.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}

#[cfg(target_os = "linux")]
fn open_channel(config: &TrainerConfig) -> Result<Box<dyn KernelChannel>, ChannelError> {
    let channel = NetlinkChannel::open(
        &config.channel,
        config.training.num_fields_kernel,
        config.nchoices(),
    )?;
    Ok(Box::new(channel))
}

#[cfg(not(target_os = "linux"))]
fn open_channel(_config: &TrainerConfig) -> Result<Box<dyn KernelChannel>, ChannelError> {
    Err(ChannelError::unavailable("netlink requires Linux"))
}
