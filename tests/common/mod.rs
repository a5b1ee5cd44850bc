//! In-memory fakes for the trainer's seams.

#![allow(dead_code)]

use async_trait::async_trait;
use mimic_trainer::error::{CommunicationError, PersistenceError};
use mimic_trainer::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Kernel channel that answers every receive with a record after sleeping
/// through the whole timeout, so one receive happens per step.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    pub state: Arc<Mutex<ChannelState>>,
}

#[derive(Debug, Default)]
pub struct ChannelState {
    pub receives: usize,
    pub sent: Vec<Action>,
    /// 1-based receive numbers that report the kernel as unavailable.
    pub fail_on: Vec<usize>,
    pub closed: bool,
}

impl ScriptedChannel {
    pub fn failing_on(receives: impl IntoIterator<Item = usize>) -> Self {
        let channel = Self::default();
        channel.state.lock().unwrap().fail_on = receives.into_iter().collect();
        channel
    }

    pub fn receives(&self) -> usize {
        self.state.lock().unwrap().receives
    }
}

#[async_trait]
impl KernelChannel for ScriptedChannel {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<StatRecord>, ChannelError> {
        tokio::time::sleep(timeout).await;
        let mut state = self.state.lock().unwrap();
        state.receives += 1;
        let n = state.receives;
        if state.fail_on.contains(&n) {
            return Err(ChannelError::unavailable("module unloaded"));
        }
        let mut values = vec![0.0; StatField::COUNT];
        values[StatField::Delivered.index()] = (n % 7) as f64 * 10.0;
        values[StatField::RttUs.index()] = 20_000.0 + (n % 3) as f64 * 5_000.0;
        values[StatField::MinRttUs.index()] = 20_000.0;
        Ok(Some(StatRecord::new(Duration::from_millis(n as u64 * 200), values)))
    }

    async fn send(&mut self, action: Action) -> Result<(), ChannelError> {
        self.state.lock().unwrap().sent.push(action);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Records every start and stop.
#[derive(Debug, Clone, Default)]
pub struct RecordingCommunication {
    pub events: Arc<Mutex<Vec<String>>>,
    running: bool,
}

impl RecordingCommunication {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Communication for RecordingCommunication {
    async fn start(&mut self, tag: &str) -> Result<(), CommunicationError> {
        if self.running {
            return Err(CommunicationError::already_started(tag));
        }
        self.running = true;
        self.events.lock().unwrap().push(format!("start:{tag}"));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CommunicationError> {
        if !self.running {
            return Err(CommunicationError::not_started());
        }
        self.running = false;
        self.events.lock().unwrap().push("stop".to_string());
        Ok(())
    }
}

/// Persistence kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<StoreState>>,
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub histories: Vec<RunHistory>,
    /// Last snapshot per model and the `reset` flag it was saved with.
    pub models: HashMap<String, (serde_json::Value, bool)>,
    /// Every `save_model` fails as if the disk were full.
    pub fail_model_saves: bool,
    pub discarded: usize,
}

impl MemoryStore {
    pub fn failing_model_saves() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().fail_model_saves = true;
        store
    }

    pub fn discarded(&self) -> usize {
        self.state.lock().unwrap().discarded
    }

    pub fn histories(&self) -> Vec<RunHistory> {
        self.state.lock().unwrap().histories.clone()
    }

    pub fn model(&self, model: &str) -> Option<(serde_json::Value, bool)> {
        self.state.lock().unwrap().models.get(model).cloned()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn save_history(&self, history: &RunHistory) -> Result<(), PersistenceError> {
        self.state.lock().unwrap().histories.push(history.clone());
        Ok(())
    }

    async fn save_model(
        &self,
        model: &str,
        snapshot: &serde_json::Value,
        reset: bool,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_model_saves {
            return Err(PersistenceError::io(format!("models/{model}.json"), "disk full"));
        }
        state
            .models
            .insert(model.to_string(), (snapshot.clone(), reset));
        Ok(())
    }

    async fn discard_history(&self, history: &RunHistory) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().unwrap();
        state.histories.retain(|h| h.run_id != history.run_id);
        state.discarded += 1;
        Ok(())
    }

    async fn load_model(&self, model: &str) -> Result<serde_json::Value, PersistenceError> {
        self.model(model)
            .map(|(snapshot, _)| snapshot)
            .ok_or_else(|| PersistenceError::not_found(model))
    }
}

/// Per-model call counts observed by [`CountingFactory`] oracles.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OracleCalls {
    pub choose: usize,
    pub update: usize,
    pub restored: Option<serde_json::Value>,
}

/// Oracle that always picks action 1 and counts calls.
#[derive(Debug)]
pub struct CountingOracle {
    calls: Arc<Mutex<OracleCalls>>,
    fail_update_at: Option<usize>,
}

impl DecisionOracle for CountingOracle {
    fn name(&self) -> &str {
        "counting"
    }

    fn choose(&mut self, _state: &FeatureVector) -> Result<Action, OracleError> {
        self.calls.lock().unwrap().choose += 1;
        Ok(Action::new(1))
    }

    fn update(
        &mut self,
        _state: &FeatureVector,
        _action: Action,
        _reward: f64,
    ) -> Result<(), OracleError> {
        let mut calls = self.calls.lock().unwrap();
        calls.update += 1;
        if self.fail_update_at == Some(calls.update) {
            return Err(OracleError::failed("counting", "solver diverged"));
        }
        Ok(())
    }

    fn export(&self) -> Result<serde_json::Value, OracleError> {
        Ok(json!({ "updates": self.calls.lock().unwrap().update }))
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<(), OracleError> {
        self.calls.lock().unwrap().restored = Some(snapshot);
        Ok(())
    }
}

/// Builds [`CountingOracle`]s; models listed in `fail_update_at` fail on
/// that update.
#[derive(Debug, Clone, Default)]
pub struct CountingFactory {
    pub calls: Arc<Mutex<HashMap<String, Arc<Mutex<OracleCalls>>>>>,
    pub fail_update_at: HashMap<String, usize>,
}

impl CountingFactory {
    pub fn failing(model: &str, at: usize) -> Self {
        Self {
            fail_update_at: HashMap::from([(model.to_string(), at)]),
            ..Self::default()
        }
    }

    pub fn calls(&self, model: &str) -> OracleCalls {
        self.calls
            .lock()
            .unwrap()
            .get(model)
            .map(|c| c.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

impl OracleFactory for CountingFactory {
    fn create(
        &self,
        model: &str,
        _config: &ModelConfig,
    ) -> Result<Box<dyn DecisionOracle>, OracleError> {
        let calls = Arc::new(Mutex::new(OracleCalls::default()));
        self.calls
            .lock()
            .unwrap()
            .insert(model.to_string(), Arc::clone(&calls));
        Ok(Box::new(CountingOracle {
            calls,
            fail_update_at: self.fail_update_at.get(model).copied(),
        }))
    }
}

/// Small, fast training shape: `steps` steps of 200ms.
pub fn training(steps: usize, train: usize, test: usize) -> TrainingConfig {
    TrainingConfig {
        steps_per_episode: steps,
        step_wait_seconds: 0.2,
        train_episodes: train,
        test_episodes: test,
        retrain_episodes: 1,
        ..TrainingConfig::default()
    }
}

pub fn config(training: TrainingConfig, models: &[&str]) -> TrainerConfig {
    models.iter().fold(TrainerConfig::new(training), |config, name| {
        config.with_model(*name, ModelConfig::new(PolicyKind::EpsilonGreedy))
    })
}

/// Handles onto the fakes wired into an orchestrator.
pub struct Harness {
    pub orchestrator: TrainingOrchestrator,
    pub channel: ScriptedChannel,
    pub communication: RecordingCommunication,
    pub store: MemoryStore,
    pub oracles: CountingFactory,
}

pub fn harness(config: TrainerConfig, channel: ScriptedChannel, oracles: CountingFactory) -> Harness {
    harness_with_store(config, channel, oracles, MemoryStore::default())
}

pub fn harness_with_store(
    config: TrainerConfig,
    channel: ScriptedChannel,
    oracles: CountingFactory,
    store: MemoryStore,
) -> Harness {
    let communication = RecordingCommunication::default();
    let orchestrator = TrainingOrchestrator::new(
        config,
        Box::new(channel.clone()),
        Box::new(communication.clone()),
        Box::new(store.clone()),
        Box::new(oracles.clone()),
    )
    .with_trace("wired");
    Harness {
        orchestrator,
        channel,
        communication,
        store,
        oracles,
    }
}
