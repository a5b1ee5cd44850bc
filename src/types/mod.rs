//! Core type definitions for the trainer.
//!
//! This module contains the small domain types shared by every layer:
//! - Identity types (RunId)
//! - The action space (Action, ProtocolMap)

mod action;
mod run_id;

pub use action::{Action, ProtocolMap};
pub use run_id::RunId;
