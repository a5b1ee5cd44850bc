//! Run identifier type using TypeID format.
//!
//! RunId names one train-then-test cycle of one model. It is time-sortable,
//! so history files for a model list in the order they were produced.
//! Format: `run_01h455vb4pex5vsknk084sn02q`

use mti::prelude::*;
use serde::{Serialize, Serializer};
use std::fmt;

/// Identifier of one run, written into its history file name and body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(MagicTypeId);

impl RunId {
    /// The TypeID prefix for run identifiers.
    pub const PREFIX: &'static str = "run";

    /// Creates a new run ID with a fresh UUIDv7.
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RunId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_run_prefix() {
        assert!(RunId::new().to_string().starts_with("run_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn serializes_as_display_string() {
        let id = RunId::new();
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{id}\""));
    }
}
