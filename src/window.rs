//! Bounded statistics window and its reduction to a feature vector.
//!
//! The window keeps the records of the last `window_len` seconds. A snapshot
//! takes the most recent `jiffies_per_state` of them as raw slots (oldest
//! first, leading slots zero-filled when fewer are present) and reduces them
//! to up to three aggregate blocks, each `num_fields_kernel` wide:
//!
//! | block | value per field                       |
//! |-------|---------------------------------------|
//! | 0     | mean over the present slots           |
//! | 1     | value in the last slot                |
//! | 2     | last slot minus first present slot    |
//!
//! The number of blocks is `num_features / num_fields_kernel`. An empty
//! window reduces to all zeros, so the loop stays live under data loss.

use crate::channel::{StatField, StatRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Fixed-length state vector handed to the decision oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    /// Wraps raw feature values.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// An all-zero vector of `len` features.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// Feature values.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the vector has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Window mean of a named kernel field (block 0), or 0 if absent.
    #[must_use]
    pub fn mean(&self, field: StatField) -> f64 {
        self.0.get(field.index()).copied().unwrap_or(0.0)
    }
}

/// Time-bounded sequence of statistics records.
#[derive(Debug, Clone)]
pub struct StateWindow {
    records: VecDeque<StatRecord>,
    window: Duration,
    jiffies_per_state: usize,
    num_fields: usize,
    num_features: usize,
}

impl StateWindow {
    /// Creates an empty window.
    ///
    /// `num_features` must be 1, 2 or 3 times `num_fields`; configuration
    /// validation guarantees this for loaded configs.
    #[must_use]
    pub fn new(
        window: Duration,
        jiffies_per_state: usize,
        num_fields: usize,
        num_features: usize,
    ) -> Self {
        Self {
            records: VecDeque::new(),
            window,
            jiffies_per_state,
            num_fields,
            num_features,
        }
    }

    /// Adds a record and evicts everything older than the window span,
    /// measured from the newest timestamp seen.
    ///
    /// Records stay ordered by timestamp. A late record that already falls
    /// outside the span is dropped.
    pub fn push(&mut self, record: StatRecord) {
        if let Some(back) = self.records.back() {
            if back.timestamp().saturating_sub(record.timestamp()) > self.window {
                return;
            }
        }
        let pos = self
            .records
            .partition_point(|r| r.timestamp() <= record.timestamp());
        self.records.insert(pos, record);

        let Some(latest) = self.newest() else {
            return;
        };
        while let Some(front) = self.records.front() {
            if latest.saturating_sub(front.timestamp()) > self.window {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of records currently inside the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the window holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Timestamp of the oldest retained record.
    #[must_use]
    pub fn oldest(&self) -> Option<Duration> {
        self.records.front().map(StatRecord::timestamp)
    }

    /// Timestamp of the newest retained record.
    #[must_use]
    pub fn newest(&self) -> Option<Duration> {
        self.records.back().map(StatRecord::timestamp)
    }

    /// Raw slot matrix, `jiffies_per_state` rows of `num_fields` values,
    /// oldest first. Missing leading rows are zeros.
    #[must_use]
    pub fn raw_slots(&self) -> Vec<Vec<f64>> {
        let present = self.records.len().min(self.jiffies_per_state);
        let missing = self.jiffies_per_state - present;

        let mut rows = vec![vec![0.0; self.num_fields]; missing];
        rows.extend(
            self.records
                .iter()
                .skip(self.records.len() - present)
                .map(|record| self.row(record)),
        );
        rows
    }

    fn row(&self, record: &StatRecord) -> Vec<f64> {
        let mut row = vec![0.0; self.num_fields];
        for (slot, value) in row.iter_mut().zip(record.values()) {
            *slot = *value;
        }
        row
    }

    /// Deterministic reduction of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> FeatureVector {
        let present = self.records.len().min(self.jiffies_per_state);
        let slots = self.raw_slots();
        let filled = &slots[self.jiffies_per_state - present..];
        let blocks = (self.num_features / self.num_fields.max(1)).clamp(1, 3);

        let mut features = Vec::with_capacity(self.num_features);
        for block in 0..blocks {
            for field in 0..self.num_fields {
                let value = match (block, filled.first(), filled.last()) {
                    (_, None, _) | (_, _, None) => 0.0,
                    (0, _, _) => {
                        filled.iter().map(|row| row[field]).sum::<f64>() / filled.len() as f64
                    }
                    (1, _, Some(last)) => last[field],
                    (_, Some(first), Some(last)) => last[field] - first[field],
                };
                features.push(value);
            }
        }
        features.resize(self.num_features, 0.0);

        FeatureVector(features)
    }
}
