//! Reward derived from two consecutive state vectors.
//!
//! With `thr` the window mean of delivered segments, `latency` the ratio of
//! minimum to smoothed RTT (1 when no RTT is known) and `loss` the lost share
//! of delivered plus lost segments:
//!
//! ```text
//! gain   = (thr_after - thr_before) / max(thr_before, thr_after, 1)
//! reward = delta * gain + (1 - delta) * latency_after - loss_after
//! ```
//!
//! `delta` trades throughput gain against queueing delay. The function is
//! pure and total: every finite input yields a finite reward, and anything
//! else maps to 0.

use crate::channel::StatField;
use crate::window::FeatureVector;

/// Throughput proxy: mean delivered segments per sample.
#[must_use]
pub fn throughput(state: &FeatureVector) -> f64 {
    state.mean(StatField::Delivered).max(0.0)
}

/// Latency proxy in `(0, 1]`: 1 means no queueing delay above the path minimum.
#[must_use]
pub fn latency_ratio(state: &FeatureVector) -> f64 {
    let rtt = state.mean(StatField::RttUs);
    if rtt <= 0.0 {
        return 1.0;
    }
    (state.mean(StatField::MinRttUs) / rtt).clamp(0.0, 1.0)
}

/// Loss proxy in `[0, 1]`.
#[must_use]
pub fn loss_ratio(state: &FeatureVector) -> f64 {
    let delivered = state.mean(StatField::Delivered).max(0.0);
    let lost = state.mean(StatField::Lost).max(0.0);
    if delivered + lost <= 0.0 {
        return 0.0;
    }
    lost / (delivered + lost)
}

/// Scalar reward for the transition `before → after`.
#[must_use]
pub fn reward(before: &FeatureVector, after: &FeatureVector, delta: f64) -> f64 {
    let thr_before = throughput(before);
    let thr_after = throughput(after);
    let gain = (thr_after - thr_before) / thr_before.max(thr_after).max(1.0);

    let value = delta * gain + (1.0 - delta) * latency_ratio(after) - loss_ratio(after);
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
