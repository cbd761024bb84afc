//! Per-epoch learning rate schedules.
//!
//! Every schedule is a pure function of the epoch and the history of
//! per-epoch losses, so a resumed run recomputes the same rates.

use serde::{Deserialize, Serialize};

/// Learning rate schedule for one parameter group.
///
/// Serialized with the field names used in DeepSDF `specs.json` files, e.g.
/// `{"Type": "Step", "Initial": 0.0005, "Interval": 500, "Factor": 0.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all_fields = "PascalCase")]
pub enum LearningRateSchedule {
    /// Fixed rate.
    Constant {
        /// Learning rate.
        value: f64,
    },
    /// `initial * factor^(epoch / interval)`.
    Step {
        /// Rate at epoch 0.
        initial: f64,
        /// Epochs between decays.
        interval: usize,
        /// Multiplier per decay.
        factor: f64,
    },
    /// Linear ramp from `initial` to `final_value` over `length` epochs.
    Warmup {
        /// Rate at epoch 0.
        initial: f64,
        /// Rate after the ramp.
        #[serde(rename = "Final")]
        final_value: f64,
        /// Ramp length in epochs.
        length: usize,
    },
    /// Multiply by `factor` once the epoch loss has not improved by a
    /// relative `threshold` for more than `patience` epochs.
    StepOnPlateau {
        /// Starting rate.
        initial: f64,
        /// Multiplier per reduction.
        factor: f64,
        /// Epochs without improvement tolerated.
        patience: usize,
        /// Relative improvement that resets the patience counter.
        threshold: f64,
        /// Lower bound on the rate.
        min_lr: f64,
    },
}

impl LearningRateSchedule {
    /// Learning rate for `epoch` given the losses of all earlier epochs.
    ///
    /// `epoch_losses[i]` is the mean loss of epoch `i + 1`; entries at or
    /// after `epoch` are ignored.
    pub fn learning_rate(&self, epoch: usize, epoch_losses: &[f32]) -> f64 {
        match *self {
            Self::Constant { value } => value,
            Self::Step {
                initial,
                interval,
                factor,
            } => initial * factor.powi((epoch / interval.max(1)) as i32),
            Self::Warmup {
                initial,
                final_value,
                length,
            } => {
                if epoch > length || length == 0 {
                    final_value
                } else {
                    initial + (final_value - initial) * epoch as f64 / length as f64
                }
            }
            Self::StepOnPlateau {
                initial,
                factor,
                patience,
                threshold,
                min_lr,
            } => {
                let seen = epoch.saturating_sub(1).min(epoch_losses.len());
                let mut lr = initial;
                let mut best = f64::INFINITY;
                let mut bad_epochs = 0usize;
                for &loss in &epoch_losses[..seen] {
                    let loss = loss as f64;
                    if loss.is_finite() && loss < best * (1.0 - threshold) {
                        best = loss;
                        bad_epochs = 0;
                    } else {
                        bad_epochs += 1;
                        if bad_epochs > patience {
                            lr = (lr * factor).max(min_lr);
                            bad_epochs = 0;
                        }
                    }
                }
                lr
            }
        }
    }

    /// Rate before any decay.
    pub fn initial(&self) -> f64 {
        match *self {
            Self::Constant { value } => value,
            Self::Step { initial, .. }
            | Self::Warmup { initial, .. }
            | Self::StepOnPlateau { initial, .. } => initial,
        }
    }

    /// Validate the schedule.
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(format!("{name} must be positive, got {v}"))
            }
        };
        match *self {
            Self::Constant { value } => positive("learning rate", value),
            Self::Step {
                initial,
                interval,
                factor,
            } => {
                positive("initial learning rate", initial)?;
                positive("decay factor", factor)?;
                if interval == 0 {
                    return Err("step interval must be positive".to_string());
                }
                Ok(())
            }
            Self::Warmup {
                initial,
                final_value,
                ..
            } => {
                if initial < 0.0 {
                    return Err("warmup initial rate must be non-negative".to_string());
                }
                positive("final learning rate", final_value)
            }
            Self::StepOnPlateau {
                initial,
                factor,
                threshold,
                min_lr,
                ..
            } => {
                positive("initial learning rate", initial)?;
                if !(factor > 0.0 && factor < 1.0) {
                    return Err("plateau factor must be in (0, 1)".to_string());
                }
                if !(0.0..1.0).contains(&threshold) {
                    return Err("plateau threshold must be in [0, 1)".to_string());
                }
                if min_lr < 0.0 {
                    return Err("min_lr must be non-negative".to_string());
                }
                Ok(())
            }
        }
    }
}
