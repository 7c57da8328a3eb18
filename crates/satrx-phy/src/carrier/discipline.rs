//! Scheduling disciplines: how a carrier scopes its active set and when it
//! resolves receptions.

use super::CarrierError;
use satrx_common::{CollisionModel, DisciplineConfig, SimTime};

/// Validated run-time form of [`DisciplineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Discipline {
    /// Resolve each burst at its own end; slots are isolated.
    PerSlot {
        /// Slot length, if slot indices are derived from arrival time.
        slot_duration: Option<SimTime>,
        /// Collision judgement.
        collision_model: CollisionModel,
    },
    /// Resolve all bursts of a frame at the frame boundary.
    PerFrame {
        /// Frame length.
        frame_duration: SimTime,
        /// SIC pass limit.
        max_sic_iterations: u32,
    },
    /// Buffer ended bursts and decode progressively inside a sliding window.
    PerWindow {
        /// Window length.
        window: SimTime,
        /// Step interval.
        step: SimTime,
        /// SIC pass limit.
        max_sic_iterations: u32,
    },
}

fn positive(field: &'static str, seconds: f64) -> Result<SimTime, CarrierError> {
    let t = SimTime::from_secs(seconds);
    if !seconds.is_finite() || t == SimTime::ZERO {
        return Err(CarrierError::InvalidDuration { field, seconds });
    }
    Ok(t)
}

impl Discipline {
    /// Validate a configuration.
    pub fn from_config(config: &DisciplineConfig) -> Result<Self, CarrierError> {
        match *config {
            DisciplineConfig::PerSlot {
                slot_duration_s,
                collision_model,
            } => {
                let slot_duration = slot_duration_s
                    .map(|s| positive("slot_duration_s", s))
                    .transpose()?;
                if let CollisionModel::ConstantProbability { probability } = collision_model {
                    if !(0.0..=1.0).contains(&probability) {
                        return Err(CarrierError::InvalidProbability {
                            field: "collision_model.probability",
                            value: probability,
                        });
                    }
                }
                Ok(Discipline::PerSlot {
                    slot_duration,
                    collision_model,
                })
            }
            DisciplineConfig::PerFrame {
                frame_duration_s,
                max_sic_iterations,
            } => Ok(Discipline::PerFrame {
                frame_duration: positive("frame_duration_s", frame_duration_s)?,
                max_sic_iterations: max_sic_iterations.max(1),
            }),
            DisciplineConfig::PerWindow {
                window_s,
                step_s,
                max_sic_iterations,
            } => Ok(Discipline::PerWindow {
                window: positive("window_s", window_s)?,
                step: positive("step_s", step_s)?,
                max_sic_iterations: max_sic_iterations.max(1),
            }),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Discipline::PerSlot { .. } => "per_slot",
            Discipline::PerFrame { .. } => "per_frame",
            Discipline::PerWindow { .. } => "per_window",
        }
    }

    /// Slot of a burst arriving at `start`. `None` outside per-slot.
    ///
    /// The transmitter's slot index wins; otherwise it is derived from the
    /// arrival time, and without a slot length every burst shares slot 0.
    pub fn slot_of(&self, assigned: Option<u64>, start: SimTime) -> Option<u64> {
        match self {
            Discipline::PerSlot { slot_duration, .. } => Some(
                assigned
                    .or_else(|| slot_duration.map(|d| start.as_micros() / d.as_micros()))
                    .unwrap_or(0),
            ),
            _ => None,
        }
    }

    /// Frame containing `start`. `None` outside per-frame.
    pub fn frame_of(&self, start: SimTime) -> Option<u64> {
        match self {
            Discipline::PerFrame { frame_duration, .. } => {
                Some(start.as_micros() / frame_duration.as_micros())
            }
            _ => None,
        }
    }

    /// End of a frame. Zero outside per-frame.
    pub fn frame_end(&self, frame: u64) -> SimTime {
        match self {
            Discipline::PerFrame { frame_duration, .. } => {
                SimTime::from_micros(frame.saturating_add(1).saturating_mul(frame_duration.as_micros()))
            }
            _ => SimTime::ZERO,
        }
    }
}
