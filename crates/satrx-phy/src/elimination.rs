//! Interference elimination strategies.
//!
//! A strategy is picked once per carrier from [`EliminationConfig`] and then
//! applied to every burst. Strategies are pure: for fixed inputs the returned
//! Es/No is reproducible bit for bit and no random numbers are drawn.

use crate::interference::{InterferenceProfile, Interferer, TimeWindow};
use satrx_common::EliminationConfig;
use std::fmt::Debug;
use tracing::trace;

/// Cancellation of known interferers from a burst's interference profile.
pub trait InterferenceElimination: Send + Sync + Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fraction of the interferer's power left behind after cancellation.
    fn remaining_fraction(&self, interferer: &Interferer) -> f64;

    /// Cancel one interferer within `window`. Returns `true` if any
    /// fragment changed.
    fn eliminate_interference(
        &self,
        profile: &mut InterferenceProfile,
        interferer: &Interferer,
        regenerative: bool,
        window: TimeWindow,
    ) -> bool {
        let fraction = self.remaining_fraction(interferer);
        trace!(
            "{}: removing interferer {} leaving {:.4} of its power",
            self.name(),
            interferer.id,
            fraction
        );
        profile.remove_interferer(interferer, fraction, window, regenerative)
    }

    /// Cancel all interferers over the burst's whole interval and return the
    /// adjusted linear Es/No.
    fn eliminate_interferences(
        &self,
        profile: &mut InterferenceProfile,
        interferers: &[Interferer],
        raw_es_no: f64,
        regenerative: bool,
    ) -> f64 {
        let span = profile.span();
        self.eliminate_interferences_in_window(profile, interferers, raw_es_no, regenerative, span)
    }

    /// Cancel all interferers, restricted to `window`.
    ///
    /// If no fragment is touched `raw_es_no` is returned unchanged.
    fn eliminate_interferences_in_window(
        &self,
        profile: &mut InterferenceProfile,
        interferers: &[Interferer],
        raw_es_no: f64,
        regenerative: bool,
        window: TimeWindow,
    ) -> f64 {
        let mut touched = false;
        for interferer in interferers {
            touched |= self.eliminate_interference(profile, interferer, regenerative, window);
        }
        if touched {
            profile.es_no(regenerative)
        } else {
            raw_es_no
        }
    }
}

/// Interference is treated as noise.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoElimination;

impl InterferenceElimination for NoElimination {
    fn name(&self) -> &'static str {
        "none"
    }

    fn remaining_fraction(&self, _interferer: &Interferer) -> f64 {
        1.0
    }

    fn eliminate_interference(
        &self,
        _profile: &mut InterferenceProfile,
        _interferer: &Interferer,
        _regenerative: bool,
        _window: TimeWindow,
    ) -> bool {
        false
    }
}

/// Interferers are removed exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfectElimination;

impl InterferenceElimination for PerfectElimination {
    fn name(&self) -> &'static str {
        "perfect"
    }

    fn remaining_fraction(&self, _interferer: &Interferer) -> f64 {
        0.0
    }
}

/// How much of a cancelled interferer remains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResidualModel {
    /// Constant fraction.
    Fraction(f64),
    /// Amplitude and phase estimation error over a burst of known length.
    SamplingError {
        /// Sampling error coefficient.
        sampling_error: f64,
        /// Burst length in symbols.
        burst_length_symbols: u32,
    },
}

/// Cancellation that leaves a residual of each interferer's power.
#[derive(Debug, Clone, Copy)]
pub struct ResidualElimination {
    model: ResidualModel,
}

impl ResidualElimination {
    /// Create a residual strategy.
    pub fn new(model: ResidualModel) -> Self {
        ResidualElimination { model }
    }
}

impl InterferenceElimination for ResidualElimination {
    fn name(&self) -> &'static str {
        "residual"
    }

    fn remaining_fraction(&self, interferer: &Interferer) -> f64 {
        match self.model {
            ResidualModel::Fraction(f) => f.clamp(0.0, 1.0),
            ResidualModel::SamplingError {
                sampling_error,
                burst_length_symbols,
            } => {
                let l = burst_length_symbols as f64;
                if !(interferer.es_no > 0.0) || l <= 0.0 {
                    return 1.0;
                }
                let sigma_lambda_2 = 1.0 / (8.0 * l * interferer.es_no);
                let sigma_phi_2 = 1.0 / (2.0 * l * interferer.es_no);
                (2.0 + sigma_lambda_2 - 2.0 * sampling_error * (-sigma_phi_2 / 2.0).exp()).clamp(0.0, 1.0)
            }
        }
    }
}

/// Build the strategy selected by a configuration.
pub fn build_elimination(config: &EliminationConfig) -> Box<dyn InterferenceElimination> {
    match *config {
        EliminationConfig::Off => Box::new(NoElimination),
        EliminationConfig::Perfect => Box::new(PerfectElimination),
        EliminationConfig::Residual { fraction } => {
            Box::new(ResidualElimination::new(ResidualModel::Fraction(fraction)))
        }
        EliminationConfig::ResidualSampling {
            sampling_error,
            burst_length_symbols,
        } => Box::new(ResidualElimination::new(ResidualModel::SamplingError {
            sampling_error,
            burst_length_symbols,
        })),
    }
}
