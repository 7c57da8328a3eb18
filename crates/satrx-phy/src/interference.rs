//! Interference composition over the lifetime of one reception.
//!
//! An [`InterferenceProfile`] splits the wanted burst's interval into
//! fragments at every interferer's start and end. Each fragment holds the
//! interference power seen by the receiver and, for bent-pipe links, the
//! interference power seen by the satellite. Elimination strategies subtract
//! from these fragments; the profile then turns them back into an Es/No.

use satrx_common::{SimTime, UplinkBudget};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Powers below this are treated as exactly zero.
pub const POWER_FLOOR_W: f64 = 1e-30;

/// Boltzmann constant in dBW/K/Hz.
pub const BOLTZMANN_DBW: f64 = -228.6;

/// Convert a linear power ratio to dB.
pub fn to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Convert dB to a linear power ratio.
pub fn from_db(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

// ============================================================================
// Configuration
// ============================================================================

/// How interference across fragments is reduced to one Es/No.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterferenceMode {
    /// The worst fragment decides.
    #[default]
    PerFragment,
    /// Interference is averaged over the burst duration.
    PerPacket,
}

/// Where bent-pipe uplink noise enters the composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UplinkNoiseFolding {
    /// Subtract in the satellite domain, then compose uplink and downlink.
    #[default]
    AfterElimination,
    /// Fold uplink noise and interference into the downlink first, then
    /// subtract downlink interferer power.
    BeforeElimination,
}

/// Receiver noise model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseConfig {
    /// Fixed noise power.
    Constant {
        /// Noise power in W.
        power_w: f64,
    },
    /// Thermal noise plus external noise and adjacent-channel interference.
    Thermal {
        /// System noise temperature in dBK.
        temperature_dbk: f64,
        /// External noise density in dBW/Hz.
        #[serde(default = "default_ext_noise")]
        ext_noise_density_dbwhz: f64,
        /// Adjacent-channel interference relative to noise, in percent.
        #[serde(default)]
        aci_wrt_noise_percent: f64,
    },
}

fn default_ext_noise() -> f64 {
    f64::NEG_INFINITY
}

impl NoiseConfig {
    /// Noise power in W over the given bandwidth.
    pub fn power_w(&self, bandwidth_hz: f64) -> f64 {
        match *self {
            NoiseConfig::Constant { power_w } => power_w,
            NoiseConfig::Thermal {
                temperature_dbk,
                ext_noise_density_dbwhz,
                aci_wrt_noise_percent,
            } => {
                let thermal = from_db(BOLTZMANN_DBW + temperature_dbk) * bandwidth_hz;
                let external = from_db(ext_noise_density_dbwhz) * bandwidth_hz;
                (thermal + external) * (1.0 + aci_wrt_noise_percent / 100.0)
            }
        }
    }
}

// ============================================================================
// Profile Types
// ============================================================================

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: SimTime,
    /// Exclusive end.
    pub end: SimTime,
}

impl TimeWindow {
    /// Create a window.
    pub fn new(start: SimTime, end: SimTime) -> Self {
        TimeWindow { start, end }
    }

    /// Window with no bounds.
    pub fn unbounded() -> Self {
        TimeWindow {
            start: SimTime::ZERO,
            end: SimTime::MAX,
        }
    }

    /// Intersection with another window, if non-empty.
    pub fn intersect(&self, other: TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeWindow { start, end })
    }

    /// Whether two half-open intervals share any instant.
    pub fn overlaps(&self, other: TimeWindow) -> bool {
        self.intersect(other).is_some()
    }
}

/// One concurrent burst as seen from the burst of interest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interferer {
    /// Reception entry id at this carrier.
    pub id: u64,
    /// Arrival start.
    pub start: SimTime,
    /// Arrival end.
    pub end: SimTime,
    /// Power at this receiver (W).
    pub rx_power_w: f64,
    /// Power at the satellite for bent-pipe links (W).
    pub sat_rx_power_w: Option<f64>,
    /// Linear Es/No of the interferer; its decoded value once known.
    pub es_no: f64,
}

impl Interferer {
    /// Presence interval.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fragment {
    start: SimTime,
    end: SimTime,
    interference_w: f64,
    sat_interference_w: f64,
}

impl Fragment {
    fn duration(&self) -> f64 {
        (self.end - self.start).as_micros() as f64
    }
}

/// Interference seen by one burst, fragment by fragment.
#[derive(Debug, Clone)]
pub struct InterferenceProfile {
    start: SimTime,
    end: SimTime,
    signal_w: f64,
    noise_w: f64,
    uplink: Option<UplinkBudget>,
    mode: InterferenceMode,
    fragments: Vec<Fragment>,
    folded: bool,
}

impl InterferenceProfile {
    /// Create an interference-free profile for a burst.
    pub fn new(
        window: TimeWindow,
        signal_w: f64,
        noise_w: f64,
        uplink: Option<UplinkBudget>,
        mode: InterferenceMode,
    ) -> Self {
        InterferenceProfile {
            start: window.start,
            end: window.end,
            signal_w,
            noise_w,
            uplink,
            mode,
            fragments: vec![Fragment {
                start: window.start,
                end: window.end,
                interference_w: 0.0,
                sat_interference_w: 0.0,
            }],
            folded: false,
        }
    }

    /// The burst's own interval.
    pub fn span(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    /// Number of fragments.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Whether uplink noise has been folded into the downlink domain.
    pub fn is_folded(&self) -> bool {
        self.folded
    }

    fn split_at(&mut self, t: SimTime) {
        if let Some(idx) = self.fragments.iter().position(|f| f.start < t && t < f.end) {
            let mut tail = self.fragments[idx];
            tail.start = t;
            self.fragments[idx].end = t;
            self.fragments.insert(idx + 1, tail);
        }
    }

    fn covered(&mut self, window: TimeWindow) -> Option<TimeWindow> {
        let w = self.span().intersect(window)?;
        self.split_at(w.start);
        self.split_at(w.end);
        Some(w)
    }

    /// Add an interferer's power over the part of the burst it overlaps.
    ///
    /// Returns `false` if the two do not overlap.
    pub fn add_interferer(&mut self, interferer: &Interferer) -> bool {
        let Some(w) = self.covered(interferer.window()) else {
            return false;
        };
        for f in self.fragments.iter_mut().filter(|f| f.start >= w.start && f.end <= w.end) {
            f.interference_w += interferer.rx_power_w;
            f.sat_interference_w += interferer.sat_rx_power_w.unwrap_or(0.0);
        }
        true
    }

    /// Subtract an interferer, leaving `remaining_fraction` of its power.
    ///
    /// Only fragments inside the interferer's presence and `window` are
    /// touched. Bent-pipe profiles subtract in the satellite domain unless
    /// uplink noise has been folded. Returns `false` if nothing was touched.
    pub fn remove_interferer(
        &mut self,
        interferer: &Interferer,
        remaining_fraction: f64,
        window: TimeWindow,
        regenerative: bool,
    ) -> bool {
        let Some(presence) = interferer.window().intersect(window) else {
            return false;
        };
        let Some(w) = self.covered(presence) else {
            return false;
        };
        let removed = 1.0 - remaining_fraction.clamp(0.0, 1.0);
        let satellite_domain = !regenerative && self.uplink.is_some() && !self.folded;
        let amount = if satellite_domain {
            interferer.sat_rx_power_w.unwrap_or(0.0) * removed
        } else {
            interferer.rx_power_w * removed
        };
        for f in self.fragments.iter_mut().filter(|f| f.start >= w.start && f.end <= w.end) {
            let slot = if satellite_domain {
                &mut f.sat_interference_w
            } else {
                &mut f.interference_w
            };
            let left = *slot - amount;
            if left < -amount * 1e-9 {
                warn!(
                    "Interferer {} over-subtracted by {:.3e} W, clamping to zero",
                    interferer.id, -left
                );
            }
            *slot = if left < POWER_FLOOR_W { 0.0 } else { left };
        }
        true
    }

    /// Fold bent-pipe uplink noise and interference into the downlink domain.
    pub fn fold_uplink(&mut self) {
        if self.folded {
            return;
        }
        let Some(up) = self.uplink else {
            return;
        };
        if up.rx_power_w <= 0.0 {
            return;
        }
        let scale = self.signal_w / up.rx_power_w;
        for f in &mut self.fragments {
            f.interference_w += (up.noise_w + f.sat_interference_w) * scale;
            f.sat_interference_w = 0.0;
        }
        self.folded = true;
    }

    fn sinr(&self, interference_w: f64, sat_interference_w: f64, regenerative: bool) -> f64 {
        let down = self.signal_w / (self.noise_w + interference_w);
        match self.uplink {
            Some(up) if !regenerative && !self.folded => {
                let upl = up.rx_power_w / (up.noise_w + sat_interference_w);
                1.0 / (1.0 / upl + 1.0 / down)
            }
            _ => down,
        }
    }

    /// Linear Es/No and the interference power behind it.
    ///
    /// Per-fragment mode reports the worst fragment; per-packet mode the
    /// time-weighted average.
    pub fn evaluate(&self, regenerative: bool) -> (f64, f64) {
        match self.mode {
            InterferenceMode::PerFragment => {
                let mut worst = (f64::INFINITY, 0.0);
                for f in &self.fragments {
                    let es_no = self.sinr(f.interference_w, f.sat_interference_w, regenerative);
                    if es_no < worst.0 {
                        worst = (es_no, f.interference_w);
                    }
                }
                worst
            }
            InterferenceMode::PerPacket => {
                let total: f64 = self.fragments.iter().map(Fragment::duration).sum();
                if total <= 0.0 {
                    let f = self.fragments[0];
                    return (self.sinr(f.interference_w, f.sat_interference_w, regenerative), f.interference_w);
                }
                let avg = |get: fn(&Fragment) -> f64| -> f64 {
                    self.fragments.iter().map(|f| get(f) * f.duration()).sum::<f64>() / total
                };
                let i = avg(|f| f.interference_w);
                let i_sat = avg(|f| f.sat_interference_w);
                (self.sinr(i, i_sat, regenerative), i)
            }
        }
    }

    /// Linear Es/No of the burst given the current fragments.
    pub fn es_no(&self, regenerative: bool) -> f64 {
        self.evaluate(regenerative).0
    }
}
